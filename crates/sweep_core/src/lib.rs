//! Domain primitives for parametrized program sweeps.
//!
//! A declaration ([`parameters::ArgumentSpec`]) expands into argument tuples,
//! a [`jobset::JobTemplate`] turns them into [`job::Job`]s, and every job
//! reports its lifecycle through an [`events::EventBus`]. Scheduling, the
//! checkpoint file and the CLI live in `sweep_runner`.

pub mod contract;
pub mod error;
pub mod events;
pub mod job;
pub mod jobset;
pub mod parameters;
pub mod template;

pub use error::{Result, SweepError};
pub use events::{Channel, EventBus, EventHandler, LifecycleEvent, RunSummary, SubscriptionId};
pub use job::{ExecutionMode, Job, JobState, StreamTargets};
pub use jobset::{JobTemplate, StreamTemplates};
pub use parameters::{ArgValue, ArgumentSpec, CliArgs};
