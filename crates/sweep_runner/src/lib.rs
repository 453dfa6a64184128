//! Runtime for parametrized program sweeps.
//!
//! # Quick Start
//!
//! ```no_run
//! use sweep_runner::{run_sweep, ObserverRegistry, RunOptions, SweepConfig};
//!
//! let config = SweepConfig::load("sweep.toml")?;
//! let outcome = run_sweep(&config, &RunOptions::default(), &ObserverRegistry::builtin())?;
//! println!("{} of {} jobs completed", outcome.report.summary.completed, outcome.report.summary.total);
//! # Ok::<(), sweep_core::SweepError>(())
//! ```
//!
//! # Architecture
//!
//! - [`config`]: TOML declaration with `SWEEP_*` overrides
//! - [`scheduler`]: fixed worker pool over a shared FIFO ([`queue`])
//! - [`checkpoint`]: resume state in `<state_dir>/unsaved-state.json`
//! - [`observers`]: named observers enabled through `plugins`
//! - [`signal`]: Ctrl-C → `interrupt-received`
//! - [`export`]: JSON / CSV run reports
//! - [`app`]: wiring for the `sweep` binary

pub mod app;
pub mod checkpoint;
pub mod config;
pub mod export;
pub mod observers;
pub mod queue;
pub mod scheduler;
pub mod signal;

pub use app::{exit_status, plan, run_sweep, status, CheckpointStatus, PlannedJob, RunOptions, RunOutcome};
pub use checkpoint::CheckpointStore;
pub use config::SweepConfig;
pub use export::{export_report, export_to_csv, export_to_json};
pub use observers::{ObserverContext, ObserverRegistry};
pub use scheduler::{RunReport, Scheduler};
