//! Named observers that can be switched on from the `plugins` list.
//!
//! Each name maps to a factory that subscribes handlers on the bus. The
//! factories are installed in the order the configuration lists them, which is
//! also the order their handlers run on a shared channel.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use sweep_core::events::{Channel, EventBus, LifecycleEvent, SubscriptionId};
use sweep_core::{Result, SweepError};
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;

pub const CHECKPOINT: &str = "checkpoint";
pub const LOG_EVENTS: &str = "log-events";
pub const GRACEFUL_INTERRUPT: &str = "graceful-interrupt";
pub const PROGRESS: &str = "progress";

pub const BUILTIN_OBSERVERS: [&str; 4] = [CHECKPOINT, LOG_EVENTS, GRACEFUL_INTERRUPT, PROGRESS];

/// What a factory may need besides the bus.
#[derive(Debug, Clone, Default)]
pub struct ObserverContext {
    pub checkpoint: Option<Arc<CheckpointStore>>,
    /// Jobs that will actually be queued.
    pub queued_jobs: usize,
}

pub type ObserverFactory = fn(&EventBus, &ObserverContext) -> Result<Vec<SubscriptionId>>;

#[derive(Default)]
pub struct ObserverRegistry {
    factories: Vec<(String, ObserverFactory)>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CHECKPOINT, install_checkpoint);
        registry.register(LOG_EVENTS, install_log_events);
        registry.register(GRACEFUL_INTERRUPT, install_graceful_interrupt);
        registry.register(PROGRESS, install_progress);
        registry
    }

    /// Add a factory, replacing any existing one with the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: ObserverFactory) {
        let name = name.into();
        match self.factories.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = factory,
            None => self.factories.push((name, factory)),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.factories.len();
        self.factories.retain(|(existing, _)| existing != name);
        self.factories.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(existing, _)| existing == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Install the named observers in order. Nothing is installed when a name
    /// is unknown.
    pub fn install(
        &self,
        names: &[String],
        bus: &EventBus,
        context: &ObserverContext,
    ) -> Result<Vec<SubscriptionId>> {
        let factories = names
            .iter()
            .map(|name| {
                self.factories
                    .iter()
                    .find(|(existing, _)| existing == name)
                    .map(|(_, factory)| (name, *factory))
                    .ok_or_else(|| SweepError::config(format!("unknown plugin `{name}`")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut subscriptions = Vec::new();
        for (name, factory) in factories {
            subscriptions.extend(factory(bus, context)?);
            info!(plugin = %name, "observer installed");
        }
        Ok(subscriptions)
    }
}

fn install_checkpoint(bus: &EventBus, context: &ObserverContext) -> Result<Vec<SubscriptionId>> {
    let store = context
        .checkpoint
        .as_ref()
        .ok_or_else(|| SweepError::config("the checkpoint observer needs an open checkpoint store"))?;
    Ok(store.attach(bus))
}

fn install_log_events(bus: &EventBus, _context: &ObserverContext) -> Result<Vec<SubscriptionId>> {
    Ok(vec![
        bus.subscribe_fn(Channel::JobCompleted, LOG_EVENTS, |_, event| {
            if let Some(job) = event.job() {
                info!(job_id = job.id(), exit_code = ?job.exit_code(), command = %job.command_line(), "job completed");
            }
            Ok(())
        }),
        bus.subscribe_fn(Channel::JobError, LOG_EVENTS, |_, event| {
            if let Some(job) = event.job() {
                warn!(job_id = job.id(), command = %job.command_line(), "job failed to start");
            }
            Ok(())
        }),
        bus.subscribe_fn(Channel::JobCanceled, LOG_EVENTS, |_, event| {
            if let Some(job) = event.job() {
                info!(job_id = job.id(), "job canceled");
            }
            Ok(())
        }),
    ])
}

/// Interrupt → clear-queue: queued jobs are canceled, running ones finish.
fn install_graceful_interrupt(
    bus: &EventBus,
    _context: &ObserverContext,
) -> Result<Vec<SubscriptionId>> {
    Ok(vec![bus.subscribe_fn(
        Channel::InterruptReceived,
        GRACEFUL_INTERRUPT,
        |bus, _| {
            warn!("interrupt received, canceling queued jobs");
            bus.publish(&LifecycleEvent::ClearQueue)
        },
    )])
}

fn install_progress(bus: &EventBus, context: &ObserverContext) -> Result<Vec<SubscriptionId>> {
    let bar = ProgressBar::new(context.queued_jobs as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map_err(|error| SweepError::config(format!("invalid progress template: {error}")))?
            .progress_chars("#>-"),
    );

    let on_finish = bar.clone();
    let on_cancel = bar.clone();
    Ok(vec![
        bus.subscribe_fn(Channel::AfterExecution, PROGRESS, move |_, _| {
            on_finish.inc(1);
            Ok(())
        }),
        bus.subscribe_fn(Channel::JobCanceled, PROGRESS, move |_, _| {
            on_cancel.inc(1);
            Ok(())
        }),
        bus.subscribe_fn(Channel::RunCleanup, PROGRESS, move |_, _| {
            bar.finish_with_message("Completed");
            Ok(())
        }),
    ])
}
