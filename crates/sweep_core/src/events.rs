//! Lifecycle event bus.
//!
//! A fixed set of named channels; handlers run synchronously in registration
//! order on the publishing thread. A failing handler stops the dispatch and
//! its error propagates to the publisher, so handlers get no isolation from
//! each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SweepError};
use crate::job::{Job, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    JobCreated,
    JobScheduled,
    JobRunning,
    JobCompleted,
    JobCanceled,
    JobError,
    BeforeExecution,
    AfterExecution,
    RunCleanup,
    ClearQueue,
    InterruptReceived,
}

impl Channel {
    pub const ALL: [Channel; 11] = [
        Channel::JobCreated,
        Channel::JobScheduled,
        Channel::JobRunning,
        Channel::JobCompleted,
        Channel::JobCanceled,
        Channel::JobError,
        Channel::BeforeExecution,
        Channel::AfterExecution,
        Channel::RunCleanup,
        Channel::ClearQueue,
        Channel::InterruptReceived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobCreated => "job-created",
            Self::JobScheduled => "job-scheduled",
            Self::JobRunning => "job-running",
            Self::JobCompleted => "job-completed",
            Self::JobCanceled => "job-canceled",
            Self::JobError => "job-error",
            Self::BeforeExecution => "before-execution",
            Self::AfterExecution => "after-execution",
            Self::RunCleanup => "run-cleanup",
            Self::ClearQueue => "clear-queue",
            Self::InterruptReceived => "interrupt-received",
        }
    }

    /// Channel notified when a job enters `state`.
    pub fn for_state(state: JobState) -> Self {
        match state {
            JobState::Created => Self::JobCreated,
            JobState::Scheduled => Self::JobScheduled,
            JobState::Running => Self::JobRunning,
            JobState::Completed => Self::JobCompleted,
            JobState::Canceled => Self::JobCanceled,
            JobState::Error => Self::JobError,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a whole run, published once with run-cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub canceled: usize,
    pub failed: usize,
    /// Already COMPLETED before scheduling (resumed from a checkpoint).
    pub skipped: usize,
    /// Still SCHEDULED or RUNNING after every worker exited.
    pub unfinished: usize,
    pub worker_failures: Vec<WorkerFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: usize,
    pub message: String,
}

impl RunSummary {
    /// Every scheduled job ran to COMPLETED and no worker crashed.
    pub fn is_clean(&self) -> bool {
        self.canceled == 0
            && self.failed == 0
            && self.unfinished == 0
            && self.worker_failures.is_empty()
    }
}

/// Payload of every channel. The channel is derived from the variant.
#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent<'a> {
    /// A job entered a new state. Routed to the channel of `job.state()`.
    StateChanged {
        job: &'a Job,
        previous: Option<JobState>,
    },
    /// Carries a private copy of the job taken before execution.
    BeforeExecution { job: &'a Job, worker: usize },
    /// Carries a private copy of the job taken after execution.
    AfterExecution { job: &'a Job, worker: usize },
    RunCleanup { summary: &'a RunSummary },
    ClearQueue,
    InterruptReceived,
}

impl LifecycleEvent<'_> {
    pub fn channel(&self) -> Channel {
        match self {
            Self::StateChanged { job, .. } => Channel::for_state(job.state()),
            Self::BeforeExecution { .. } => Channel::BeforeExecution,
            Self::AfterExecution { .. } => Channel::AfterExecution,
            Self::RunCleanup { .. } => Channel::RunCleanup,
            Self::ClearQueue => Channel::ClearQueue,
            Self::InterruptReceived => Channel::InterruptReceived,
        }
    }

    /// The job carried by the event, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::StateChanged { job, .. }
            | Self::BeforeExecution { job, .. }
            | Self::AfterExecution { job, .. } => Some(*job),
            Self::RunCleanup { .. } | Self::ClearQueue | Self::InterruptReceived => None,
        }
    }
}

/// Observer callback. Receives the bus so it can publish follow-up events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, bus: &EventBus, event: &LifecycleEvent<'_>) -> Result<()>;
}

struct FnHandler<F>(F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventBus, &LifecycleEvent<'_>) -> Result<()> + Send + Sync,
{
    fn handle(&self, bus: &EventBus, event: &LifecycleEvent<'_>) -> Result<()> {
        (self.0)(bus, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    name: String,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<Channel, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        channel: Channel,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!(%channel, handler = %name, "handler subscribed");

        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels.entry(channel).or_default().push(Subscription { id, name, handler });
        id
    }

    pub fn subscribe_fn<F>(&self, channel: Channel, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&EventBus, &LifecycleEvent<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(channel, name, Arc::new(FnHandler(handler)))
    }

    /// Remove a handler. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        for (channel, subscriptions) in channels.iter_mut() {
            if let Some(pos) = subscriptions.iter().position(|s| s.id == id) {
                let removed = subscriptions.remove(pos);
                debug!(%channel, handler = %removed.name, "handler unsubscribed");
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, channel: Channel) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels.get(&channel).map_or(0, Vec::len)
    }

    /// Invoke every handler of the event's channel in registration order.
    ///
    /// The handler list is snapshotted first, so handlers may publish or
    /// (un)subscribe without deadlocking; such changes apply to the next
    /// publish.
    pub fn publish(&self, event: &LifecycleEvent<'_>) -> Result<()> {
        let channel = event.channel();
        let handlers: Vec<(String, Arc<dyn EventHandler>)> = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            channels
                .get(&channel)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.name.clone(), Arc::clone(&s.handler)))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (name, handler) in handlers {
            handler
                .handle(self, event)
                .map_err(|source| SweepError::Handler {
                    channel,
                    handler: name,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            bus.subscribe_fn(Channel::ClearQueue, label, move |_, _| {
                calls.lock().unwrap().push(label);
                Ok(())
            });
        }

        bus.publish(&LifecycleEvent::ClearQueue).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn publish_only_reaches_the_event_channel() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe_fn(Channel::InterruptReceived, "count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&LifecycleEvent::ClearQueue).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.publish(&LifecycleEvent::InterruptReceived).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_stops_dispatch_and_names_itself() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&reached);

        bus.subscribe_fn(Channel::ClearQueue, "broken", |_, _| {
            Err(SweepError::config("boom"))
        });
        bus.subscribe_fn(Channel::ClearQueue, "later", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let error = bus
            .publish(&LifecycleEvent::ClearQueue)
            .expect_err("handler failure propagates");
        match error {
            SweepError::Handler {
                channel, handler, ..
            } => {
                assert_eq!(channel, Channel::ClearQueue);
                assert_eq!(handler, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let id = bus.subscribe_fn(Channel::RunCleanup, "noop", |_, _| Ok(()));
        assert_eq!(bus.handler_count(Channel::RunCleanup), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.handler_count(Channel::RunCleanup), 0);
    }

    #[test]
    fn handlers_may_publish_follow_up_events() {
        let bus = EventBus::new();
        let cleared = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&cleared);

        bus.subscribe_fn(Channel::InterruptReceived, "escalate", |bus, _| {
            bus.publish(&LifecycleEvent::ClearQueue)
        });
        bus.subscribe_fn(Channel::ClearQueue, "count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&LifecycleEvent::InterruptReceived).unwrap();
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_names_are_unique() {
        let names: std::collections::HashSet<_> =
            Channel::ALL.iter().map(|channel| channel.as_str()).collect();
        assert_eq!(names.len(), Channel::ALL.len());
    }

    #[test]
    fn clean_summary_requires_no_failures() {
        let mut summary = RunSummary {
            total: 2,
            completed: 2,
            ..RunSummary::default()
        };
        assert!(summary.is_clean());

        summary.worker_failures.push(WorkerFailure {
            worker: 0,
            message: "spawn failed".to_string(),
        });
        assert!(!summary.is_clean());
    }
}
