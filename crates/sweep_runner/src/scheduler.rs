//! Fixed-size worker pool draining a shared job queue.
//!
//! Exactly `workers` threads are started on a dedicated rayon pool with
//! [`rayon::ThreadPool::broadcast`]. Each worker pops jobs without blocking
//! and exits as soon as the queue is empty. Cancellation (clear-queue) only
//! touches jobs still in the queue; running jobs finish normally.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sweep_core::events::{Channel, EventBus, LifecycleEvent, RunSummary, SubscriptionId, WorkerFailure};
use sweep_core::job::{Job, JobState};
use sweep_core::{Result, SweepError};
use tracing::{debug, error, info};

use crate::queue::JobQueue;

/// Every job of a run, by id, plus the summary published with run-cleanup.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub jobs: Vec<Job>,
}

pub struct Scheduler {
    bus: Arc<EventBus>,
    queue: Arc<JobQueue>,
    workers: usize,
    skipped: AtomicUsize,
    drain: SubscriptionId,
}

impl Scheduler {
    /// Create a scheduler with `workers` workers and subscribe its clear-queue
    /// handler. The handler is removed again when the scheduler is dropped.
    pub fn new(bus: Arc<EventBus>, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(SweepError::config("worker count must be at least 1"));
        }

        let queue = Arc::new(JobQueue::new());
        let drained = Arc::clone(&queue);
        let drain = bus.subscribe_fn(Channel::ClearQueue, "scheduler-drain", move |bus, _| {
            cancel_queued(&drained, bus)
        });

        Ok(Self {
            bus,
            queue,
            workers,
            skipped: AtomicUsize::new(0),
            drain,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Queue every SCHEDULED job in order. Other jobs are retired at once;
    /// COMPLETED ones count as skipped.
    pub fn enqueue(&self, jobs: impl IntoIterator<Item = Job>) {
        for job in jobs {
            if job.state() == JobState::Scheduled {
                self.queue.push(job);
            } else {
                if job.state() == JobState::Completed {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
                debug!(job_id = job.id(), state = %job.state(), "job not queued");
                self.queue.retire(job);
            }
        }
    }

    pub fn run(&self, jobs: impl IntoIterator<Item = Job>) -> Result<RunReport> {
        self.enqueue(jobs);
        self.run_queued()
    }

    /// Start the workers, wait for all of them, then publish run-cleanup once.
    ///
    /// A worker that hits an error stops; its siblings keep draining. Worker
    /// errors end up in [`RunSummary::worker_failures`], not in the result.
    pub fn run_queued(&self) -> Result<RunReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|index| format!("sweep-worker-{index}"))
            .build()
            .map_err(|error| SweepError::Io(std::io::Error::other(error.to_string())))?;

        info!(workers = self.workers, queued = self.queue.len(), "starting workers");
        let outcomes: Vec<Result<usize>> = pool.broadcast(|ctx| self.worker_loop(ctx.index()));

        let mut worker_failures = Vec::new();
        for (worker, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(executed) => debug!(worker, executed, "worker finished"),
                Err(error) => {
                    error!(worker, %error, "worker stopped");
                    worker_failures.push(WorkerFailure {
                        worker,
                        message: error.to_string(),
                    });
                }
            }
        }

        // Left behind when every worker stopped early.
        while let Some(job) = self.queue.try_pop() {
            self.queue.retire(job);
        }

        let jobs = self.queue.take_retired();
        let skipped = self.skipped.swap(0, Ordering::Relaxed);
        let summary = summarize(&jobs, skipped, worker_failures);
        info!(
            total = summary.total,
            completed = summary.completed,
            canceled = summary.canceled,
            failed = summary.failed,
            skipped = summary.skipped,
            unfinished = summary.unfinished,
            "run finished"
        );

        self.bus.publish(&LifecycleEvent::RunCleanup { summary: &summary })?;
        Ok(RunReport { summary, jobs })
    }

    fn worker_loop(&self, worker: usize) -> Result<usize> {
        let mut executed = 0;
        while let Some(mut job) = self.queue.try_pop() {
            if let Err(error) = self
                .bus
                .publish(&LifecycleEvent::BeforeExecution { job: &job, worker })
            {
                self.queue.retire(job);
                return Err(error);
            }

            let outcome = job.execute(&self.bus);
            let published = self
                .bus
                .publish(&LifecycleEvent::AfterExecution { job: &job, worker });
            self.queue.retire(job);

            outcome?;
            published?;
            executed += 1;
        }
        Ok(executed)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.drain);
    }
}

fn cancel_queued(queue: &JobQueue, bus: &EventBus) -> Result<()> {
    let mut canceled = 0;
    while let Some(mut job) = queue.try_pop() {
        let result = job.set_state(JobState::Canceled, bus);
        queue.retire(job);
        result?;
        canceled += 1;
    }
    info!(canceled, "queue cleared");
    Ok(())
}

fn summarize(jobs: &[Job], skipped: usize, worker_failures: Vec<WorkerFailure>) -> RunSummary {
    let count = |state: JobState| jobs.iter().filter(|job| job.state() == state).count();
    RunSummary {
        total: jobs.len(),
        completed: count(JobState::Completed).saturating_sub(skipped),
        canceled: count(JobState::Canceled),
        failed: count(JobState::Error),
        skipped,
        unfinished: count(JobState::Created) + count(JobState::Scheduled) + count(JobState::Running),
        worker_failures,
    }
}
