//! Run orchestration: declaration → jobs → observers → workers → report.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sweep_core::events::EventBus;
use sweep_core::job::JobState;
use sweep_core::Result;
use tracing::info;
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::SweepConfig;
use crate::export::export_report;
use crate::observers::{ObserverContext, ObserverRegistry, CHECKPOINT};
use crate::scheduler::{RunReport, Scheduler};
use crate::signal::InterruptListener;

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workers: Option<usize>,
    pub dry_run: bool,
    /// Delete an existing checkpoint before running.
    pub fresh: bool,
    pub report: Option<PathBuf>,
}

impl RunOptions {
    pub fn apply(&self, config: &mut SweepConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.dry_run {
            config.dry_run = true;
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Set when the checkpoint observer was enabled.
    pub run_id: Option<Uuid>,
}

/// Expand, build and run the declared job set to completion.
///
/// `options` only controls the checkpoint reset and the report; apply its
/// overrides to `config` beforehand with [`RunOptions::apply`].
pub fn run_sweep(config: &SweepConfig, options: &RunOptions, registry: &ObserverRegistry) -> Result<RunOutcome> {
    config.validate()?;
    let tuples = config.argument_spec()?.expand()?;
    info!(jobs = tuples.len(), workers = config.workers, dry_run = config.dry_run, "job set expanded");

    let bus = Arc::new(EventBus::new());
    let mut jobs = config.job_template().build(tuples, &bus)?;

    let checkpoint = if config.plugins.iter().any(|name| name == CHECKPOINT) {
        let store = CheckpointStore::open(&config.state_dir)?;
        if options.fresh {
            store.clear()?;
        }
        store.apply(&mut jobs)?;
        Some(Arc::new(store))
    } else {
        None
    };

    let context = ObserverContext {
        checkpoint: checkpoint.clone(),
        queued_jobs: jobs.iter().filter(|job| job.state() == JobState::Scheduled).count(),
    };
    let subscriptions = registry.install(&config.plugins, &bus, &context)?;

    let (scheduler, listener) = start_workers(&bus, config)?;
    let result = scheduler.run(jobs);

    drop(listener);
    drop(scheduler);
    for id in subscriptions {
        bus.unsubscribe(id);
    }

    let outcome = RunOutcome {
        report: result?,
        run_id: checkpoint.map(|store| store.run_id()),
    };
    if let Some(path) = &options.report {
        export_report(&outcome.report, outcome.run_id, path)?;
    }
    Ok(outcome)
}

/// Process exit status for a finished command. A run that returns is a
/// success even when jobs were canceled or failed; configuration errors map
/// to 2 and every other error to 1.
pub fn exit_status<T>(result: &Result<T>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(error) if error.is_configuration() => 2,
        Err(_) => 1,
    }
}

/// The clear-queue drain is subscribed before Ctrl-C can publish.
fn start_workers(bus: &Arc<EventBus>, config: &SweepConfig) -> Result<(Scheduler, Option<InterruptListener>)> {
    let scheduler = Scheduler::new(Arc::clone(bus), config.workers)?;
    let listener = if config.capture_sigint {
        Some(InterruptListener::install(Arc::clone(bus))?)
    } else {
        None
    };
    Ok((scheduler, listener))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedJob {
    pub id: u64,
    pub command_line: String,
    pub fingerprint: String,
    /// Already recorded in the checkpoint; a run would skip it.
    pub completed: bool,
}

/// Expand the job set without running or publishing anything.
pub fn plan(config: &SweepConfig) -> Result<Vec<PlannedJob>> {
    config.validate()?;
    let tuples = config.argument_spec()?.expand()?;
    let template = config.job_template();
    let checkpoint = CheckpointStore::read(&config.state_dir)?;

    tuples
        .into_iter()
        .enumerate()
        .map(|(id, tuple)| {
            let job = template.instantiate(id as u64, tuple)?;
            Ok(PlannedJob {
                id: job.id(),
                command_line: job.command_line(),
                fingerprint: job.fingerprint().to_string(),
                completed: checkpoint
                    .as_ref()
                    .is_some_and(|record| record.contains(job.fingerprint())),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointStatus {
    pub path: PathBuf,
    pub run_id: Uuid,
    pub completed: usize,
}

/// Describe the resumable run in the state directory, if there is one.
pub fn status(config: &SweepConfig) -> Result<Option<CheckpointStatus>> {
    let path = config.checkpoint_path();
    Ok(CheckpointStore::read(&config.state_dir)?.map(|record| CheckpointStatus {
        path,
        run_id: record.run_id,
        completed: record.jobs.len(),
    }))
}
