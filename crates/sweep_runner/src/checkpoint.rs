//! Resumable run state persisted to `<state_dir>/unsaved-state.json`.
//!
//! Every completion rewrites the whole file while holding the record lock, so
//! the file on disk always matches the in-memory record. The rewrite costs
//! O(completed jobs) per completion.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use sweep_core::contract::CheckpointRecord;
use sweep_core::events::{Channel, EventBus, LifecycleEvent, SubscriptionId};
use sweep_core::job::{Job, JobState};
use sweep_core::Result;
use tracing::{debug, info};
use uuid::Uuid;

pub const CHECKPOINT_FILE: &str = "unsaved-state.json";

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    record: Mutex<CheckpointRecord>,
}

impl CheckpointStore {
    /// Create `state_dir` if needed and load an existing checkpoint from it.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(CHECKPOINT_FILE);

        let record = match Self::read(state_dir)? {
            Some(loaded) => {
                info!(
                    path = %path.display(),
                    run_id = %loaded.run_id,
                    completed = loaded.jobs.len(),
                    "resuming from checkpoint"
                );
                let mut record = CheckpointRecord::new(loaded.run_id);
                record.merge(loaded);
                record
            }
            None => CheckpointRecord::new(Uuid::new_v4()),
        };

        Ok(Self {
            path,
            record: Mutex::new(record),
        })
    }

    /// Read the checkpoint in `state_dir` without creating or changing anything.
    pub fn read(state_dir: impl AsRef<Path>) -> Result<Option<CheckpointRecord>> {
        let path = state_dir.as_ref().join(CHECKPOINT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        CheckpointRecord::from_json(&bytes).map(Some)
    }

    fn lock(&self) -> MutexGuard<'_, CheckpointRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.lock().run_id
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lock().contains(fingerprint)
    }

    /// Silently fast-forward every SCHEDULED job already in the checkpoint to
    /// COMPLETED. Returns how many jobs were skipped.
    pub fn apply(&self, jobs: &mut [Job]) -> Result<usize> {
        let record = self.lock();
        let mut skipped = 0;
        for job in jobs
            .iter_mut()
            .filter(|job| job.state() == JobState::Scheduled && record.contains(job.fingerprint()))
        {
            job.set_state_silently(JobState::Completed)?;
            skipped += 1;
        }
        if skipped > 0 {
            info!(skipped, "jobs already completed in a previous run");
        }
        Ok(skipped)
    }

    /// Store the job's snapshot and rewrite the checkpoint file.
    pub fn record(&self, job: &Job) -> Result<()> {
        let mut record = self.lock();
        record.insert(job.snapshot());
        let bytes = record.to_json()?;
        atomic_write_bytes(&self.path, &bytes)?;
        debug!(job_id = job.id(), fingerprint = job.fingerprint(), "checkpoint updated");
        Ok(())
    }

    /// Delete the checkpoint file and forget every recorded job.
    pub fn clear(&self) -> Result<bool> {
        let mut record = self.lock();
        record.jobs.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "checkpoint removed");
            return Ok(true);
        }
        Ok(false)
    }

    /// Record completions on after-execution; remove the file on a clean run-cleanup.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        let on_finish = Arc::clone(self);
        let on_cleanup = Arc::clone(self);
        vec![
            bus.subscribe_fn(Channel::AfterExecution, "checkpoint", move |_, event| {
                match event {
                    LifecycleEvent::AfterExecution { job, .. }
                        if job.state() == JobState::Completed =>
                    {
                        on_finish.record(job)
                    }
                    _ => Ok(()),
                }
            }),
            bus.subscribe_fn(Channel::RunCleanup, "checkpoint", move |_, event| {
                if let LifecycleEvent::RunCleanup { summary } = event {
                    if summary.is_clean() {
                        on_cleanup.clear()?;
                    } else {
                        info!(
                            path = %on_cleanup.path().display(),
                            "run incomplete, checkpoint kept for resume"
                        );
                    }
                }
                Ok(())
            }),
        ]
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(CHECKPOINT_FILE);
    let tmp = path.with_file_name(format!(".{name}.tmp.{pid}.{ts}"));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use sweep_core::events::RunSummary;

    fn completed_job(id: u64, height: &str) -> Job {
        let mut job = Job::new(id, "rect_area", vec![("--height".to_string(), height.to_string())]);
        job.set_state_silently(JobState::Scheduled).unwrap();
        job.set_state_silently(JobState::Completed).unwrap();
        job
    }

    #[test]
    fn fresh_store_has_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("state")).unwrap();

        assert!(store.is_empty());
        assert!(!store.path().exists());
        assert!(dir.path().join("state").is_dir());
    }

    #[test]
    fn recorded_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job = completed_job(0, "2");

        let run_id = {
            let store = CheckpointStore::open(dir.path()).unwrap();
            store.record(&job).unwrap();
            store.run_id()
        };

        let reopened = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.run_id(), run_id);
        assert!(reopened.contains(job.fingerprint()));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn apply_fast_forwards_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        store.record(&completed_job(0, "2")).unwrap();

        let bus = EventBus::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        bus.subscribe_fn(Channel::JobCompleted, "count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut jobs = vec![
            Job::new(0, "rect_area", vec![("--height".to_string(), "2".to_string())]),
            Job::new(1, "rect_area", vec![("--height".to_string(), "4".to_string())]),
        ];
        for job in &mut jobs {
            job.set_state(JobState::Scheduled, &bus).unwrap();
        }

        assert_eq!(store.apply(&mut jobs).unwrap(), 1);
        assert_eq!(jobs[0].state(), JobState::Completed);
        assert_eq!(jobs[1].state(), JobState::Scheduled);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clean_cleanup_removes_file_and_dirty_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::open(dir.path()).unwrap());
        let bus = EventBus::new();
        store.attach(&bus);

        let job = completed_job(0, "2");
        bus.publish(&LifecycleEvent::AfterExecution { job: &job, worker: 0 })
            .unwrap();
        assert!(store.path().exists());

        let dirty = RunSummary {
            total: 2,
            completed: 1,
            canceled: 1,
            ..RunSummary::default()
        };
        bus.publish(&LifecycleEvent::RunCleanup { summary: &dirty }).unwrap();
        assert!(store.path().exists());

        let clean = RunSummary {
            total: 1,
            completed: 1,
            ..RunSummary::default()
        };
        bus.publish(&LifecycleEvent::RunCleanup { summary: &clean }).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn only_completed_jobs_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::open(dir.path()).unwrap());
        let bus = EventBus::new();
        store.attach(&bus);

        let mut job = Job::new(0, "rect_area", Vec::new());
        job.set_state_silently(JobState::Scheduled).unwrap();
        job.set_state_silently(JobState::Running).unwrap();
        job.set_state_silently(JobState::Error).unwrap();
        bus.publish(&LifecycleEvent::AfterExecution { job: &job, worker: 0 })
            .unwrap();

        assert!(store.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn unreadable_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CHECKPOINT_FILE), b"not json").unwrap();

        let error = CheckpointStore::open(dir.path()).expect_err("corrupt file");
        assert!(matches!(error, sweep_core::SweepError::Checkpoint(_)));
    }
}
