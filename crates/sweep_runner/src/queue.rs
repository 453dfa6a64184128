//! Run-scoped FIFO shared by the workers.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use sweep_core::job::Job;

/// Pending jobs plus every job that has left the queue, so a report can
/// account for all of them.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Job>>,
    retired: Mutex<Vec<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Job) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }

    /// Non-blocking pop; `None` means the queue is empty right now.
    pub fn try_pop(&self) -> Option<Job> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retire(&self, job: Job) {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
    }

    pub fn retired_len(&self) -> usize {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Take every retired job, ordered by id.
    pub fn take_retired(&self) -> Vec<Job> {
        let mut jobs =
            std::mem::take(&mut *self.retired.lock().unwrap_or_else(PoisonError::into_inner));
        jobs.sort_by_key(Job::id);
        jobs
    }
}
