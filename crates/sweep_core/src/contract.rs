//! Stable serialized shapes: the fingerprint input and the checkpoint record.
//!
//! Both are versioned so a later format change can be detected instead of
//! silently producing different fingerprints or misreading an old checkpoint.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, SweepError};
use crate::job::JobState;

pub const FINGERPRINT_SCHEMA_VERSION: &str = "job-fingerprint/v1";
pub const CHECKPOINT_SCHEMA_VERSION: &str = "v1";

/// Only the fields that identify an invocation across runs.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    schema: &'a str,
    executable: &'a str,
    cli_args: &'a [(String, String)],
}

/// SHA-256 (hex) of the canonical JSON of `executable` + ordered `cli_args`.
pub fn job_fingerprint(executable: &str, cli_args: &[(String, String)]) -> String {
    contract_fingerprint(&FingerprintInput {
        schema: FINGERPRINT_SCHEMA_VERSION,
        executable,
        cli_args,
    })
}

pub fn contract_fingerprint(value: impl Serialize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(value));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    // Struct fields serialize in declaration order and every map here is a
    // BTreeMap, so the output is stable for identical input.
    serde_json::to_string(&value).expect("contract values serialize to JSON")
}

/// Persisted view of a job. Runtime-only fields (execution mode, open
/// streams) are not stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: u64,
    pub executable: String,
    pub cli_args: Vec<(String, String)>,
    pub fingerprint: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub schema_version: String,
    pub run_id: Uuid,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobSnapshot>,
}

impl CheckpointRecord {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION.to_string(),
            run_id,
            jobs: BTreeMap::new(),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let record: Self = serde_json::from_slice(bytes)
            .map_err(|error| SweepError::Checkpoint(format!("unreadable checkpoint: {error}")))?;
        if record.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return Err(SweepError::Checkpoint(format!(
                "unsupported checkpoint schema `{}` (expected `{CHECKPOINT_SCHEMA_VERSION}`)",
                record.schema_version
            )));
        }
        if let Some((key, _)) = record
            .jobs
            .iter()
            .find(|(key, snapshot)| **key != snapshot.fingerprint)
        {
            return Err(SweepError::Checkpoint(format!(
                "checkpoint entry `{key}` does not match its snapshot fingerprint"
            )));
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Fold another record's entries into this one; entries already present win.
    pub fn merge(&mut self, other: CheckpointRecord) {
        for (fingerprint, snapshot) in other.jobs {
            self.jobs.entry(fingerprint).or_insert(snapshot);
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.jobs.contains_key(fingerprint)
    }

    pub fn insert(&mut self, snapshot: JobSnapshot) {
        self.jobs.insert(snapshot.fingerprint.clone(), snapshot);
    }
}
