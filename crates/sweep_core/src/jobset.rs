//! Turning expanded argument tuples into scheduled jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::error::{Result, SweepError};
use crate::events::EventBus;
use crate::job::{ExecutionMode, Job, JobState, StreamTargets};
use crate::parameters::CliArgs;
use crate::template;

/// Stream targets before interpolation, e.g. `out/{--height}.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTemplates {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Everything shared by the jobs of one job set.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    pub executable: String,
    pub streams: StreamTemplates,
    /// Flags whose values are themselves templates.
    pub interpolate: Vec<String>,
    pub mode: ExecutionMode,
    /// Extra template variables (e.g. `workers`); tuple flags take precedence.
    pub vars: BTreeMap<String, String>,
}

impl JobTemplate {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            streams: StreamTemplates::default(),
            interpolate: Vec::new(),
            mode: ExecutionMode::Invoke,
            vars: BTreeMap::new(),
        }
    }

    /// Build one CREATED job without publishing anything.
    pub fn instantiate(&self, id: u64, mut cli_args: CliArgs) -> Result<Job> {
        let mut vars = self.vars.clone();
        vars.insert("executable".to_string(), self.executable.clone());
        vars.extend(cli_args.iter().cloned());

        // An interpolated flag may use another one's value, so render in
        // dependency order and publish each result before the next render.
        let mut pending: Vec<(&str, Vec<String>)> = Vec::with_capacity(self.interpolate.len());
        for flag in &self.interpolate {
            if pending.iter().any(|(name, _)| name == flag) {
                continue;
            }
            let (_, value) = cli_args.iter().find(|(name, _)| name == flag).ok_or_else(|| {
                SweepError::config(format!("cannot interpolate undeclared flag `{flag}`"))
            })?;
            pending.push((flag.as_str(), template::placeholders(value)?));
        }

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|(_, fields)| {
                    fields
                        .iter()
                        .all(|field| pending.iter().all(|(name, _)| name != field))
                })
                .ok_or_else(|| {
                    let names: Vec<&str> = pending.iter().map(|(name, _)| *name).collect();
                    SweepError::config(format!(
                        "interpolated flags reference each other in a cycle: {}",
                        names.join(", ")
                    ))
                })?;
            let (flag, _) = pending.remove(ready);
            if let Some((_, value)) = cli_args.iter_mut().find(|(name, _)| name == flag) {
                *value = template::render(value, &vars)?;
                vars.insert(flag.to_string(), value.clone());
            }
        }

        let render_path = |target: &Option<String>| -> Result<Option<PathBuf>> {
            target
                .as_deref()
                .map(|t| template::render(t, &vars).map(PathBuf::from))
                .transpose()
        };
        let streams = StreamTargets {
            stdin: render_path(&self.streams.stdin)?,
            stdout: render_path(&self.streams.stdout)?,
            stderr: render_path(&self.streams.stderr)?,
        };

        Ok(Job::new(id, self.executable.clone(), cli_args)
            .with_meta(vars)
            .with_streams(streams)
            .with_mode(self.mode))
    }

    /// Instantiate every tuple (ids `0..n`), then announce and schedule each
    /// job. Template errors surface before any event is published.
    pub fn build(&self, tuples: Vec<CliArgs>, bus: &EventBus) -> Result<Vec<Job>> {
        if self.executable.trim().is_empty() {
            return Err(SweepError::config("executable must be a non-empty path"));
        }

        let mut jobs = tuples
            .into_iter()
            .enumerate()
            .map(|(id, tuple)| self.instantiate(id as u64, tuple))
            .collect::<Result<Vec<_>>>()?;

        for job in &mut jobs {
            job.announce(bus)?;
            job.set_state(JobState::Scheduled, bus)?;
        }

        info!(jobs = jobs.len(), executable = %self.executable, "job set built");
        Ok(jobs)
    }
}
