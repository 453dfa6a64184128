//! The job entity: one concrete invocation and its lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contract::{job_fingerprint, JobSnapshot};
use crate::error::{Result, SweepError};
use crate::events::{EventBus, LifecycleEvent};
use crate::parameters::CliArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Scheduled,
    Running,
    Completed,
    Canceled,
    Error,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Created,
        JobState::Scheduled,
        JobState::Running,
        JobState::Completed,
        JobState::Canceled,
        JobState::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Error)
    }

    /// SCHEDULED → COMPLETED skips RUNNING; resume uses it for jobs a
    /// previous run already finished.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Scheduled)
                | (Self::Scheduled, Self::Running)
                | (Self::Scheduled, Self::Completed)
                | (Self::Scheduled, Self::Canceled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SweepError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| SweepError::config(format!("invalid job state `{name}`")))
    }
}

/// Files the child's standard streams are redirected to. `None` inherits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTargets {
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Invoke,
    /// Sleep instead of spawning; exercises scheduling without real processes.
    DryRun { delay: Duration },
}

#[derive(Debug, Clone)]
pub struct Job {
    id: u64,
    executable: String,
    cli_args: CliArgs,
    meta: BTreeMap<String, String>,
    streams: StreamTargets,
    fingerprint: String,
    state: JobState,
    exit_code: Option<i32>,
    mode: ExecutionMode,
}

impl Job {
    /// Build a job in CREATED. The fingerprint is fixed here and never changes.
    pub fn new(id: u64, executable: impl Into<String>, cli_args: CliArgs) -> Self {
        let executable = executable.into();
        let fingerprint = job_fingerprint(&executable, &cli_args);
        Self {
            id,
            executable,
            cli_args,
            meta: BTreeMap::new(),
            streams: StreamTargets::default(),
            fingerprint,
            state: JobState::Created,
            exit_code: None,
            mode: ExecutionMode::Invoke,
        }
    }

    pub fn with_meta(mut self, meta: BTreeMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_streams(mut self, streams: StreamTargets) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn cli_args(&self) -> &[(String, String)] {
        &self.cli_args
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn streams(&self) -> &StreamTargets {
        &self.streams
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Exit code of the child, if one ran. Recorded for reporting only.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Publish job-created for a freshly built job.
    pub fn announce(&self, bus: &EventBus) -> Result<()> {
        bus.publish(&LifecycleEvent::StateChanged {
            job: self,
            previous: None,
        })
    }

    pub fn set_state(&mut self, next: JobState, bus: &EventBus) -> Result<()> {
        self.transition(next, Some(bus))
    }

    /// Change state without notifying observers.
    pub fn set_state_silently(&mut self, next: JobState) -> Result<()> {
        self.transition(next, None)
    }

    /// Like [`set_state`](Self::set_state) but takes a state name; unknown
    /// names leave the job untouched.
    pub fn set_state_by_name(&mut self, name: &str, bus: Option<&EventBus>) -> Result<()> {
        let next: JobState = name.parse()?;
        self.transition(next, bus)
    }

    fn transition(&mut self, next: JobState, bus: Option<&EventBus>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SweepError::config(format!(
                "job {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }

        let previous = self.state;
        self.state = next;
        debug!(job_id = self.id, from = %previous, to = %next, notify = bus.is_some(), "job state changed");

        if let Some(bus) = bus {
            bus.publish(&LifecycleEvent::StateChanged {
                job: &*self,
                previous: Some(previous),
            })?;
        }
        Ok(())
    }

    /// Run the job if it is SCHEDULED; any other state is a no-op.
    ///
    /// The child's exit status is recorded but never treated as a failure. If
    /// the child cannot be started the job moves to ERROR and the invocation
    /// error is returned.
    pub fn execute(&mut self, bus: &EventBus) -> Result<()> {
        if self.state != JobState::Scheduled {
            return Ok(());
        }

        self.set_state(JobState::Running, bus)?;

        match self.mode {
            ExecutionMode::DryRun { delay } => thread::sleep(delay),
            ExecutionMode::Invoke => match self.invoke() {
                Ok(exit_code) => self.exit_code = exit_code,
                Err(error) => {
                    if let Err(handler_error) = self.set_state(JobState::Error, bus) {
                        warn!(job_id = self.id, %error, "job failed to start");
                        return Err(handler_error);
                    }
                    return Err(error);
                }
            },
        }

        self.set_state(JobState::Completed, bus)
    }

    fn invoke(&self) -> Result<Option<i32>> {
        let invocation_error = |source: std::io::Error| SweepError::Invocation {
            executable: self.executable.clone(),
            source,
        };

        let mut command = Command::new(&self.executable);
        command.args(self.argv());

        if let Some(path) = &self.streams.stdin {
            command.stdin(File::open(path).map_err(invocation_error)?);
        }
        if let Some(path) = &self.streams.stdout {
            command.stdout(create_output(path).map_err(invocation_error)?);
        }
        if let Some(path) = &self.streams.stderr {
            command.stderr(create_output(path).map_err(invocation_error)?);
        }

        debug!(job_id = self.id, command = %self.command_line(), "spawning job");
        let status = command.status().map_err(invocation_error)?;
        // The redirected files are owned by `command` and close when it drops.
        Ok(status.code())
    }

    /// Arguments passed to the child: every flag followed by its value. A
    /// bare flag is followed by an empty argument.
    pub fn argv(&self) -> Vec<String> {
        self.cli_args
            .iter()
            .flat_map(|(flag, value)| [flag.clone(), value.clone()])
            .collect()
    }

    /// Shell-like rendering: `exe <in >out 2>err --flag value`.
    pub fn command_line(&self) -> String {
        let mut line = self.executable.clone();
        if let Some(path) = &self.streams.stdin {
            line.push_str(&format!(" <{}", path.display()));
        }
        if let Some(path) = &self.streams.stdout {
            line.push_str(&format!(" >{}", path.display()));
        }
        if let Some(path) = &self.streams.stderr {
            line.push_str(&format!(" 2>{}", path.display()));
        }
        for (flag, value) in &self.cli_args {
            line.push(' ');
            line.push_str(flag);
            if !value.is_empty() {
                line.push(' ');
                line.push_str(value);
            }
        }
        line
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            executable: self.executable.clone(),
            cli_args: self.cli_args.clone(),
            fingerprint: self.fingerprint.clone(),
            state: self.state,
            exit_code: self.exit_code,
            recorded_at: Utc::now(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Job id={} state={}>", self.id, self.state)
    }
}

fn create_output(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::events::Channel;

    fn args(pairs: &[(&str, &str)]) -> CliArgs {
        pairs
            .iter()
            .map(|(flag, value)| (flag.to_string(), value.to_string()))
            .collect()
    }

    fn record_channels(bus: &EventBus) -> Arc<Mutex<Vec<(Channel, Option<JobState>)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for channel in Channel::ALL {
            let seen = Arc::clone(&seen);
            bus.subscribe_fn(channel, "recorder", move |_, event| {
                let previous = match event {
                    LifecycleEvent::StateChanged { previous, .. } => *previous,
                    _ => None,
                };
                seen.lock().unwrap().push((event.channel(), previous));
                Ok(())
            });
        }
        seen
    }

    #[test]
    fn identical_invocations_share_a_fingerprint() {
        let a = Job::new(0, "rect_area", args(&[("--h", "2"), ("--w", "3")]));
        let b = Job::new(41, "rect_area", args(&[("--h", "2"), ("--w", "3")]))
            .with_meta(BTreeMap::from([("note".to_string(), "other".to_string())]))
            .with_mode(ExecutionMode::DryRun {
                delay: Duration::ZERO,
            });
        assert_eq!(a.fingerprint(), b.fingerprint());

        let changed_value = Job::new(0, "rect_area", args(&[("--h", "2"), ("--w", "4")]));
        let changed_flag = Job::new(0, "rect_area", args(&[("--h", "2"), ("--x", "3")]));
        let changed_exe = Job::new(0, "rect_perimeter", args(&[("--h", "2"), ("--w", "3")]));
        assert_ne!(a.fingerprint(), changed_value.fingerprint());
        assert_ne!(a.fingerprint(), changed_flag.fingerprint());
        assert_ne!(a.fingerprint(), changed_exe.fingerprint());
    }

    #[test]
    fn state_names_parse_case_insensitively() {
        assert_eq!("completed".parse::<JobState>().unwrap(), JobState::Completed);
        assert_eq!("CANCELED".parse::<JobState>().unwrap(), JobState::Canceled);
        assert!("FINISHED".parse::<JobState>().is_err());
    }

    #[test]
    fn invalid_state_name_leaves_state_unchanged() {
        let bus = EventBus::new();
        let mut job = Job::new(0, "rect_area", Vec::new());
        job.set_state(JobState::Scheduled, &bus).unwrap();

        let error = job
            .set_state_by_name("PAUSED", Some(&bus))
            .expect_err("unknown state");
        assert!(error.is_configuration());
        assert_eq!(job.state(), JobState::Scheduled);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut job = Job::new(0, "rect_area", Vec::new());
        job.set_state_silently(JobState::Scheduled).unwrap();
        job.set_state_silently(JobState::Canceled).unwrap();

        for next in JobState::ALL {
            assert!(job.set_state_silently(next).is_err());
        }
        assert_eq!(job.state(), JobState::Canceled);
    }

    #[test]
    fn set_state_publishes_with_previous_state() {
        let bus = EventBus::new();
        let seen = record_channels(&bus);
        let mut job = Job::new(0, "rect_area", Vec::new());

        job.announce(&bus).unwrap();
        job.set_state(JobState::Scheduled, &bus).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Channel::JobCreated, None),
                (Channel::JobScheduled, Some(JobState::Created)),
            ]
        );
    }

    #[test]
    fn silent_transition_publishes_nothing() {
        let bus = EventBus::new();
        let seen = record_channels(&bus);
        let mut job = Job::new(0, "rect_area", Vec::new());

        job.set_state_silently(JobState::Scheduled).unwrap();
        job.set_state_silently(JobState::Completed).unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn dry_run_execution_walks_running_then_completed() {
        let bus = EventBus::new();
        let seen = record_channels(&bus);
        let mut job = Job::new(0, "/definitely/not/here", args(&[("--x", "1")])).with_mode(
            ExecutionMode::DryRun {
                delay: Duration::from_millis(1),
            },
        );
        job.set_state_silently(JobState::Scheduled).unwrap();

        job.execute(&bus).unwrap();

        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.exit_code(), None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Channel::JobRunning, Some(JobState::Scheduled)),
                (Channel::JobCompleted, Some(JobState::Running)),
            ]
        );
    }

    #[test]
    fn failing_error_handler_still_leaves_job_in_error() {
        let bus = EventBus::new();
        bus.subscribe_fn(Channel::JobError, "alert", |_, _| {
            Err(SweepError::config("alert sink unavailable"))
        });
        let mut job = Job::new(0, "/definitely/not/here", Vec::new());
        job.set_state_silently(JobState::Scheduled).unwrap();

        let error = job.execute(&bus).expect_err("handler failure");

        assert!(matches!(error, SweepError::Handler { .. }));
        assert_eq!(job.state(), JobState::Error);
    }

    #[test]
    fn execute_is_a_noop_unless_scheduled() {
        let bus = EventBus::new();
        let mut job = Job::new(0, "/definitely/not/here", Vec::new());
        job.execute(&bus).unwrap();
        assert_eq!(job.state(), JobState::Created);
    }

    #[test]
    fn bare_flags_are_followed_by_an_empty_argument() {
        let job = Job::new(0, "rect_area", args(&[("--h", "2"), ("--verbose", "")]));
        assert_eq!(job.argv(), vec!["--h", "2", "--verbose", ""]);
        assert_eq!(job.command_line(), "rect_area --h 2 --verbose");
    }

    #[test]
    fn command_line_shows_redirections() {
        let job = Job::new(7, "rect_area", args(&[("--h", "2")])).with_streams(StreamTargets {
            stdin: Some(PathBuf::from("in.txt")),
            stdout: Some(PathBuf::from("out/7.txt")),
            stderr: None,
        });
        assert_eq!(job.command_line(), "rect_area <in.txt >out/7.txt --h 2");
        assert_eq!(job.to_string(), "<Job id=7 state=CREATED>");
    }

    #[test]
    fn snapshot_carries_identity_and_state() {
        let mut job = Job::new(5, "rect_area", args(&[("--h", "2")]));
        job.set_state_silently(JobState::Scheduled).unwrap();
        let snapshot = job.snapshot();

        assert_eq!(snapshot.id, 5);
        assert_eq!(snapshot.fingerprint, job.fingerprint());
        assert_eq!(snapshot.state, JobState::Scheduled);
    }
}
