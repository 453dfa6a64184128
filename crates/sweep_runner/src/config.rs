//! Job-set declaration loaded from TOML with `SWEEP_*` environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sweep_core::job::ExecutionMode;
use sweep_core::jobset::{JobTemplate, StreamTemplates};
use sweep_core::parameters::{ArgValue, ArgumentSpec};
use sweep_core::{Result, SweepError};

use crate::observers::BUILTIN_OBSERVERS;

pub const DEFAULT_CONFIG_PATH: &str = "sweep.toml";
pub const ENV_PREFIX: &str = "SWEEP_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub executable: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Observers installed at startup, in order.
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub capture_sigint: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_dry_run_delay_ms")]
    pub dry_run_delay_ms: u64,
    #[serde(default)]
    pub bare_flags: Vec<String>,
    #[serde(default)]
    pub groups: Vec<Vec<String>>,
    /// Flags whose values contain `{name}` placeholders.
    #[serde(default)]
    pub interpolate: Vec<String>,
    #[serde(default)]
    pub streams: StreamConfig,
    #[serde(default)]
    pub args: Vec<ArgEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// One `[[args]]` table: a flag with either `value` or `ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgEntry {
    pub flag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

fn default_workers() -> usize {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".sweep")
}

fn default_dry_run_delay_ms() -> u64 {
    500
}

impl SweepConfig {
    /// Load `path`, apply `SWEEP_*` overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: SweepConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|error| SweepError::config(error.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string without consulting the environment.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: SweepConfig = Figment::from(Toml::string(source))
            .extract()
            .map_err(|error| SweepError::config(error.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executable.trim().is_empty() {
            return Err(SweepError::config("`executable` must be a non-empty path"));
        }
        if self.workers == 0 {
            return Err(SweepError::config("`workers` must be at least 1"));
        }
        if let Some(unknown) = self
            .plugins
            .iter()
            .find(|name| !BUILTIN_OBSERVERS.contains(&name.as_str()))
        {
            return Err(SweepError::config(format!(
                "unknown plugin `{unknown}` (known: {})",
                BUILTIN_OBSERVERS.join(", ")
            )));
        }
        for entry in &self.args {
            match (&entry.value, &entry.reference) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(SweepError::config(format!(
                        "argument `{}` must set exactly one of `value` or `ref`",
                        entry.flag
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn argument_spec(&self) -> Result<ArgumentSpec> {
        let mut spec = ArgumentSpec::new();
        for entry in &self.args {
            let value = match (&entry.value, &entry.reference) {
                (Some(Value::Array(values)), None) => ArgValue::Sequence(values.clone()),
                (Some(value), None) => ArgValue::Scalar(value.clone()),
                (None, Some(target)) => ArgValue::Reference(target.clone()),
                _ => {
                    return Err(SweepError::config(format!(
                        "argument `{}` must set exactly one of `value` or `ref`",
                        entry.flag
                    )))
                }
            };
            spec.push(entry.flag.clone(), value);
        }
        for group in &self.groups {
            spec.add_group(group.clone());
        }
        for flag in &self.bare_flags {
            spec.add_bare(flag.clone());
        }
        Ok(spec)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.dry_run {
            ExecutionMode::DryRun {
                delay: Duration::from_millis(self.dry_run_delay_ms),
            }
        } else {
            ExecutionMode::Invoke
        }
    }

    pub fn job_template(&self) -> JobTemplate {
        JobTemplate {
            executable: self.executable.clone(),
            streams: StreamTemplates {
                stdin: self.streams.stdin.clone(),
                stdout: self.streams.stdout.clone(),
                stderr: self.streams.stderr.clone(),
            },
            interpolate: self.interpolate.clone(),
            mode: self.execution_mode(),
            vars: BTreeMap::from([("workers".to_string(), self.workers.to_string())]),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(crate::checkpoint::CHECKPOINT_FILE)
    }
}
