//! Parameter expansion for job sets.
//!
//! An [`ArgumentSpec`] declares, per command-line flag, either a fixed value,
//! a list of values to sweep over, or a reference to another flag. Expansion
//! turns the declaration into one concrete argument tuple per job:
//!
//! - independent sequences are cartesian-multiplied,
//! - flags declared in the same group vary in lockstep (zipped),
//! - references take the value their target has in the same tuple,
//! - bare flags are appended to every tuple with an empty value.
//!
//! ```
//! use sweep_core::parameters::ArgumentSpec;
//!
//! let tuples = ArgumentSpec::new()
//!     .sequence("--height", [2, 4])
//!     .sequence("--width", [3, 5])
//!     .bare("--verbose")
//!     .expand()
//!     .unwrap();
//!
//! assert_eq!(tuples.len(), 4);
//! assert_eq!(tuples[1][1], ("--width".to_string(), "5".to_string()));
//! ```

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::{Result, SweepError};

mod combinations;
mod references;

use combinations::Dimension;
use references::RefTarget;

/// Upper bound on the number of jobs a single declaration may expand to.
pub const MAX_JOBS: usize = 200_000;

/// Ordered `(flag, value)` pairs for one invocation.
pub type CliArgs = Vec<(String, String)>;

/// Declared value of a single flag.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Included verbatim in every job.
    Scalar(Value),
    /// Varied across jobs.
    Sequence(Vec<Value>),
    /// Takes the value of the named flag within the same job.
    Reference(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSpec {
    args: Vec<(String, ArgValue)>,
    groups: Vec<Vec<String>>,
    bare_flags: Vec<String>,
}

impl ArgumentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, flag: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(flag, ArgValue::Scalar(value.into()));
        self
    }

    pub fn sequence<I, V>(mut self, flag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(flag, ArgValue::Sequence(values));
        self
    }

    pub fn reference(mut self, flag: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(flag, ArgValue::Reference(target.into()));
        self
    }

    /// Declare flags that must vary together rather than independently.
    pub fn group<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_group(flags.into_iter().map(Into::into).collect());
        self
    }

    pub fn bare(mut self, flag: impl Into<String>) -> Self {
        self.add_bare(flag);
        self
    }

    pub fn push(&mut self, flag: impl Into<String>, value: ArgValue) {
        self.args.push((flag.into(), value));
    }

    pub fn add_group(&mut self, flags: Vec<String>) {
        self.groups.push(flags);
    }

    pub fn add_bare(&mut self, flag: impl Into<String>) {
        self.bare_flags.push(flag.into());
    }

    pub fn args(&self) -> &[(String, ArgValue)] {
        &self.args
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    pub fn bare_flags(&self) -> &[String] {
        &self.bare_flags
    }

    /// Number of tuples [`expand`](Self::expand) would produce.
    pub fn job_count(&self) -> Result<usize> {
        let plan = self.plan()?;
        Ok(combinations::total_points(&plan.dimensions))
    }

    /// Expand the declaration into one argument tuple per job.
    ///
    /// Product dimensions are the groups in declared order followed by the
    /// remaining sequences in declaration order; the right-most dimension
    /// varies fastest. Inside a tuple, flags keep their declaration order and
    /// bare flags come last.
    pub fn expand(&self) -> Result<Vec<CliArgs>> {
        let plan = self.plan()?;
        let combos = combinations::cartesian_indices(&plan.dimensions);

        let tuples = combos
            .iter()
            .map(|combo| plan.tuple_for(combo, &self.args, &self.bare_flags))
            .collect();
        Ok(tuples)
    }

    fn plan(&self) -> Result<ExpansionPlan> {
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for (idx, (flag, _)) in self.args.iter().enumerate() {
            if flag.trim().is_empty() {
                return Err(SweepError::config("flag names must be non-empty strings"));
            }
            if index_of.insert(flag.as_str(), idx).is_some() {
                return Err(SweepError::config(format!("flag `{flag}` is declared more than once")));
            }
        }

        let mut bare: HashSet<&str> = HashSet::new();
        for flag in &self.bare_flags {
            if flag.trim().is_empty() {
                return Err(SweepError::config("bare flag names must be non-empty strings"));
            }
            if index_of.contains_key(flag.as_str()) || !bare.insert(flag.as_str()) {
                return Err(SweepError::config(format!("flag `{flag}` is declared more than once")));
            }
        }

        let mut fixed: Vec<Option<String>> = vec![None; self.args.len()];
        let mut sequences: HashMap<usize, Vec<String>> = HashMap::new();
        for (idx, (flag, value)) in self.args.iter().enumerate() {
            match value {
                ArgValue::Scalar(value) => fixed[idx] = Some(render_scalar(flag, value)?),
                ArgValue::Sequence(values) => {
                    if values.is_empty() {
                        return Err(SweepError::config(format!(
                            "flag `{flag}` must declare a non-empty list of values"
                        )));
                    }
                    let rendered = values
                        .iter()
                        .map(|value| render_scalar(flag, value))
                        .collect::<Result<Vec<_>>>()?;
                    sequences.insert(idx, rendered);
                }
                ArgValue::Reference(_) => {}
            }
        }

        let references = references::resolve_all(&self.args, &index_of, &bare)?;
        let dimensions = self.dimensions(&index_of, sequences)?;

        let total = combinations::total_points(&dimensions);
        if total > MAX_JOBS {
            return Err(SweepError::config(format!(
                "parameter space is too large ({total} jobs, limit is {MAX_JOBS})"
            )));
        }

        Ok(ExpansionPlan {
            fixed,
            dimensions,
            references,
        })
    }

    fn dimensions(
        &self,
        index_of: &HashMap<&str, usize>,
        mut sequences: HashMap<usize, Vec<String>>,
    ) -> Result<Vec<Dimension>> {
        let mut dimensions = Vec::new();
        let mut grouped: HashSet<usize> = HashSet::new();

        for group in &self.groups {
            if group.is_empty() {
                return Err(SweepError::config("flag groups must name at least one flag"));
            }

            let mut columns = Vec::with_capacity(group.len());
            for flag in group {
                let idx = *index_of.get(flag.as_str()).ok_or_else(|| {
                    SweepError::config(format!("group references undeclared flag `{flag}`"))
                })?;
                if !grouped.insert(idx) {
                    return Err(SweepError::config(format!(
                        "flag `{flag}` appears in more than one group"
                    )));
                }
                let values = sequences.remove(&idx).ok_or_else(|| {
                    SweepError::config(format!(
                        "grouped flag `{flag}` must declare a list of values"
                    ))
                })?;
                columns.push((idx, values));
            }

            let expected = columns[0].1.len();
            if let Some((idx, values)) = columns.iter().find(|(_, v)| v.len() != expected) {
                return Err(SweepError::config(format!(
                    "grouped flags must have equal lengths: `{}` has {} values, `{}` has {}",
                    self.args[columns[0].0].0,
                    expected,
                    self.args[*idx].0,
                    values.len()
                )));
            }

            dimensions.push(Dimension::zipped(columns));
        }

        let mut independent: Vec<(usize, Vec<String>)> = sequences.into_iter().collect();
        independent.sort_by_key(|(idx, _)| *idx);
        dimensions.extend(
            independent
                .into_iter()
                .map(|(idx, values)| Dimension::single(idx, values)),
        );

        Ok(dimensions)
    }
}

struct ExpansionPlan {
    fixed: Vec<Option<String>>,
    dimensions: Vec<Dimension>,
    references: Vec<(usize, RefTarget)>,
}

impl ExpansionPlan {
    fn tuple_for(
        &self,
        combo: &[usize],
        args: &[(String, ArgValue)],
        bare_flags: &[String],
    ) -> CliArgs {
        let mut values = self.fixed.clone();
        for (dimension, &row) in self.dimensions.iter().zip(combo) {
            dimension.assign(row, &mut values);
        }
        for (idx, target) in &self.references {
            values[*idx] = Some(match target {
                RefTarget::Arg(target) => values[*target].clone().unwrap_or_default(),
                RefTarget::Bare => String::new(),
            });
        }

        args.iter()
            .zip(values)
            .map(|((flag, _), value)| (flag.clone(), value.unwrap_or_default()))
            .chain(bare_flags.iter().map(|flag| (flag.clone(), String::new())))
            .collect()
    }
}

/// Render a scalar declaration value as it appears on the command line.
pub fn render_scalar(flag: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag_value) => Ok(flag_value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(SweepError::config(format!(
            "flag `{flag}` must use string, number or boolean values"
        ))),
    }
}
