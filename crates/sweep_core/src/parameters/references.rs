use std::collections::{HashMap, HashSet};

use super::ArgValue;
use crate::error::{Result, SweepError};

/// Where a reference flag takes its value from once chains are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RefTarget {
    Arg(usize),
    Bare,
}

/// Resolve every reference flag to a non-reference source.
pub(super) fn resolve_all(
    args: &[(String, ArgValue)],
    index_of: &HashMap<&str, usize>,
    bare: &HashSet<&str>,
) -> Result<Vec<(usize, RefTarget)>> {
    let mut resolved = Vec::new();

    for (idx, (flag, value)) in args.iter().enumerate() {
        let ArgValue::Reference(first) = value else {
            continue;
        };

        let mut seen: HashSet<usize> = HashSet::from([idx]);
        let mut target = first.as_str();
        let source = loop {
            if bare.contains(target) {
                break RefTarget::Bare;
            }
            let next = *index_of.get(target).ok_or_else(|| {
                SweepError::config(format!("flag `{flag}` references undeclared flag `{target}`"))
            })?;
            if !seen.insert(next) {
                return Err(SweepError::config(format!(
                    "flag `{flag}` is part of a reference cycle"
                )));
            }
            match &args[next].1 {
                ArgValue::Reference(further) => target = further.as_str(),
                ArgValue::Scalar(_) | ArgValue::Sequence(_) => break RefTarget::Arg(next),
            }
        };

        resolved.push((idx, source));
    }

    Ok(resolved)
}
