//! `{name}` placeholder interpolation for stream targets and templated flags.

use std::collections::BTreeMap;

use crate::error::{Result, SweepError};

enum Piece {
    Text(char),
    Field(String),
}

fn parse(template: &str) -> Result<Vec<Piece>> {
    let mut pieces = Vec::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                pieces.push(Piece::Text('{'));
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                pieces.push(Piece::Text('}'));
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }
                if !closed {
                    return Err(SweepError::config(format!(
                        "unclosed placeholder in template `{template}`"
                    )));
                }
                pieces.push(Piece::Field(name.trim().to_string()));
            }
            '}' => {
                return Err(SweepError::config(format!(
                    "unmatched `}}` in template `{template}`"
                )));
            }
            other => pieces.push(Piece::Text(other)),
        }
    }

    Ok(pieces)
}

/// Replace every `{name}` in `template` with `vars[name]`.
///
/// `{{` and `}}` produce literal braces. Unknown names and unbalanced braces
/// are configuration errors.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for piece in parse(template)? {
        match piece {
            Piece::Text(ch) => out.push(ch),
            Piece::Field(name) => {
                let value = vars.get(&name).ok_or_else(|| {
                    SweepError::config(format!(
                        "template `{template}` references unknown field `{name}`"
                    ))
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Names referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>> {
    Ok(parse(template)?
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Field(name) => Some(name),
            Piece::Text(_) => None,
        })
        .collect())
}
