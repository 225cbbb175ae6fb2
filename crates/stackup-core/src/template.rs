//! `${...}` placeholders inside attribute values.
//!
//! Three forms are recognised:
//! - `${var.NAME}`: declaration variable, substituted at load time
//! - `${artifact.FIELD}`: published artifact, substituted once publication finished
//! - `${kind.name.output}`: output of another resource, substituted at convergence

use crate::types::ResourceId;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Variable(String),
    Artifact(String),
    Output { resource: ResourceId, output: String },
    Invalid(String),
}

impl Token {
    pub fn parse(inner: &str) -> Self {
        let parts: Vec<&str> = inner.trim().split('.').collect();
        match parts.as_slice() {
            ["var", name] if !name.is_empty() => Self::Variable((*name).to_string()),
            ["artifact", field] if !field.is_empty() => Self::Artifact((*field).to_string()),
            [kind, name, output] if !kind.is_empty() && !name.is_empty() && !output.is_empty() => {
                Self::Output {
                    resource: ResourceId::new(*kind, *name),
                    output: (*output).to_string(),
                }
            }
            _ => Self::Invalid(inner.to_string()),
        }
    }
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

pub fn tokens_in(s: &str) -> Vec<Token> {
    pattern()
        .captures_iter(s)
        .map(|c| Token::parse(&c[1]))
        .collect()
}

/// All tokens in a JSON value, descending into arrays and objects.
pub fn tokens_in_value(value: &Value) -> Vec<Token> {
    match value {
        Value::String(s) => tokens_in(s),
        Value::Array(items) => items.iter().flat_map(tokens_in_value).collect(),
        Value::Object(map) => map.values().flat_map(tokens_in_value).collect(),
        _ => Vec::new(),
    }
}

/// Substitute placeholders in a string. `resolve` returns `Ok(None)` to leave a
/// placeholder untouched.
pub fn render_str<E>(
    s: &str,
    resolve: &mut impl FnMut(&Token) -> Result<Option<String>, E>,
) -> Result<String, E> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in pattern().captures_iter(s) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        out.push_str(&s[last..whole.0]);
        match resolve(&Token::parse(&caps[1]))? {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(&s[whole.0..whole.1]),
        }
        last = whole.1;
    }
    out.push_str(&s[last..]);
    Ok(out)
}

pub fn render_value<E>(
    value: &Value,
    resolve: &mut impl FnMut(&Token) -> Result<Option<String>, E>,
) -> Result<Value, E> {
    Ok(match value {
        Value::String(s) => Value::String(render_str(s, resolve)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, resolve))
                .collect::<Result<_, E>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, resolve)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// True when the value still contains any placeholder.
pub fn has_placeholders(value: &Value) -> bool {
    !tokens_in_value(value).is_empty()
}
