//! # env.rs
//!
//! `${VAR}` substitution over the config's `Value` tree, and the layered
//! env-map builder used by each route's (optional) local `env:` block.

use crate::error::ConfigError;
use crate::value::Value;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

static ENV_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Recursively substitutes `${NAME}` in every string found in `value`.
/// Names not present in `env_map` are left verbatim (including the braces).
pub fn apply_env(value: &Value, env_map: &IndexMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, env_map)),
        Value::List(items) => Value::List(items.iter().map(|v| apply_env(v, env_map)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), apply_env(v, env_map)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute(input: &str, env_map: &IndexMap<String, String>) -> String {
    ENV_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let name = &caps[1];
            env_map
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Builds a new env map layered on `base` (the running process environment
/// when omitted). Each key of `raw_env`, in declaration order, is resolved
/// against the merge of `base` and every already-resolved key, so later
/// entries can reference earlier ones.
pub fn build_env_map(
    raw_env: Option<&Value>,
    base: Option<&IndexMap<String, String>>,
) -> Result<IndexMap<String, String>, ConfigError> {
    let mut merged: IndexMap<String, String> = match base {
        Some(base) => base.clone(),
        None => process_env_map(),
    };

    let raw_env = match raw_env {
        Some(v) => v,
        None => return Ok(merged),
    };

    let entries = match raw_env.as_map() {
        Some(m) => m,
        None => return Err(ConfigError::InvalidEnv(value_kind(raw_env))),
    };

    let mut resolved: IndexMap<String, String> = IndexMap::new();
    for (key, raw_value) in entries {
        let mut running = merged.clone();
        running.extend(resolved.iter().map(|(k, v)| (k.clone(), v.clone())));
        let applied = apply_env(raw_value, &running);
        resolved.insert(key.clone(), applied.stringify());
    }
    merged.extend(resolved);
    Ok(merged)
}

pub fn process_env_map() -> IndexMap<String, String> {
    std::env::vars().collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Int(_) | Value::Float(_) => "a number",
        Value::String(_) => "a string",
        Value::List(_) => "a list",
        Value::Map(_) => "a mapping",
    }
}
