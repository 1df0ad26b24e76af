//! # dotenv.rs
//!
//! A small cascading `.env` file loader. Each file is parsed in order and
//! merged into the running environment map, so a later file (and route
//! configs loaded afterward) can reference variables a prior file defined.
//!
//! Supports the common subset of the dotenv format: blank lines, `#`
//! comments, an optional `export ` prefix, and single/double-quoted values
//! with `\n`, `\t`, `\\`, and matching-quote escapes in double-quoted values
//! (single-quoted values are taken literally, same as POSIX shells).

use indexmap::IndexMap;
use std::path::Path;

#[derive(Debug)]
pub struct DotenvError {
    pub path: std::path::PathBuf,
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for DotenvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.message)
    }
}

impl std::error::Error for DotenvError {}

/// Loads each file in `paths` in order, merging into `env_map` (typically
/// started from the process environment) and setting each resolved variable
/// into the current process's environment as it goes, so later files and
/// downstream config loading both see it via `std::env::var`.
pub fn load_cascade(
    paths: &[impl AsRef<Path>],
    env_map: &mut IndexMap<String, String>,
) -> Result<(), DotenvError> {
    for path in paths {
        load_file(path.as_ref(), env_map)?;
    }
    Ok(())
}

fn load_file(path: &Path, env_map: &mut IndexMap<String, String>) -> Result<(), DotenvError> {
    let content = std::fs::read_to_string(path).map_err(|e| DotenvError {
        path: path.to_path_buf(),
        line: 0,
        message: format!("failed to read: {e}"),
    })?;

    for (line_no, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, raw_value)) = line.split_once('=') else {
            return Err(DotenvError {
                path: path.to_path_buf(),
                line: line_no + 1,
                message: format!("expected KEY=VALUE, found `{line}`"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(DotenvError {
                path: path.to_path_buf(),
                line: line_no + 1,
                message: "empty variable name".to_string(),
            });
        }

        let value = parse_value(raw_value.trim());
        let substituted = substitute(&value, env_map);
        env_map.insert(key.to_string(), substituted.clone());
        // Startup is single-threaded at this point (no workers spawned yet).
        std::env::set_var(key, &substituted);
    }

    Ok(())
}

fn parse_value(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        unescape_double_quoted(&raw[1..raw.len() - 1])
    } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        raw[1..raw.len() - 1].to_string()
    } else {
        strip_inline_comment(raw).trim().to_string()
    }
}

fn strip_inline_comment(raw: &str) -> &str {
    match raw.find(" #") {
        Some(idx) => &raw[..idx],
        None => raw,
    }
}

fn unescape_double_quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Substitutes `${VAR}` references in a freshly-parsed `.env` value against
/// everything resolved so far (earlier files plus earlier lines in this
/// file), exactly the layering `build_env_map` uses for a route's `env:`
/// block.
fn substitute(value: &str, env_map: &IndexMap<String, String>) -> String {
    crate::env::apply_env(
        &crate::value::Value::String(value.to_string()),
        env_map,
    )
    .stringify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_quotes_comments_and_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# a comment\nexport HOST=example.com\nGREETING=\"hi\\nthere\"\nRAW='a b c'\n",
        )
        .unwrap();

        let mut env = IndexMap::new();
        load_cascade(&[&path], &mut env).unwrap();

        assert_eq!(env.get("HOST").map(String::as_str), Some("example.com"));
        assert_eq!(env.get("GREETING").map(String::as_str), Some("hi\nthere"));
        assert_eq!(env.get("RAW").map(String::as_str), Some("a b c"));
    }

    #[test]
    fn later_files_see_earlier_variables() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.env");
        let second = dir.path().join("b.env");
        std::fs::write(&first, "BASE=example.com\n").unwrap();
        std::fs::write(&second, "FULL_URL=https://${BASE}/api\n").unwrap();

        let mut env = IndexMap::new();
        load_cascade(&[&first, &second], &mut env).unwrap();

        assert_eq!(
            env.get("FULL_URL").map(String::as_str),
            Some("https://example.com/api")
        );
    }

    #[test]
    fn malformed_line_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "not a valid line\n").unwrap();

        let mut env = IndexMap::new();
        assert!(load_cascade(&[&path], &mut env).is_err());
    }
}
