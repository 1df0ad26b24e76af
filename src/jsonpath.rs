//! # jsonpath.rs
//!
//! The small JSON-path subset used to pull values out of a parent response
//! and template them into a child route's fields. Grammar:
//!
//! - `$` or `$.` alone yields the whole payload.
//! - Dot-separated segments navigate mapping keys.
//! - `[N]` indexes a list.
//! - `[key=literal]` / `[key==literal]` selects the first list element whose
//!   (relative) nested `key` path equals the literal.
//!
//! This is intentionally not a general JSONPath implementation — just the
//! filter/index grammar the route-chaining feature needs.

use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// Distinguishes "the path resolved to JSON `null`" from "the path couldn't
/// be traversed at all".
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Value),
    Missing,
}

impl Lookup {
    pub fn into_option(self) -> Option<Value> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Key(String),
    Index(usize),
    Filter(String, Literal),
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Bool(bool),
    Null,
    Int(i64),
    Float(f64),
}

impl Literal {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Str(s), Value::String(v)) => s == v,
            (Literal::Bool(b), Value::Bool(v)) => b == v,
            (Literal::Null, Value::Null) => true,
            (Literal::Int(i), Value::Int(v)) => i == v,
            (Literal::Int(i), Value::Float(v)) => (*i as f64) == *v,
            (Literal::Float(f), Value::Float(v)) => f == v,
            (Literal::Float(f), Value::Int(v)) => *f == (*v as f64),
            _ => false,
        }
    }
}

/// Extracts a value from `payload` at `path`. Returns `Lookup::Missing` for
/// any path that isn't `$`/`$.`-prefixed, or that can't be fully traversed.
pub fn extract(payload: &Value, path: &str) -> Lookup {
    let raw = path.trim();
    if raw == "$" {
        return Lookup::Found(payload.clone());
    }
    if let Some(rest) = raw.strip_prefix("$.") {
        let tokens = match tokenize(rest) {
            Some(t) => t,
            None => return Lookup::Missing,
        };
        return extract_tokens(payload, &tokens);
    }
    Lookup::Missing
}

/// Same as `extract`, but accepts a path relative to `payload` (used for the
/// nested `key` half of a `[key=literal]` filter): `$`, `$.foo`, or bare
/// `foo.bar`.
fn extract_relative(payload: &Value, path: &str) -> Lookup {
    let raw = path.trim();
    if raw.is_empty() || raw == "$" {
        return Lookup::Found(payload.clone());
    }
    let raw = raw.strip_prefix("$.").unwrap_or(raw);
    let tokens = match tokenize(raw) {
        Some(t) => t,
        None => return Lookup::Missing,
    };
    extract_tokens(payload, &tokens)
}

fn tokenize(path: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        tokenize_segment(segment, &mut tokens)?;
    }
    Some(tokens)
}

fn tokenize_segment(segment: &str, tokens: &mut Vec<Token>) -> Option<()> {
    let bracket = segment.find('[');
    let base = match bracket {
        Some(idx) => &segment[..idx],
        None => segment,
    };
    if !base.is_empty() {
        tokens.push(Token::Key(base.to_string()));
    }
    let Some(mut cursor) = bracket else {
        return Some(());
    };
    let bytes = segment.as_bytes();
    while cursor < segment.len() && bytes[cursor] == b'[' {
        let end = segment[cursor + 1..].find(']').map(|i| cursor + 1 + i)?;
        let content = segment[cursor + 1..end].trim();
        if let Some(token) = parse_bracket_token(content) {
            tokens.push(token);
        }
        cursor = end + 1;
    }
    Some(())
}

fn parse_bracket_token(content: &str) -> Option<Token> {
    if content.is_empty() {
        return None;
    }
    if content.chars().all(|c| c.is_ascii_digit()) {
        return content.parse::<usize>().ok().map(Token::Index);
    }
    if let Some((left, right)) = content.split_once("==") {
        return Some(Token::Filter(left.trim().to_string(), parse_literal(right.trim())));
    }
    if let Some((left, right)) = content.split_once('=') {
        return Some(Token::Filter(left.trim().to_string(), parse_literal(right.trim())));
    }
    Some(Token::Key(content.to_string()))
}

fn parse_literal(raw: &str) -> Literal {
    if raw.is_empty() {
        return Literal::Str(String::new());
    }
    let first = raw.chars().next().unwrap();
    if (first == '\'' || first == '"') && raw.ends_with(first) && raw.len() >= 2 {
        let inner = &raw[1..raw.len() - 1];
        let unescaped = inner.replace("\\\\", "\u{0}").replace(&format!("\\{first}"), &first.to_string());
        let unescaped = unescaped.replace('\u{0}', "\\");
        return Literal::Str(unescaped);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Literal::Bool(true),
        "false" => return Literal::Bool(false),
        "null" => return Literal::Null,
        _ => {}
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            return Literal::Float(f);
        }
    } else if let Ok(i) = raw.parse::<i64>() {
        return Literal::Int(i);
    }
    Literal::Str(raw.to_string())
}

fn extract_tokens(payload: &Value, tokens: &[Token]) -> Lookup {
    let mut current = payload.clone();
    for token in tokens {
        current = match token {
            Token::Index(i) => match current.as_list() {
                Some(list) if *i < list.len() => list[*i].clone(),
                _ => return Lookup::Missing,
            },
            Token::Key(k) => match current.as_map().and_then(|m| m.get(k)) {
                Some(v) => v.clone(),
                None => return Lookup::Missing,
            },
            Token::Filter(key_path, literal) => {
                let list = match current.as_list() {
                    Some(l) => l,
                    None => return Lookup::Missing,
                };
                match list.iter().find(|item| match extract_relative(item, key_path) {
                    Lookup::Found(v) => literal.matches(&v),
                    Lookup::Missing => false,
                }) {
                    Some(found) => found.clone(),
                    None => return Lookup::Missing,
                }
            }
        };
    }
    Lookup::Found(current)
}

/// Resolves `raw` against `context`: a string that is entirely `$` or a
/// `$.`-prefixed path returns the extracted value untouched (preserving its
/// type); otherwise every `{{ ... }}` span is replaced in place (falling
/// back to the literal span when the path is missing or doesn't start with
/// `$`).
pub fn resolve_text(raw: &str, context: &Value) -> Value {
    let trimmed = raw.trim();
    if trimmed == "$" || trimmed.starts_with("$.") {
        if let Lookup::Found(v) = extract(context, trimmed) {
            return v;
        }
    }
    if !raw.contains("{{") {
        return Value::String(raw.to_string());
    }
    let replaced = TEMPLATE_RE.replace_all(raw, |caps: &regex::Captures| {
        let expr = caps[1].trim();
        if !expr.starts_with('$') {
            return caps[0].to_string();
        }
        match extract(context, expr) {
            Lookup::Found(v) => v.stringify(),
            Lookup::Missing => {
                log::debug!("could not extract value at path {expr}");
                caps[0].to_string()
            }
        }
    });
    Value::String(replaced.into_owned())
}
