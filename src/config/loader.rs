//! # config/loader.rs
//!
//! Reads a single config file or a directory of them and flattens the
//! result into the list of enabled top-level routes.

use super::RouteConfig;
use crate::error::ConfigError;
use crate::value::Value;
use std::path::{Path, PathBuf};

/// Loads every enabled top-level route found at `path` (a file or a
/// directory of `.yaml`/`.yml`/`.json` files, walked in lexicographic
/// order).
pub fn load_routes(path: &Path) -> Result<Vec<RouteConfig>, ConfigError> {
    let files = collect_files(path)?;
    if files.is_empty() {
        return Err(ConfigError::NoConfigFound(path.to_path_buf()));
    }

    let mut routes = Vec::new();
    for file in files {
        routes.extend(load_file(&file)?);
    }
    Ok(routes.into_iter().filter(|r| r.enabled).collect())
}

fn collect_files(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml") | Some("yml") | Some("json")
                    )
            })
            .collect();
        entries.sort();
        Ok(entries)
    } else if path.is_file() {
        Ok(vec![path.to_path_buf()])
    } else {
        Ok(Vec::new())
    }
}

fn load_file(path: &Path) -> Result<Vec<RouteConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let parsed: Value = if is_json {
        let json: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| ConfigError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        Value::from_json(json)
    } else {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Yaml {
                path: path.to_path_buf(),
                source: e,
            })?;
        Value::from_yaml(yaml)
    };

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let entries = top_level_entries(parsed, path)?;
    entries
        .iter()
        .map(|entry| RouteConfig::from_raw(entry, path, &base_dir, None))
        .collect()
}

/// A file's top level may be a single route object, a list of route
/// objects, or `{routes: [...]}`.
fn top_level_entries(parsed: Value, path: &Path) -> Result<Vec<Value>, ConfigError> {
    match parsed {
        Value::List(items) => Ok(items),
        Value::Map(ref map) => {
            if let Some(Value::List(items)) = map.get("routes") {
                Ok(items.clone())
            } else if map.contains_key("name") || map.contains_key("url") {
                Ok(vec![parsed])
            } else if map.is_empty() {
                Ok(Vec::new())
            } else {
                Err(ConfigError::InvalidShape {
                    path: path.to_path_buf(),
                    message: "expected a route object, a list of routes, or {routes: [...]}"
                        .to_string(),
                })
            }
        }
        Value::Null => Ok(Vec::new()),
        _ => Err(ConfigError::InvalidShape {
            path: path.to_path_buf(),
            message: "expected a route object, a list of routes, or {routes: [...]}".to_string(),
        }),
    }
}
