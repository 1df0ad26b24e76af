//! # config/mod.rs
//!
//! The route configuration model and `RouteConfig::from_raw`, the Rust
//! counterpart of the original `HttpRouteConfig.from_dict`: env layering,
//! alias resolution, numeric clamping, and JSON-payload-as-literal-or-file
//! resolution.

mod loader;

pub use loader::load_routes;

use crate::env::{apply_env, build_env_map};
use crate::error::ConfigError;
use crate::value::Value;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub path: String,
    pub field_name: String,
    pub content_type: Option<String>,
    pub zip_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct MultipartJsonField {
    pub field_name: String,
    pub payload: Value,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WaitFor {
    pub path: String,
    pub attempts: u32,
    pub delay: f64,
}

#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub name: String,
    pub url: String,
    pub method: String,
    pub interval: f64,
    pub timeout: f64,
    pub headers: IndexMap<String, Value>,
    pub params: IndexMap<String, Value>,
    pub data: Option<Value>,
    pub json_body: Option<Value>,
    pub allow_redirects: bool,
    pub verify_ssl: bool,
    pub ca_bundle: Option<String>,
    pub body_max_chars: usize,
    pub file_upload: Option<FileUpload>,
    pub basic_auth: Option<BasicAuth>,
    pub multipart_json_field: String,
    pub multipart_json_fields: Vec<MultipartJsonField>,
    pub json_query_param: Option<String>,
    pub encoding_file: String,
    pub encoding_json: String,
    pub delay_before: Option<f64>,
    pub children_delay: f64,
    pub wait_for: Option<WaitFor>,
    pub tags: Vec<String>,
    pub monitor_type: String,
    pub enabled: bool,
    pub children: Vec<RouteConfig>,
}

/// Looks up the first key present among `names`, in order — how field
/// aliases (`auth`/`basic_auth`, `body`/`data`, ...) are resolved.
fn first<'a>(map: &'a IndexMap<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

fn as_string(value: &Value) -> String {
    value.stringify()
}

fn as_f64_clamped(value: Option<&Value>, default: f64, min: f64) -> f64 {
    let raw = match value {
        Some(Value::Int(i)) => *i as f64,
        Some(Value::Float(f)) => *f,
        Some(Value::String(s)) => s.parse::<f64>().unwrap_or(default),
        _ => default,
    };
    raw.max(min)
}

fn as_usize_clamped(value: Option<&Value>, default: usize, min: usize) -> usize {
    let raw = match value {
        Some(Value::Int(i)) => *i as i64,
        Some(Value::Float(f)) => *f as i64,
        Some(Value::String(s)) => s.parse::<i64>().unwrap_or(default as i64),
        _ => default as i64,
    };
    (raw.max(min as i64)) as usize
}

fn as_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => default,
    }
}

impl RouteConfig {
    /// Builds one route (and recursively its children) from a raw parsed
    /// YAML/JSON value.
    ///
    /// `base_dir` is the directory of the file the route was defined in —
    /// used to resolve relative `json` payload file paths. `inherited_env`
    /// is the env map resolved so far along the config tree (the process
    /// environment for a freshly loaded top-level route).
    pub fn from_raw(
        raw: &Value,
        source_path: &Path,
        base_dir: &Path,
        inherited_env: Option<&IndexMap<String, String>>,
    ) -> Result<RouteConfig, ConfigError> {
        let map = raw.as_map().ok_or_else(|| ConfigError::InvalidShape {
            path: source_path.to_path_buf(),
            message: "route entry must be an object".to_string(),
        })?;

        let effective_env = match map.get("env") {
            Some(env_raw) => build_env_map(Some(env_raw), inherited_env)?,
            None => inherited_env
                .cloned()
                .unwrap_or_else(crate::env::process_env_map),
        };

        let children_raw = map.get("children").cloned();
        if let Some(ref c) = children_raw {
            if !matches!(c, Value::List(_)) && !c.is_null() {
                return Err(ConfigError::ChildrenNotAList);
            }
        }

        let mut local = map.clone();
        local.shift_remove("children");
        let substituted = apply_env(&Value::Map(local), &effective_env);
        let local = substituted.as_map().expect("map stays a map").clone();

        let name = first(&local, &["name"])
            .map(as_string)
            .ok_or(ConfigError::MissingField("name"))?;
        let url = first(&local, &["url"])
            .map(as_string)
            .ok_or(ConfigError::MissingField("url"))?;

        let file_config = first(&local, &["file_upload", "file"]);
        let file_upload = file_config.map(parse_file_upload).transpose()?;

        let auth_config = first(&local, &["basic_auth", "auth"]);
        let basic_auth = auth_config.map(parse_basic_auth).transpose()?;

        let json_raw = local.get("json").or_else(|| local.get("json_body"));
        let json_body = match json_raw {
            Some(v) => Some(resolve_json_payload(v, base_dir, &effective_env)?),
            None => None,
        };

        let multipart_raw = first(&local, &["multipart_json_fields", "multipart_json"]);
        let multipart_json_fields = parse_multipart_fields(multipart_raw, base_dir, &effective_env)?;

        let wait_for = first(&local, &["wait_for"]).map(parse_wait_for).transpose()?;

        let delay_before = first(&local, &["delay_before", "pre_delay"]).map(parse_delay);
        let children_delay = first(&local, &["children_delay", "children_timeout"])
            .map(parse_delay)
            .unwrap_or(0.0);

        let children = match children_raw {
            Some(Value::List(items)) => items
                .iter()
                .map(|child| RouteConfig::from_raw(child, source_path, base_dir, Some(&effective_env)))
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        let headers = as_string_map(first(&local, &["headers"]));
        let params = as_string_map(first(&local, &["params"]));

        Ok(RouteConfig {
            name,
            url,
            method: first(&local, &["method"])
                .map(as_string)
                .unwrap_or_else(|| "GET".to_string())
                .to_uppercase(),
            interval: as_f64_clamped(first(&local, &["interval"]), 60.0, 1.0),
            timeout: as_f64_clamped(first(&local, &["timeout"]), 10.0, 1.0),
            headers,
            params,
            data: first(&local, &["data", "body"]).cloned(),
            json_body,
            allow_redirects: as_bool(first(&local, &["allow_redirects"]), true),
            verify_ssl: as_bool(first(&local, &["verify_ssl"]), true),
            ca_bundle: first(&local, &["ca_bundle", "ca_cert", "verify_path"]).map(as_string),
            body_max_chars: as_usize_clamped(
                first(&local, &["body_max_chars", "max_response_chars"]),
                2048,
                1,
            ),
            file_upload,
            basic_auth,
            multipart_json_field: first(&local, &["multipart_json_field", "json_field"])
                .map(as_string)
                .unwrap_or_else(|| "json".to_string()),
            multipart_json_fields,
            json_query_param: first(&local, &["json_query_param", "json_param"]).map(as_string),
            encoding_file: first(&local, &["encoding_file", "encondig_file"])
                .map(as_string)
                .unwrap_or_else(|| "utf-8".to_string()),
            encoding_json: first(&local, &["encoding_json", "encondig_json"])
                .map(as_string)
                .unwrap_or_else(|| "utf-8".to_string()),
            delay_before,
            children_delay,
            wait_for,
            tags: first(&local, &["tags"])
                .and_then(Value::as_list)
                .map(|items| items.iter().map(Value::stringify).collect())
                .unwrap_or_default(),
            monitor_type: first(&local, &["type", "monitor_type"])
                .map(as_string)
                .unwrap_or_else(|| "http".to_string())
                .to_lowercase(),
            enabled: as_bool(first(&local, &["enabled"]), true),
            children,
        })
    }
}

fn as_string_map(value: Option<&Value>) -> IndexMap<String, Value> {
    value.and_then(Value::as_map).cloned().unwrap_or_default()
}

fn parse_delay(value: &Value) -> f64 {
    match value {
        Value::Int(i) => (*i as f64).max(0.0),
        Value::Float(f) => f.max(0.0),
        Value::String(s) => s.parse::<f64>().unwrap_or(0.0).max(0.0),
        _ => 0.0,
    }
}

fn parse_file_upload(value: &Value) -> Result<FileUpload, ConfigError> {
    let map = value.as_map().ok_or(ConfigError::InvalidShape {
        path: PathBuf::new(),
        message: "file_upload must be an object".to_string(),
    })?;
    let path = first(map, &["path"])
        .map(as_string)
        .ok_or(ConfigError::MissingField("file_upload.path"))?;
    Ok(FileUpload {
        path,
        field_name: first(map, &["field_name"])
            .map(as_string)
            .unwrap_or_else(|| "file".to_string()),
        content_type: first(map, &["content_type"]).map(as_string),
        zip_enabled: as_bool(first(map, &["zip_enabled"]), false),
    })
}

fn parse_basic_auth(value: &Value) -> Result<BasicAuth, ConfigError> {
    let map = value.as_map().ok_or(ConfigError::InvalidShape {
        path: PathBuf::new(),
        message: "basic_auth must be an object".to_string(),
    })?;
    Ok(BasicAuth {
        username: first(map, &["username"])
            .map(as_string)
            .ok_or(ConfigError::MissingField("basic_auth.username"))?,
        password: first(map, &["password"])
            .map(as_string)
            .ok_or(ConfigError::MissingField("basic_auth.password"))?,
    })
}

fn parse_wait_for(value: &Value) -> Result<WaitFor, ConfigError> {
    if let Value::String(s) = value {
        return Ok(WaitFor {
            path: s.clone(),
            attempts: 1,
            delay: 0.0,
        });
    }
    let map = value.as_map().ok_or(ConfigError::InvalidWaitFor)?;
    let path = first(map, &["path", "json_path", "field"])
        .map(as_string)
        .ok_or(ConfigError::MissingWaitForPath)?;
    let attempts = match first(map, &["attempts", "retries"]) {
        Some(Value::Int(i)) => (*i).max(1) as u32,
        Some(Value::Float(f)) => (*f as i64).max(1) as u32,
        _ => 1,
    };
    let delay = first(map, &["delay", "interval"])
        .map(parse_delay)
        .unwrap_or(0.0);
    Ok(WaitFor {
        path,
        attempts,
        delay,
    })
}

/// Resolves a `json`/`json_body` field: if it's a string pointing at an
/// existing file (absolute, or relative to `base_dir`), parse that file's
/// contents as JSON and re-apply env substitution; otherwise treat the
/// original value as the literal payload.
fn resolve_json_payload(
    value: &Value,
    base_dir: &Path,
    env_map: &IndexMap<String, String>,
) -> Result<Value, ConfigError> {
    let substituted = apply_env(value, env_map);
    let raw = match substituted.as_str() {
        Some(s) => s.trim(),
        None => return Ok(substituted),
    };
    if raw.is_empty() {
        return Ok(substituted);
    }

    let candidate = PathBuf::from(raw);
    let file_path = if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(&candidate)
    };

    if file_path.exists() {
        let content = std::fs::read_to_string(&file_path).map_err(|e| ConfigError::Read {
            path: file_path.clone(),
            source: e,
        })?;
        let parsed: serde_json::Value = serde_json::from_str(if content.is_empty() {
            "null"
        } else {
            &content
        })
        .map_err(|e| ConfigError::InvalidJsonPayload {
            path: file_path.clone(),
            source: e,
        })?;
        let value = Value::from_json(parsed);
        return Ok(apply_env(&value, env_map));
    }

    Ok(substituted)
}

fn parse_multipart_fields(
    value: Option<&Value>,
    base_dir: &Path,
    env_map: &IndexMap<String, String>,
) -> Result<Vec<MultipartJsonField>, ConfigError> {
    let value = match value {
        Some(v) if !v.is_null() => v,
        _ => return Ok(Vec::new()),
    };

    match value {
        Value::Map(map) => {
            let mut fields = Vec::new();
            for (field_name, payload) in map {
                let resolved = resolve_json_payload(payload, base_dir, env_map)?;
                fields.push(MultipartJsonField {
                    field_name: field_name.clone(),
                    payload: resolved,
                    encoding: None,
                });
            }
            Ok(fields)
        }
        Value::List(items) => {
            let mut fields = Vec::new();
            for entry in items {
                let entry_map = entry.as_map().ok_or(ConfigError::InvalidMultipartFields)?;
                let field_name = first(entry_map, &["field_name", "field", "name"])
                    .map(as_string)
                    .ok_or(ConfigError::MissingFieldName)?;
                let payload_raw = entry_map
                    .get("json")
                    .or_else(|| entry_map.get("payload"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let resolved = resolve_json_payload(&payload_raw, base_dir, env_map)?;
                let encoding = first(entry_map, &["encoding"]).map(as_string);
                fields.push(MultipartJsonField {
                    field_name,
                    payload: resolved,
                    encoding,
                });
            }
            Ok(fields)
        }
        _ => Err(ConfigError::InvalidMultipartFields),
    }
}
