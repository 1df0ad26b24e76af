//! # executor.rs
//!
//! Turns one resolved `RouteConfig` into a single HTTP request and a
//! `ResultRecord`, the Rust counterpart of `_execute_request_once` /
//! `_prepare_files` / `_build_zip` in the original implementation.

use crate::config::{FileUpload, MultipartJsonField, RouteConfig};
use crate::error::ProbeTransportError;
use crate::jsonpath;
use crate::result::ResultRecord;
use crate::value::Value;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

/// A fresh `reqwest::Client` per distinct (verify_ssl, ca_bundle,
/// allow_redirects) combination, cached for the life of the worker that owns
/// this executor. Avoids rebuilding the connection pool on every tick for
/// the common case where a route's TLS/redirect settings never change.
///
/// `parking_lot::Mutex` rather than `RefCell`: an `Executor` is held across
/// `.await` points by `run_chain`'s worker-spawned cycle task, so it must be
/// `Sync` for that future to be `Send`.
#[derive(Default)]
pub struct Executor {
    clients: Mutex<HashMap<(bool, Option<String>, bool), reqwest::Client>>,
}

impl Executor {
    pub fn new() -> Self {
        Executor::default()
    }

    fn client_for(&self, config: &RouteConfig) -> Result<reqwest::Client, ProbeTransportError> {
        let key = (
            config.verify_ssl,
            config.ca_bundle.clone(),
            config.allow_redirects,
        );
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder();
        if !config.allow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        builder = match verify_option(config) {
            Verify::CustomCa(cert) => builder.add_root_certificate(cert),
            Verify::Plain(verify_ssl) => builder.danger_accept_invalid_certs(!verify_ssl),
        };

        let client = builder
            .build()
            .map_err(|e| ProbeTransportError::new(format!("failed to build HTTP client: {e}")))?;
        self.clients.lock().insert(key, client.clone());
        Ok(client)
    }

    /// Executes one request attempt (no retries, no chaining). Returns the
    /// outcome record, the parsed JSON body (if any), and whether a response
    /// was obtained at all.
    pub async fn execute_once(
        &self,
        config: &RouteConfig,
        context: Option<&Value>,
    ) -> (ResultRecord, Option<Value>, bool) {
        let timestamp = Utc::now();
        let start = Instant::now();

        let url_value = resolve_value(&Value::String(config.url.clone()), context);
        let url = url_value.stringify();

        let outcome = self.send(config, context, &url).await;
        let elapsed_ms = round2(start.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok((status, reason, ok, body_bytes)) => {
                let response_json = parse_json_body(&body_bytes);
                let (body_excerpt, body_truncated) = safe_body(&body_bytes, config.body_max_chars);
                let record = ResultRecord {
                    name: config.name.clone(),
                    url,
                    method: config.method.clone(),
                    timestamp,
                    response_time_ms: elapsed_ms,
                    tags: config.tags.clone(),
                    status_code: Some(status),
                    reason: Some(reason),
                    ok,
                    body_excerpt,
                    body_truncated,
                    error: None,
                };
                (record, response_json, true)
            }
            Err(err) => {
                let record = ResultRecord::transport_failure(
                    config.name.clone(),
                    url,
                    config.method.clone(),
                    config.tags.clone(),
                    timestamp,
                    elapsed_ms,
                    err.to_string(),
                );
                (record, None, false)
            }
        }
    }

    async fn send(
        &self,
        config: &RouteConfig,
        context: Option<&Value>,
        url: &str,
    ) -> Result<(u16, String, bool, Vec<u8>), ProbeTransportError> {
        let client = self.client_for(config)?;

        let method: reqwest::Method = config
            .method
            .parse()
            .map_err(|_| ProbeTransportError::new(format!("invalid HTTP method: {}", config.method)))?;

        let mut request = client.request(method, url);

        let headers = resolve_mapping(&config.headers, context);
        let params = resolve_mapping(&config.params, context);
        if !params.is_empty() {
            let pairs: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.clone(), v.stringify()))
                .collect();
            request = request.query(&pairs);
        }

        let data = config.data.as_ref().map(|v| resolve_value(v, context));
        let mut json_payload = config
            .json_body
            .as_ref()
            .map(|v| resolve_value(v, context));

        let mut file_part = match &config.file_upload {
            Some(upload) => Some(prepare_file_part(upload, config)?),
            None => None,
        };

        let extra_json_parts = prepare_multipart_json_fields(&config.multipart_json_fields, context, &config.encoding_json);

        if let Some(query_param) = &config.json_query_param {
            if let Some(payload) = json_payload.take() {
                let encoded = encode_json_field(&payload);
                request = request.query(&[(query_param.as_str(), encoded.as_str())]);
            }
        }

        let mut multipart_fields: Vec<(String, reqwest::multipart::Part)> = Vec::new();
        if let Some((field_name, part)) = file_part.take() {
            multipart_fields.push((field_name, part));
        }
        for (field_name, payload, encoding) in extra_json_parts {
            let effective_encoding = encoding.unwrap_or_else(|| config.encoding_json.clone());
            if multipart_fields.iter().any(|(name, _)| name == &field_name) {
                log::debug!("field {field_name} already present among files, overwritten by JSON part");
                multipart_fields.retain(|(name, _)| name != &field_name);
            }
            multipart_fields.push((field_name, json_part(&payload, &effective_encoding)));
        }

        if !multipart_fields.is_empty() {
            if let Some(payload) = json_payload.take() {
                let field_name = config.multipart_json_field.clone();
                if multipart_fields.iter().any(|(name, _)| name == &field_name) {
                    log::debug!("field {field_name} already present among files, overwritten by JSON part");
                    multipart_fields.retain(|(name, _)| name != &field_name);
                }
                multipart_fields.push((field_name, json_part(&payload, &config.encoding_json)));
            }
        }

        let has_multipart = !multipart_fields.is_empty();

        let mut header_map = HeaderMap::new();
        for (name, value) in &headers {
            if has_multipart && name.eq_ignore_ascii_case("content-type") {
                log::debug!("dropped caller-supplied Content-Type: reqwest will set the multipart boundary");
                continue;
            }
            if let (Ok(key), Ok(val)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value.stringify()),
            ) {
                header_map.insert(key, val);
            }
        }
        if !header_map.is_empty() {
            request = request.headers(header_map);
        }

        if let Some(auth) = &config.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        if has_multipart {
            let mut form = reqwest::multipart::Form::new();
            for (name, part) in multipart_fields {
                form = form.part(name, part);
            }
            request = request.multipart(form);
        } else if let Some(payload) = json_payload {
            request = request.json(&payload.to_json());
        } else if let Some(data) = data {
            request = apply_data_body(request, data);
        }

        let timeout = Duration::from_secs_f64(config.timeout.max(0.001));
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ProbeTransportError::new(format!("request timed out after {}s", config.timeout)))?
            .map_err(ProbeTransportError::from)?;

        let status = response.status();
        let status_code = status.as_u16();
        let reason = status.canonical_reason().unwrap_or("").to_string();
        let ok = is_ok_status(status_code);
        let body = response.bytes().await.map_err(ProbeTransportError::from)?;

        Ok((status_code, reason, ok, body.to_vec()))
    }
}

/// `ok` is `200 <= status < 400` — redirects count as success, matching the
/// original's `response.ok` (which is not `reqwest::StatusCode::is_success`,
/// that only covers 2xx).
fn is_ok_status(status_code: u16) -> bool {
    (200..400).contains(&status_code)
}

fn apply_data_body(request: reqwest::RequestBuilder, data: Value) -> reqwest::RequestBuilder {
    match &data {
        Value::Map(map) => {
            let pairs: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| (k.clone(), v.stringify()))
                .collect();
            request.form(&pairs)
        }
        _ => request.body(data.stringify()),
    }
}

enum Verify {
    CustomCa(reqwest::Certificate),
    Plain(bool),
}

fn verify_option(config: &RouteConfig) -> Verify {
    let Some(ca_bundle) = &config.ca_bundle else {
        return Verify::Plain(config.verify_ssl);
    };
    let path = Path::new(ca_bundle);
    match std::fs::read(path) {
        Ok(bytes) => match reqwest::Certificate::from_pem(&bytes) {
            Ok(cert) => Verify::CustomCa(cert),
            Err(e) => {
                log::warn!(
                    "CA bundle {ca_bundle} could not be parsed ({e}), falling back to verify_ssl={}",
                    config.verify_ssl
                );
                Verify::Plain(config.verify_ssl)
            }
        },
        Err(_) => {
            log::warn!(
                "CA bundle {ca_bundle} not found, falling back to verify_ssl={}",
                config.verify_ssl
            );
            Verify::Plain(config.verify_ssl)
        }
    }
}

/// Template-resolves every string leaf of `value` against `context`. A
/// `None` context is the identity transform (mirrors `_resolve_value`'s
/// early return when there is no parent result yet).
fn resolve_value(value: &Value, context: Option<&Value>) -> Value {
    let Some(context) = context else {
        return value.clone();
    };
    match value {
        Value::String(s) => jsonpath::resolve_text(s, context),
        Value::List(items) => Value::List(items.iter().map(|v| resolve_value(v, Some(context))).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, Some(context))))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_mapping(map: &IndexMap<String, Value>, context: Option<&Value>) -> IndexMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, context)))
        .collect()
}

fn encode_json_field(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(&other.to_json()).unwrap_or_default(),
    }
}

fn json_part(payload: &Value, encoding: &str) -> reqwest::multipart::Part {
    let encoded = encode_json_field(payload);
    let bytes = reencode_bytes(encoded.as_bytes(), encoding);
    let content_type = format!("application/json; charset={encoding}");
    reqwest::multipart::Part::bytes(bytes)
        .mime_str(&content_type)
        .unwrap_or_else(|_| reqwest::multipart::Part::bytes(encoded.into_bytes()))
}

fn prepare_multipart_json_fields(
    fields: &[MultipartJsonField],
    context: Option<&Value>,
    default_encoding: &str,
) -> Vec<(String, Value, Option<String>)> {
    fields
        .iter()
        .map(|field| {
            let resolved = resolve_value(&field.payload, context);
            (field.field_name.clone(), resolved, field.encoding.clone().or_else(|| Some(default_encoding.to_string())))
        })
        .collect()
}

fn prepare_file_part(
    upload: &FileUpload,
    config: &RouteConfig,
) -> Result<(String, reqwest::multipart::Part), ProbeTransportError> {
    let path = Path::new(&upload.path);
    if !path.exists() {
        return Err(ProbeTransportError::new(format!(
            "file_upload path does not exist: {}",
            upload.path
        )));
    }

    let should_zip = if path.is_dir() {
        if !upload.zip_enabled {
            return Err(ProbeTransportError::new(format!(
                "uploading a directory ({}) requires zip_enabled: true",
                upload.path
            )));
        }
        true
    } else {
        upload.zip_enabled
            && path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| !e.eq_ignore_ascii_case("zip"))
                .unwrap_or(true)
    };

    let (bytes, filename, content_type) = if should_zip {
        let tmp_dir = tempfile::TempDir::new()
            .map_err(|e| ProbeTransportError::new(format!("failed to create scratch directory: {e}")))?;
        let base_name = if path.is_dir() {
            path.file_name().and_then(|n| n.to_str()).unwrap_or("upload").to_string()
        } else {
            path.file_stem().and_then(|n| n.to_str()).unwrap_or("upload").to_string()
        };
        let archive_path = tmp_dir.path().join(format!("{base_name}.zip"));
        build_zip(path, &archive_path, &config.encoding_file)?;
        let filename = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.zip")
            .to_string();
        let bytes = std::fs::read(&archive_path).map_err(|e| {
            ProbeTransportError::new(format!("failed to read archive {}: {e}", archive_path.display()))
        })?;
        (bytes, filename, "application/zip".to_string())
    } else {
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("upload").to_string();
        let mut content_type = upload
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if content_type.to_ascii_lowercase().starts_with("text/")
            && !content_type.to_ascii_lowercase().contains("charset=")
        {
            content_type = format!("{content_type}; charset={}", config.encoding_file);
        }
        let bytes = std::fs::read(path).map_err(|e| {
            ProbeTransportError::new(format!("failed to read upload file {}: {e}", path.display()))
        })?;
        (bytes, filename, content_type)
    };

    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(filename)
        .mime_str(&content_type)
        .unwrap_or_else(|_| reqwest::multipart::Part::bytes(Vec::new()));

    Ok((upload.field_name.clone(), part))
}

/// Builds a deflate-compressed zip of `source` (file or directory) at
/// `target`, re-encoding each entry's text content into `target_encoding`.
/// Directory archives preserve the source folder name as a top-level entry,
/// matching `_build_zip`'s `root_arcname`.
fn build_zip(source: &Path, target: &Path, target_encoding: &str) -> Result<(), ProbeTransportError> {
    let file = std::fs::File::create(target)
        .map_err(|e| ProbeTransportError::new(format!("failed to create archive {}: {e}", target.display())))?;
    let mut archive = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    if source.is_file() {
        let arcname = source.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
        write_entry(&mut archive, source, &arcname, target_encoding, &options)?;
        archive
            .finish()
            .map_err(|e| ProbeTransportError::new(format!("failed to finalize archive: {e}")))?;
        return Ok(());
    }

    let root_name = source.file_name().and_then(|n| n.to_str()).unwrap_or("root").to_string();
    archive
        .add_directory(format!("{root_name}/"), options)
        .map_err(|e| ProbeTransportError::new(format!("failed to write archive entry: {e}")))?;

    let parent = source.parent().unwrap_or(source);
    let mut entries: Vec<walkdir::DirEntry> = walkdir::WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let relative = entry
            .path()
            .strip_prefix(parent)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            archive
                .add_directory(format!("{relative}/"), options)
                .map_err(|e| ProbeTransportError::new(format!("failed to write archive entry: {e}")))?;
        } else {
            write_entry(&mut archive, entry.path(), &relative, target_encoding, &options)?;
        }
    }

    archive
        .finish()
        .map_err(|e| ProbeTransportError::new(format!("failed to finalize archive: {e}")))?;
    Ok(())
}

fn write_entry(
    archive: &mut zip::ZipWriter<std::fs::File>,
    path: &Path,
    arcname: &str,
    target_encoding: &str,
    options: &zip::write::SimpleFileOptions,
) -> Result<(), ProbeTransportError> {
    let raw = std::fs::read(path)
        .map_err(|e| ProbeTransportError::new(format!("failed to read file to archive {}: {e}", path.display())))?;
    let data = reencode_bytes(&raw, target_encoding);
    archive
        .start_file(arcname, *options)
        .map_err(|e| ProbeTransportError::new(format!("failed to write archive entry: {e}")))?;
    use std::io::Write;
    archive
        .write_all(&data)
        .map_err(|e| ProbeTransportError::new(format!("failed to write archive entry: {e}")))?;
    Ok(())
}

/// Decodes `raw` as UTF-8, then re-encodes into `target_encoding`, falling
/// back to the raw bytes whenever either step fails. Only `utf-8` and the
/// single-byte `latin-1`/`iso-8859-1` charsets are supported re-encoding
/// targets; any other encoding name is treated as "unsupported" and also
/// falls back to the raw bytes, matching the original's own fallback path
/// for unknown Python codecs.
fn reencode_bytes(raw: &[u8], target_encoding: &str) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return raw.to_vec();
    };
    match target_encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => text.as_bytes().to_vec(),
        "latin-1" | "latin1" | "iso-8859-1" => {
            let mut out = Vec::with_capacity(text.len());
            for c in text.chars() {
                if (c as u32) > 0xFF {
                    return raw.to_vec();
                }
                out.push(c as u8);
            }
            out
        }
        _ => raw.to_vec(),
    }
}

/// Truncates `body` at `max_chars` (counted in Unicode scalar values, like
/// Python's `len(str)`), appending `"..."` when truncated. Bodies that
/// aren't valid UTF-8 become the sentinel `"<binary content>"`, matching the
/// original's `UnicodeDecodeError` handling.
fn safe_body(body: &[u8], max_chars: usize) -> (Option<String>, bool) {
    let text = match std::str::from_utf8(body) {
        Ok(t) => t,
        Err(_) => return (Some("<binary content>".to_string()), false),
    };
    let max_chars = max_chars.max(1);
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return (Some(text.to_string()), false);
    }
    let truncated: String = text.chars().take(max_chars).collect();
    (Some(format!("{truncated}...")), true)
}

fn parse_json_body(body: &[u8]) -> Option<Value> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .map(Value::from_json)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn safe_body_truncates_and_flags() {
        let (body, truncated) = safe_body("hello world".as_bytes(), 5);
        assert_eq!(body.as_deref(), Some("hello..."));
        assert!(truncated);
    }

    #[test]
    fn safe_body_flags_binary_content() {
        let (body, truncated) = safe_body(&[0xff, 0xfe, 0x00], 100);
        assert_eq!(body.as_deref(), Some("<binary content>"));
        assert!(!truncated);
    }

    #[test]
    fn reencode_falls_back_on_unsupported_encoding() {
        let raw = "hello".as_bytes();
        assert_eq!(reencode_bytes(raw, "shift-jis"), raw.to_vec());
    }

    #[test]
    fn reencode_latin1_rejects_out_of_range_scalars() {
        let raw = "héllo".as_bytes();
        assert_eq!(reencode_bytes(raw, "latin-1"), raw.to_vec());
    }

    #[test]
    fn ok_status_covers_2xx_and_3xx_but_not_4xx() {
        assert!(is_ok_status(200));
        assert!(is_ok_status(301));
        assert!(is_ok_status(399));
        assert!(!is_ok_status(400));
        assert!(!is_ok_status(500));
    }

    #[test]
    fn resolve_value_without_context_is_identity() {
        let value = Value::String("{{ $.id }}".to_string());
        assert_eq!(resolve_value(&value, None), value);
    }

    #[test]
    fn resolve_mapping_walks_every_entry() {
        let mut map = IndexMap::new();
        map.insert("greeting".to_string(), Value::String("{{ $.name }}".to_string()));
        let mut ctx_map = IndexMap::new();
        ctx_map.insert("name".to_string(), Value::String("world".to_string()));
        let context = Value::Map(ctx_map);
        let resolved = resolve_mapping(&map, Some(&context));
        assert_eq!(resolved.get("greeting"), Some(&Value::String("world".to_string())));
    }
}
