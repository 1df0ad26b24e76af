//! # store.rs
//!
//! The shared results document: one JSON file an external scraper polls,
//! written under a mutex by every worker. The Rust counterpart of the
//! original `ResultWriter`.

use crate::result::ResultRecord;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value as Json};
use std::path::PathBuf;

pub struct ResultStore {
    path: PathBuf,
    schema_version: u32,
    lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(path: PathBuf, schema_version: u32) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(ResultStore {
            path,
            schema_version,
            lock: Mutex::new(()),
        })
    }

    /// Reads the whole document, replaces `route_name`'s entry, and writes
    /// it back. Any read or parse failure is treated as a fresh start,
    /// mirroring the original's `_safe_read`.
    pub fn write_result(&self, route_name: &str, record: &ResultRecord) {
        let _guard = self.lock.lock();
        let mut routes = self.safe_read_routes();
        routes.insert(
            route_name.to_string(),
            serde_json::to_value(record).unwrap_or(Json::Null),
        );

        let document = json!({
            "schema_version": self.schema_version,
            "last_updated": record.timestamp.to_rfc3339(),
            "routes": Json::Object(routes),
        });

        let rendered = match serde_json::to_string_pretty(&document) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to serialize results document: {e}");
                return;
            }
        };

        if let Err(e) = std::fs::write(&self.path, rendered) {
            log::error!("failed to write results document at {:?}: {e}", self.path);
        }
    }

    fn safe_read_routes(&self) -> Map<String, Json> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Map::new(),
        };
        let parsed: Json = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                log::warn!(
                    "results document at {:?} is not valid JSON ({e}), starting fresh",
                    self.path
                );
                return Map::new();
            }
        };
        parsed
            .get("routes")
            .and_then(Json::as_object)
            .cloned()
            .unwrap_or_default()
    }
}
