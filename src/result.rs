//! # result.rs
//!
//! The outcome record a single probe cycle produces. `store.rs` assembles
//! these (plus whatever it already has on disk) into the shared results
//! document.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub name: String,
    pub url: String,
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: f64,
    pub tags: Vec<String>,
    pub status_code: Option<u16>,
    pub reason: Option<String>,
    pub ok: bool,
    pub body_excerpt: Option<String>,
    pub body_truncated: bool,
    pub error: Option<String>,
}

impl ResultRecord {
    /// A record for a request that never produced a response at all.
    pub fn transport_failure(
        name: String,
        url: String,
        method: String,
        tags: Vec<String>,
        timestamp: DateTime<Utc>,
        elapsed_ms: f64,
        message: String,
    ) -> Self {
        ResultRecord {
            name,
            url,
            method,
            timestamp,
            response_time_ms: elapsed_ms,
            tags,
            status_code: None,
            reason: None,
            ok: false,
            body_excerpt: None,
            body_truncated: false,
            error: Some(message),
        }
    }
}
