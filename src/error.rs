//! # error.rs
//!
//! The three error families from the design: `ConfigError` is fatal at load
//! time, `ProbeTransportError` is folded into a `ResultRecord` and never
//! propagates past the request executor.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {message}")]
    InvalidShape { path: PathBuf, message: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid JSON payload file {path}: {source}")]
    InvalidJsonPayload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("route is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("`env` block must be a mapping, found {0}")]
    InvalidEnv(&'static str),

    #[error("`children` must be a list of routes")]
    ChildrenNotAList,

    #[error("`multipart_json_fields` must be a list or mapping")]
    InvalidMultipartFields,

    #[error("`multipart_json_fields` entry is missing `field_name`")]
    MissingFieldName,

    #[error("`wait_for` must be a string or an object")]
    InvalidWaitFor,

    #[error("`wait_for` is missing `path`")]
    MissingWaitForPath,

    #[error("no route configuration found under {0}")]
    NoConfigFound(PathBuf),
}

/// A request that failed to produce a response at all (network, TLS, DNS,
/// IO, timeout, or local file/zip assembly failure). Always recorded into
/// the route's `ResultRecord`, never propagated.
#[derive(Debug, Error)]
pub enum ProbeTransportError {
    #[error("{0}")]
    Message(String),
}

impl ProbeTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        ProbeTransportError::Message(message.into())
    }
}

impl From<reqwest::Error> for ProbeTransportError {
    fn from(err: reqwest::Error) -> Self {
        ProbeTransportError::Message(err.to_string())
    }
}

impl From<std::io::Error> for ProbeTransportError {
    fn from(err: std::io::Error) -> Self {
        ProbeTransportError::Message(err.to_string())
    }
}
