//! # route-monitor
//!
//! A declarative HTTP route monitor: YAML/JSON configs describe probe
//! trees, an independent scheduler runs each tree on its own cadence,
//! chains dependent follow-up requests using JSON-path templated context,
//! and writes the latest outcome of every probe into a shared JSON document.

pub mod chain;
pub mod cli;
pub mod config;
pub mod dotenv;
pub mod env;
pub mod error;
pub mod executor;
pub mod jsonpath;
pub mod result;
pub mod scheduler;
pub mod store;
pub mod value;
