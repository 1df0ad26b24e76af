//! # cli.rs
//!
//! Command-line surface, parsed once at startup.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "route-monitor", about = "Declarative HTTP route monitor")]
pub struct Cli {
    /// Path to a route config file, or a directory of them.
    #[arg(long, default_value = "config/routes")]
    pub config: PathBuf,

    /// Where to write the shared results document.
    #[arg(long = "results-path", visible_alias = "results-file", default_value = "monitoring_results.json")]
    pub results_path: PathBuf,

    /// `.env` file to load before resolving route configs. Repeatable; later
    /// files can reference variables defined by earlier ones.
    #[arg(long = "env-file")]
    pub env_file: Vec<PathBuf>,

    /// Log level passed through to `env_logger`.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Optional file to append logs to, in addition to stderr.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Run every enabled route's chain exactly once, then exit.
    #[arg(long = "one-shot")]
    pub one_shot: bool,
}
