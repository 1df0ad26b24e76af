//! # Route Monitor Entry Point
//!
//! Startup sequence: parse CLI args, cascade-load any `.env` files, init
//! logging, load the route tree, spawn one worker per enabled root route,
//! then wait for every worker to finish or for a shutdown signal.

use anyhow::Context;
use clap::Parser;
use route_monitor::cli::Cli;
use route_monitor::config::load_routes;
use route_monitor::scheduler::{join_all_bounded, spawn_workers, StopSignal};
use route_monitor::store::ResultStore;
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const SCHEMA_VERSION: u32 = 1;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref());

    let mut env_map = route_monitor::env::process_env_map();
    route_monitor::dotenv::load_cascade(&cli.env_file, &mut env_map)
        .with_context(|| format!("failed to load .env file(s): {:?}", cli.env_file))?;

    // Called before any worker task is spawned.
    if std::env::var("TZ").is_err() {
        std::env::set_var("TZ", "Europe/Moscow");
    }

    let routes = load_routes(&cli.config)
        .with_context(|| format!("failed to load route configuration from {:?}", cli.config))?;

    if routes.is_empty() {
        log::warn!("no enabled routes found under {:?}, nothing to do", cli.config);
        return Ok(());
    }

    log::info!("loaded {} root route(s)", routes.len());

    let store = ResultStore::new(cli.results_path.clone(), SCHEMA_VERSION)
        .map(Arc::new)
        .with_context(|| format!("failed to initialize results store at {:?}", cli.results_path))?;

    let stop = StopSignal::new();
    let handles = spawn_workers(routes, store, stop.clone(), cli.one_shot);

    let stop_for_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        stop_for_signal.trigger();
    }) {
        log::warn!("failed to install Ctrl-C handler: {e}");
    }

    join_all_bounded(handles, SHUTDOWN_TIMEOUT).await;
    Ok(())
}

fn init_logging(level: &str, log_file: Option<&std::path::Path>) {
    let env = env_logger::Env::default().default_filter_or(level);
    let mut builder = env_logger::Builder::from_env(env);

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("could not open log file {path:?}, logging to stderr only: {e}");
            }
        }
    }

    builder.init();
}
