//! Sarathi daemon - bridges a driving simulator to the control pipeline.
//!
//! - **UDP in (default port 8001)**: telemetry frames from the simulator
//! - **UDP out (default port 8002)**: actuation commands to the simulator
//!
//! Four stage threads (ingress, planner, controller, egress) run the loop;
//! Ctrl-C stops them between ticks.

mod bridge;
mod config;
mod error;
mod pipeline;
mod runtime;
mod types;

use crate::config::Config;
use crate::error::{Error, Result};
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `sarathi <path>` (positional)
/// - `sarathi --config <path>` (flag-based)
/// - `sarathi -c <path>` (short flag)
///
/// Defaults to `sarathi.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "sarathi.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = if Path::new(&config_path).exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("Sarathi v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("config: {}", config_path);
    log::info!(
        "sensor channel: {} / control channel: {}",
        config.transport.sensor_bind,
        config.transport.control_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("error setting Ctrl-C handler: {}", e)))?;

    let pipeline = runtime::spawn_pipeline(&config, Arc::clone(&running))?;

    log::info!("Sarathi running. Press Ctrl-C to stop.");
    pipeline.join();

    log::info!("Sarathi stopped");
    Ok(())
}
