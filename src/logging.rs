//! # Logging
//!
//! Console output plus one daily-rolling file per subsystem:
//!
//! | File          | Targets                        |
//! |---------------|--------------------------------|
//! | `serial.log`  | `field_station::serial`        |
//! | `storage.log` | `field_station::storage`       |
//! | `manager.log` | `field_station::manager`       |
//! | `sensors.log` | `field_station::sensors`       |
//! | `station.log` | everything                     |
//!
//! `RUST_LOG` overrides the console level; files follow the configured level.

use std::fs;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{Result, StationError};

/// Log file name and the module target routed to it (`None` = all).
const SUBSYSTEMS: [(&str, Option<&str>); 6] = [
    ("serial.log", Some("field_station::serial")),
    ("storage.log", Some("field_station::storage")),
    ("manager.log", Some("field_station::manager")),
    ("sensors.log", Some("field_station::sensors")),
    ("power.log", Some("field_station::power")),
    ("station.log", None),
];

/// Installs the global subscriber.
///
/// The returned guards flush the file writers when dropped; keep them alive
/// for the life of the process.
///
/// # Errors
///
/// Returns error if the log directory cannot be created or a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> Result<Vec<WorkerGuard>> {
    fs::create_dir_all(&config.dir)?;
    let level: Level = config.level.parse().unwrap_or(Level::INFO);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![fmt::layer().with_filter(console_filter).boxed()];
    let mut guards = Vec::with_capacity(SUBSYSTEMS.len());

    for (file, target) in SUBSYSTEMS {
        let appender = tracing_appender::rolling::daily(&config.dir, file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(subsystem_filter(target, level))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| StationError::Logging(e.to_string()))?;

    Ok(guards)
}

/// Filter for one log file.
fn subsystem_filter(target: Option<&str>, level: Level) -> Targets {
    match target {
        Some(target) => Targets::new().with_target(target, level),
        None => Targets::new().with_default(level),
    }
}
