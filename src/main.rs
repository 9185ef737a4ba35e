//! # Field Station
//!
//! Runs a weather/seismic station until Ctrl+C.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load `config/station.toml` (or the path given as first argument)
//!    - Set up console and per-subsystem log files
//!    - Create one block store per enabled sensor stream
//!
//! 2. **Run**
//!    - Storage router polls for removable media every few seconds
//!    - One acquisition loop per stream, aligned to minute boundaries
//!    - GPS and seismic readers on their own threads
//!
//! 3. **Graceful Shutdown** (Ctrl+C, or a critical battery streak)
//!    - Signal tasks and reader threads, wait a bounded time for them
//!    - Flush every in-memory block
//!    - On a critical battery, run the configured power-off command

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use field_station::clock::{Clock, SystemClock};
use field_station::config::Config;
use field_station::error::StationError;
use field_station::logging;
use field_station::manager::SensorManager;
use field_station::power::{power_off, PowerGuard};
use field_station::reading::Normalizer;
use field_station::sensors::battery::{BatteryMonitor, BatteryProvider, BatterySource, IioAdc, NoBattery};
use field_station::sensors::gps::{GpsSource, GpsTracker, SharedPosition};
use field_station::sensors::rain::{open_tip_input, spawn_tip_watcher, RainGauge, TipCounter};
use field_station::sensors::seismic::{FrameSlot, SeismicSource};
use field_station::sensors::spawn_line_pump;
use field_station::serial::policy::PolicySettings;
use field_station::serial::port_trait::TokioSerialOpener;
use field_station::serial::{LineFilter, LineReader, LoraLink, RobustPort};
use field_station::storage::{BlockKind, BlockStore, StationIdentity, StorageRouter, SysinfoProbe};
use field_station::uplink::{spawn_uplink, UplinkContext};

/// Configuration used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/station.toml";

/// How long async tasks get to finish after shutdown is signalled
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long reader threads get to notice the stop flag
const THREAD_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Sleep between reads while a serial port is down
const READER_IDLE: Duration = Duration::from_millis(200);

/// Rain gauge switch sampling period
const TIP_POLL: Duration = Duration::from_millis(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;

    let _log_guards = logging::init(&config.logging)?;
    info!("Field station v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Station {} #{} ({} {}), interval {} min",
        config.station.name,
        config.station.identifier,
        config.station.model,
        config.station.serial_number,
        config.station.interval_minutes
    );

    std::fs::create_dir_all(&config.storage.internal_root).map_err(|e| {
        StationError::Storage(format!(
            "cannot create internal root {}: {}",
            config.storage.internal_root.display(),
            e
        ))
    })?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = PolicySettings::from(&config.serial);
    let position = Arc::new(SharedPosition::new());
    let stop = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Battery
    let monitor = config.battery.enabled.then(|| {
        Arc::new(BatteryMonitor::new(
            IioAdc::new(&config.battery.adc_path, config.battery.adc_scale),
            config.battery.slope,
            config.battery.offset,
            config.battery.low_voltage,
            config.battery.critical_voltage,
        ))
    });
    let battery: Arc<dyn BatteryProvider> = match &monitor {
        Some(monitor) => {
            match monitor.read_with_status() {
                Some((volts, status)) => info!("Battery: {:.2} V ({:?})", volts, status),
                None => warn!("Battery ADC not readable at startup"),
            }
            monitor.clone()
        }
        None => Arc::new(NoBattery),
    };

    let mut stores = Vec::new();
    let mut tasks = Vec::new();
    let mut threads: Vec<(&str, JoinHandle<()>)> = Vec::new();

    // Rain: no stream without a working tip source, zero rain would be made up.
    let tip_input = if config.rain.enabled {
        match open_tip_input(config.rain.gpio_pin) {
            Ok(input) => Some(input),
            Err(e) => {
                error!(
                    "Rain gauge on GPIO {} unavailable ({}); rain stream NOT recorded",
                    config.rain.gpio_pin, e
                );
                None
            }
        }
    } else {
        None
    };
    if let Some(input) = tip_input {
        let tips = Arc::new(TipCounter::new());
        let handle = spawn_tip_watcher(
            input,
            tips.clone(),
            Duration::from_millis(config.rain.debounce_ms),
            TIP_POLL,
            stop.clone(),
        )
        .map_err(|e| StationError::Hardware(format!("rain watcher: {}", e)))?;
        threads.push(("rain", handle));

        let store = new_store(&config, &config.rain.type_code, config.rain.block, Normalizer::Rain, &clock);
        let manager = SensorManager::new(
            RainGauge::new(tips, config.rain.mm_per_tip),
            position.clone(),
            battery.clone(),
            store.clone(),
            clock.clone(),
            Duration::from_secs(config.rain.cadence_secs),
        );
        tasks.push(tokio::spawn(manager.run(shutdown_rx.clone())));
        stores.push(store);
    }

    // Seismic
    if config.seismic.enabled {
        let slot = Arc::new(FrameSlot::new());
        let opener = TokioSerialOpener::new(
            &config.seismic.port,
            config.seismic.baud_rate,
            Duration::from_millis(config.seismic.timeout_ms),
        )
        .named("SEISMIC");
        let reader = LineReader::new(
            RobustPort::new(opener, settings.clone(), clock.clone()),
            LineFilter::Any,
        );
        let sink = slot.clone();
        let handle = spawn_line_pump("seismic", reader, stop.clone(), READER_IDLE, move |line| sink.put(line))
            .map_err(|e| StationError::Serial(format!("seismic reader: {}", e)))?;
        threads.push(("seismic", handle));

        let store = new_store(&config, &config.seismic.type_code, config.seismic.block, Normalizer::Seismic, &clock);
        let manager = SensorManager::new(
            SeismicSource::new(slot),
            position.clone(),
            battery.clone(),
            store.clone(),
            clock.clone(),
            Duration::from_secs(config.seismic.cadence_secs),
        );
        tasks.push(tokio::spawn(manager.run(shutdown_rx.clone())));
        stores.push(store);
    }

    // GPS
    if config.gps.enabled {
        let opener = TokioSerialOpener::new(
            &config.gps.port,
            config.gps.baud_rate,
            Duration::from_millis(config.gps.timeout_ms),
        )
        .named("GPS");
        let reader = LineReader::new(
            RobustPort::new(opener, settings.clone(), clock.clone()),
            LineFilter::Nmea,
        );
        let mut tracker = GpsTracker::new(
            position.clone(),
            config.gps.min_satellites,
            Duration::from_secs(config.gps.fix_timeout_secs),
            Instant::now(),
        );
        let handle = spawn_line_pump("gps", reader, stop.clone(), READER_IDLE, move |line| {
            tracker.handle_line(&line, Instant::now());
        })
        .map_err(|e| StationError::Serial(format!("gps reader: {}", e)))?;
        threads.push(("gps", handle));

        if config.gps.store_readings {
            let store = new_store(&config, &config.gps.type_code, BlockKind::Hour, Normalizer::Gps, &clock);
            let manager = SensorManager::new(
                GpsSource::new(position.clone()),
                position.clone(),
                battery.clone(),
                store.clone(),
                clock.clone(),
                Duration::from_secs(config.gps.cadence_secs),
            );
            tasks.push(tokio::spawn(manager.run(shutdown_rx.clone())));
            stores.push(store);
        }
    }

    // Battery stream
    if let (Some(monitor), true) = (&monitor, config.battery.store_readings) {
        let store = new_store(&config, &config.battery.type_code, BlockKind::Day, Normalizer::Battery, &clock);
        let manager = SensorManager::new(
            BatterySource::new(monitor.clone()),
            position.clone(),
            battery.clone(),
            store.clone(),
            clock.clone(),
            Duration::from_secs(config.battery.cadence_secs),
        );
        tasks.push(tokio::spawn(manager.run(shutdown_rx.clone())));
        stores.push(store);
    }

    // LoRa status uplink
    if config.lora.enabled {
        let opener = TokioSerialOpener::new(
            &config.lora.port,
            config.lora.baud_rate,
            Duration::from_millis(config.lora.timeout_ms),
        )
        .named("LORA");
        let link = LoraLink::new(RobustPort::new(opener, settings.clone(), clock.clone()));
        let context = UplinkContext {
            node: config.station.name.clone(),
            battery: battery.clone(),
            position: position.clone(),
            clock: clock.clone(),
        };
        let handle = spawn_uplink(link, context, Duration::from_secs(config.lora.interval_secs), stop.clone())
            .map_err(|e| StationError::Serial(format!("lora uplink: {}", e)))?;
        threads.push(("lora", handle));
    }

    // Storage routing
    let router = StorageRouter::new(
        SysinfoProbe::new(&config.storage.media_base, config.storage.min_free_mb * 1024 * 1024),
        stores.clone(),
        &config.storage.internal_root,
        &config.storage.data_dir_name,
        config.storage.miss_threshold,
    );
    tasks.push(tokio::spawn(router.run(
        Duration::from_secs(config.storage.poll_interval_secs),
        shutdown_rx.clone(),
    )));

    // Power guard
    let guard_task = match &monitor {
        Some(monitor) if config.battery.shutdown_cycles > 0 => Some(tokio::spawn(
            PowerGuard::new(
                monitor.clone(),
                config.battery.shutdown_cycles,
                Duration::from_secs(config.battery.guard_interval_secs),
            )
            .run(shutdown_rx.clone()),
        )),
        _ => None,
    };
    let battery_critical = async move {
        if let Some(task) = guard_task {
            if let Ok(true) = task.await {
                return;
            }
        }
        std::future::pending::<()>().await
    };

    info!("Station running with {} streams. Press Ctrl+C to exit", stores.len());

    let critical = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down...");
            false
        }
        () = battery_critical => {
            error!("Battery critical, shutting down...");
            true
        }
    };

    let _ = shutdown_tx.send(true);
    stop.store(true, Ordering::Relaxed);

    for task in tasks {
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
            warn!("A task did not stop within {:?}", TASK_SHUTDOWN_TIMEOUT);
        }
    }

    join_threads(threads, THREAD_JOIN_TIMEOUT).await;

    for store in &stores {
        store.shutdown();
    }

    info!("Field station stopped");
    if critical {
        power_off(&config.battery.shutdown_command)?;
    }
    Ok(())
}

/// Loads `path`, or the built-in defaults when the file does not exist.
fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).with_context(|| format!("failed to load {}", path))
    } else {
        eprintln!("{} not found, using defaults", path);
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

fn new_store(
    config: &Config,
    type_code: &str,
    block: BlockKind,
    normalizer: Normalizer,
    clock: &Arc<dyn Clock>,
) -> Arc<BlockStore> {
    Arc::new(BlockStore::new(
        StationIdentity {
            name: config.station.name.clone(),
            identifier: config.station.identifier,
            type_code: type_code.to_string(),
            model: config.station.model.clone(),
            serial_number: config.station.serial_number.clone(),
        },
        block,
        config.station.interval_minutes,
        normalizer,
        &config.storage.internal_root,
        clock.clone(),
    ))
}

/// Waits for reader threads up to `timeout`; stragglers are left detached.
async fn join_threads(threads: Vec<(&str, JoinHandle<()>)>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for (name, handle) in threads {
        while !handle.is_finished() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("{} reader panicked", name);
            }
        } else {
            warn!("{} reader did not stop within {:?}", name, timeout);
        }
    }
}
