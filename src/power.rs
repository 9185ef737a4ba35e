//! # Power Guard
//!
//! Watches the battery and asks the station to stop once it has read
//! critical for several checks in a row, so every block is flushed before
//! the supply browns out. The OS power-off runs after the flush.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::{Result, StationError};
use crate::sensors::battery::{AdcSource, BatteryMonitor, BatteryStatus};

/// Consecutive-critical counter.
#[derive(Debug, Clone)]
pub struct CriticalStreak {
    limit: u32,
    count: u32,
}

impl CriticalStreak {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            count: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Records one check. Returns `true` once the limit is reached.
    ///
    /// An unreadable ADC leaves the streak as it was.
    pub fn observe(&mut self, status: Option<BatteryStatus>) -> bool {
        match status {
            Some(BatteryStatus::Critical) => {
                self.count += 1;
                self.count >= self.limit
            }
            Some(_) => {
                self.count = 0;
                false
            }
            None => false,
        }
    }
}

/// Periodic battery check that ends the run on a critical streak.
pub struct PowerGuard<A> {
    monitor: Arc<BatteryMonitor<A>>,
    streak: CriticalStreak,
    period: Duration,
}

impl<A: AdcSource + 'static> PowerGuard<A> {
    pub fn new(monitor: Arc<BatteryMonitor<A>>, cycles: u32, period: Duration) -> Self {
        Self {
            monitor,
            streak: CriticalStreak::new(cycles),
            period,
        }
    }

    /// Checks every `period` until the streak limit is hit (`true`) or
    /// `shutdown` flips to `true` (`false`).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> bool {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Power guard armed: {} critical checks", self.streak.limit);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let monitor = Arc::clone(&self.monitor);
                    let sample = match tokio::task::spawn_blocking(move || monitor.read_with_status()).await {
                        Ok(sample) => sample,
                        Err(e) => {
                            error!("Battery check failed: {}", e);
                            None
                        }
                    };
                    if self.streak.observe(sample.map(|(_, status)| status)) {
                        error!(
                            "[BATTERY] critical for {} checks, stopping the station",
                            self.streak.count()
                        );
                        return true;
                    }
                    match sample {
                        Some((volts, BatteryStatus::Critical)) => warn!(
                            "[BATTERY] critical: {:.2} V ({}/{})",
                            volts,
                            self.streak.count(),
                            self.streak.limit
                        ),
                        Some((volts, status)) => info!("[BATTERY] {:.2} V ({:?})", volts, status),
                        None => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Runs the configured power-off command. An empty command does nothing.
pub fn power_off(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        info!("No power-off command configured");
        return Ok(());
    };
    warn!("Powering off: {}", command.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| StationError::Hardware(format!("{}: {}", program, e)))?;
    if status.success() {
        Ok(())
    } else {
        Err(StationError::Hardware(format!("{} exited with {}", program, status)))
    }
}
