//! # Battery Monitor
//!
//! Reads the station battery through an ADC channel and classifies it.
//!
//! The ADC bus is not safe for concurrent use, so every read opens the
//! source, samples once and closes it again.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::manager::SensorSource;
use crate::reading::RawPayload;

/// Voltage at or above which the battery is considered healthy.
pub const DEFAULT_LOW_VOLTAGE: f64 = 10.0;

/// Voltage below which the battery is considered critical.
pub const DEFAULT_CRITICAL_VOLTAGE: f64 = 9.5;

/// Battery charge classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryStatus {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "BAJA")]
    Low,
    #[serde(rename = "CRÍTICA")]
    Critical,
}

impl BatteryStatus {
    /// Classifies `voltage` against the low and critical thresholds.
    #[must_use]
    pub fn classify(voltage: f64, low: f64, critical: f64) -> Self {
        if voltage >= low {
            BatteryStatus::Normal
        } else if voltage >= critical {
            BatteryStatus::Low
        } else {
            BatteryStatus::Critical
        }
    }
}

/// Anything that can report the current battery voltage.
pub trait BatteryProvider: Send + Sync {
    /// Latest voltage, or `None` when the ADC could not be read.
    fn read_voltage(&self) -> Option<f64>;
}

/// Provider for stations without a battery ADC.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBattery;

impl BatteryProvider for NoBattery {
    fn read_voltage(&self) -> Option<f64> {
        None
    }
}

/// Raw voltage source on the ADC.
pub trait AdcSource: Send + Sync {
    /// Opens the channel, samples once and closes it.
    fn sample_volts(&self) -> std::io::Result<f64>;
}

/// Linux IIO sysfs channel (`in_voltageN_raw`) scaled to volts.
#[derive(Debug, Clone)]
pub struct IioAdc {
    path: PathBuf,
    scale: f64,
}

impl IioAdc {
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }
}

impl AdcSource for IioAdc {
    fn sample_volts(&self) -> std::io::Result<f64> {
        let text = fs::read_to_string(&self.path)?;
        let raw: f64 = text.trim().parse().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad ADC value: {}", e))
        })?;
        Ok(raw * self.scale)
    }
}

/// Calibrated battery reader: `volts = slope * raw + offset`.
#[derive(Debug, Clone)]
pub struct BatteryMonitor<A> {
    adc: A,
    slope: f64,
    offset: f64,
    low: f64,
    critical: f64,
}

impl<A: AdcSource> BatteryMonitor<A> {
    pub fn new(adc: A, slope: f64, offset: f64, low: f64, critical: f64) -> Self {
        Self {
            adc,
            slope,
            offset,
            low,
            critical,
        }
    }

    /// Calibrated voltage rounded to centivolts.
    #[must_use]
    pub fn read(&self) -> Option<f64> {
        match self.adc.sample_volts() {
            Ok(raw) => Some(((raw * self.slope + self.offset) * 100.0).round() / 100.0),
            Err(e) => {
                warn!("Battery ADC read failed: {}", e);
                None
            }
        }
    }

    /// Voltage together with its classification.
    #[must_use]
    pub fn read_with_status(&self) -> Option<(f64, BatteryStatus)> {
        self.read()
            .map(|v| (v, BatteryStatus::classify(v, self.low, self.critical)))
    }
}

impl<A: AdcSource> BatteryProvider for BatteryMonitor<A> {
    fn read_voltage(&self) -> Option<f64> {
        self.read()
    }
}

/// Source that records the battery itself as a reading stream.
pub struct BatterySource<A> {
    monitor: Arc<BatteryMonitor<A>>,
}

impl<A> BatterySource<A> {
    pub fn new(monitor: Arc<BatteryMonitor<A>>) -> Self {
        Self { monitor }
    }
}

impl<A: AdcSource> SensorSource for BatterySource<A> {
    fn name(&self) -> &str {
        "battery"
    }

    fn acquire(&mut self) -> Option<RawPayload> {
        let (voltage, status) = self.monitor.read_with_status()?;
        Some(RawPayload::Battery {
            voltage: Some(voltage),
            status: Some(status),
        })
    }
}
