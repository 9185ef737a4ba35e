//! # Reading Module
//!
//! Canonical record stored in block files.
//!
//! A [`Reading`] serializes flat, in the on-disk order:
//!
//! ```text
//! { "FECHA": "2025-06-01", "TIEMPO": "14:07:00", "NIVEL": 0.25,
//!   "LATITUD": null, "LONGITUD": null, "ALTURA": null, "BATERIA": 12.1 }
//! ```
//!
//! Raw sensor output arrives as a [`RawReading`] and is turned into a
//! [`Reading`] by a [`Normalizer`].

pub mod normalize;

pub use normalize::Normalizer;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::sensors::battery::BatteryStatus;

/// One timestamped, geotagged sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Capture date (`YYYY-MM-DD`)
    #[serde(rename = "FECHA")]
    pub date: NaiveDate,

    /// Capture time of day (`HH:MM:SS`)
    #[serde(rename = "TIEMPO")]
    pub time: NaiveTime,

    /// Sensor-specific fields
    #[serde(flatten)]
    pub measurement: Measurement,

    /// Position and battery, each best-effort
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl Reading {
    /// Sub-interval bucket inside a block: `(date, hour, minute / interval)`.
    ///
    /// Two readings with the same key are the same slot; the later one wins.
    #[must_use]
    pub fn bucket(&self, interval_minutes: u32) -> (NaiveDate, u32, u32) {
        let interval = interval_minutes.max(1);
        (self.date, self.time.hour(), self.time.minute() / interval)
    }

    /// Capture timestamp.
    #[must_use]
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Domain fields, one shape per sensor type.
///
/// Every variant has at least one required field so the untagged form can
/// be read back from disk unambiguously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    /// Tipping-bucket rain gauge
    Rain {
        /// Rain accumulated in the interval, in mm
        #[serde(rename = "NIVEL")]
        level_mm: f64,
    },

    /// Seismic band-pass detector
    Seismic {
        #[serde(rename = "PASA_BANDA")]
        band_pass: f64,
        #[serde(rename = "PASA_BAJO")]
        low_pass: f64,
        #[serde(rename = "PASA_ALTO")]
        high_pass: f64,
    },

    /// GPS receiver status; the position itself lives in [`Enrichment`]
    Gps {
        #[serde(rename = "SATELITES")]
        satellites: u32,
        #[serde(rename = "FIX")]
        fix_quality: u8,
    },

    /// Battery voltage via ADC
    Battery {
        #[serde(rename = "VOLTAGE")]
        voltage: f64,
        #[serde(rename = "STATUS")]
        status: BatteryStatus,
    },
}

/// Fields attached to every reading from shared station state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(rename = "LATITUD", default)]
    pub latitude: Option<f64>,

    #[serde(rename = "LONGITUD", default)]
    pub longitude: Option<f64>,

    #[serde(rename = "ALTURA", default)]
    pub altitude: Option<f64>,

    #[serde(rename = "BATERIA", default)]
    pub battery: Option<f64>,
}

/// Sensor output before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub payload: RawPayload,
    pub enrichment: Enrichment,
}

impl RawReading {
    /// Raw reading with no enrichment.
    #[must_use]
    pub fn new(payload: RawPayload) -> Self {
        Self {
            payload,
            enrichment: Enrichment::default(),
        }
    }

    /// Replaces the enrichment fields.
    #[must_use]
    pub fn with_enrichment(mut self, enrichment: Enrichment) -> Self {
        self.enrichment = enrichment;
        self
    }
}

/// Sensor-specific raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Rain accumulated since the previous cycle
    Rain { level_mm: f64 },

    /// One undecoded detector frame, e.g. `"S +0012 +0003 +0150"`
    Seismic { frame: String },

    /// A decoded GPS fix
    Gps {
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude: Option<f64>,
        satellites: Option<u32>,
        fix_quality: Option<u8>,
    },

    /// A battery sample
    Battery {
        voltage: Option<f64>,
        status: Option<BatteryStatus>,
    },
}
