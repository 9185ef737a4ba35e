//! # GPS Receiver
//!
//! Turns GGA sentences into fixes and publishes the last good fix to the
//! other acquisition loops through [`SharedPosition`].
//!
//! Only the handful of GGA fields the station stores are decoded:
//! position, altitude, satellites in use and fix quality.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::manager::SensorSource;
use crate::reading::RawPayload;

/// One position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub satellites: u32,
    pub quality: u8,
}

/// Last known position; every field is `None` before the first fix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

/// Source of the station position for enrichment.
pub trait PositionProvider: Send + Sync {
    fn last_position(&self) -> Position;
}

/// Lock-guarded snapshot of the latest fix, shared across loops.
#[derive(Debug, Default)]
pub struct SharedPosition {
    fix: RwLock<Option<GpsFix>>,
}

impl SharedPosition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, fix: GpsFix) {
        *self.fix.write().unwrap_or_else(PoisonError::into_inner) = Some(fix);
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<GpsFix> {
        *self.fix.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PositionProvider for SharedPosition {
    fn last_position(&self) -> Position {
        match self.snapshot() {
            Some(fix) => Position {
                latitude: Some(fix.latitude),
                longitude: Some(fix.longitude),
                altitude: fix.altitude,
            },
            None => Position::default(),
        }
    }
}

/// Decodes a `$xxGGA` sentence. Returns `None` for other sentences, bad
/// checksums, or sentences without a position.
#[must_use]
pub fn decode_gga(sentence: &str) -> Option<GpsFix> {
    let body = sentence.trim().strip_prefix('$')?;
    let body = match body.split_once('*') {
        Some((data, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
            let actual = data.bytes().fold(0u8, |acc, b| acc ^ b);
            if actual != expected {
                debug!("NMEA checksum mismatch: {}", sentence);
                return None;
            }
            data
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 10 || fields[0].len() != 5 || !fields[0].ends_with("GGA") {
        return None;
    }

    let latitude = coordinate(fields[2], fields[3], 2)?;
    let longitude = coordinate(fields[4], fields[5], 3)?;

    Some(GpsFix {
        latitude,
        longitude,
        altitude: fields[9].parse().ok(),
        satellites: fields[7].parse().unwrap_or(0),
        quality: fields[6].parse().unwrap_or(0),
    })
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed decimal degrees,
/// rounded to 6 places.
fn coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if value.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = value.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = value.get(degree_digits..)?.parse().ok()?;
    let mut decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => {}
        "S" | "W" => decimal = -decimal,
        _ => return None,
    }
    Some((decimal * 1e6).round() / 1e6)
}

/// Fix state as seen by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsStatus {
    NoFix,
    Searching,
    Fix,
}

/// Consumes NMEA lines, publishes good fixes and tracks FIX / SEARCHING.
#[derive(Debug)]
pub struct GpsTracker {
    shared: std::sync::Arc<SharedPosition>,
    min_satellites: u32,
    fix_timeout: Duration,
    status: GpsStatus,
    last_fix: Option<Instant>,
    started: Instant,
}

impl GpsTracker {
    pub fn new(
        shared: std::sync::Arc<SharedPosition>,
        min_satellites: u32,
        fix_timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            shared,
            min_satellites,
            fix_timeout,
            status: GpsStatus::NoFix,
            last_fix: None,
            started: now,
        }
    }

    #[must_use]
    pub fn status(&self) -> GpsStatus {
        self.status
    }

    /// Handles one line; returns the fix if it was good enough to publish.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Option<GpsFix> {
        let fix = decode_gga(line).filter(|fix| {
            fix.quality >= 1 && fix.satellites >= self.min_satellites
        });

        match fix {
            Some(fix) => {
                self.shared.publish(fix);
                self.last_fix = Some(now);
                if self.status != GpsStatus::Fix {
                    info!(
                        "GPS fix with {} satellites at {:.5}, {:.5}",
                        fix.satellites, fix.latitude, fix.longitude
                    );
                    self.status = GpsStatus::Fix;
                }
                Some(fix)
            }
            None => {
                let since = now.saturating_duration_since(self.last_fix.unwrap_or(self.started));
                if self.status != GpsStatus::Searching && since > self.fix_timeout {
                    info!("Searching for GPS fix...");
                    self.status = GpsStatus::Searching;
                }
                None
            }
        }
    }
}

/// Source that records the current fix as a GPS reading.
#[derive(Debug, Clone)]
pub struct GpsSource {
    shared: std::sync::Arc<SharedPosition>,
}

impl GpsSource {
    pub fn new(shared: std::sync::Arc<SharedPosition>) -> Self {
        Self { shared }
    }
}

impl SensorSource for GpsSource {
    fn name(&self) -> &str {
        "gps"
    }

    fn acquire(&mut self) -> Option<RawPayload> {
        let fix = self.shared.snapshot()?;
        Some(RawPayload::Gps {
            latitude: Some(fix.latitude),
            longitude: Some(fix.longitude),
            altitude: fix.altitude,
            satellites: Some(fix.satellites),
            fix_quality: Some(fix.quality),
        })
    }
}
