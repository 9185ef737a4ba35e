//! Per-sensor conversion from [`RawReading`] to [`Reading`].

use chrono::{NaiveDateTime, Timelike};

use super::{Measurement, RawPayload, RawReading, Reading};

/// Normalization rule for one sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    Rain,
    Seismic,
    Gps,
    Battery,
}

impl Normalizer {
    /// Converts `raw` captured at `now` into a canonical reading.
    ///
    /// Returns `None` when the payload belongs to another sensor or cannot
    /// be interpreted; the caller treats that as "nothing to store".
    #[must_use]
    pub fn normalize(&self, raw: &RawReading, now: NaiveDateTime) -> Option<Reading> {
        let measurement = match (self, &raw.payload) {
            (Normalizer::Rain, RawPayload::Rain { level_mm }) => {
                if !level_mm.is_finite() || *level_mm < 0.0 {
                    return None;
                }
                Measurement::Rain { level_mm: *level_mm }
            }
            (Normalizer::Seismic, RawPayload::Seismic { frame }) => parse_seismic_frame(frame)?,
            (
                Normalizer::Gps,
                RawPayload::Gps {
                    satellites,
                    fix_quality,
                    ..
                },
            ) => Measurement::Gps {
                satellites: satellites.unwrap_or(0),
                fix_quality: fix_quality.unwrap_or(0),
            },
            (Normalizer::Battery, RawPayload::Battery { voltage, status }) => {
                let voltage = (*voltage).filter(|v| v.is_finite())?;
                Measurement::Battery {
                    voltage,
                    status: status.unwrap_or_else(|| {
                        crate::sensors::battery::BatteryStatus::classify(
                            voltage,
                            crate::sensors::battery::DEFAULT_LOW_VOLTAGE,
                            crate::sensors::battery::DEFAULT_CRITICAL_VOLTAGE,
                        )
                    }),
                }
            }
            _ => return None,
        };

        let mut enrichment = raw.enrichment;
        if let RawPayload::Gps {
            latitude,
            longitude,
            altitude,
            ..
        } = &raw.payload
        {
            enrichment.latitude = latitude.or(enrichment.latitude);
            enrichment.longitude = longitude.or(enrichment.longitude);
            enrichment.altitude = altitude.or(enrichment.altitude);
        }

        Some(Reading {
            date: now.date(),
            time: self.stamp(now),
            measurement,
            enrichment,
        })
    }

    /// Time of day written to `TIEMPO`.
    ///
    /// Seismic frames keep their seconds; the other streams are stamped on
    /// the minute.
    fn stamp(&self, now: NaiveDateTime) -> chrono::NaiveTime {
        let time = now.time().with_nanosecond(0).unwrap_or(now.time());
        match self {
            Normalizer::Seismic => time,
            _ => time.with_second(0).unwrap_or(time),
        }
    }
}

/// Parses `"<tag> <band> <low> <high>"`, tolerating explicit `+` signs.
fn parse_seismic_frame(frame: &str) -> Option<Measurement> {
    let parts: Vec<&str> = frame.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }

    let field = |s: &str| -> Option<f64> {
        s.replace('+', "").parse::<f64>().ok().filter(|v| v.is_finite())
    };

    Some(Measurement::Seismic {
        band_pass: field(parts[1])?,
        low_pass: field(parts[2])?,
        high_pass: field(parts[3])?,
    })
}
