//! # Acquisition Manager
//!
//! One manager per sensor stream: every cadence tick it takes a raw sample,
//! attaches the last known position and the battery voltage, and hands the
//! result to the stream's [`BlockStore`].
//!
//! Ticks are aligned to wall-clock minute boundaries so readings from
//! different streams land in the same buckets.

use chrono::{NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::reading::{Enrichment, RawPayload, RawReading};
use crate::sensors::battery::BatteryProvider;
use crate::sensors::gps::PositionProvider;
use crate::storage::BlockStore;

/// Raw sample producer for one stream.
pub trait SensorSource: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Returns the current sample, or `None` when there is nothing to store.
    fn acquire(&mut self) -> Option<RawPayload>;
}

/// Periodic read, enrich, store loop for one sensor.
pub struct SensorManager<S> {
    source: S,
    position: Arc<dyn PositionProvider>,
    battery: Arc<dyn BatteryProvider>,
    store: Arc<BlockStore>,
    clock: Arc<dyn Clock>,
    cadence: Duration,
}

impl<S: SensorSource> SensorManager<S> {
    pub fn new(
        source: S,
        position: Arc<dyn PositionProvider>,
        battery: Arc<dyn BatteryProvider>,
        store: Arc<BlockStore>,
        clock: Arc<dyn Clock>,
        cadence: Duration,
    ) -> Self {
        Self {
            source,
            position,
            battery,
            store,
            clock,
            cadence,
        }
    }

    /// Runs one acquisition. Returns whether a sample was handed to the store.
    pub fn cycle(&mut self) -> bool {
        let Some(payload) = self.source.acquire() else {
            debug!("{}: no sample this cycle", self.source.name());
            return false;
        };

        let position = self.position.last_position();
        let enrichment = Enrichment {
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            battery: self.battery.read_voltage(),
        };

        self.store
            .add_data(&RawReading::new(payload).with_enrichment(enrichment));
        true
    }
}

impl<S: SensorSource + 'static> SensorManager<S> {
    /// Ticks on the cadence grid, starting at the next minute boundary,
    /// until `shutdown` flips to `true`. Missed ticks are skipped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.source.name().to_string();
        let delay = delay_to_next_minute(self.clock.wall());
        let mut ticker = interval_at(Instant::now() + delay, self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("{} manager starts in {:.1}s", name, delay.as_secs_f64());

        let mut manager = self;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let done = tokio::task::spawn_blocking(move || {
                        manager.cycle();
                        manager
                    })
                    .await;
                    match done {
                        Ok(back) => manager = back,
                        Err(e) => {
                            error!("{} cycle failed: {}", name, e);
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("{} manager stopped", name);
    }
}

/// Time until the next `HH:MM:00`; zero when `now` is exactly on one.
#[must_use]
pub fn delay_to_next_minute(now: NaiveDateTime) -> Duration {
    let into_minute =
        Duration::from_secs(u64::from(now.second())) + Duration::from_nanos(u64::from(now.nanosecond()));
    if into_minute.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_secs(60).saturating_sub(into_minute)
    }
}
