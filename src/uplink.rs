//! # LoRa Status Uplink
//!
//! Sends a short compact-JSON status line over a LoRa radio in transparent
//! mode at a fixed interval:
//!
//! ```text
//! {"node":"REVS2","ts":"2025-06-01T14:07:00","bat":12.1,"lat":-0.21,"lon":-78.5}
//! ```
//!
//! Replies from the far side are only logged.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::sensors::battery::BatteryProvider;
use crate::sensors::gps::{Position, PositionProvider};
use crate::serial::port_trait::PortOpener;
use crate::serial::LoraLink;

/// Payloads above this size are split by the radio; keep well under it.
pub const MAX_PAYLOAD_BYTES: usize = 240;

/// One status message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBeacon {
    pub node: String,
    #[serde(with = "timestamp")]
    pub ts: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl StatusBeacon {
    pub fn new(node: &str, ts: NaiveDateTime, battery: Option<f64>, position: Position) -> Self {
        Self {
            node: node.to_string(),
            ts,
            bat: battery,
            lat: position.latitude,
            lon: position.longitude,
        }
    }

    /// Compact single-line JSON.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format("%Y-%m-%dT%H:%M:%S"))
    }
}

/// Shared inputs of the uplink thread
pub struct UplinkContext {
    pub node: String,
    pub battery: Arc<dyn BatteryProvider>,
    pub position: Arc<dyn PositionProvider>,
    pub clock: Arc<dyn Clock>,
}

impl UplinkContext {
    fn beacon(&self) -> StatusBeacon {
        StatusBeacon::new(
            &self.node,
            self.clock.wall(),
            self.battery.read_voltage(),
            self.position.last_position(),
        )
    }
}

/// Sends one beacon and drains a reply if there is one. `true` if sent.
pub fn send_beacon<O: PortOpener>(link: &mut LoraLink<O>, context: &UplinkContext) -> bool {
    let line = match context.beacon().to_line() {
        Ok(line) => line,
        Err(e) => {
            warn!("Could not encode status beacon: {}", e);
            return false;
        }
    };
    if line.len() > MAX_PAYLOAD_BYTES {
        warn!("Status beacon is {} bytes, above {}", line.len(), MAX_PAYLOAD_BYTES);
    }

    let sent = link.write_line(&line);
    if sent {
        debug!("[TX] {}", line);
        if let Some(reply) = link.read_line() {
            debug!("[RX] {}", reply);
        }
    }
    sent
}

/// Runs the uplink on its own thread until `stop` is set.
pub fn spawn_uplink<O>(
    mut link: LoraLink<O>,
    context: UplinkContext,
    every: Duration,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>>
where
    O: PortOpener + 'static,
    O::Link: 'static,
{
    std::thread::Builder::new()
        .name("lora-uplink".to_string())
        .spawn(move || {
            info!("LoRa uplink started, every {}s", every.as_secs());
            while !stop.load(Ordering::Relaxed) {
                send_beacon(&mut link, &context);

                let next = Instant::now() + every;
                while !stop.load(Ordering::Relaxed) && Instant::now() < next {
                    std::thread::sleep(Duration::from_millis(200).min(every));
                }
            }
            link.close();
            info!("LoRa uplink stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sensors::battery::NoBattery;
    use crate::sensors::gps::SharedPosition;
    use crate::serial::policy::PolicySettings;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::serial::RobustPort;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_beacon_is_compact_and_skips_unknowns() {
        let beacon = StatusBeacon::new("REVS2", at(14, 7), Some(12.1), Position::default());
        assert_eq!(
            beacon.to_line().unwrap(),
            r#"{"node":"REVS2","ts":"2025-06-01T14:07:00","bat":12.1}"#
        );
    }

    #[test]
    fn test_beacon_carries_position() {
        let position = Position {
            latitude: Some(-0.21),
            longitude: Some(-78.5),
            altitude: Some(2810.0),
        };
        let line = StatusBeacon::new("REVS2", at(14, 7), None, position)
            .to_line()
            .unwrap();
        assert_eq!(line, r#"{"node":"REVS2","ts":"2025-06-01T14:07:00","lat":-0.21,"lon":-78.5}"#);
        assert!(line.len() <= MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_send_beacon_writes_one_crlf_line() {
        let device = MockSerialPort::new();
        device.set_available(true);
        let clock = Arc::new(ManualClock::new(at(14, 7)));
        let mut link = LoraLink::new(RobustPort::new(
            device.clone(),
            PolicySettings::default(),
            clock.clone(),
        ));
        let context = UplinkContext {
            node: "REVS2".to_string(),
            battery: Arc::new(NoBattery),
            position: Arc::new(SharedPosition::new()),
            clock,
        };

        assert!(send_beacon(&mut link, &context));

        let written = device.get_written_data();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0],
            b"{\"node\":\"REVS2\",\"ts\":\"2025-06-01T14:07:00\"}\r\n".to_vec()
        );
    }

    #[test]
    fn test_uplink_thread_stops() {
        let device = MockSerialPort::new();
        device.set_available(true);
        let clock = Arc::new(ManualClock::new(at(14, 7)));
        let link = LoraLink::new(RobustPort::new(
            device.clone(),
            PolicySettings::default(),
            clock.clone(),
        ));
        let context = UplinkContext {
            node: "REVS2".to_string(),
            battery: Arc::new(NoBattery),
            position: Arc::new(SharedPosition::new()),
            clock,
        };
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_uplink(link, context, Duration::from_secs(60), Arc::clone(&stop)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while device.get_written_data().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert_eq!(device.get_written_data().len(), 1);
    }
}
