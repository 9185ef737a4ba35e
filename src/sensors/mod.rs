//! # Sensors Module
//!
//! Thin adapters between station hardware and the acquisition loop.
//!
//! This module handles:
//! - Rain gauge tip accumulation
//! - Seismic detector frames pumped from a serial reader thread
//! - GPS fix decoding and the shared last-known position
//! - Battery voltage through a calibrated ADC channel

pub mod battery;
pub mod gps;
pub mod rain;
pub mod seismic;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

use crate::serial::port_trait::PortOpener;
use crate::serial::LineReader;

/// Runs `reader` on its own thread, passing every line to `on_line`, until
/// `stop` is set.
///
/// While the port is down the thread sleeps `idle` between polls so the
/// background-wait phase does not spin.
pub fn spawn_line_pump<O, F>(
    name: &str,
    mut reader: LineReader<O>,
    stop: Arc<AtomicBool>,
    idle: Duration,
    mut on_line: F,
) -> io::Result<JoinHandle<()>>
where
    O: PortOpener + 'static,
    O::Link: 'static,
    F: FnMut(String) + Send + 'static,
{
    let label = name.to_string();
    std::thread::Builder::new()
        .name(format!("{}-reader", name))
        .spawn(move || {
            info!("{} reader started", label);
            while !stop.load(Ordering::Relaxed) {
                match reader.next_line() {
                    Some(line) => on_line(line),
                    None if !reader.port().is_open() => std::thread::sleep(idle),
                    None => {}
                }
            }
            reader.close();
            info!("{} reader stopped", label);
        })
}
