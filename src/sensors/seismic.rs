//! # Seismic Detector
//!
//! The detector streams one text frame per line over serial. The reader
//! thread keeps only the most recent frame; each acquisition cycle takes it.

use std::sync::{Arc, Mutex, PoisonError};

use crate::manager::SensorSource;
use crate::reading::RawPayload;

/// Most recent undecoded detector frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<String>>,
}

impl FrameSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held frame.
    pub fn put(&self, frame: String) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    /// Takes the held frame, leaving the slot empty.
    pub fn take(&self) -> Option<String> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Seismic source: yields the latest frame, if one arrived since last cycle.
#[derive(Debug, Clone)]
pub struct SeismicSource {
    slot: Arc<FrameSlot>,
}

impl SeismicSource {
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self { slot }
    }
}

impl SensorSource for SeismicSource {
    fn name(&self) -> &str {
        "seismic"
    }

    fn acquire(&mut self) -> Option<RawPayload> {
        self.slot.take().map(|frame| RawPayload::Seismic { frame })
    }
}
