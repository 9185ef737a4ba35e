//! # Serial Communication Module
//!
//! Resilient serial links shared by the GPS, seismic and LoRa readers.
//!
//! This module handles:
//! - Opening devices with bounded fast retries, then background checks
//! - Cooldown after too many consecutive open failures
//! - Closing and backing off after read errors, reopening on the next read
//! - Keeping failure logs to one line per outage

pub mod policy;
pub mod port_trait;
pub mod reader;

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error};

use crate::clock::Clock;
use policy::{LinkAction, LinkEvent, PolicySettings, ReconnectPolicy};
use port_trait::{error_code, PortOpener, SerialLink};

pub use reader::{LineFilter, LineReader, LoraLink};

/// Serial port that never raises: failures become `None`/`false` plus a
/// rate-limited log line.
pub struct RobustPort<O: PortOpener> {
    opener: O,
    link: Option<O::Link>,
    policy: ReconnectPolicy,
    clock: Arc<dyn Clock>,
}

impl<O: PortOpener> std::fmt::Debug for RobustPort<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustPort")
            .field("device", &self.opener.label())
            .field("open", &self.link.is_some())
            .field("state", &self.policy.state())
            .finish_non_exhaustive()
    }
}

impl<O: PortOpener> RobustPort<O> {
    /// Wraps `opener`; nothing is opened until the first `open`/`readline`.
    pub fn new(opener: O, settings: PolicySettings, clock: Arc<dyn Clock>) -> Self {
        let policy = ReconnectPolicy::new(opener.label(), settings);
        Self {
            opener,
            link: None,
            policy,
            clock,
        }
    }

    /// Whether a device handle is currently held
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Current reconnection state
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Opens the device if the policy allows an attempt now.
    ///
    /// Returns `true` when the port is open afterwards.
    pub fn open(&mut self) -> bool {
        let now = self.clock.now();
        match self.policy.advance(LinkEvent::OpenRequested, now) {
            LinkAction::Ready => self.link.is_some(),
            LinkAction::Hold => false,
            LinkAction::Pause(pause) => {
                self.clock.sleep(pause);
                false
            }
            LinkAction::Attempt => match self.opener.open() {
                Ok(link) => {
                    self.link = Some(link);
                    self.policy.advance(LinkEvent::Opened, now);
                    true
                }
                Err(e) => {
                    let code = error_code(&e);
                    debug!("Open of {} failed: {}", self.opener.label(), e);
                    if let LinkAction::Pause(pause) =
                        self.policy.advance(LinkEvent::OpenFailed { code }, now)
                    {
                        self.clock.sleep(pause);
                    }
                    false
                }
            },
        }
    }

    /// Returns the next line, or `None` when the port is closed, nothing
    /// arrived before the read timeout, or the read failed.
    ///
    /// A failed read closes the port and sleeps a short backoff; the next
    /// call tries to reopen.
    pub fn readline(&mut self) -> Option<Bytes> {
        if self.link.is_none() && !self.open() {
            return None;
        }

        let result = self.link.as_mut()?.read_line();
        match result {
            Ok(line) if line.is_empty() => None,
            Ok(line) => Some(Bytes::from(line)),
            Err(e) => {
                self.link = None;
                let code = error_code(&e);
                if let LinkAction::Pause(pause) = self
                    .policy
                    .advance(LinkEvent::ReadFailed { code }, self.clock.now())
                {
                    self.clock.sleep(pause);
                }
                None
            }
        }
    }

    /// Writes `text` followed by CRLF. Returns `false` if the port could
    /// not be opened or the write failed (the port is then closed).
    pub fn write_line(&mut self, text: &str) -> bool {
        if self.link.is_none() && !self.open() {
            return false;
        }
        let Some(link) = self.link.as_mut() else {
            return false;
        };

        let mut data = Vec::with_capacity(text.len() + 2);
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(b"\r\n");

        match link.write_all(&data) {
            Ok(()) => true,
            Err(e) => {
                error!("Write to {} failed: {}", self.opener.label(), error_code(&e));
                self.close();
                false
            }
        }
    }

    /// Drops the device handle. Safe to call when already closed.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            debug!("Closed serial port {}", self.opener.label());
        }
        self.policy.advance(LinkEvent::Closed, self.clock.now());
    }
}
