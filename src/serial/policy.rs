//! # Reconnect Policy
//!
//! State machine behind [`RobustPort`](super::RobustPort).
//!
//! ```text
//!            open ok                         read error
//!   ┌──────────────────────► OPEN ─────────────────────────┐
//!   │                                                      ▼
//! FAST_RETRY ──N failures──► BACKGROUND_WAIT        FAST_RETRY (+ backoff)
//!   ▲                           │ failure: reschedule
//!   │                           ▼
//!   └──── cooldown over ── COOLDOWN ◄── max consecutive failures (any phase)
//! ```
//!
//! Every transition goes through [`ReconnectPolicy::advance`]. Time is
//! passed in, so the machine runs unchanged against a simulated clock.
//! Repeated failures are logged once until the link comes back.

use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::SerialConfig;

/// Tuning for one serial link.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySettings {
    /// Consecutive open failures before a cooldown
    pub max_open_failures: u32,
    /// Length of the cooldown
    pub open_cooldown: Duration,
    /// Base delay applied after a read error
    pub read_delay: Duration,
    /// Multiplier applied to `read_delay`
    pub backoff_factor: f64,
    /// Upper bound for the read-error backoff
    pub max_backoff: Duration,
    /// Fast open attempts before switching to background checks
    pub disconnect_verifications: u32,
    /// Spacing of background open attempts
    pub background_check: Duration,
    /// Pause between fast open attempts
    pub quick_retry_delay: Duration,
    pub log_immediate_retry_info: bool,
    pub log_background_errors: bool,
    pub log_cooldown: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            max_open_failures: 5,
            open_cooldown: Duration::from_secs(30),
            read_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(2),
            disconnect_verifications: 3,
            background_check: Duration::from_secs(10),
            quick_retry_delay: Duration::from_secs(1),
            log_immediate_retry_info: false,
            log_background_errors: true,
            log_cooldown: true,
        }
    }
}

impl From<&SerialConfig> for PolicySettings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            max_open_failures: config.max_open_failures,
            open_cooldown: Duration::from_secs(config.open_cooldown_secs),
            read_delay: Duration::from_millis(config.read_delay_ms),
            backoff_factor: config.backoff_factor,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            disconnect_verifications: config.disconnect_verifications,
            background_check: Duration::from_secs(config.background_check_secs),
            quick_retry_delay: Duration::from_millis(config.quick_retry_delay_ms),
            log_immediate_retry_info: config.log_immediate_retry_info,
            log_background_errors: config.log_background_errors,
            log_cooldown: config.log_cooldown,
        }
    }
}

/// Where the link currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Device open and readable
    Open,
    /// Closed, fast attempts remaining
    FastRetry { tries_left: u32 },
    /// Closed, fast attempts exhausted; next attempt not before `next_check`
    BackgroundWait { next_check: Instant },
    /// No attempts until `until`
    Cooldown { until: Instant },
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The caller wants the link open
    OpenRequested,
    /// The device opened
    Opened,
    /// Opening failed; `code` is a short error tag for logs
    OpenFailed { code: String },
    /// A read or write on an open link failed
    ReadFailed { code: String },
    /// The caller closed the link
    Closed,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Try to open the device now
    Attempt,
    /// Stay closed; no attempt is due
    Hold,
    /// The link is open
    Ready,
    /// Sleep this long before going on
    Pause(Duration),
}

/// Reconnection state for one serial device.
#[derive(Debug)]
pub struct ReconnectPolicy {
    name: String,
    settings: PolicySettings,
    state: LinkState,
    consecutive_failures: u32,
    background_attempts: u32,
    open_error_reported: bool,
    read_error_reported: bool,
    had_failure: bool,
}

impl ReconnectPolicy {
    /// Creates a closed policy in the fast-retry phase.
    ///
    /// `name` is the short label used in log lines (e.g. `GPS`).
    pub fn new(name: impl Into<String>, settings: PolicySettings) -> Self {
        let tries = settings.disconnect_verifications;
        Self {
            name: name.into(),
            settings,
            state: LinkState::FastRetry { tries_left: tries },
            consecutive_failures: 0,
            background_attempts: 0,
            open_error_reported: false,
            read_error_reported: false,
            had_failure: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub fn background_attempts(&self) -> u32 {
        self.background_attempts
    }

    /// Whether an open failure has been logged since the last reset.
    #[must_use]
    pub fn open_error_reported(&self) -> bool {
        self.open_error_reported
    }

    /// Backoff applied after a read error.
    #[must_use]
    pub fn read_backoff(&self) -> Duration {
        let max = self.settings.max_backoff;
        let secs = self.settings.read_delay.as_secs_f64() * self.settings.backoff_factor.max(0.0);
        Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
    }

    /// Applies `event` at time `now` and returns the caller's next step.
    pub fn advance(&mut self, event: LinkEvent, now: Instant) -> LinkAction {
        match event {
            LinkEvent::OpenRequested => self.on_open_requested(now),
            LinkEvent::Opened => {
                if self.had_failure {
                    info!("Serial port {}: reconnected", self.name);
                } else {
                    info!("Serial port {}: connected", self.name);
                }
                self.reset();
                self.state = LinkState::Open;
                LinkAction::Ready
            }
            LinkEvent::OpenFailed { code } => self.on_open_failed(&code, now),
            LinkEvent::ReadFailed { code } => {
                if !self.read_error_reported {
                    error!("Read error on serial port {}: {}", self.name, code);
                    self.read_error_reported = true;
                }
                self.had_failure = true;
                self.state = self.fresh_fast_retry();
                LinkAction::Pause(self.read_backoff())
            }
            LinkEvent::Closed => {
                if self.state == LinkState::Open {
                    self.state = self.fresh_fast_retry();
                }
                LinkAction::Hold
            }
        }
    }

    fn on_open_requested(&mut self, now: Instant) -> LinkAction {
        match self.state {
            LinkState::Open => LinkAction::Ready,
            LinkState::Cooldown { until } if now < until => LinkAction::Hold,
            LinkState::Cooldown { .. } => {
                self.consecutive_failures = 0;
                self.background_attempts = 0;
                self.state = self.fresh_fast_retry();
                LinkAction::Attempt
            }
            LinkState::FastRetry { .. } => LinkAction::Attempt,
            LinkState::BackgroundWait { next_check } if now >= next_check => LinkAction::Attempt,
            LinkState::BackgroundWait { .. } => LinkAction::Hold,
        }
    }

    fn on_open_failed(&mut self, code: &str, now: Instant) -> LinkAction {
        self.had_failure = true;
        self.consecutive_failures += 1;
        let total = self.settings.disconnect_verifications;

        let mut action = LinkAction::Hold;
        match self.state {
            LinkState::FastRetry { tries_left } if tries_left > 0 => {
                let attempt = total - tries_left + 1;
                if self.settings.log_immediate_retry_info {
                    info!("Retry {} {}/{} failed", self.name, attempt, total);
                }
                if !self.open_error_reported {
                    error!(
                        "Serial port {} failed (attempt {}/{}): {}",
                        self.name, attempt, total, code
                    );
                    self.open_error_reported = true;
                }

                let tries_left = tries_left - 1;
                if tries_left == 0 {
                    self.state = LinkState::BackgroundWait {
                        next_check: now + self.settings.background_check,
                    };
                    if self.settings.log_cooldown {
                        warn!(
                            "Serial port {}: checking in background every {}s",
                            self.name,
                            self.settings.background_check.as_secs()
                        );
                    }
                } else {
                    self.state = LinkState::FastRetry { tries_left };
                    action = LinkAction::Pause(self.settings.quick_retry_delay);
                }
            }
            _ => {
                self.background_attempts += 1;
                if self.settings.log_background_errors && !self.open_error_reported {
                    error!(
                        "Serial port {} failed (background #{}): {}",
                        self.name, self.background_attempts, code
                    );
                    self.open_error_reported = true;
                }
                self.state = LinkState::BackgroundWait {
                    next_check: now + self.settings.background_check,
                };
            }
        }

        if self.consecutive_failures >= self.settings.max_open_failures {
            self.state = LinkState::Cooldown {
                until: now + self.settings.open_cooldown,
            };
            if self.settings.log_cooldown {
                warn!(
                    "Serial port {}: {} consecutive failures, cooling down for {}s",
                    self.name,
                    self.settings.max_open_failures,
                    self.settings.open_cooldown.as_secs()
                );
            }
            self.consecutive_failures = 0;
            self.open_error_reported = false;
            action = LinkAction::Hold;
        }

        action
    }

    fn fresh_fast_retry(&self) -> LinkState {
        LinkState::FastRetry {
            tries_left: self.settings.disconnect_verifications,
        }
    }

    fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.background_attempts = 0;
        self.open_error_reported = false;
        self.read_error_reported = false;
        self.had_failure = false;
    }
}
