//! # Rain Gauge
//!
//! Tipping-bucket accumulation. A watcher thread polls the gauge's reed
//! switch (pulled up, closes to ground on each tip) and feeds debounced
//! falling edges into a [`TipCounter`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::manager::SensorSource;
use crate::reading::RawPayload;

/// Rain per bucket tip for the standard gauge, in mm.
pub const DEFAULT_MM_PER_TIP: f64 = 0.25;

/// Lock-free tip count shared between the GPIO callback and the manager.
#[derive(Debug, Default)]
pub struct TipCounter {
    tips: AtomicU32,
}

impl TipCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one bucket tip.
    pub fn record_tip(&self) {
        let total = self.tips.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Rain gauge tip #{}", total);
    }

    /// Returns the tips seen since the last call and starts over.
    pub fn take(&self) -> u32 {
        self.tips.swap(0, Ordering::Relaxed)
    }
}

/// Rain source: reports the rain accumulated since the previous cycle.
#[derive(Debug, Clone)]
pub struct RainGauge {
    counter: Arc<TipCounter>,
    mm_per_tip: f64,
}

impl RainGauge {
    pub fn new(counter: Arc<TipCounter>, mm_per_tip: f64) -> Self {
        Self {
            counter,
            mm_per_tip,
        }
    }
}

impl SensorSource for RainGauge {
    fn name(&self) -> &str {
        "rain"
    }

    /// Always produces a value; a dry interval is recorded as 0.0 mm.
    fn acquire(&mut self) -> Option<RawPayload> {
        let tips = self.counter.take();
        Some(RawPayload::Rain {
            level_mm: f64::from(tips) * self.mm_per_tip,
        })
    }
}

/// Level source for the gauge's switch.
pub trait TipInput: Send {
    /// `true` while the line is high (switch open).
    fn is_high(&mut self) -> bool;
}

/// Falling-edge detector with a minimum spacing between tips.
#[derive(Debug, Clone)]
pub struct TipDetector {
    debounce: Duration,
    last_high: bool,
    last_tip: Option<Instant>,
}

impl TipDetector {
    /// The line is assumed idle-high at start.
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_high: true,
            last_tip: None,
        }
    }

    /// Feeds one sample. Returns `true` when it completes a tip.
    pub fn sample(&mut self, high: bool, now: Instant) -> bool {
        let falling = self.last_high && !high;
        self.last_high = high;
        if !falling {
            return false;
        }
        match self.last_tip {
            Some(last) if now.saturating_duration_since(last) <= self.debounce => false,
            _ => {
                self.last_tip = Some(now);
                true
            }
        }
    }
}

/// Polls `input` every `poll` on its own thread and records each tip in
/// `counter` until `stop` is set.
pub fn spawn_tip_watcher<I>(
    mut input: I,
    counter: Arc<TipCounter>,
    debounce: Duration,
    poll: Duration,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>>
where
    I: TipInput + 'static,
{
    std::thread::Builder::new()
        .name("rain-gpio".to_string())
        .spawn(move || {
            info!("Rain gauge watcher started (debounce {} ms)", debounce.as_millis());
            let mut detector = TipDetector::new(debounce);
            while !stop.load(Ordering::Relaxed) {
                if detector.sample(input.is_high(), Instant::now()) {
                    counter.record_tip();
                }
                std::thread::sleep(poll);
            }
            info!("Rain gauge watcher stopped");
        })
}

/// Gauge switch on a Raspberry Pi header pin, internal pull-up enabled.
#[cfg(feature = "gpio")]
pub struct GpioTipInput {
    pin: rppal::gpio::InputPin,
}

#[cfg(feature = "gpio")]
impl GpioTipInput {
    /// Claims BCM `pin` as an input.
    pub fn open(pin: u8) -> crate::error::Result<Self> {
        use crate::error::StationError;

        let gpio = rppal::gpio::Gpio::new()
            .map_err(|e| StationError::Hardware(format!("GPIO init: {}", e)))?;
        let pin = gpio
            .get(pin)
            .map_err(|e| StationError::Hardware(format!("GPIO pin {}: {}", pin, e)))?
            .into_input_pullup();
        Ok(Self { pin })
    }
}

#[cfg(feature = "gpio")]
impl TipInput for GpioTipInput {
    fn is_high(&mut self) -> bool {
        self.pin.is_high()
    }
}

/// Opens the gauge input on BCM `pin`.
///
/// Without the `gpio` feature there is no tip source and this always fails.
pub fn open_tip_input(pin: u8) -> crate::error::Result<Box<dyn TipInput>> {
    #[cfg(feature = "gpio")]
    {
        Ok(Box::new(GpioTipInput::open(pin)?))
    }
    #[cfg(not(feature = "gpio"))]
    {
        tracing::warn!("Built without GPIO support; rain gauge on pin {} unavailable", pin);
        Err(crate::error::StationError::Hardware(
            "built without the gpio feature".to_string(),
        ))
    }
}

impl TipInput for Box<dyn TipInput> {
    fn is_high(&mut self) -> bool {
        (**self).is_high()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_tips_accumulate_and_reset() {
        let counter = Arc::new(TipCounter::new());
        let mut gauge = RainGauge::new(Arc::clone(&counter), DEFAULT_MM_PER_TIP);

        counter.record_tip();
        counter.record_tip();
        counter.record_tip();

        assert_eq!(gauge.acquire(), Some(RawPayload::Rain { level_mm: 0.75 }));
        assert_eq!(gauge.acquire(), Some(RawPayload::Rain { level_mm: 0.0 }));
    }

    #[test]
    fn test_detector_counts_debounced_falling_edges() {
        let t0 = Instant::now();
        let ms = |n: u64| t0 + Duration::from_millis(n);
        let mut detector = TipDetector::new(Duration::from_millis(50));

        assert!(!detector.sample(true, ms(0)));
        assert!(detector.sample(false, ms(1)));
        assert!(!detector.sample(false, ms(2)), "held low is one tip");
        // Contact bounce inside the debounce window
        assert!(!detector.sample(true, ms(3)));
        assert!(!detector.sample(false, ms(4)));

        assert!(!detector.sample(true, ms(100)));
        assert!(detector.sample(false, ms(120)));
    }

    struct ScriptedInput {
        levels: Arc<std::sync::Mutex<VecDeque<bool>>>,
    }

    impl TipInput for ScriptedInput {
        fn is_high(&mut self) -> bool {
            self.levels.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    #[test]
    fn test_watcher_feeds_counter_and_stops() {
        let levels = Arc::new(std::sync::Mutex::new(VecDeque::from(vec![
            true, false, true, false, true,
        ])));
        let input = ScriptedInput { levels: Arc::clone(&levels) };
        let counter = Arc::new(TipCounter::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_tip_watcher(
            input,
            Arc::clone(&counter),
            Duration::ZERO,
            Duration::from_millis(1),
            Arc::clone(&stop),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !levels.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert_eq!(counter.take(), 2);
    }

    #[test]
    fn test_tips_from_other_threads_are_counted() {
        let counter = Arc::new(TipCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        counter.record_tip();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.take(), 100);
    }
}
