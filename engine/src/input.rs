use embassy_time::{Duration, Instant};
use embedded_hal::digital::InputPin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Pressed,
}

/// Edge-confirmed debounce for one contact.
///
/// A change of the raw level only becomes a candidate; the candidate is accepted once the
/// level has been seen unchanged for the whole window. A level that flips back before that
/// discards the candidate.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    stable: bool,
    raw: bool,
    since: Instant,
}

impl Debouncer {
    pub const fn new(window: Duration) -> Self {
        Self::with_state(window, false)
    }

    /// Starts from an already known level, e.g. a button held down at boot.
    pub const fn with_state(window: Duration, pressed: bool) -> Self {
        Self {
            window,
            stable: pressed,
            raw: pressed,
            since: Instant::from_ticks(0),
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Feeds one sample. Returns [`Edge::Pressed`] exactly once per accepted press.
    pub fn update(&mut self, pressed: bool, now: Instant) -> Option<Edge> {
        if pressed != self.raw {
            self.raw = pressed;
            self.since = now;
            return None;
        }

        if self.raw == self.stable || now.saturating_duration_since(self.since) < self.window {
            return None;
        }

        self.stable = self.raw;
        self.stable.then_some(Edge::Pressed)
    }
}

/// An active-low push button with pull-up.
pub struct Button<P> {
    pin: P,
    debouncer: Debouncer,
}

impl<P: InputPin> Button<P> {
    pub fn new(mut pin: P, window: Duration) -> Self {
        // A button already held at boot has to be released before it can fire.
        let pressed = pin.is_low().unwrap_or(false);
        Self {
            pin,
            debouncer: Debouncer::with_state(window, pressed),
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<Edge> {
        match self.pin.is_low() {
            Ok(pressed) => self.debouncer.update(pressed, now),
            Err(_) => None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.debouncer.is_pressed()
    }
}
