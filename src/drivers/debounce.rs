//! Counting debounce filter for the digital inputs.
//!
//! Sampled every [`DEBOUNCE_PERIOD_MS`]; the logical level only flips
//! after [`DEBOUNCE_THRESHOLD`] consecutive samples disagree with the
//! current stable level, so a contact has to hold for 50 ms before the
//! rest of the firmware sees the edge. Inputs are wired active-low on
//! this hardware; the filter normalises polarity so consumers only see
//! logical levels.

/// Sampling cadence of the input filter task.
pub const DEBOUNCE_PERIOD_MS: u64 = 5;

/// Consecutive disagreeing samples required to accept a new level.
pub const DEBOUNCE_THRESHOLD: u8 = 10;

#[derive(Debug, Clone)]
pub struct Debouncer {
    active_low: bool,
    stable: bool,
    counter: u8,
}

impl Debouncer {
    /// `initial` is the starting logical level, usually read once at boot.
    pub fn new(active_low: bool, initial: bool) -> Self {
        Self {
            active_low,
            stable: initial,
            counter: 0,
        }
    }

    /// Feed one raw pin sample; returns the (possibly updated) stable
    /// logical level.
    pub fn sample(&mut self, raw_level: bool) -> bool {
        let logical = raw_level != self.active_low;
        if logical == self.stable {
            self.counter = 0;
        } else {
            self.counter += 1;
            if self.counter >= DEBOUNCE_THRESHOLD {
                self.stable = logical;
                self.counter = 0;
            }
        }
        self.stable
    }

    /// Current stable logical level.
    pub fn level(&self) -> bool {
        self.stable
    }
}
