//! GPIO adapter: debounced inputs, relay and lamp outputs, and the
//! indicator LED with its counted warning pulses.
//!
//! `poll(now)` must run from the management loop; it feeds the input
//! filters every [`DEBOUNCE_PERIOD_MS`] and advances the non-blocking
//! warning-pulse pattern so the loop is never stalled by a blink.

use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver};
use log::warn;

use crate::drivers::debounce::{Debouncer, DEBOUNCE_PERIOD_MS};
use crate::ports::{ActuatorPort, InputPort};

/// Half-period of one warning blink.
const PULSE_HALF_PERIOD_MS: u64 = 100;

pub struct GpioBank<'d> {
    safety_in: PinDriver<'d, AnyInputPin, Input>,
    signal_in: PinDriver<'d, AnyInputPin, Input>,
    relay_out: PinDriver<'d, AnyOutputPin, Output>,
    signal_out: PinDriver<'d, AnyOutputPin, Output>,
    indicator: PinDriver<'d, AnyOutputPin, Output>,

    safety_filter: Debouncer,
    signal_filter: Debouncer,
    last_sample_ms: u64,

    indicator_ok: bool,
    pulses_left: u8,
    pulse_led_on: bool,
    pulse_deadline_ms: u64,
}

impl<'d> GpioBank<'d> {
    pub fn new(
        safety_in: PinDriver<'d, AnyInputPin, Input>,
        signal_in: PinDriver<'d, AnyInputPin, Input>,
        relay_out: PinDriver<'d, AnyOutputPin, Output>,
        signal_out: PinDriver<'d, AnyOutputPin, Output>,
        indicator: PinDriver<'d, AnyOutputPin, Output>,
    ) -> Self {
        // Inputs are wired active-low; seed the filters from the
        // current pin levels so boot does not report a phantom edge.
        let safety_filter = Debouncer::new(true, safety_in.is_low());
        let signal_filter = Debouncer::new(true, signal_in.is_low());
        Self {
            safety_in,
            signal_in,
            relay_out,
            signal_out,
            indicator,
            safety_filter,
            signal_filter,
            last_sample_ms: 0,
            indicator_ok: false,
            pulses_left: 0,
            pulse_led_on: false,
            pulse_deadline_ms: 0,
        }
    }

    /// Advance input filtering and the indicator pattern.
    pub fn poll(&mut self, now: u64) {
        if now.saturating_sub(self.last_sample_ms) >= DEBOUNCE_PERIOD_MS {
            self.last_sample_ms = now;
            self.safety_filter.sample(self.safety_in.is_high());
            self.signal_filter.sample(self.signal_in.is_high());
        }

        if self.pulses_left > 0 && now >= self.pulse_deadline_ms {
            self.pulse_led_on = !self.pulse_led_on;
            if !self.pulse_led_on {
                self.pulses_left -= 1;
            }
            self.pulse_deadline_ms = now + PULSE_HALF_PERIOD_MS;
            let level = if self.pulses_left > 0 {
                self.pulse_led_on
            } else {
                self.indicator_ok
            };
            drive(&mut self.indicator, level, "indicator");
        }
    }
}

fn drive(pin: &mut PinDriver<'_, AnyOutputPin, Output>, high: bool, what: &str) {
    let r = if high { pin.set_high() } else { pin.set_low() };
    if r.is_err() {
        warn!("{what} gpio write failed");
    }
}

impl InputPort for GpioBank<'_> {
    fn safety_level(&mut self) -> bool {
        self.safety_filter.level()
    }

    fn signal_level(&mut self) -> bool {
        self.signal_filter.level()
    }
}

impl ActuatorPort for GpioBank<'_> {
    fn set_relay(&mut self, energized: bool) {
        drive(&mut self.relay_out, energized, "relay");
    }

    fn set_signal(&mut self, on: bool) {
        drive(&mut self.signal_out, on, "signal lamp");
    }

    fn indicate_ok(&mut self, ok: bool) {
        self.indicator_ok = ok;
        if self.pulses_left == 0 {
            drive(&mut self.indicator, ok, "indicator");
        }
    }

    fn pulse_warning(&mut self, count: u8) {
        self.pulses_left = count;
        self.pulse_led_on = false;
        self.pulse_deadline_ms = 0;
    }
}
