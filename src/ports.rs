//! Hardware ports.
//!
//! Every hardware touchpoint of the firmware goes through one of these
//! traits. The management loop and the protocol engine take them as
//! generic parameters per call, so the domain logic never names a
//! concrete peripheral. ESP-IDF adapters live in [`crate::adapters`];
//! the integration tests provide in-memory mocks.

use crate::Result;

/// RS-485 half-duplex byte link.
pub trait LinkPort {
    /// Non-blocking read of whatever bytes have arrived. Returns the
    /// number of bytes placed into `buf` (0 when the line is idle).
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Transmit one complete frame (driver handles DE/RE turnaround).
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;
}

/// Debounced digital inputs.
pub trait InputPort {
    /// Safety chain level, true = chain closed / safe.
    fn safety_level(&mut self) -> bool;

    /// Signal / actuator-feedback contact level.
    fn signal_level(&mut self) -> bool;
}

/// Relay output, the visual signal lamp and the local indicator LED.
pub trait ActuatorPort {
    fn set_relay(&mut self, energized: bool);

    /// Visual signal lamp; mirrors the relay while the interlock holds.
    fn set_signal(&mut self, on: bool);

    /// Steady indicator: true = healthy, false = fault.
    fn indicate_ok(&mut self, ok: bool);

    /// Counted warning blinks (actuation retry, feedback loss).
    fn pulse_warning(&mut self, count: u8);
}

/// Persistent key/value blob storage.
pub trait StoragePort {
    /// Load the blob stored under `key` into `buf`. Returns the blob
    /// length, or `None` when the key has never been written.
    fn load(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>>;

    fn save(&mut self, key: &str, value: &[u8]) -> Result<()>;
}

/// Monotonic time, blocking delay and the wall clock.
pub trait ClockPort {
    /// Milliseconds since boot, monotonic.
    fn now_ms(&mut self) -> u64;

    fn sleep_ms(&mut self, ms: u64);

    /// Set the wall clock from a bus-supplied Unix timestamp.
    fn set_wall_clock(&mut self, unix_secs: u64);
}
