//! Sensor acquisition: one periodic producer task per physical channel,
//! each with its own ring buffer behind its own lock. Which channels
//! actually run is decided by the device mode
//! ([`DeviceMode::samples_pressure`](crate::config::DeviceMode) /
//! `samples_climate`).

use std::sync::{Mutex, MutexGuard};

pub mod climate;
pub mod pressure;
pub mod ring;

pub use climate::{ClimateChannel, ClimateProbe};
pub use pressure::{PressureChannel, PressureProbe};

/// Samples kept per channel for the moving average.
pub const SAMPLE_DEPTH: usize = 10;

/// Reinitialise a probe on every Nth consecutive read failure.
pub const REINIT_FAILURE_PERIOD: u32 = 10;

/// Channel-state locks are held for ring access only; a panicking
/// holder cannot leave the plain sample data inconsistent.
pub(crate) fn lock_channel<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
