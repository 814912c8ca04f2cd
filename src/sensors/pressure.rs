//! Pressure acquisition channel.
//!
//! The probe trait hands back compensated absolute pressure in pascal;
//! the channel keeps the last [`SAMPLE_DEPTH`] readings in a ring and
//! exposes the smoothed value in the two unit systems the register map
//! needs. Transient read failures leave the ring untouched; every
//! [`REINIT_FAILURE_PERIOD`]th consecutive failure reinitialises the
//! probe without discarding buffered samples.

use std::sync::Mutex;

use log::{info, warn};

use crate::error::SensorError;
use crate::sensors::ring::RingBuffer;
use crate::sensors::{lock_channel, REINIT_FAILURE_PERIOD, SAMPLE_DEPTH};

/// MS5837-class absolute pressure probe.
pub trait PressureProbe {
    /// One compensated reading, in pascal absolute. Bounded-blocking.
    fn read_pa(&mut self) -> Result<u32, SensorError>;

    /// Re-run the power-on init sequence after persistent failures.
    fn reinit(&mut self) -> Result<(), SensorError>;
}

#[derive(Debug, Default)]
struct ChannelState {
    ring: RingBuffer<SAMPLE_DEPTH>,
    consecutive_failures: u32,
}

/// Shared between the sampling task (producer) and the management loop
/// (consumer). The lock covers ring access only, never the hardware
/// transaction.
#[derive(Debug, Default)]
pub struct PressureChannel {
    state: Mutex<ChannelState>,
}

impl PressureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sampling cycle; called periodically by the producer task.
    pub fn sample_once(&self, probe: &mut impl PressureProbe) {
        match probe.read_pa() {
            Ok(pa) => {
                let mut s = lock_channel(&self.state);
                s.ring.push(pa as i32);
                s.consecutive_failures = 0;
            }
            Err(e) => {
                let failures = {
                    let mut s = lock_channel(&self.state);
                    s.consecutive_failures += 1;
                    s.consecutive_failures
                };
                warn!("pressure read failed ({e}), {failures} consecutive");
                if failures % REINIT_FAILURE_PERIOD == 0 {
                    match probe.reinit() {
                        Ok(()) => info!("pressure probe reinitialised"),
                        Err(e) => warn!("pressure probe reinit failed: {e}"),
                    }
                }
            }
        }
    }

    /// Smoothed absolute pressure in millibar; 0 before the first sample.
    pub fn average_mbar(&self) -> u16 {
        let pa = lock_channel(&self.state).ring.average();
        (pa / 100).clamp(0, i32::from(u16::MAX)) as u16
    }

    /// Smoothed pressure as the register-map offset from 1 bar, in pascal.
    pub fn average_pa_offset(&self) -> i16 {
        let pa = lock_channel(&self.state).ring.average();
        (pa - 100_000).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
    }

    #[cfg(test)]
    fn failures(&self) -> u32 {
        lock_channel(&self.state).consecutive_failures
    }
}
