//! Temperature/humidity acquisition channel.
//!
//! SHT4x-class probe returning the raw 16-bit conversion pair. Raw
//! values are ring-buffered as-is; the datasheet transfer functions run
//! on the smoothed value at read time.

use std::sync::Mutex;

use log::{info, warn};

use crate::error::SensorError;
use crate::sensors::ring::RingBuffer;
use crate::sensors::{lock_channel, REINIT_FAILURE_PERIOD, SAMPLE_DEPTH};

/// SHT4x-class combined temperature/humidity probe.
pub trait ClimateProbe {
    /// One conversion: `(temperature_raw, humidity_raw)`. Bounded-blocking.
    fn read_raw(&mut self) -> Result<(u16, u16), SensorError>;

    fn reinit(&mut self) -> Result<(), SensorError>;
}

#[derive(Debug, Default)]
struct ChannelState {
    temperature: RingBuffer<SAMPLE_DEPTH>,
    humidity: RingBuffer<SAMPLE_DEPTH>,
    consecutive_failures: u32,
}

#[derive(Debug, Default)]
pub struct ClimateChannel {
    state: Mutex<ChannelState>,
}

impl ClimateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_once(&self, probe: &mut impl ClimateProbe) {
        match probe.read_raw() {
            Ok((t_raw, rh_raw)) => {
                let mut s = lock_channel(&self.state);
                s.temperature.push(i32::from(t_raw));
                s.humidity.push(i32::from(rh_raw));
                s.consecutive_failures = 0;
            }
            Err(e) => {
                let failures = {
                    let mut s = lock_channel(&self.state);
                    s.consecutive_failures += 1;
                    s.consecutive_failures
                };
                warn!("climate read failed ({e}), {failures} consecutive");
                if failures % REINIT_FAILURE_PERIOD == 0 {
                    match probe.reinit() {
                        Ok(()) => info!("climate probe reinitialised"),
                        Err(e) => warn!("climate probe reinit failed: {e}"),
                    }
                }
            }
        }
    }

    /// Smoothed temperature in tenths of a degree Celsius.
    pub fn average_temperature_dc(&self) -> i16 {
        let raw = lock_channel(&self.state).temperature.average();
        // T[0.1 C] = -450 + 1750 * raw / 65535
        (-450 + (1750 * i64::from(raw)) / 65535) as i16
    }

    /// Smoothed relative humidity in tenths of a percent, clamped to
    /// the physical 0-100 % range.
    pub fn average_humidity_dh(&self) -> i16 {
        let raw = lock_channel(&self.state).humidity.average();
        // RH[0.1 %] = -60 + 1250 * raw / 65535
        let dh = -60 + (1250 * i64::from(raw)) / 65535;
        dh.clamp(0, 1000) as i16
    }
}
