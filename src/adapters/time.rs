//! Clock adapter: ESP high-resolution timer for monotonic time,
//! FreeRTOS delay for sleeps, `settimeofday` for the wall clock.

use core::ptr;

use esp_idf_hal::delay::FreeRtos;
use log::info;

use crate::ports::ClockPort;

pub struct EspClock;

impl EspClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for EspClock {
    fn now_ms(&mut self) -> u64 {
        // SAFETY: esp_timer_get_time has no preconditions after boot.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1000) as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        FreeRtos::delay_ms(ms as u32);
    }

    fn set_wall_clock(&mut self, unix_secs: u64) {
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: unix_secs as _,
            tv_usec: 0,
        };
        // SAFETY: tv is valid for the duration of the call, tz may be null.
        unsafe {
            esp_idf_svc::sys::settimeofday(&tv, ptr::null());
        }
        info!("wall clock set to {unix_secs}");
    }
}
