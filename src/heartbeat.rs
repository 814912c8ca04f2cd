//! Supervisory liveness monitor.
//!
//! The master proves it is alive with the heartbeat function code; if
//! it stays quiet past [`HEARTBEAT_TIMEOUT_MS`] the `missing` flag
//! latches and the interlock forces fail-safe until a fresh beat
//! arrives. Only a beat clears the flag, never the passage of time.

use log::{info, warn};

use crate::config::HEARTBEAT_TIMEOUT_MS;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_beat_ms: u64,
    missing: bool,
}

impl HeartbeatMonitor {
    pub fn new(now: u64) -> Self {
        Self {
            last_beat_ms: now,
            missing: false,
        }
    }

    pub fn missing(&self) -> bool {
        self.missing
    }

    /// Record a heartbeat from the master.
    pub fn beat(&mut self, now: u64) {
        if self.missing {
            info!("supervisory master is back");
        }
        self.last_beat_ms = now;
        self.missing = false;
    }

    /// Periodic expiry check. Returns true only on the cycle that
    /// first crosses the timeout, so callers can log and latch the
    /// model flag exactly once per loss.
    pub fn check(&mut self, now: u64) -> bool {
        if self.missing {
            return false;
        }
        if now.saturating_sub(self.last_beat_ms) > HEARTBEAT_TIMEOUT_MS {
            warn!("no heartbeat for {}ms, failing safe", HEARTBEAT_TIMEOUT_MS);
            self.missing = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_master_latches_once() {
        let mut hb = HeartbeatMonitor::new(0);
        assert!(!hb.check(HEARTBEAT_TIMEOUT_MS));
        assert!(hb.check(HEARTBEAT_TIMEOUT_MS + 1));
        assert!(hb.missing());
        // Idempotent: later checks do not re-fire.
        assert!(!hb.check(HEARTBEAT_TIMEOUT_MS + 5000));
        assert!(hb.missing());
    }

    #[test]
    fn beat_clears_and_rearms() {
        let mut hb = HeartbeatMonitor::new(0);
        assert!(hb.check(HEARTBEAT_TIMEOUT_MS + 1));
        hb.beat(60_000);
        assert!(!hb.missing());
        assert!(!hb.check(60_000 + HEARTBEAT_TIMEOUT_MS));
        assert!(hb.check(60_000 + HEARTBEAT_TIMEOUT_MS + 1));
    }

    #[test]
    fn timeout_never_clears_by_itself() {
        let mut hb = HeartbeatMonitor::new(0);
        hb.check(HEARTBEAT_TIMEOUT_MS + 1);
        for t in [100_000u64, 1_000_000, 10_000_000] {
            hb.check(t);
            assert!(hb.missing());
        }
    }
}
