//! In-memory simulation backends for host testing.

use std::collections::HashMap;

use crate::ports::{ClockPort, StoragePort};
use crate::Result;

/// Plaintext in-memory stand-in for the NVS partition.
#[derive(Debug, Default)]
pub struct MemStorage {
    store: HashMap<String, Vec<u8>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoragePort for MemStorage {
    fn load(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.store.get(key) {
            Some(blob) => {
                let n = blob.len().min(buf.len());
                buf[..n].copy_from_slice(&blob[..n]);
                Ok(Some(n))
            }
            None => Ok(None),
        }
    }

    fn save(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.store.insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}

/// Manually advanced clock; sleeps advance it instead of blocking, so
/// timer-driven logic can be stepped deterministically.
#[derive(Debug, Default)]
pub struct SimClock {
    now_ms: u64,
    wall_clock: Option<u64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    pub fn wall_clock(&self) -> Option<u64> {
        self.wall_clock
    }
}

impl ClockPort for SimClock {
    fn now_ms(&mut self) -> u64 {
        self.now_ms
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    fn set_wall_clock(&mut self, unix_secs: u64) {
        self.wall_clock = Some(unix_secs);
    }
}
