//! Shared mock hardware for the integration tests.

use std::collections::VecDeque;

use fieldnode::ports::{ActuatorPort, InputPort, LinkPort};

/// In-memory board: a scripted RS-485 link plus latched output states.
#[derive(Debug, Default)]
pub struct MockBoard {
    pub rx_queue: VecDeque<Vec<u8>>,
    pub tx_log: Vec<Vec<u8>>,

    pub safety_level: bool,
    pub signal_level: bool,

    pub relay: bool,
    pub signal_lamp: bool,
    pub indicator_ok: Option<bool>,
    pub warnings: Vec<u8>,
    pub relay_toggles: u32,
}

impl MockBoard {
    pub fn new() -> Self {
        Self {
            safety_level: true,
            ..Self::default()
        }
    }

    /// Queue one frame for the next receive call.
    pub fn push_rx(&mut self, frame: &[u8]) {
        self.rx_queue.push_back(frame.to_vec());
    }

    /// Pop the oldest transmitted frame.
    pub fn pop_tx(&mut self) -> Option<Vec<u8>> {
        if self.tx_log.is_empty() {
            None
        } else {
            Some(self.tx_log.remove(0))
        }
    }
}

impl LinkPort for MockBoard {
    fn receive(&mut self, buf: &mut [u8]) -> fieldnode::Result<usize> {
        match self.rx_queue.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn transmit(&mut self, frame: &[u8]) -> fieldnode::Result<()> {
        self.tx_log.push(frame.to_vec());
        Ok(())
    }
}

impl InputPort for MockBoard {
    fn safety_level(&mut self) -> bool {
        self.safety_level
    }

    fn signal_level(&mut self) -> bool {
        self.signal_level
    }
}

impl ActuatorPort for MockBoard {
    fn set_relay(&mut self, energized: bool) {
        self.relay = energized;
        self.relay_toggles += 1;
    }

    fn set_signal(&mut self, on: bool) {
        self.signal_lamp = on;
    }

    fn indicate_ok(&mut self, ok: bool) {
        self.indicator_ok = Some(ok);
    }

    fn pulse_warning(&mut self, count: u8) {
        self.warnings.push(count);
    }
}
