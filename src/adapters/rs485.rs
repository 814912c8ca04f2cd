//! RS-485 link adapter over the ESP32-C3 UART.
//!
//! The transceiver's driver-enable pin is handled by the UART
//! peripheral in RS-485 half-duplex mode, so transmit is a plain
//! blocking write followed by a drain.

use esp_idf_hal::uart::UartDriver;

use crate::error::Error;
use crate::ports::LinkPort;
use crate::Result;

pub struct Rs485Link<'d> {
    uart: UartDriver<'d>,
}

impl<'d> Rs485Link<'d> {
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self { uart }
    }
}

impl LinkPort for Rs485Link<'_> {
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Zero timeout: return whatever is already in the RX FIFO.
        self.uart.read(buf, 0).map_err(|_| Error::Bus("uart read"))
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.uart
            .write(frame)
            .map_err(|_| Error::Bus("uart write"))?;
        self.uart
            .wait_tx_done(100)
            .map_err(|_| Error::Bus("uart drain"))
    }
}
