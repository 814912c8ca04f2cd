//! SHT4x temperature/humidity probe over I2C.
//!
//! Returns the raw 16-bit conversion pair; the acquisition channel
//! applies the datasheet transfer functions after averaging. Each
//! word carries the sensor's CRC-8, checked before a reading is
//! accepted.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::error::SensorError;
use crate::sensors::ClimateProbe;

pub const I2C_ADDRESS: u8 = 0x44;

const CMD_MEASURE_HIGH_PRECISION: u8 = 0xFD;
const CMD_SOFT_RESET: u8 = 0x94;
const MEASUREMENT_DELAY_MS: u32 = 10;

pub struct Sht4x<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C: I2c, D: DelayNs> Sht4x<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }
}

/// CRC-8 as specified for the SHT4x word checksum (poly 0x31, init 0xFF).
fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

impl<I2C: I2c, D: DelayNs> ClimateProbe for Sht4x<I2C, D> {
    fn read_raw(&mut self) -> Result<(u16, u16), SensorError> {
        self.i2c
            .write(I2C_ADDRESS, &[CMD_MEASURE_HIGH_PRECISION])
            .map_err(|_| SensorError::ReadFailed)?;
        self.delay.delay_ms(MEASUREMENT_DELAY_MS);

        let mut raw = [0u8; 6];
        self.i2c
            .read(I2C_ADDRESS, &mut raw)
            .map_err(|_| SensorError::ReadFailed)?;
        if crc8(&raw[0..2]) != raw[2] || crc8(&raw[3..5]) != raw[5] {
            return Err(SensorError::ReadFailed);
        }
        Ok((
            u16::from_be_bytes([raw[0], raw[1]]),
            u16::from_be_bytes([raw[3], raw[4]]),
        ))
    }

    fn reinit(&mut self) -> Result<(), SensorError> {
        self.i2c
            .write(I2C_ADDRESS, &[CMD_SOFT_RESET])
            .map_err(|_| SensorError::InitFailed)?;
        self.delay.delay_ms(2);
        Ok(())
    }
}
