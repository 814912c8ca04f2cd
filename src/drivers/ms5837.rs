//! MS5837-02BA absolute pressure probe over I2C.
//!
//! Generic over `embedded-hal` traits so the same driver runs against
//! the ESP-IDF I2C peripheral and against scripted mocks in tests.
//! First-order compensation per the datasheet; for the 02BA variant
//! the compensated output unit (0.01 mbar) is exactly one pascal.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::error::SensorError;
use crate::sensors::PressureProbe;

pub const I2C_ADDRESS: u8 = 0x76;

const CMD_RESET: u8 = 0x1E;
const CMD_PROM_READ: u8 = 0xA0;
const CMD_CONVERT_D1: u8 = 0x48; // OSR 4096
const CMD_CONVERT_D2: u8 = 0x58; // OSR 4096
const CMD_ADC_READ: u8 = 0x00;

/// Conversion time at OSR 4096, rounded up.
const CONVERSION_DELAY_MS: u32 = 10;

pub struct Ms5837<I2C, D> {
    i2c: I2C,
    delay: D,
    prom: [u16; 7],
}

impl<I2C: I2c, D: DelayNs> Ms5837<I2C, D> {
    /// Reset the sensor and read its factory calibration PROM.
    pub fn new(i2c: I2C, delay: D) -> Result<Self, SensorError> {
        let mut probe = Self {
            i2c,
            delay,
            prom: [0; 7],
        };
        probe.init()?;
        Ok(probe)
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.i2c
            .write(I2C_ADDRESS, &[CMD_RESET])
            .map_err(|_| SensorError::InitFailed)?;
        self.delay.delay_ms(10);
        for i in 0..7 {
            let mut word = [0u8; 2];
            self.i2c
                .write_read(I2C_ADDRESS, &[CMD_PROM_READ + 2 * i as u8], &mut word)
                .map_err(|_| SensorError::InitFailed)?;
            self.prom[i] = u16::from_be_bytes(word);
        }
        // An unpowered or absent sensor reads back all zeros.
        if self.prom[1..].iter().all(|&c| c == 0) {
            return Err(SensorError::InitFailed);
        }
        Ok(())
    }

    fn convert(&mut self, command: u8) -> Result<u32, SensorError> {
        self.i2c
            .write(I2C_ADDRESS, &[command])
            .map_err(|_| SensorError::ReadFailed)?;
        self.delay.delay_ms(CONVERSION_DELAY_MS);
        let mut adc = [0u8; 3];
        self.i2c
            .write_read(I2C_ADDRESS, &[CMD_ADC_READ], &mut adc)
            .map_err(|_| SensorError::ReadFailed)?;
        Ok(u32::from_be_bytes([0, adc[0], adc[1], adc[2]]))
    }
}

impl<I2C: I2c, D: DelayNs> PressureProbe for Ms5837<I2C, D> {
    fn read_pa(&mut self) -> Result<u32, SensorError> {
        let d1 = i64::from(self.convert(CMD_CONVERT_D1)?);
        let d2 = i64::from(self.convert(CMD_CONVERT_D2)?);

        let c = |i: usize| i64::from(self.prom[i]);
        let dt = d2 - (c(5) << 8);
        let off = (c(2) << 17) + ((c(4) * dt) >> 6);
        let sens = (c(1) << 16) + ((c(3) * dt) >> 7);
        let p = (((d1 * sens) >> 21) - off) >> 15;

        u32::try_from(p).map_err(|_| SensorError::OutOfRange)
    }

    fn reinit(&mut self) -> Result<(), SensorError> {
        self.init()
    }
}
