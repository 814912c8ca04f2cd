//! Modbus-RTU slave engine.
//!
//! Owns no register data. Everything the bus can see or touch goes
//! through the [`RegisterHandler`] capability trait, which the
//! controller implements over the device model; the engine only does
//! framing, validation and dispatch.
//!
//! Response discipline: a structurally invalid frame (short, bad CRC)
//! or a frame for another address produces no bytes on the wire. A
//! valid frame for us produces exactly one response, either the normal
//! reply or a standard exception.

use log::{debug, warn};
use rand::Rng;

use super::frame::{
    self, ExceptionCode, Frame, FrameError, ResponseBuf, FN_CONFIG_ADDRESS, FN_HEARTBEAT,
    FN_MASK_WRITE_REGISTER, FN_NETWORK_INITIALIZATION, FN_RANDOM_SERIAL_NUMBER, FN_READ_COILS,
    FN_READ_DISCRETE_INPUTS, FN_READ_HOLDING_REGISTERS, FN_READ_INPUT_REGISTERS,
    FN_SET_DEVICE_TIME, FN_WRITE_MULTIPLE_COILS, FN_WRITE_MULTIPLE_REGISTERS,
    FN_WRITE_SINGLE_COIL, FN_WRITE_SINGLE_REGISTER,
};
use crate::ports::{ClockPort, LinkPort};

/// Register-map capability surface the engine dispatches into.
///
/// Multi-register writes are two-phase: every index/value pair passes
/// `check_*` before the first `write_*` runs, so a rejected write never
/// leaves a partially applied block behind.
pub trait RegisterHandler {
    fn configured_address(&self) -> u8;
    fn serial_number(&self) -> u32;

    fn read_coil(&mut self, index: u16) -> Result<bool, ExceptionCode>;
    fn check_coil_write(&mut self, index: u16) -> Result<(), ExceptionCode>;
    /// Commit a coil write already vetted by `check_coil_write`.
    fn write_coil(&mut self, index: u16, on: bool);

    fn read_discrete_input(&mut self, index: u16) -> Result<bool, ExceptionCode>;

    fn read_holding(&mut self, index: u16) -> Result<u16, ExceptionCode>;
    fn check_holding_write(&mut self, index: u16, value: u16) -> Result<(), ExceptionCode>;
    /// Commit a register write already vetted by `check_holding_write`.
    fn write_holding(&mut self, index: u16, value: u16);

    fn read_input(&mut self, index: u16) -> Result<u16, ExceptionCode>;

    // Device-level commands behind the vendor function codes.
    fn apply_address(&mut self, address: u8);
    fn force_outputs_off(&mut self);
    fn set_device_time(&mut self, unix_secs: u64);
    fn heartbeat(&mut self);
}

/// The protocol engine. Stateless apart from line statistics.
#[derive(Debug, Default)]
pub struct Slave {
    pub frames_handled: u32,
    pub crc_errors: u32,
}

impl Slave {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one received byte sequence. Returns the frame to put on
    /// the wire, if any. The anti-collision broadcast (function 66)
    /// transmits through `link` directly inside its time slot.
    pub fn process(
        &mut self,
        raw: &[u8],
        handler: &mut impl RegisterHandler,
        link: &mut impl LinkPort,
        clock: &mut impl ClockPort,
    ) -> Option<ResponseBuf> {
        let f = match frame::decode(raw) {
            Ok(f) => f,
            Err(FrameError::TooShort) => return None,
            Err(FrameError::BadCrc) => {
                self.crc_errors = self.crc_errors.wrapping_add(1);
                debug!("dropping frame with bad crc ({} total)", self.crc_errors);
                return None;
            }
        };
        if f.address != handler.configured_address() {
            return None;
        }
        self.frames_handled = self.frames_handled.wrapping_add(1);
        match dispatch(f, handler, link, clock) {
            Ok(response) => response,
            Err(code) => {
                debug!("fn {} rejected: {:?}", f.function, code);
                Some(frame::encode_exception(f.address, f.function, code))
            }
        }
    }
}

fn dispatch(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
    link: &mut impl LinkPort,
    clock: &mut impl ClockPort,
) -> Result<Option<ResponseBuf>, ExceptionCode> {
    let response = match f.function {
        FN_READ_COILS => read_bits(f, |i| handler.read_coil(i))?,
        FN_READ_DISCRETE_INPUTS => read_bits(f, |i| handler.read_discrete_input(i))?,
        FN_READ_HOLDING_REGISTERS => read_words(f, |i| handler.read_holding(i))?,
        FN_READ_INPUT_REGISTERS => read_words(f, |i| handler.read_input(i))?,
        FN_WRITE_SINGLE_COIL => write_single_coil(f, handler)?,
        FN_WRITE_SINGLE_REGISTER => write_single_register(f, handler)?,
        FN_WRITE_MULTIPLE_COILS => write_multiple_coils(f, handler)?,
        FN_WRITE_MULTIPLE_REGISTERS => write_multiple_registers(f, handler)?,
        FN_MASK_WRITE_REGISTER => mask_write_register(f, handler)?,
        FN_CONFIG_ADDRESS => return config_address(f, handler),
        FN_NETWORK_INITIALIZATION => {
            handler.force_outputs_off();
            acknowledge(f)
        }
        FN_RANDOM_SERIAL_NUMBER => return random_serial_number(f, handler, link, clock),
        FN_SET_DEVICE_TIME => set_device_time(f, handler)?,
        FN_HEARTBEAT => {
            handler.heartbeat();
            acknowledge(f)
        }
        _ => return Err(ExceptionCode::IllegalFunction),
    };
    Ok(Some(response))
}

// --- Field helpers -----------------------------------------------------------

fn be16(payload: &[u8], offset: usize) -> Result<u16, ExceptionCode> {
    let hi = *payload.get(offset).ok_or(ExceptionCode::IllegalDataValue)?;
    let lo = *payload
        .get(offset + 1)
        .ok_or(ExceptionCode::IllegalDataValue)?;
    Ok(u16::from_be_bytes([hi, lo]))
}

fn acknowledge(f: Frame<'_>) -> ResponseBuf {
    frame::encode(f.address, f.function, &[])
}

fn echo(f: Frame<'_>) -> ResponseBuf {
    frame::encode(f.address, f.function, f.payload)
}

// --- Standard reads -----------------------------------------------------------

fn read_bits(
    f: Frame<'_>,
    mut read: impl FnMut(u16) -> Result<bool, ExceptionCode>,
) -> Result<ResponseBuf, ExceptionCode> {
    let start = be16(f.payload, 0)?;
    let count = be16(f.payload, 2)?;
    if count == 0 || count > 2000 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut payload = heapless::Vec::<u8, 253>::new();
    let byte_count = count.div_ceil(8) as u8;
    payload
        .push(byte_count)
        .map_err(|_| ExceptionCode::IllegalDataValue)?;
    payload
        .resize(1 + byte_count as usize, 0)
        .map_err(|_| ExceptionCode::IllegalDataValue)?;
    for i in 0..count {
        let index = start
            .checked_add(i)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if read(index)? {
            payload[1 + (i / 8) as usize] |= 1 << (i % 8);
        }
    }
    Ok(frame::encode(f.address, f.function, &payload))
}

fn read_words(
    f: Frame<'_>,
    mut read: impl FnMut(u16) -> Result<u16, ExceptionCode>,
) -> Result<ResponseBuf, ExceptionCode> {
    let start = be16(f.payload, 0)?;
    let count = be16(f.payload, 2)?;
    if count == 0 || count > 125 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut payload = heapless::Vec::<u8, 253>::new();
    payload
        .push((count * 2) as u8)
        .map_err(|_| ExceptionCode::IllegalDataValue)?;
    for i in 0..count {
        let index = start
            .checked_add(i)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        let value = read(index)?;
        payload
            .extend_from_slice(&value.to_be_bytes())
            .map_err(|_| ExceptionCode::IllegalDataValue)?;
    }
    Ok(frame::encode(f.address, f.function, &payload))
}

// --- Standard writes -----------------------------------------------------------

fn write_single_coil(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<ResponseBuf, ExceptionCode> {
    let index = be16(f.payload, 0)?;
    let on = match be16(f.payload, 2)? {
        0x0000 => false,
        0xFF00 => true,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    handler.check_coil_write(index)?;
    handler.write_coil(index, on);
    Ok(echo(f))
}

fn write_single_register(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<ResponseBuf, ExceptionCode> {
    let index = be16(f.payload, 0)?;
    let value = be16(f.payload, 2)?;
    handler.check_holding_write(index, value)?;
    handler.write_holding(index, value);
    Ok(echo(f))
}

fn write_multiple_coils(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<ResponseBuf, ExceptionCode> {
    let start = be16(f.payload, 0)?;
    let count = be16(f.payload, 2)?;
    if count == 0 || count > 1968 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = *f.payload.get(4).ok_or(ExceptionCode::IllegalDataValue)? as usize;
    if byte_count != count.div_ceil(8) as usize || f.payload.len() != 5 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    for i in 0..count {
        let index = start
            .checked_add(i)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        handler.check_coil_write(index)?;
    }
    for i in 0..count {
        let bit = f.payload[5 + (i / 8) as usize] >> (i % 8) & 1 != 0;
        handler.write_coil(start + i, bit);
    }
    Ok(frame::encode(f.address, f.function, &f.payload[..4]))
}

fn write_multiple_registers(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<ResponseBuf, ExceptionCode> {
    let start = be16(f.payload, 0)?;
    let count = be16(f.payload, 2)?;
    if count == 0 || count > 123 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = *f.payload.get(4).ok_or(ExceptionCode::IllegalDataValue)? as usize;
    if byte_count != count as usize * 2 || f.payload.len() != 5 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    for i in 0..count {
        let index = start
            .checked_add(i)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        let value = be16(f.payload, 5 + i as usize * 2)?;
        handler.check_holding_write(index, value)?;
    }
    for i in 0..count {
        let value = be16(f.payload, 5 + i as usize * 2)?;
        handler.write_holding(start + i, value);
    }
    Ok(frame::encode(f.address, f.function, &f.payload[..4]))
}

fn mask_write_register(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<ResponseBuf, ExceptionCode> {
    let index = be16(f.payload, 0)?;
    let and_mask = be16(f.payload, 2)?;
    let or_mask = be16(f.payload, 4)?;
    let current = handler.read_holding(index)?;
    let value = (current & and_mask) | (or_mask & !and_mask);
    handler.check_holding_write(index, value)?;
    handler.write_holding(index, value);
    Ok(echo(f))
}

// --- Vendor functions -------------------------------------------------------------

/// Function 64: `[new_addr]` or `[new_addr, sn3, sn2, sn1, sn0]`.
///
/// With a serial in the payload, only the device whose serial matches
/// applies and acknowledges; everyone else stays silent. That lets a
/// commissioning tool split devices that collided on one address.
fn config_address(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<Option<ResponseBuf>, ExceptionCode> {
    let new_addr = *f.payload.first().ok_or(ExceptionCode::IllegalDataValue)?;
    if new_addr == 0 || new_addr > 247 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if f.payload.len() >= 5 {
        let wanted = u32::from_be_bytes([f.payload[1], f.payload[2], f.payload[3], f.payload[4]]);
        if wanted != handler.serial_number() {
            return Ok(None);
        }
    }
    handler.apply_address(new_addr);
    Ok(Some(acknowledge(f)))
}

/// Function 66: respond with the serial number inside a random slot of
/// the `[win_hi, win_lo]`-second window, then stay quiet for the rest
/// of it so every device on the bus answers exactly once per window.
fn random_serial_number(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
    link: &mut impl LinkPort,
    clock: &mut impl ClockPort,
) -> Result<Option<ResponseBuf>, ExceptionCode> {
    let window_ms = u64::from(be16(f.payload, 0)?) * 1000;
    if window_ms == 0 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let slot = rand::thread_rng().gen_range(0..window_ms);
    clock.sleep_ms(slot);

    let mut raw = heapless::Vec::<u8, 6>::new();
    let _ = raw.extend_from_slice(&handler.serial_number().to_be_bytes());
    let c = super::crc::crc16(&raw).to_le_bytes();
    let _ = raw.push(c[0]);
    let _ = raw.push(c[1]);
    if let Err(e) = link.transmit(&raw) {
        warn!("serial broadcast transmit failed: {e}");
    }

    clock.sleep_ms(window_ms - slot);
    Ok(None)
}

fn set_device_time(
    f: Frame<'_>,
    handler: &mut impl RegisterHandler,
) -> Result<ResponseBuf, ExceptionCode> {
    if f.payload.len() < 8 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&f.payload[..8]);
    handler.set_device_time(u64::from_be_bytes(bytes));
    Ok(acknowledge(f))
}
