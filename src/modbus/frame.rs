//! RTU frame layout: `[address:1][function:1][payload:N][crc16:2]`.
//!
//! Decoding never allocates; a [`Frame`] borrows the receive buffer.
//! Frames that fail the structural checks here are dropped silently by
//! the engine, exactly as a frame addressed to another device would be.

use heapless::Vec;

use super::crc;

/// Largest RTU frame we accept or emit (standard ADU limit).
pub const MAX_FRAME: usize = 256;

/// A response ready for the wire.
pub type ResponseBuf = Vec<u8, MAX_FRAME>;

// --- Standard function codes -------------------------------------------------

pub const FN_READ_COILS: u8 = 0x01;
pub const FN_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FN_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FN_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FN_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FN_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FN_MASK_WRITE_REGISTER: u8 = 0x16;

// --- Vendor function codes (64-68) ---------------------------------------------

/// Re-address a device, optionally gated on an exact serial-number match.
pub const FN_CONFIG_ADDRESS: u8 = 64;
/// Force outputs to the de-energised state (commissioning reset).
pub const FN_NETWORK_INITIALIZATION: u8 = 65;
/// Anti-collision serial-number broadcast inside a random time slot.
pub const FN_RANDOM_SERIAL_NUMBER: u8 = 66;
/// Distribute the wall-clock time to the bus.
pub const FN_SET_DEVICE_TIME: u8 = 67;
/// Supervisory liveness beat.
pub const FN_HEARTBEAT: u8 = 68;

// --- Exceptions ----------------------------------------------------------------

/// Standard exception codes carried in `[addr, fn|0x80, code]` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}

// --- Decoding --------------------------------------------------------------------

/// Why a received byte sequence was not a valid frame for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than address + function + CRC.
    TooShort,
    /// CRC mismatch (line noise or a partial frame).
    BadCrc,
}

/// Borrowed view of a structurally valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub address: u8,
    pub function: u8,
    pub payload: &'a [u8],
}

/// Validate length and CRC and split the frame into its parts.
pub fn decode(raw: &[u8]) -> Result<Frame<'_>, FrameError> {
    if raw.len() < 4 {
        return Err(FrameError::TooShort);
    }
    if !crc::check(raw) {
        return Err(FrameError::BadCrc);
    }
    Ok(Frame {
        address: raw[0],
        function: raw[1],
        payload: &raw[2..raw.len() - 2],
    })
}

// --- Encoding ----------------------------------------------------------------------

/// Build `[addr, function, payload, crc16-le]`.
///
/// Payloads are produced by the engine and always fit; an oversized one
/// yields an empty buffer, which the link layer treats as nothing to send.
pub fn encode(address: u8, function: u8, payload: &[u8]) -> ResponseBuf {
    let mut out = ResponseBuf::new();
    if out.push(address).is_err()
        || out.push(function).is_err()
        || out.extend_from_slice(payload).is_err()
    {
        out.clear();
        return out;
    }
    append_crc(&mut out);
    out
}

/// Build an exception response `[addr, fn|0x80, code, crc16-le]`.
pub fn encode_exception(address: u8, function: u8, code: ExceptionCode) -> ResponseBuf {
    encode(address, function | 0x80, &[code as u8])
}

/// Append the CRC of everything currently in `buf`, low byte first.
pub fn append_crc(buf: &mut ResponseBuf) {
    let c = crc::crc16(buf).to_le_bytes();
    let _ = buf.push(c[0]);
    let _ = buf.push(c[1]);
}
