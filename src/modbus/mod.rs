//! Modbus-RTU slave protocol stack: CRC, frame codec and the dispatch
//! engine. Register semantics live with the controller behind the
//! [`slave::RegisterHandler`] trait.

pub mod crc;
pub mod frame;
pub mod slave;

pub use frame::{ExceptionCode, Frame, FrameError, ResponseBuf};
pub use slave::{RegisterHandler, Slave};
