//! Hardware adapters implementing the port traits.
//!
//! The ESP-IDF adapters only build with the `espidf` feature; the
//! simulation adapters are always available so host tests and demos
//! can run the full firmware logic without a device.

#[cfg(feature = "espidf")]
pub mod gpio;
#[cfg(feature = "espidf")]
pub mod nvs;
#[cfg(feature = "espidf")]
pub mod rs485;
#[cfg(feature = "espidf")]
pub mod time;

pub mod sim;
