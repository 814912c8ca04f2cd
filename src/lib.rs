//! FieldNode firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by the `espidf`
//! feature within each module, so the crate compiles on the host.

#![deny(unused_must_use)]

pub mod actuator;
pub mod config;
pub mod controller;
pub mod heartbeat;
pub mod modbus;
pub mod model;
pub mod ports;
pub mod safety;
pub mod sensors;

pub mod error;

pub use error::{Error, Result};

// Hardware-facing modules; the actual implementations are guarded by
// cfg attributes inside so the crate compiles on the host.
pub mod adapters;
pub mod drivers;
