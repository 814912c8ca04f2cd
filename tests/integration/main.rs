//! Integration test driver for `tests/integration/` submodules.
//!
//! Everything runs on the host against mock adapters; no hardware or
//! ESP-IDF toolchain involved.

mod controller_tests;
mod mock_hw;
mod protocol_tests;
