//! Pure peripheral drivers: the input debounce filter and the I2C
//! sensor probes, all generic over `embedded-hal` traits so they run
//! unchanged against the ESP-IDF peripherals and against test doubles.

pub mod debounce;
pub mod ms5837;
pub mod sht4x;

pub use debounce::Debouncer;
pub use ms5837::Ms5837;
pub use sht4x::Sht4x;
