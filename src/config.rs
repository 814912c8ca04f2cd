//! Device configuration.
//!
//! Everything the device persists across power cycles: bus identity,
//! device class, pressure thresholds and their alarm annotations, and the
//! actuator feedback tuning. Stored as one postcard blob through the
//! [`StoragePort`](crate::ports::StoragePort); field-level validation runs
//! before any value is accepted from the bus or from storage.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bounded free-text alarm annotation (16 registers, 2 bytes each).
pub type AlarmMessage = heapless::String<32>;

// --- Identity defaults -----------------------------------------------------

pub const DEFAULT_ADDRESS: u8 = 1;
pub const DEFAULT_SERIAL_NUMBER: u32 = 2;
pub const DEFAULT_CLASS: u16 = 0x0104; // hardware tag 0x01, RelayFeedback mode

/// Hardware model tag occupying the class high byte; never writable.
pub const HARDWARE_MODEL_TAG: u8 = 0x01;

// --- Pressure threshold envelope (mbar) ------------------------------------

pub const PRESSURE_THRESHOLD_ABS_MIN: u16 = 300;
pub const PRESSURE_THRESHOLD_ABS_MAX: u16 = 1200;
pub const DEFAULT_MINIMUM_PRESSURE: u16 = 400;
pub const DEFAULT_MAXIMUM_PRESSURE: u16 = 950;

// --- Actuator feedback tuning ----------------------------------------------

pub const DEFAULT_OUTPUT_ATTEMPTS: u8 = 1;
pub const DEFAULT_FEEDBACK_DELAY_SECS: u8 = 4;
pub const MAX_OUTPUT_ATTEMPTS: u8 = 8;
pub const MAX_FEEDBACK_DELAY_SECS: u8 = 8;

// --- Timing -----------------------------------------------------------------

/// Supervisory heartbeat timeout; crossing it latches `missing_heartbeat`.
pub const HEARTBEAT_TIMEOUT_MS: u64 = 30_000;
/// Sensor re-read / safety re-evaluation period inside the management loop.
pub const INPUT_REFRESH_PERIOD_MS: u64 = 500;
/// Pressure/climate sampling period of the acquisition tasks.
pub const SENSOR_SAMPLE_PERIOD_MS: u64 = 100;

// --- Firmware version -------------------------------------------------------

pub const FIRMWARE_VERSION_MAJOR: u16 = 0;
pub const FIRMWARE_VERSION_MINOR: u16 = 3;
pub const FIRMWARE_VERSION_PATCH: u16 = 0;

/// Pack major/minor/patch into the single firmware-version register.
pub const fn firmware_version_word() -> u16 {
    (FIRMWARE_VERSION_MAJOR << 10) | (FIRMWARE_VERSION_MINOR << 5) | FIRMWARE_VERSION_PATCH
}

// ---------------------------------------------------------------------------
// Device mode
// ---------------------------------------------------------------------------

/// Operating mode, encoded in the class register low byte.
///
/// Only these values are accepted by a class write; anything else is
/// rejected without mutating the stored class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceMode {
    Pressure = 0x01,
    TemperatureHumidity = 0x02,
    PressureTemperatureHumidity = 0x03,
    RelayFeedback = 0x04,
    Light = 0x05,
}

impl DeviceMode {
    pub fn from_class(class: u16) -> Option<Self> {
        match class & 0x00FF {
            0x01 => Some(Self::Pressure),
            0x02 => Some(Self::TemperatureHumidity),
            0x03 => Some(Self::PressureTemperatureHumidity),
            0x04 => Some(Self::RelayFeedback),
            0x05 => Some(Self::Light),
            _ => None,
        }
    }

    /// Whether the safety interlock includes the pressure-window term.
    pub fn uses_pressure(self) -> bool {
        matches!(self, Self::Pressure | Self::PressureTemperatureHumidity)
    }

    /// Whether actuation must be confirmed through the feedback input.
    pub fn requires_feedback(self) -> bool {
        matches!(self, Self::RelayFeedback)
    }

    /// Whether this mode runs the pressure acquisition channel.
    pub fn samples_pressure(self) -> bool {
        matches!(self, Self::Pressure | Self::PressureTemperatureHumidity)
    }

    /// Whether this mode runs the temperature/humidity acquisition channel.
    pub fn samples_climate(self) -> bool {
        matches!(
            self,
            Self::TemperatureHumidity | Self::PressureTemperatureHumidity
        )
    }
}

/// Validate a candidate class-register value and merge it over `current`.
///
/// Only the mode byte is writable; the hardware tag in the high byte is
/// preserved regardless of what the caller sent.
pub fn merge_class_write(current: u16, candidate: u16) -> Result<u16, ConfigError> {
    match DeviceMode::from_class(candidate) {
        Some(_) => Ok((current & 0xFF00) | (candidate & 0x00FF)),
        None => Err(ConfigError::ValidationFailed("class mode not whitelisted")),
    }
}

// ---------------------------------------------------------------------------
// Threshold validation
// ---------------------------------------------------------------------------

/// How pressure-threshold writes are validated.
///
/// The fielded units check each bound against the absolute envelope only,
/// so a minimum can legally sit above the current maximum. That behaviour
/// is kept as the default pending product-owner confirmation; the
/// cross-checked variant is available behind the same switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThresholdPolicy {
    /// Each bound independently inside [`PRESSURE_THRESHOLD_ABS_MIN`,
    /// `PRESSURE_THRESHOLD_ABS_MAX`].
    #[default]
    AbsoluteEnvelope,
    /// Envelope check plus `minimum < maximum` against the opposite bound.
    CrossChecked,
}

impl ThresholdPolicy {
    /// Validate a candidate minimum threshold against `current_max`.
    pub fn check_minimum(self, candidate: u16, current_max: u16) -> Result<(), ConfigError> {
        envelope_check(candidate)?;
        if self == Self::CrossChecked && candidate >= current_max {
            return Err(ConfigError::ValidationFailed(
                "minimum threshold above current maximum",
            ));
        }
        Ok(())
    }

    /// Validate a candidate maximum threshold against `current_min`.
    pub fn check_maximum(self, candidate: u16, current_min: u16) -> Result<(), ConfigError> {
        envelope_check(candidate)?;
        if self == Self::CrossChecked && candidate <= current_min {
            return Err(ConfigError::ValidationFailed(
                "maximum threshold below current minimum",
            ));
        }
        Ok(())
    }
}

fn envelope_check(candidate: u16) -> Result<(), ConfigError> {
    if (PRESSURE_THRESHOLD_ABS_MIN..=PRESSURE_THRESHOLD_ABS_MAX).contains(&candidate) {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed(
            "pressure threshold outside absolute envelope",
        ))
    }
}

// ---------------------------------------------------------------------------
// Persisted configuration blob
// ---------------------------------------------------------------------------

/// The persisted part of the device model, serialized as one postcard blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub address: u8,
    pub serial_number: u32,
    pub device_class: u16,

    pub minimum_pressure_mbar: u16,
    pub maximum_pressure_mbar: u16,
    pub minimum_pressure_message: AlarmMessage,
    pub maximum_pressure_message: AlarmMessage,

    pub feedback_enabled: bool,
    pub feedback_direction: bool,
    pub output_attempts: u8,
    pub feedback_delay_secs: u8,

    pub threshold_policy: ThresholdPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            serial_number: DEFAULT_SERIAL_NUMBER,
            device_class: DEFAULT_CLASS,
            minimum_pressure_mbar: DEFAULT_MINIMUM_PRESSURE,
            maximum_pressure_mbar: DEFAULT_MAXIMUM_PRESSURE,
            minimum_pressure_message: AlarmMessage::new(),
            maximum_pressure_message: AlarmMessage::new(),
            feedback_enabled: false,
            feedback_direction: false,
            output_attempts: DEFAULT_OUTPUT_ATTEMPTS,
            feedback_delay_secs: DEFAULT_FEEDBACK_DELAY_SECS,
            threshold_policy: ThresholdPolicy::default(),
        }
    }
}

impl DeviceConfig {
    /// Range-check every field; called after loading from storage so a
    /// corrupted or stale blob cannot smuggle invalid operating parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address == 0 || self.address > 247 {
            return Err(ConfigError::ValidationFailed("address must be 1-247"));
        }
        if DeviceMode::from_class(self.device_class).is_none() {
            return Err(ConfigError::ValidationFailed("class mode not whitelisted"));
        }
        envelope_check(self.minimum_pressure_mbar)?;
        envelope_check(self.maximum_pressure_mbar)?;
        if self.output_attempts == 0 || self.output_attempts > MAX_OUTPUT_ATTEMPTS {
            return Err(ConfigError::ValidationFailed("output attempts must be 1-8"));
        }
        if self.feedback_delay_secs == 0 || self.feedback_delay_secs > MAX_FEEDBACK_DELAY_SECS {
            return Err(ConfigError::ValidationFailed("feedback delay must be 1-8 s"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = DeviceConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.minimum_pressure_mbar < c.maximum_pressure_mbar);
        assert!(c.output_attempts >= 1 && c.output_attempts <= MAX_OUTPUT_ATTEMPTS);
    }

    #[test]
    fn class_write_preserves_hardware_tag() {
        let merged = merge_class_write(0x0104, 0xFF02).unwrap();
        assert_eq!(merged, 0x0102);
    }

    #[test]
    fn class_write_outside_whitelist_rejected() {
        assert!(merge_class_write(0x0104, 0x0100).is_err());
        assert!(merge_class_write(0x0104, 0x0106).is_err());
        assert!(merge_class_write(0x0104, 0x01FF).is_err());
    }

    #[test]
    fn envelope_policy_ignores_opposite_bound() {
        let p = ThresholdPolicy::AbsoluteEnvelope;
        // A minimum above the current maximum is legal under the fielded policy.
        assert!(p.check_minimum(1000, 950).is_ok());
        assert!(p.check_minimum(299, 950).is_err());
        assert!(p.check_maximum(1201, 400).is_err());
    }

    #[test]
    fn cross_checked_policy_enforces_ordering() {
        let p = ThresholdPolicy::CrossChecked;
        assert!(p.check_minimum(1000, 950).is_err());
        assert!(p.check_minimum(400, 950).is_ok());
        assert!(p.check_maximum(350, 400).is_err());
    }

    #[test]
    fn firmware_version_word_packs() {
        let w = firmware_version_word();
        assert_eq!(w >> 10, FIRMWARE_VERSION_MAJOR);
        assert_eq!((w >> 5) & 0x1F, FIRMWARE_VERSION_MINOR);
        assert_eq!(w & 0x1F, FIRMWARE_VERSION_PATCH);
    }

    #[test]
    fn serde_roundtrip() {
        let mut c = DeviceConfig::default();
        c.minimum_pressure_message.push_str("low glycol").unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let c2: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.address, c2.address);
        assert_eq!(c.minimum_pressure_message, c2.minimum_pressure_message);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = DeviceConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: DeviceConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.serial_number, c2.serial_number);
        assert_eq!(c.device_class, c2.device_class);
        assert_eq!(c.threshold_policy, c2.threshold_policy);
    }
}
