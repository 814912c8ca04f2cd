//! The device model — configuration plus live state, behind one lock.
//!
//! Every other component reads and writes the model exclusively through
//! [`SyncModel::read`] / [`SyncModel::update`], which hold the single
//! mutual-exclusion domain for the duration of one closure and never
//! across I/O. This replaces the per-field accessor macros of earlier
//! firmware generations with one generic synchronized-access point; no
//! reader can observe a partially-updated multi-field value.

use std::sync::{Mutex, MutexGuard};

use crate::config::{self, DeviceConfig, DeviceMode, ThresholdPolicy};

/// Fixed backing store for one alarm annotation (16 registers x 2 bytes).
pub const MESSAGE_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Model state
// ---------------------------------------------------------------------------

/// Plain data; only ever touched under the [`SyncModel`] lock.
#[derive(Debug, Clone)]
pub struct ModelState {
    // -- Persisted configuration --
    pub address: u8,
    pub serial_number: u32,
    pub device_class: u16,
    pub minimum_pressure_mbar: u16,
    pub maximum_pressure_mbar: u16,
    pub minimum_pressure_message: [u8; MESSAGE_BYTES],
    pub maximum_pressure_message: [u8; MESSAGE_BYTES],
    pub feedback_enabled: bool,
    pub feedback_direction: bool,
    pub output_attempts: u8,
    pub feedback_delay_secs: u8,
    pub threshold_policy: ThresholdPolicy,

    // -- Live state --
    pub last_temperature_dc: i16,
    pub last_pressure_pa: i16,
    pub last_humidity_dh: i16,
    pub missing_heartbeat: bool,
    pub signal_fault: bool,
    pub pressure_fault: bool,
    pub feedback_fault: bool,
}

impl ModelState {
    fn from_config(cfg: &DeviceConfig) -> Self {
        Self {
            address: cfg.address,
            serial_number: cfg.serial_number,
            device_class: cfg.device_class,
            minimum_pressure_mbar: cfg.minimum_pressure_mbar,
            maximum_pressure_mbar: cfg.maximum_pressure_mbar,
            minimum_pressure_message: message_to_bytes(&cfg.minimum_pressure_message),
            maximum_pressure_message: message_to_bytes(&cfg.maximum_pressure_message),
            feedback_enabled: cfg.feedback_enabled,
            feedback_direction: cfg.feedback_direction,
            output_attempts: cfg.output_attempts,
            feedback_delay_secs: cfg.feedback_delay_secs,
            threshold_policy: cfg.threshold_policy,
            last_temperature_dc: 0,
            last_pressure_pa: 0,
            last_humidity_dh: 0,
            missing_heartbeat: false,
            signal_fault: false,
            pressure_fault: false,
            feedback_fault: false,
        }
    }

    /// The operating mode encoded in the class register.
    /// Falls back to `RelayFeedback` if the stored class is somehow stale;
    /// writes can only store whitelisted modes so this is a boot-time guard.
    pub fn mode(&self) -> DeviceMode {
        DeviceMode::from_class(self.device_class).unwrap_or(DeviceMode::RelayFeedback)
    }

    /// Alarms register value: bit0 signal fault, bit1 pressure fault,
    /// bit2 actuation feedback never confirmed.
    pub fn alarms(&self) -> u16 {
        u16::from(self.signal_fault)
            | (u16::from(self.pressure_fault) << 1)
            | (u16::from(self.feedback_fault) << 2)
    }
}

// ---------------------------------------------------------------------------
// Synchronized wrapper
// ---------------------------------------------------------------------------

/// The one mutual-exclusion domain around [`ModelState`].
pub struct SyncModel {
    inner: Mutex<ModelState>,
}

impl SyncModel {
    pub fn new(cfg: &DeviceConfig) -> Self {
        Self {
            inner: Mutex::new(ModelState::from_config(cfg)),
        }
    }

    /// Read access; the lock is held only for the closure.
    pub fn read<R>(&self, f: impl FnOnce(&ModelState) -> R) -> R {
        f(&self.lock())
    }

    /// Write access; the lock is held only for the closure.
    pub fn update<R>(&self, f: impl FnOnce(&mut ModelState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Snapshot the persisted fields for serialization to storage.
    pub fn snapshot_config(&self) -> DeviceConfig {
        self.read(|m| DeviceConfig {
            address: m.address,
            serial_number: m.serial_number,
            device_class: m.device_class,
            minimum_pressure_mbar: m.minimum_pressure_mbar,
            maximum_pressure_mbar: m.maximum_pressure_mbar,
            minimum_pressure_message: message_from_bytes(&m.minimum_pressure_message),
            maximum_pressure_message: message_from_bytes(&m.maximum_pressure_message),
            feedback_enabled: m.feedback_enabled,
            feedback_direction: m.feedback_direction,
            output_attempts: m.output_attempts,
            feedback_delay_secs: m.feedback_delay_secs,
            threshold_policy: m.threshold_policy,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        // A poisoned lock means a panicking reader; the state itself is
        // plain data and still consistent, so recover it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Message <-> byte helpers
// ---------------------------------------------------------------------------

fn message_to_bytes(msg: &config::AlarmMessage) -> [u8; MESSAGE_BYTES] {
    let mut out = [0u8; MESSAGE_BYTES];
    let bytes = msg.as_bytes();
    let n = bytes.len().min(MESSAGE_BYTES);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn message_from_bytes(raw: &[u8; MESSAGE_BYTES]) -> config::AlarmMessage {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(MESSAGE_BYTES);
    let mut out = config::AlarmMessage::new();
    if let Ok(s) = core::str::from_utf8(&raw[..end]) {
        // Cannot overflow: the source is at most MESSAGE_BYTES long.
        let _ = out.push_str(s);
    }
    out
}

/// Read one 16-bit register out of a message block (big-endian byte pair).
pub fn message_register(raw: &[u8; MESSAGE_BYTES], index: usize) -> u16 {
    let hi = raw[index * 2];
    let lo = raw[index * 2 + 1];
    u16::from_be_bytes([hi, lo])
}

/// Write one 16-bit register into a message block (big-endian byte pair).
pub fn set_message_register(raw: &mut [u8; MESSAGE_BYTES], index: usize, value: u16) {
    let [hi, lo] = value.to_be_bytes();
    raw[index * 2] = hi;
    raw[index * 2 + 1] = lo;
}
