//! The management loop and the register map.
//!
//! `Controller` owns the protocol engine, the relay machine and the
//! heartbeat monitor, and wires them to the device model. Hardware is
//! handed in per call (`hw: &mut (impl LinkPort + InputPort +
//! ActuatorPort)`), never stored, so every piece stays testable with
//! in-memory mocks.
//!
//! Per iteration, strictly in this order: protocol frames first, then
//! heartbeat expiry, then a fresh read of the debounced input levels
//! and interlock re-evaluation, then actuator timer advancement. A
//! configuration write or an input edge therefore takes effect within
//! the same iteration that carried it; only the smoothed sensor
//! readings run on the 500 ms cadence.

use std::sync::Arc;

use log::{error, info, warn};

use crate::actuator::{RelayEnv, RelayMachine, RelayState};
use crate::config::{self, DeviceConfig, INPUT_REFRESH_PERIOD_MS};
use crate::heartbeat::HeartbeatMonitor;
use crate::modbus::{ExceptionCode, RegisterHandler, Slave};
use crate::model::{self, SyncModel};
use crate::ports::{ActuatorPort, ClockPort, InputPort, LinkPort, StoragePort};
use crate::safety::{self, SafetyVerdict};
use crate::sensors::{ClimateChannel, PressureChannel};

/// Storage key of the postcard-encoded [`DeviceConfig`] blob.
pub const CONFIG_KEY: &str = "devcfg";

// --- Holding register indices -------------------------------------------------

pub const REG_ADDRESS: u16 = 0;
pub const REG_FIRMWARE_VERSION: u16 = 1;
pub const REG_CLASS: u16 = 2;
pub const REG_SERIAL_HI: u16 = 3;
pub const REG_SERIAL_LO: u16 = 4;
pub const REG_ALARMS: u16 = 5;
pub const REG_MIN_PRESSURE: u16 = 6;
pub const REG_MAX_PRESSURE: u16 = 7;
pub const REG_FEEDBACK_ENABLED: u16 = 8;
pub const REG_FEEDBACK_DIRECTION: u16 = 9;
pub const REG_OUTPUT_ATTEMPTS: u16 = 10;
pub const REG_FEEDBACK_DELAY: u16 = 11;
pub const REG_MIN_MESSAGE_FIRST: u16 = 16;
pub const REG_MIN_MESSAGE_LAST: u16 = 31;
pub const REG_MAX_MESSAGE_FIRST: u16 = 32;
pub const REG_MAX_MESSAGE_LAST: u16 = 47;
pub const REG_TEMPERATURE: u16 = 48;
pub const REG_PRESSURE: u16 = 49;
pub const REG_HUMIDITY: u16 = 50;

// --- Bit region indices ---------------------------------------------------------

pub const COIL_RELAY: u16 = 0;
pub const DISCRETE_SAFETY: u16 = 0;
pub const DISCRETE_SIGNAL: u16 = 1;

/// Debounced input levels as of the last refresh.
#[derive(Debug, Clone, Copy, Default)]
struct InputLevels {
    safety: bool,
    signal: bool,
}

/// Side effects a protocol frame asked for, applied after the engine
/// returns so the register handler never borrows the hardware.
#[derive(Debug, Default)]
struct PendingActions {
    coil_command: Option<bool>,
    force_off: bool,
    beat: bool,
    set_time: Option<u64>,
    config_dirty: bool,
}

pub struct Controller {
    model: SyncModel,
    machine: RelayMachine,
    monitor: HeartbeatMonitor,
    slave: Slave,
    pressure: Arc<PressureChannel>,
    climate: Arc<ClimateChannel>,
    inputs: InputLevels,
    pressure_mbar: u16,
    verdict: SafetyVerdict,
    last_refresh: Option<u64>,
}

impl Controller {
    pub fn new(
        cfg: &DeviceConfig,
        pressure: Arc<PressureChannel>,
        climate: Arc<ClimateChannel>,
        now: u64,
    ) -> Self {
        Self {
            model: SyncModel::new(cfg),
            machine: RelayMachine::new(),
            monitor: HeartbeatMonitor::new(now),
            slave: Slave::new(),
            pressure,
            climate,
            inputs: InputLevels::default(),
            pressure_mbar: 0,
            // Fail-safe until the first input refresh.
            verdict: SafetyVerdict {
                signal_safe: false,
                pressure_safe: false,
                interlock_ok: false,
            },
            last_refresh: None,
        }
    }

    pub fn model(&self) -> &SyncModel {
        &self.model
    }

    pub fn relay_state(&self) -> RelayState {
        self.machine.state()
    }

    /// One management-loop iteration.
    pub fn run_once(
        &mut self,
        hw: &mut (impl LinkPort + InputPort + ActuatorPort),
        storage: &mut impl StoragePort,
        clock: &mut impl ClockPort,
    ) {
        let now = clock.now_ms();

        self.poll_link(hw, storage, clock);

        if self.monitor.check(now) {
            self.model.update(|m| m.missing_heartbeat = true);
        }

        // Input levels are cheap cached-filter reads; take them every
        // iteration so an edge is acted on without waiting out the
        // sensor cadence.
        self.inputs = InputLevels {
            safety: hw.safety_level(),
            signal: hw.signal_level(),
        };
        let due = self
            .last_refresh
            .is_none_or(|t| now.saturating_sub(t) >= INPUT_REFRESH_PERIOD_MS);
        if due {
            self.refresh_sensors(now);
        }
        self.apply_verdict(hw, now, due);

        let env = self.relay_env();
        self.machine.tick(&env, now, hw);
        let fault = self.machine.feedback_fault();
        self.model.update(|m| m.feedback_fault = fault);
    }

    fn poll_link(
        &mut self,
        hw: &mut (impl LinkPort + InputPort + ActuatorPort),
        storage: &mut impl StoragePort,
        clock: &mut impl ClockPort,
    ) {
        let mut rx = [0u8; 256];
        let n = match hw.receive(&mut rx) {
            Ok(n) => n,
            Err(e) => {
                warn!("link receive failed: {e}");
                return;
            }
        };
        if n == 0 {
            return;
        }

        let mut pending = PendingActions::default();
        let response = {
            let mut regs = DeviceRegisters {
                model: &self.model,
                machine: &self.machine,
                inputs: self.inputs,
                pending: &mut pending,
            };
            self.slave.process(&rx[..n], &mut regs, hw, clock)
        };
        if let Some(resp) = response {
            if let Err(e) = hw.transmit(&resp) {
                warn!("link transmit failed: {e}");
            }
        }
        self.apply_pending(pending, hw, storage, clock);
    }

    fn apply_pending(
        &mut self,
        pending: PendingActions,
        hw: &mut impl ActuatorPort,
        storage: &mut impl StoragePort,
        clock: &mut impl ClockPort,
    ) {
        if pending.beat {
            self.monitor.beat(clock.now_ms());
            self.model.update(|m| m.missing_heartbeat = false);
        }
        if let Some(secs) = pending.set_time {
            clock.set_wall_clock(secs);
        }
        if pending.force_off {
            info!("network initialization, forcing outputs off");
            self.machine.force_off(hw);
        }
        if let Some(on) = pending.coil_command {
            let env = self.relay_env();
            let now = clock.now_ms();
            // A rejected command leaves the coil observably off; the
            // machine already logged the refusal.
            self.machine.command(on, &env, now, hw);
        }
        if pending.config_dirty {
            self.persist(storage);
        }
    }

    fn persist(&mut self, storage: &mut impl StoragePort) {
        let cfg = self.model.snapshot_config();
        match postcard::to_allocvec(&cfg) {
            Ok(bytes) => {
                if let Err(e) = storage.save(CONFIG_KEY, &bytes) {
                    error!("config save failed: {e}");
                }
            }
            Err(e) => error!("config encode failed: {e}"),
        }
    }

    /// Pull the smoothed sensor averages into the model; runs on the
    /// 500 ms cadence, not per iteration.
    fn refresh_sensors(&mut self, now: u64) {
        let mode = self.model.read(model::ModelState::mode);
        if mode.samples_pressure() {
            self.pressure_mbar = self.pressure.average_mbar();
            let pa = self.pressure.average_pa_offset();
            self.model.update(|m| m.last_pressure_pa = pa);
        }
        if mode.samples_climate() {
            let t = self.climate.average_temperature_dc();
            let h = self.climate.average_humidity_dh();
            self.model.update(|m| {
                m.last_temperature_dc = t;
                m.last_humidity_dh = h;
            });
        }
        self.last_refresh = Some(now);
    }

    fn apply_verdict(&mut self, hw: &mut impl ActuatorPort, now: u64, always_notify: bool) {
        let verdict = self.model.read(|m| {
            safety::evaluate(m, self.inputs.safety, self.pressure_mbar)
        });
        let changed = verdict != self.verdict;
        self.verdict = verdict;
        if changed || always_notify {
            let uses_pressure = self.model.read(|m| m.mode().uses_pressure());
            self.model.update(|m| {
                m.signal_fault = !verdict.signal_safe;
                m.pressure_fault = uses_pressure && !verdict.pressure_safe;
            });
            let env = self.relay_env();
            self.machine.inputs_changed(&env, now, hw);
        }
    }

    fn relay_env(&self) -> RelayEnv {
        self.model.read(|m| RelayEnv {
            interlock_ok: self.verdict.interlock_ok,
            feedback_level: self.inputs.signal,
            feedback_direction: m.feedback_direction,
            verify_feedback: m.mode().requires_feedback() && m.feedback_enabled,
            attempts_max: m.output_attempts,
            delay_ms: u64::from(m.feedback_delay_secs) * 1000,
        })
    }
}

/// Load the persisted configuration, falling back to defaults when the
/// blob is absent, unreadable or fails validation.
pub fn load_config(storage: &mut impl StoragePort) -> DeviceConfig {
    let mut buf = [0u8; 512];
    match storage.load(CONFIG_KEY, &mut buf) {
        Ok(Some(n)) => match postcard::from_bytes::<DeviceConfig>(&buf[..n]) {
            Ok(cfg) => match cfg.validate() {
                Ok(()) => {
                    info!("configuration loaded, address {}", cfg.address);
                    cfg
                }
                Err(e) => {
                    warn!("stored configuration invalid ({e}), using defaults");
                    DeviceConfig::default()
                }
            },
            Err(_) => {
                warn!("stored configuration unreadable, using defaults");
                DeviceConfig::default()
            }
        },
        Ok(None) => {
            info!("no stored configuration, using defaults");
            DeviceConfig::default()
        }
        Err(e) => {
            warn!("configuration load failed ({e}), using defaults");
            DeviceConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Register map
// ---------------------------------------------------------------------------

/// Per-frame view the protocol engine dispatches into. Reads come
/// straight from the model; write side effects that touch hardware are
/// queued in [`PendingActions`] and applied once the frame is answered.
struct DeviceRegisters<'a> {
    model: &'a SyncModel,
    machine: &'a RelayMachine,
    inputs: InputLevels,
    pending: &'a mut PendingActions,
}

impl RegisterHandler for DeviceRegisters<'_> {
    fn configured_address(&self) -> u8 {
        self.model.read(|m| m.address)
    }

    fn serial_number(&self) -> u32 {
        self.model.read(|m| m.serial_number)
    }

    fn read_coil(&mut self, index: u16) -> Result<bool, ExceptionCode> {
        match index {
            COIL_RELAY => Ok(self.machine.commanded_on()),
            _ => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    fn check_coil_write(&mut self, index: u16) -> Result<(), ExceptionCode> {
        match index {
            COIL_RELAY => Ok(()),
            _ => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    fn write_coil(&mut self, _index: u16, on: bool) {
        self.pending.coil_command = Some(on);
    }

    fn read_discrete_input(&mut self, index: u16) -> Result<bool, ExceptionCode> {
        match index {
            DISCRETE_SAFETY => Ok(self.inputs.safety),
            DISCRETE_SIGNAL => Ok(self.inputs.signal),
            _ => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    fn read_holding(&mut self, index: u16) -> Result<u16, ExceptionCode> {
        self.model.read(|m| match index {
            REG_ADDRESS => Ok(u16::from(m.address)),
            REG_FIRMWARE_VERSION => Ok(config::firmware_version_word()),
            REG_CLASS => Ok(m.device_class),
            REG_SERIAL_HI => Ok((m.serial_number >> 16) as u16),
            REG_SERIAL_LO => Ok(m.serial_number as u16),
            REG_ALARMS => Ok(m.alarms()),
            REG_MIN_PRESSURE => Ok(m.minimum_pressure_mbar),
            REG_MAX_PRESSURE => Ok(m.maximum_pressure_mbar),
            REG_FEEDBACK_ENABLED => Ok(u16::from(m.feedback_enabled)),
            REG_FEEDBACK_DIRECTION => Ok(u16::from(m.feedback_direction)),
            REG_OUTPUT_ATTEMPTS => Ok(u16::from(m.output_attempts)),
            REG_FEEDBACK_DELAY => Ok(u16::from(m.feedback_delay_secs)),
            REG_MIN_MESSAGE_FIRST..=REG_MIN_MESSAGE_LAST => Ok(model::message_register(
                &m.minimum_pressure_message,
                usize::from(index - REG_MIN_MESSAGE_FIRST),
            )),
            REG_MAX_MESSAGE_FIRST..=REG_MAX_MESSAGE_LAST => Ok(model::message_register(
                &m.maximum_pressure_message,
                usize::from(index - REG_MAX_MESSAGE_FIRST),
            )),
            REG_TEMPERATURE => Ok(m.last_temperature_dc as u16),
            REG_PRESSURE => Ok(m.last_pressure_pa as u16),
            REG_HUMIDITY => Ok(m.last_humidity_dh as u16),
            _ => Err(ExceptionCode::IllegalDataAddress),
        })
    }

    fn check_holding_write(&mut self, index: u16, value: u16) -> Result<(), ExceptionCode> {
        match index {
            REG_ADDRESS => {
                if (1..=247).contains(&value) {
                    Ok(())
                } else {
                    Err(ExceptionCode::IllegalDataValue)
                }
            }
            REG_CLASS => self
                .model
                .read(|m| config::merge_class_write(m.device_class, value))
                .map(|_| ())
                .map_err(|_| ExceptionCode::IllegalDataValue),
            REG_SERIAL_HI | REG_SERIAL_LO => Ok(()),
            REG_MIN_PRESSURE => self
                .model
                .read(|m| m.threshold_policy.check_minimum(value, m.maximum_pressure_mbar))
                .map_err(|_| ExceptionCode::IllegalDataValue),
            REG_MAX_PRESSURE => self
                .model
                .read(|m| m.threshold_policy.check_maximum(value, m.minimum_pressure_mbar))
                .map_err(|_| ExceptionCode::IllegalDataValue),
            REG_FEEDBACK_ENABLED | REG_FEEDBACK_DIRECTION => {
                if value <= 1 {
                    Ok(())
                } else {
                    Err(ExceptionCode::IllegalDataValue)
                }
            }
            REG_OUTPUT_ATTEMPTS => {
                if (1..=u16::from(config::MAX_OUTPUT_ATTEMPTS)).contains(&value) {
                    Ok(())
                } else {
                    Err(ExceptionCode::IllegalDataValue)
                }
            }
            REG_FEEDBACK_DELAY => {
                if (1..=u16::from(config::MAX_FEEDBACK_DELAY_SECS)).contains(&value) {
                    Ok(())
                } else {
                    Err(ExceptionCode::IllegalDataValue)
                }
            }
            REG_MIN_MESSAGE_FIRST..=REG_MAX_MESSAGE_LAST => Ok(()),
            // Version, alarms and readings are read-only.
            REG_FIRMWARE_VERSION | REG_ALARMS | REG_TEMPERATURE | REG_PRESSURE | REG_HUMIDITY => {
                Err(ExceptionCode::IllegalFunction)
            }
            _ => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    fn write_holding(&mut self, index: u16, value: u16) {
        self.model.update(|m| match index {
            REG_ADDRESS => m.address = value as u8,
            REG_CLASS => {
                // Vetted by check_holding_write; the merge cannot fail here.
                if let Ok(merged) = config::merge_class_write(m.device_class, value) {
                    m.device_class = merged;
                }
            }
            REG_SERIAL_HI => {
                m.serial_number = (u32::from(value) << 16) | (m.serial_number & 0xFFFF);
            }
            REG_SERIAL_LO => {
                m.serial_number = (m.serial_number & 0xFFFF_0000) | u32::from(value);
            }
            REG_MIN_PRESSURE => m.minimum_pressure_mbar = value,
            REG_MAX_PRESSURE => m.maximum_pressure_mbar = value,
            REG_FEEDBACK_ENABLED => m.feedback_enabled = value != 0,
            REG_FEEDBACK_DIRECTION => m.feedback_direction = value != 0,
            REG_OUTPUT_ATTEMPTS => m.output_attempts = value as u8,
            REG_FEEDBACK_DELAY => m.feedback_delay_secs = value as u8,
            REG_MIN_MESSAGE_FIRST..=REG_MIN_MESSAGE_LAST => model::set_message_register(
                &mut m.minimum_pressure_message,
                usize::from(index - REG_MIN_MESSAGE_FIRST),
                value,
            ),
            REG_MAX_MESSAGE_FIRST..=REG_MAX_MESSAGE_LAST => model::set_message_register(
                &mut m.maximum_pressure_message,
                usize::from(index - REG_MAX_MESSAGE_FIRST),
                value,
            ),
            _ => {}
        });
        self.pending.config_dirty = true;
    }

    fn read_input(&mut self, index: u16) -> Result<u16, ExceptionCode> {
        self.model.read(|m| match index {
            0 => Ok(m.last_temperature_dc as u16),
            1 => Ok(m.last_pressure_pa as u16),
            2 => Ok(m.last_humidity_dh as u16),
            _ => Err(ExceptionCode::IllegalDataAddress),
        })
    }

    fn apply_address(&mut self, address: u8) {
        info!("bus address changed to {address}");
        self.model.update(|m| m.address = address);
        self.pending.config_dirty = true;
    }

    fn force_outputs_off(&mut self) {
        self.pending.force_off = true;
    }

    fn set_device_time(&mut self, unix_secs: u64) {
        self.pending.set_time = Some(unix_secs);
    }

    fn heartbeat(&mut self) {
        self.pending.beat = true;
    }
}
