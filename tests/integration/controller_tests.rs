//! Management-loop behaviour over simulated time: interlock gating,
//! heartbeat fail-safe, the feedback retry sequence and sensor-driven
//! pressure faults.

use std::sync::Arc;

use fieldnode::adapters::sim::{MemStorage, SimClock};
use fieldnode::config::DeviceConfig;
use fieldnode::controller::Controller;
use fieldnode::error::SensorError;
use fieldnode::modbus::frame::{self, FN_HEARTBEAT, FN_WRITE_SINGLE_COIL};
use fieldnode::sensors::{ClimateChannel, PressureChannel, PressureProbe};

use crate::mock_hw::MockBoard;

struct Rig {
    ctl: Controller,
    board: MockBoard,
    storage: MemStorage,
    clock: SimClock,
    pressure: Arc<PressureChannel>,
}

impl Rig {
    fn new(cfg: DeviceConfig) -> Self {
        let pressure = Arc::new(PressureChannel::new());
        Self {
            ctl: Controller::new(&cfg, pressure.clone(), Arc::new(ClimateChannel::new()), 0),
            board: MockBoard::new(),
            storage: MemStorage::new(),
            clock: SimClock::new(),
            pressure,
        }
    }

    /// Advance the clock, then run one loop iteration.
    fn step_ms(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.ctl
            .run_once(&mut self.board, &mut self.storage, &mut self.clock);
    }

    fn send(&mut self, function: u8, payload: &[u8]) {
        let addr = self.ctl.model().read(|m| m.address);
        let raw = frame::encode(addr, function, payload);
        self.board.push_rx(&raw);
    }

    fn command_relay(&mut self, on: bool) {
        let value: u16 = if on { 0xFF00 } else { 0x0000 };
        let [hi, lo] = value.to_be_bytes();
        self.send(FN_WRITE_SINGLE_COIL, &[0, 0, hi, lo]);
    }
}

struct SteadyProbe(u32);

impl PressureProbe for SteadyProbe {
    fn read_pa(&mut self) -> Result<u32, SensorError> {
        Ok(self.0)
    }
    fn reinit(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

fn fill_pressure(channel: &PressureChannel, pa: u32) {
    let mut probe = SteadyProbe(pa);
    for _ in 0..10 {
        channel.sample_once(&mut probe);
    }
}

#[test]
fn open_safety_chain_blocks_the_relay() {
    let mut rig = Rig::new(DeviceConfig::default());
    rig.board.safety_level = false;
    rig.step_ms(0);
    assert_eq!(rig.board.indicator_ok, Some(false));

    rig.command_relay(true);
    rig.step_ms(1);
    assert!(!rig.board.relay);
    assert_eq!(rig.board.relay_toggles, 0);
    assert!(rig.ctl.model().read(|m| m.signal_fault));
    assert_eq!(rig.ctl.model().read(|m| m.alarms()) & 1, 1);
}

#[test]
fn safety_chain_drop_reacts_on_the_next_iteration() {
    let mut rig = Rig::new(DeviceConfig::default());
    rig.step_ms(0);
    rig.command_relay(true);
    rig.step_ms(1);
    assert!(rig.board.relay);

    // Chain opens between sensor refreshes; the loop must not sit on
    // the cached level until the 500 ms cadence comes around.
    rig.board.safety_level = false;
    rig.step_ms(1);
    assert!(!rig.board.relay);
    assert!(rig.ctl.model().read(|m| m.signal_fault));
    assert_eq!(rig.board.indicator_ok, Some(false));
}

#[test]
fn heartbeat_timeout_forces_relay_off_until_new_command() {
    let mut rig = Rig::new(DeviceConfig::default());
    rig.step_ms(0);
    rig.command_relay(true);
    rig.step_ms(1);
    assert!(rig.board.relay);

    // Master goes quiet past the 30 s budget.
    rig.step_ms(31_000);
    assert!(rig.ctl.model().read(|m| m.missing_heartbeat));
    assert!(!rig.board.relay);
    assert_eq!(rig.board.indicator_ok, Some(false));

    // A late heartbeat restores the interlock but not the relay.
    rig.send(FN_HEARTBEAT, &[]);
    rig.step_ms(1);
    assert!(!rig.ctl.model().read(|m| m.missing_heartbeat));
    assert!(!rig.board.relay);

    // A fresh command is accepted again.
    rig.command_relay(true);
    rig.step_ms(1);
    assert!(rig.board.relay);
}

#[test]
fn feedback_mismatch_retries_then_latches_the_alarm() {
    let mut cfg = DeviceConfig::default();
    cfg.feedback_enabled = true;
    cfg.feedback_direction = true; // expects the contact to close
    cfg.output_attempts = 2;
    let mut rig = Rig::new(cfg);
    rig.board.signal_level = false; // contact never closes
    rig.step_ms(0);

    rig.command_relay(true);
    rig.step_ms(1);
    assert!(rig.board.relay);

    // First check fails: de-energise and schedule a retry.
    rig.step_ms(4000);
    assert!(!rig.board.relay);
    assert_eq!(rig.board.warnings, vec![3]);

    // Retry re-energises and re-arms the check.
    rig.step_ms(4000);
    assert!(rig.board.relay);

    // Second failure exhausts the budget.
    rig.step_ms(4000);
    assert!(!rig.board.relay);
    assert_eq!(rig.ctl.model().read(|m| m.alarms()) & 0b100, 0b100);

    // No further retries without a new command.
    rig.step_ms(10_000);
    assert!(!rig.board.relay);
}

#[test]
fn feedback_confirmation_settles_on() {
    let mut cfg = DeviceConfig::default();
    cfg.feedback_enabled = true;
    cfg.feedback_direction = true;
    let mut rig = Rig::new(cfg);
    rig.board.signal_level = false;
    rig.step_ms(0);

    rig.command_relay(true);
    rig.step_ms(1);
    assert!(rig.board.relay);

    // Contact closes one iteration before the check fires; the check
    // must see the live level, not one cached at the sensor cadence.
    rig.step_ms(3999);
    assert!(rig.board.relay);
    rig.board.signal_level = true;
    rig.step_ms(1);
    assert!(rig.board.relay);
    assert!(rig.board.signal_lamp);
    assert_eq!(rig.ctl.model().read(|m| m.alarms()) & 0b100, 0);
}

#[test]
fn pressure_mode_tracks_sensor_and_faults_out_of_window() {
    let mut cfg = DeviceConfig::default();
    cfg.device_class = 0x0101; // pressure mode
    let mut rig = Rig::new(cfg);
    fill_pressure(&rig.pressure, 70_000); // 700 mbar, inside 400..950
    rig.step_ms(0);
    assert_eq!(rig.ctl.model().read(|m| m.last_pressure_pa), -30_000);

    rig.command_relay(true);
    rig.step_ms(1);
    assert!(rig.board.relay);

    // Pressure collapses below the minimum threshold.
    fill_pressure(&rig.pressure, 20_000); // 200 mbar
    rig.step_ms(500);
    assert!(!rig.board.relay);
    assert!(rig.ctl.model().read(|m| m.pressure_fault));
    assert_eq!(rig.ctl.model().read(|m| m.alarms()) & 0b10, 0b10);
}
