//! Bus-level tests: frames in through the mock link, responses out,
//! side effects observed on the model and the mock board.

use std::sync::Arc;

use fieldnode::adapters::sim::{MemStorage, SimClock};
use fieldnode::config::DeviceConfig;
use fieldnode::controller::{self, Controller, REG_CLASS, REG_MIN_PRESSURE};
use fieldnode::modbus::frame::{
    self, FN_CONFIG_ADDRESS, FN_HEARTBEAT, FN_NETWORK_INITIALIZATION, FN_RANDOM_SERIAL_NUMBER,
    FN_READ_HOLDING_REGISTERS, FN_SET_DEVICE_TIME, FN_WRITE_SINGLE_COIL, FN_WRITE_SINGLE_REGISTER,
};
use fieldnode::sensors::{ClimateChannel, PressureChannel};

use crate::mock_hw::MockBoard;

struct Rig {
    ctl: Controller,
    board: MockBoard,
    storage: MemStorage,
    clock: SimClock,
}

impl Rig {
    fn new(cfg: DeviceConfig) -> Self {
        let clock = SimClock::new();
        Self {
            ctl: Controller::new(
                &cfg,
                Arc::new(PressureChannel::new()),
                Arc::new(ClimateChannel::new()),
                0,
            ),
            board: MockBoard::new(),
            storage: MemStorage::new(),
            clock,
        }
    }

    fn step(&mut self) {
        self.ctl
            .run_once(&mut self.board, &mut self.storage, &mut self.clock);
        self.clock.advance(1);
    }

    /// Send one frame and return whatever came back on the wire.
    fn exchange(&mut self, function: u8, payload: &[u8]) -> Option<Vec<u8>> {
        let addr = self.ctl.model().read(|m| m.address);
        let raw = frame::encode(addr, function, payload);
        self.board.push_rx(&raw);
        self.step();
        self.board.pop_tx()
    }
}

fn default_rig() -> Rig {
    let mut rig = Rig::new(DeviceConfig::default());
    rig.step(); // first input refresh
    rig
}

#[test]
fn valid_request_gets_exactly_one_response() {
    let mut rig = default_rig();
    let resp = rig
        .exchange(FN_READ_HOLDING_REGISTERS, &[0, 0, 0, 5])
        .expect("one response");
    let f = frame::decode(&resp).unwrap();
    assert_eq!(f.function, FN_READ_HOLDING_REGISTERS);
    assert_eq!(f.payload[0], 10); // byte count
    assert!(rig.board.pop_tx().is_none());
}

#[test]
fn corrupted_frame_gets_no_response() {
    let mut rig = default_rig();
    let mut raw = frame::encode(1, FN_READ_HOLDING_REGISTERS, &[0, 0, 0, 1]).to_vec();
    raw[3] ^= 0x40;
    rig.board.push_rx(&raw);
    rig.step();
    assert!(rig.board.pop_tx().is_none());
}

#[test]
fn foreign_address_gets_no_response() {
    let mut rig = default_rig();
    let raw = frame::encode(77, FN_READ_HOLDING_REGISTERS, &[0, 0, 0, 1]);
    rig.board.push_rx(&raw);
    rig.step();
    assert!(rig.board.pop_tx().is_none());
}

#[test]
fn class_write_round_trips_and_rejects_junk() {
    let mut rig = default_rig();
    let resp = rig
        .exchange(FN_WRITE_SINGLE_REGISTER, &[0, REG_CLASS as u8, 0x00, 0x02])
        .unwrap();
    assert_eq!(frame::decode(&resp).unwrap().function, FN_WRITE_SINGLE_REGISTER);
    assert_eq!(rig.ctl.model().read(|m| m.device_class), 0x0102);

    let resp = rig
        .exchange(FN_WRITE_SINGLE_REGISTER, &[0, REG_CLASS as u8, 0x00, 0x72])
        .unwrap();
    let f = frame::decode(&resp).unwrap();
    assert_eq!(f.function, FN_WRITE_SINGLE_REGISTER | 0x80);
    assert_eq!(f.payload, &[3]); // illegal data value
    assert_eq!(rig.ctl.model().read(|m| m.device_class), 0x0102);
}

#[test]
fn threshold_write_validated_against_envelope() {
    let mut rig = default_rig();
    let resp = rig
        .exchange(FN_WRITE_SINGLE_REGISTER, &[0, REG_MIN_PRESSURE as u8, 0, 200])
        .unwrap();
    assert_eq!(
        frame::decode(&resp).unwrap().function,
        FN_WRITE_SINGLE_REGISTER | 0x80
    );
    assert_eq!(rig.ctl.model().read(|m| m.minimum_pressure_mbar), 400);

    // 0x01F4 = 500 mbar, inside the envelope.
    let resp = rig
        .exchange(FN_WRITE_SINGLE_REGISTER, &[0, REG_MIN_PRESSURE as u8, 0x01, 0xF4])
        .unwrap();
    assert_eq!(
        frame::decode(&resp).unwrap().function,
        FN_WRITE_SINGLE_REGISTER
    );
    assert_eq!(rig.ctl.model().read(|m| m.minimum_pressure_mbar), 500);
}

#[test]
fn config_write_is_persisted_and_reloadable() {
    let mut rig = default_rig();
    rig.exchange(FN_WRITE_SINGLE_REGISTER, &[0, REG_MIN_PRESSURE as u8, 0x01, 0xF4])
        .unwrap();
    let reloaded = controller::load_config(&mut rig.storage);
    assert_eq!(reloaded.minimum_pressure_mbar, 500);
}

#[test]
fn config_address_reassigns_and_persists() {
    let mut rig = default_rig();
    let resp = rig.exchange(FN_CONFIG_ADDRESS, &[42]).unwrap();
    let f = frame::decode(&resp).unwrap();
    assert_eq!(f.address, 1); // acknowledged on the old address
    assert_eq!(f.function, FN_CONFIG_ADDRESS);
    assert_eq!(rig.ctl.model().read(|m| m.address), 42);
    assert_eq!(controller::load_config(&mut rig.storage).address, 42);

    // The device now only answers on its new address.
    let raw = frame::encode(1, FN_READ_HOLDING_REGISTERS, &[0, 0, 0, 1]);
    rig.board.push_rx(&raw);
    rig.step();
    assert!(rig.board.pop_tx().is_none());
}

#[test]
fn config_address_with_wrong_serial_stays_silent() {
    let mut rig = default_rig();
    // Default serial is 2; offer a mismatching one.
    assert!(rig.exchange(FN_CONFIG_ADDRESS, &[42, 0, 0, 0, 9]).is_none());
    assert_eq!(rig.ctl.model().read(|m| m.address), 1);

    // Exact match applies.
    assert!(rig.exchange(FN_CONFIG_ADDRESS, &[42, 0, 0, 0, 2]).is_some());
    assert_eq!(rig.ctl.model().read(|m| m.address), 42);
}

#[test]
fn network_initialization_drops_the_relay() {
    let mut rig = default_rig();
    rig.exchange(FN_WRITE_SINGLE_COIL, &[0, 0, 0xFF, 0x00]).unwrap();
    assert!(rig.board.relay);

    rig.exchange(FN_NETWORK_INITIALIZATION, &[]).unwrap();
    assert!(!rig.board.relay);
}

#[test]
fn heartbeat_function_clears_missing_flag() {
    let mut rig = default_rig();
    rig.ctl.model().update(|m| m.missing_heartbeat = true);
    rig.exchange(FN_HEARTBEAT, &[]).unwrap();
    assert!(!rig.ctl.model().read(|m| m.missing_heartbeat));
}

#[test]
fn set_device_time_reaches_the_clock() {
    let mut rig = default_rig();
    let ts = 1_756_000_000u64;
    rig.exchange(FN_SET_DEVICE_TIME, &ts.to_be_bytes()).unwrap();
    assert_eq!(rig.clock.wall_clock(), Some(ts));
}

#[test]
fn random_serial_broadcast_is_raw_serial_plus_crc() {
    let mut rig = default_rig();
    let out = rig
        .exchange(FN_RANDOM_SERIAL_NUMBER, &[0, 1])
        .expect("raw broadcast on the wire");
    assert_eq!(out.len(), 6);
    assert_eq!(u32::from_be_bytes([out[0], out[1], out[2], out[3]]), 2);
    assert!(fieldnode::modbus::crc::check(&out));
    // Nothing else follows; the window is slept out in full.
    assert!(rig.board.pop_tx().is_none());
}
