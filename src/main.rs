//! FieldNode firmware entry point (ESP32-C3).
//!
//! Wiring order: NVS first (configuration), then the RS-485 UART, the
//! GPIO bank and the I2C sensor bus; the sensor sampler runs on its
//! own thread while the management loop owns the main task.

use std::cell::RefCell;
use std::sync::Arc;

use anyhow::{Context, Result};
use embedded_hal_bus::i2c::RefCellDevice;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyIOPin, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info};

use fieldnode::adapters::gpio::GpioBank;
use fieldnode::adapters::nvs::NvsStorage;
use fieldnode::adapters::rs485::Rs485Link;
use fieldnode::adapters::time::EspClock;
use fieldnode::config::{DeviceMode, SENSOR_SAMPLE_PERIOD_MS};
use fieldnode::controller::{self, Controller};
use fieldnode::drivers::{Ms5837, Sht4x};
use fieldnode::ports::{ActuatorPort, ClockPort, InputPort, LinkPort};
use fieldnode::sensors::{ClimateChannel, PressureChannel};

/// Everything the management loop touches per iteration, as one object
/// so the controller can take `impl LinkPort + InputPort + ActuatorPort`.
struct Board<'d> {
    link: Rs485Link<'d>,
    gpio: GpioBank<'d>,
}

impl LinkPort for Board<'_> {
    fn receive(&mut self, buf: &mut [u8]) -> fieldnode::Result<usize> {
        self.link.receive(buf)
    }
    fn transmit(&mut self, frame: &[u8]) -> fieldnode::Result<()> {
        self.link.transmit(frame)
    }
}

impl InputPort for Board<'_> {
    fn safety_level(&mut self) -> bool {
        self.gpio.safety_level()
    }
    fn signal_level(&mut self) -> bool {
        self.gpio.signal_level()
    }
}

impl ActuatorPort for Board<'_> {
    fn set_relay(&mut self, energized: bool) {
        self.gpio.set_relay(energized);
    }
    fn set_signal(&mut self, on: bool) {
        self.gpio.set_signal(on);
    }
    fn indicate_ok(&mut self, ok: bool) {
        self.gpio.indicate_ok(ok);
    }
    fn pulse_warning(&mut self, count: u8) {
        self.gpio.pulse_warning(count);
    }
}

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("FieldNode v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let pins = peripherals.pins;

    // Configuration from NVS, defaults on first boot.
    let partition = EspDefaultNvsPartition::take()?;
    let mut storage = NvsStorage::new(partition)?;
    let cfg = controller::load_config(&mut storage);
    let mode = DeviceMode::from_class(cfg.device_class).unwrap_or(DeviceMode::RelayFeedback);
    info!("address {}, mode {:?}", cfg.address, mode);

    // RS-485 on UART1; the transceiver's DE pin hangs off RTS and the
    // peripheral drives it in half-duplex mode.
    let uart = UartDriver::new(
        peripherals.uart1,
        pins.gpio21,
        pins.gpio20,
        None::<AnyIOPin>,
        Some(pins.gpio10),
        &UartConfig::new().baudrate(Hertz(9600)),
    )?;
    // SAFETY: the driver for UART1 is installed; switching the mode is
    // the documented way to enable automatic DE turnaround.
    unsafe {
        esp_idf_svc::sys::uart_set_mode(
            1,
            esp_idf_svc::sys::uart_mode_t_UART_MODE_RS485_HALF_DUPLEX,
        );
    }
    let link = Rs485Link::new(uart);

    let gpio = GpioBank::new(
        PinDriver::input(pins.gpio2.downgrade_input())?,
        PinDriver::input(pins.gpio3.downgrade_input())?,
        PinDriver::output(pins.gpio5.downgrade_output())?,
        PinDriver::output(pins.gpio6.downgrade_output())?,
        PinDriver::output(pins.gpio7.downgrade_output())?,
    );
    let mut board = Board { link, gpio };

    let pressure = Arc::new(PressureChannel::new());
    let climate = Arc::new(ClimateChannel::new());

    let mut clock = EspClock::new();
    let mut ctl = Controller::new(&cfg, pressure.clone(), climate.clone(), clock.now_ms());

    let i2c = (mode.samples_pressure() || mode.samples_climate())
        .then(|| {
            I2cDriver::new(
                peripherals.i2c0,
                pins.gpio8,
                pins.gpio9,
                &I2cConfig::new().baudrate(Hertz(100_000)),
            )
        })
        .transpose()?;

    std::thread::scope(|s| {
        if let Some(i2c) = i2c {
            let pressure = pressure.clone();
            let climate = climate.clone();
            s.spawn(move || sampler_task(i2c, mode, &pressure, &climate));
        }

        // Management loop, ~1 ms period.
        loop {
            let now = clock.now_ms();
            board.gpio.poll(now);
            ctl.run_once(&mut board, &mut storage, &mut clock);
            FreeRtos::delay_ms(1);
        }
    })
}

fn sampler_task(
    i2c: I2cDriver<'_>,
    mode: DeviceMode,
    pressure: &PressureChannel,
    climate: &ClimateChannel,
) {
    let bus = RefCell::new(i2c);

    let mut pressure_probe = if mode.samples_pressure() {
        match Ms5837::new(RefCellDevice::new(&bus), FreeRtos) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("pressure probe init failed: {e}");
                None
            }
        }
    } else {
        None
    };
    let mut climate_probe = mode
        .samples_climate()
        .then(|| Sht4x::new(RefCellDevice::new(&bus), FreeRtos));

    loop {
        if let Some(p) = pressure_probe.as_mut() {
            pressure.sample_once(p);
        }
        if let Some(p) = climate_probe.as_mut() {
            climate.sample_once(p);
        }
        FreeRtos::delay_ms(SENSOR_SAMPLE_PERIOD_MS as u32);
    }
}
