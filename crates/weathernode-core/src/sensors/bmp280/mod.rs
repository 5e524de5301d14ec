//! BMP280 barometric pressure and temperature sensor
//!
//! In normal mode the sensor converts continuously and [`Bmp280::measure`]
//! just reads the latest result. In sleep or forced mode `measure` starts a
//! single forced conversion and an alarm collects it, after which the sensor
//! is back in sleep mode.
//!
//! Compensation into physical units is lazy: the raw ADC codes are converted
//! the first time [`Bmp280::temperature`] or [`Bmp280::pressure`] is called
//! after a new read.

pub mod calibration;
pub mod registers;

use embassy_time::Duration;
use embedded_hal::i2c::I2c;
use log::{debug, error, trace, warn};

pub use calibration::Calibration;
pub use registers::{Bmp280Address, Filter, Mode, Oversampling, Standby};

use self::registers::*;
use super::Sensor;
use crate::config::Bmp280Config;
use crate::error::{Readiness, SensorError};
use crate::scheduler::{AlarmHandle, Rearm, ScheduleError, Scheduler};

const SENSOR: &str = "BMP280";

/// Uncompensated 20-bit ADC codes from the last data read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub temperature: i32,
    pub pressure: i32,
}

impl RawSample {
    /// Decode `press_msb..temp_xlsb`. Each channel is msb, lsb and the top
    /// nibble of xlsb.
    pub fn from_bytes(data: &[u8; DATA_LEN]) -> Self {
        let code = |b: &[u8]| (b[0] as i32) << 12 | (b[1] as i32) << 4 | (b[2] as i32) >> 4;
        Self {
            pressure: code(&data[0..3]),
            temperature: code(&data[3..6]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Compensated {
    /// Hundredths of °C
    temperature: i32,
    /// Pa, Q24.8
    pressure: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sleep,
    /// Forced mode requested, no conversion being collected
    Forced,
    /// A forced conversion is running and an alarm will collect it
    Measuring { alarm: AlarmHandle },
    Normal,
}

impl State {
    fn from_mode(mode: Mode) -> Self {
        match mode {
            Mode::Sleep => Self::Sleep,
            Mode::Forced => Self::Forced,
            Mode::Normal => Self::Normal,
        }
    }
}

/// Non-blocking BMP280 driver.
pub struct Bmp280<I, S> {
    i2c: I,
    scheduler: S,
    address: u8,
    chip_id: u8,
    calibration: Calibration,
    state: State,
    /// Register settings last read or written. `mode` is tracked by `state`.
    config: Bmp280Config,
    raw: RawSample,
    compensated: Option<Compensated>,
    has_data: bool,
}

impl<I, S> Bmp280<I, S>
where
    I: I2c,
    S: Scheduler,
{
    /// Read the chip id, the calibration block and the current settings.
    ///
    /// A chip id other than `0x58` is logged but not treated as an error, so
    /// compatible parts keep working. The driver starts from whatever mode
    /// and standby time the sensor is already running with.
    pub fn new(
        mut i2c: I,
        scheduler: S,
        address: Bmp280Address,
    ) -> Result<Self, SensorError<I::Error>> {
        let address = address.value();

        let mut id = [0u8; 1];
        i2c.write_read(address, &[REG_CHIP_ID], &mut id)
            .map_err(Self::bus_error("read chip id"))?;
        if id[0] != CHIP_ID {
            error!(
                "BMP280: ID mismatch - read {:#04x}, expected {:#04x}",
                id[0], CHIP_ID
            );
        }

        let mut block = [0u8; CALIBRATION_LEN];
        i2c.write_read(address, &[REG_CALIBRATION], &mut block)
            .map_err(Self::bus_error("read calibration"))?;
        let calibration = Calibration::from_bytes(&block);
        trace!("BMP280: calibration {:?}", calibration);

        // ctrl_meas and config are adjacent
        let mut settings = [0u8; 2];
        i2c.write_read(address, &[REG_CTRL_MEAS], &mut settings)
            .map_err(Self::bus_error("read settings"))?;
        let config = Bmp280Config::from_registers(settings[0], settings[1]);
        debug!("BMP280: found {:?}", config);

        Ok(Self {
            i2c,
            scheduler,
            address,
            chip_id: id[0],
            calibration,
            state: State::from_mode(config.mode),
            config,
            raw: RawSample::default(),
            compensated: None,
            has_data: false,
        })
    }

    pub fn release(self) -> (I, S) {
        (self.i2c, self.scheduler)
    }

    fn schedule_error(_: ScheduleError) -> SensorError<I::Error> {
        SensorError::Schedule { sensor: SENSOR }
    }

    fn bus_error(operation: &'static str) -> impl FnOnce(I::Error) -> SensorError<I::Error> {
        move |error| SensorError::I2c {
            sensor: SENSOR,
            operation,
            error,
        }
    }

    fn read_register(&mut self, register: u8) -> Result<u8, I::Error> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(self.address, &[register], &mut buf)?;
        Ok(buf[0])
    }

    /// Replace the bits of `register` outside `keep` with `bits`.
    fn modify_register(
        &mut self,
        register: u8,
        keep: u8,
        bits: u8,
    ) -> Result<(), SensorError<I::Error>> {
        let current = self
            .read_register(register)
            .map_err(Self::bus_error("read register"))?;
        let value = (current & keep) | bits;
        trace!("BMP280: register {:#04x} {:#04x} -> {:#04x}", register, current, value);
        self.i2c
            .write(self.address, &[register, value])
            .map_err(Self::bus_error("write register"))
    }

    /// Apply the station defaults: temperature ×2, pressure ×16, filter ×4,
    /// 1/16 s standby, normal mode.
    pub fn init(&mut self) -> Result<(), SensorError<I::Error>> {
        self.configure(&Bmp280Config::default())
    }

    pub fn configure(&mut self, config: &Bmp280Config) -> Result<(), SensorError<I::Error>> {
        debug!("BMP280: applying {:?}", config);
        self.set_oversampling(config.temperature_oversampling, config.pressure_oversampling)?;
        self.set_filtering(config.filter)?;
        self.set_standby(config.standby)?;
        self.set_mode(config.mode)
    }

    pub fn set_oversampling(
        &mut self,
        temperature: Oversampling,
        pressure: Oversampling,
    ) -> Result<(), SensorError<I::Error>> {
        self.modify_register(
            REG_CTRL_MEAS,
            CTRL_MEAS_KEEP_MODE,
            Oversampling::ctrl_meas_bits(temperature, pressure),
        )?;
        self.config.temperature_oversampling = temperature;
        self.config.pressure_oversampling = pressure;
        Ok(())
    }

    pub fn set_filtering(&mut self, coefficient: Filter) -> Result<(), SensorError<I::Error>> {
        self.modify_register(REG_CONFIG, CONFIG_KEEP_STANDBY, coefficient.to_register())?;
        self.config.filter = coefficient;
        Ok(())
    }

    /// Set the normal-mode standby time. It also sets how long a forced
    /// conversion is given before it is collected.
    pub fn set_standby(&mut self, time: Standby) -> Result<(), SensorError<I::Error>> {
        self.modify_register(REG_CONFIG, CONFIG_KEEP_FILTER, time.to_register())?;
        self.config.standby = time;
        Ok(())
    }

    /// Switch power mode. A forced conversion still waiting to be collected
    /// is abandoned.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), SensorError<I::Error>> {
        self.modify_register(REG_CTRL_MEAS, CTRL_MEAS_KEEP_OVERSAMPLING, mode.to_register())?;

        if let State::Measuring { alarm } = self.state {
            if !self.scheduler.cancel(alarm) {
                debug!("BMP280: alarm {} already fired", alarm.id());
            }
        }
        self.state = State::from_mode(mode);
        Ok(())
    }

    /// Get a fresh measurement.
    ///
    /// Normal mode reads the latest conversion and returns `Ready`. Otherwise
    /// a forced conversion is started and `Busy` returned; the result shows up
    /// through [`has_data`](Self::has_data) once the alarm has collected it.
    pub fn measure(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        match self.state {
            State::Measuring { .. } => {
                trace!("BMP280: conversion already pending");
                Ok(Readiness::Busy)
            }
            State::Normal => {
                self.read_raw_data()
                    .map_err(Self::bus_error("read data"))?;
                Ok(Readiness::Ready)
            }
            State::Sleep | State::Forced => {
                self.set_mode(Mode::Forced)?;
                let alarm = self
                    .scheduler
                    .schedule_after(self.config.standby.measurement_delay())
                    .map_err(Self::schedule_error)?;
                trace!("BMP280: forced conversion, alarm {}", alarm.id());
                self.state = State::Measuring { alarm };
                Ok(Readiness::Busy)
            }
        }
    }

    /// Whether a conversion is running, from the status register.
    pub fn busy(&mut self) -> Result<bool, SensorError<I::Error>> {
        let status = self
            .read_register(REG_STATUS)
            .map_err(Self::bus_error("read status"))?;
        Ok(status & STATUS_MEASURING != 0)
    }

    /// Alarm callback for this sensor.
    pub fn on_alarm(&mut self) -> Rearm {
        if !matches!(self.state, State::Measuring { .. }) {
            return Rearm::Done;
        }
        let retry = self.config.standby.measurement_delay();

        match self.read_register(REG_STATUS) {
            Ok(status) if status & STATUS_MEASURING != 0 => {
                trace!("BMP280: conversion still running");
                return Rearm::After(retry);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("BMP280: status read failed, retrying: {:?}", e);
                return Rearm::After(retry);
            }
        }

        if let Err(e) = self.read_raw_data() {
            warn!("BMP280: data read failed, retrying: {:?}", e);
            return Rearm::After(retry);
        }

        // Forced mode drops back to sleep after one conversion
        self.state = State::Sleep;
        Rearm::Done
    }

    fn read_raw_data(&mut self) -> Result<(), I::Error> {
        let mut data = [0u8; DATA_LEN];
        self.i2c.write_read(self.address, &[REG_DATA], &mut data)?;
        self.raw = RawSample::from_bytes(&data);
        self.compensated = None;
        self.has_data = true;
        Ok(())
    }
}

impl<I, S> Bmp280<I, S> {
    fn compensated(&mut self) -> Compensated {
        if let Some(compensated) = self.compensated {
            return compensated;
        }

        let (temperature, t_fine) = self.calibration.compensate_temperature(self.raw.temperature);
        let pressure = self.calibration.compensate_pressure(self.raw.pressure, t_fine);
        if pressure == 0 {
            warn!("BMP280: pressure compensation divisor is zero");
        }
        trace!("BMP280: t_fine = {}, temperature = {}, pressure = {}", t_fine, temperature, pressure);

        let compensated = Compensated {
            temperature,
            pressure,
        };
        self.compensated = Some(compensated);
        compensated
    }

    /// Temperature in °C
    pub fn temperature(&mut self) -> f32 {
        self.compensated().temperature as f32 / 100.0
    }

    /// Pressure in mbar. Consumes the data-ready flag.
    pub fn pressure(&mut self) -> f32 {
        let pressure = self.compensated().pressure as f32 / 256.0 / 100.0;
        self.has_data = false;
        pressure
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn chip_id(&self) -> u8 {
        self.chip_id
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn raw_temperature(&self) -> i32 {
        self.raw.temperature
    }

    pub fn raw_pressure(&self) -> i32 {
        self.raw.pressure
    }

    /// Power mode last written. A pending forced conversion reports `Forced`.
    pub fn mode(&self) -> Mode {
        match self.state {
            State::Sleep => Mode::Sleep,
            State::Forced | State::Measuring { .. } => Mode::Forced,
            State::Normal => Mode::Normal,
        }
    }

    pub fn standby(&self) -> Standby {
        self.config.standby
    }

    /// Settings last read from or written to the sensor.
    pub fn config(&self) -> Bmp280Config {
        Bmp280Config {
            mode: self.mode(),
            ..self.config
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Measuring { .. })
    }

    /// Delay between a forced conversion start and its collection.
    pub fn measurement_delay(&self) -> Duration {
        self.config.standby.measurement_delay()
    }
}

impl<I, S> Sensor for Bmp280<I, S>
where
    I: I2c,
    S: Scheduler,
{
    type Error = I::Error;

    fn measure(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        Bmp280::measure(self)
    }

    fn has_data(&self) -> bool {
        Bmp280::has_data(self)
    }

    fn on_alarm(&mut self) -> Rearm {
        Bmp280::on_alarm(self)
    }
}
