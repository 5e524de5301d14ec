//! AHT20 capacitive humidity and temperature sensor
//!
//! The sensor needs 40 ms after power-on before it accepts commands, 10 ms
//! after the calibration command and 20 ms after a soft reset. A measurement
//! takes about 80 ms, after which the status byte's busy bit clears and a
//! 7-byte frame (status, 5 data bytes, CRC) can be read.
//!
//! None of these waits block. The driver tracks a busy window during which it
//! answers [`Readiness::Busy`] without touching the bus, and finishes
//! measurements from an alarm callback:
//!
//! ```text
//!  measure() ── status 0x71 ──► calibrated? ── no ──► init 0xBE 0x08 0x00, Busy
//!                                    │
//!                                   yes
//!                                    ▼
//!                    trigger 0xAC 0x33 0x00, arm alarm +80 ms, Ready
//!
//!  on_alarm() ── read status ──► busy? ── yes ──► Rearm::After(5 ms)
//!                                  │
//!                                  no
//!                                  ▼
//!                  read 7 bytes ──► CRC ok? ── no ──► Rearm::After(1 ms)
//!                                     │
//!                                    yes
//!                                     ▼
//!                          commit frame, Rearm::Done
//! ```

use embassy_time::{Duration, Instant};
use embedded_hal::i2c::I2c;
use log::{debug, error, trace, warn};

use super::Sensor;
use crate::crc::crc8;
use crate::error::{Readiness, SensorError};
use crate::scheduler::{AlarmHandle, Rearm, ScheduleError, Scheduler};

// =============================================================================
// Bus protocol
// =============================================================================

/// AHT20 I2C address. The sensor has no address select pin.
pub const AHT20_ADDRESS: u8 = 0x38;

const CMD_STATUS: [u8; 1] = [0x71];
const CMD_INIT: [u8; 3] = [0xBE, 0x08, 0x00];
const CMD_MEASURE: [u8; 3] = [0xAC, 0x33, 0x00];
const CMD_RESET: [u8; 1] = [0xBA];

/// Status byte, 5 data bytes, CRC byte
pub const FRAME_LEN: usize = 7;

const SENSOR: &str = "AHT20";

// =============================================================================
// Timing
// =============================================================================

/// Time from power-on until the sensor accepts commands
pub const POWER_ON_DELAY: Duration = Duration::from_millis(40);
/// Settling time after the calibration command
pub const INIT_DELAY: Duration = Duration::from_millis(10);
/// Time between triggering a measurement and the first status check
pub const MEASUREMENT_DELAY: Duration = Duration::from_millis(80);
/// Status poll cadence while the sensor reports busy
pub const BUSY_RETRY_DELAY: Duration = Duration::from_millis(5);
/// Retry delay after a frame failed its CRC check
pub const CRC_RETRY_DELAY: Duration = Duration::from_millis(1);
/// Recovery time after a soft reset
pub const RESET_DELAY: Duration = Duration::from_millis(20);

const RAW_FULL_SCALE: f32 = (1u32 << 20) as f32;

// =============================================================================
// Frame types
// =============================================================================

/// The sensor's status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusByte(pub u8);

impl StatusByte {
    const BUSY: u8 = 1 << 7;
    const CALIBRATED: u8 = 1 << 3;

    /// A measurement is in progress
    pub const fn is_busy(self) -> bool {
        self.0 & Self::BUSY != 0
    }

    /// Calibration coefficients are loaded
    pub const fn is_calibrated(self) -> bool {
        self.0 & Self::CALIBRATED != 0
    }
}

/// One complete measurement as read from the sensor.
///
/// Humidity and temperature are 20-bit values packed across bytes 1..6, with
/// byte 3 split between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementFrame(pub [u8; FRAME_LEN]);

impl MeasurementFrame {
    pub const fn status(&self) -> StatusByte {
        StatusByte(self.0[0])
    }

    pub const fn raw_humidity(&self) -> u32 {
        let b = &self.0;
        (b[1] as u32) << 12 | (b[2] as u32) << 4 | (b[3] as u32) >> 4
    }

    pub const fn raw_temperature(&self) -> u32 {
        let b = &self.0;
        ((b[3] & 0x0F) as u32) << 16 | (b[4] as u32) << 8 | b[5] as u32
    }

    /// Checksum sent by the sensor
    pub const fn crc(&self) -> u8 {
        self.0[6]
    }

    /// Checksum computed over the status and data bytes
    pub fn expected_crc(&self) -> u8 {
        crc8(&self.0[..FRAME_LEN - 1])
    }

    pub fn is_valid(&self) -> bool {
        self.crc() == self.expected_crc()
    }
}

// =============================================================================
// Driver
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing in flight
    Idle,
    /// The calibration command waits for the busy window to close
    AwaitingInit { alarm: AlarmHandle },
    /// A measurement was triggered and its result has not been committed yet
    Measuring { alarm: AlarmHandle },
}

/// Non-blocking AHT20 driver.
///
/// The committed [`MeasurementFrame`] is only ever replaced as a whole, from
/// the alarm callback, after its CRC has been checked. Status polls update a
/// separate status byte, so the frame seen by the accessors is never a mix of
/// two reads.
pub struct Aht20<I, S> {
    i2c: I,
    scheduler: S,
    state: State,
    status: StatusByte,
    frame: MeasurementFrame,
    busy_until: Instant,
}

impl<I, S> Aht20<I, S>
where
    I: I2c,
    S: Scheduler,
{
    /// Create a driver for a sensor that was just powered on.
    ///
    /// The power-on busy window starts now; no bus traffic happens here.
    pub fn new(i2c: I, scheduler: S) -> Self {
        let busy_until = scheduler.now() + POWER_ON_DELAY;
        Self {
            i2c,
            scheduler,
            state: State::Idle,
            status: StatusByte::default(),
            frame: MeasurementFrame::default(),
            busy_until,
        }
    }

    /// Give back the bus and the scheduler.
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

    fn in_busy_window(&self) -> bool {
        self.scheduler.now() < self.busy_until
    }

    fn read_status(&mut self) -> Result<StatusByte, I::Error> {
        let mut buf = [0u8; 1];
        self.i2c.read(AHT20_ADDRESS, &mut buf)?;
        Ok(StatusByte(buf[0]))
    }

    /// Send the calibration command.
    ///
    /// Inside the busy window the write is deferred to an alarm at the
    /// window's end instead of waiting. Returns `Busy` if another operation
    /// is pending.
    pub fn init(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        if self.state != State::Idle {
            return Ok(Readiness::Busy);
        }

        if self.in_busy_window() {
            let alarm = self
                .scheduler
                .schedule_at(self.busy_until)
                .map_err(Self::schedule_error)?;
            self.state = State::AwaitingInit { alarm };
            self.busy_until += INIT_DELAY;
            debug!("AHT20: calibration deferred until the sensor settles");
            return Ok(Readiness::Ready);
        }

        self.i2c
            .write(AHT20_ADDRESS, &CMD_INIT)
            .map_err(Self::bus_error("write calibration command"))?;
        self.busy_until = self.scheduler.now() + INIT_DELAY;
        Ok(Readiness::Ready)
    }

    /// Refresh the status byte.
    ///
    /// While a measurement is in flight the sensor already returns its status
    /// on a plain read, so the status command is only sent when idle.
    pub fn update_status(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        if self.in_busy_window() {
            return Ok(Readiness::Busy);
        }

        if self.state == State::Idle {
            self.i2c
                .write(AHT20_ADDRESS, &CMD_STATUS)
                .map_err(Self::bus_error("write status command"))?;
        }

        self.status = self
            .read_status()
            .map_err(Self::bus_error("read status"))?;
        trace!("AHT20: status {:#04x}", self.status.0);
        Ok(Readiness::Ready)
    }

    /// Trigger a measurement.
    ///
    /// `Ready` means the measurement was started and an alarm will collect
    /// it. An uncalibrated sensor gets the calibration command instead and
    /// reports `Busy`.
    pub fn measure(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        if self.in_busy_window() || self.state != State::Idle {
            return Ok(Readiness::Busy);
        }

        if self.update_status()?.is_busy() {
            return Ok(Readiness::Busy);
        }

        if !self.status.is_calibrated() {
            debug!("AHT20: not calibrated, sending calibration command");
            let _ = self.init()?;
            return Ok(Readiness::Busy);
        }

        self.i2c
            .write(AHT20_ADDRESS, &CMD_MEASURE)
            .map_err(Self::bus_error("write measure command"))?;
        let alarm = self
            .scheduler
            .schedule_after(MEASUREMENT_DELAY)
            .map_err(Self::schedule_error)?;
        self.state = State::Measuring { alarm };
        Ok(Readiness::Ready)
    }

    /// Soft reset the sensor.
    ///
    /// Cancels any pending alarm, clears the committed frame and opens a 20 ms
    /// busy window.
    pub fn reset(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        if self.in_busy_window() {
            return Ok(Readiness::Busy);
        }

        if let State::AwaitingInit { alarm } | State::Measuring { alarm } = self.state {
            if !self.scheduler.cancel(alarm) {
                debug!("AHT20: alarm {} already fired", alarm.id());
            }
            self.state = State::Idle;
        }

        self.i2c
            .write(AHT20_ADDRESS, &CMD_RESET)
            .map_err(Self::bus_error("write reset command"))?;
        self.frame = MeasurementFrame::default();
        self.status = StatusByte::default();
        self.busy_until = self.scheduler.now() + RESET_DELAY;
        Ok(Readiness::Ready)
    }

    /// Alarm callback for this sensor.
    pub fn on_alarm(&mut self) -> Rearm {
        match self.state {
            State::Idle => Rearm::Done,
            State::AwaitingInit { .. } => self.send_deferred_init(),
            State::Measuring { .. } => self.retrieve_measurement(),
        }
    }

    fn send_deferred_init(&mut self) -> Rearm {
        self.state = State::Idle;
        if let Err(e) = self.i2c.write(AHT20_ADDRESS, &CMD_INIT) {
            error!("AHT20: deferred calibration command failed: {:?}", e);
        }
        Rearm::Done
    }

    fn retrieve_measurement(&mut self) -> Rearm {
        let status = match self.read_status() {
            Ok(status) => status,
            Err(e) => {
                warn!("AHT20: status read failed, retrying: {:?}", e);
                return Rearm::After(BUSY_RETRY_DELAY);
            }
        };
        self.status = status;
        if status.is_busy() {
            trace!("AHT20: measurement still in progress");
            return Rearm::After(BUSY_RETRY_DELAY);
        }

        let mut buf = [0u8; FRAME_LEN];
        if let Err(e) = self.i2c.read(AHT20_ADDRESS, &mut buf) {
            warn!("AHT20: measurement read failed, retrying: {:?}", e);
            return Rearm::After(BUSY_RETRY_DELAY);
        }

        let frame = MeasurementFrame(buf);
        if !frame.is_valid() {
            warn!(
                "AHT20: CRC check failed: provided {:#04x}, calculated {:#04x}",
                frame.crc(),
                frame.expected_crc()
            );
            return Rearm::After(CRC_RETRY_DELAY);
        }

        self.frame = frame;
        self.status = frame.status();
        self.state = State::Idle;
        Rearm::Done
    }
}

impl<I, S> Aht20<I, S> {
    /// A measurement or deferred command is waiting on an alarm.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Calibration bit of the last status byte read
    pub fn calibrated(&self) -> bool {
        self.status.is_calibrated()
    }

    /// Busy bit of the last status byte read
    pub fn busy(&self) -> bool {
        self.status.is_busy()
    }

    pub fn status(&self) -> StatusByte {
        self.status
    }

    /// The last committed measurement frame.
    pub fn frame(&self) -> MeasurementFrame {
        self.frame
    }

    pub fn has_data(&self) -> bool {
        self.raw_humidity() != 0 || self.raw_temperature() != 0
    }

    pub fn raw_humidity(&self) -> u32 {
        self.frame.raw_humidity()
    }

    pub fn raw_temperature(&self) -> u32 {
        self.frame.raw_temperature()
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f32 {
        self.raw_humidity() as f32 / RAW_FULL_SCALE * 100.0
    }

    /// Temperature in °C
    pub fn temperature(&self) -> f32 {
        self.raw_temperature() as f32 / RAW_FULL_SCALE * 200.0 - 50.0
    }

    /// Temperature in °F
    pub fn temperature_f(&self) -> f32 {
        self.temperature() * 1.8 + 32.0
    }
}

impl<I, S> Sensor for Aht20<I, S>
where
    I: I2c,
    S: Scheduler,
{
    type Error = I::Error;

    fn measure(&mut self) -> Result<Readiness, SensorError<I::Error>> {
        Aht20::measure(self)
    }

    fn has_data(&self) -> bool {
        Aht20::has_data(self)
    }

    fn on_alarm(&mut self) -> Rearm {
        Aht20::on_alarm(self)
    }
}
