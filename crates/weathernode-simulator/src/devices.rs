//! Simulated AHT20 and BMP280 behind one I2C bus.
//!
//! The devices model the command/register behavior the drivers depend on:
//! conversion times, busy bits, the AHT20 CRC and the BMP280 forced-mode
//! return to sleep. Readings drift slowly so successive samples differ.

use embassy_time::{Duration, Instant};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use log::trace;

use weathernode_core::crc::crc8;
use weathernode_core::sensors::aht20::AHT20_ADDRESS;

const AHT20_CONVERSION_TIME: Duration = Duration::from_millis(85);
const BMP280_CONVERSION_TIME: Duration = Duration::from_millis(6);

/// Trimming values printed in the BMP280 datasheet's worked example
const BMP280_CALIBRATION: [u8; 26] = [
    0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C, 0x00,
    0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17, 0x00, 0x00,
];
/// ADC codes that compensate to 25.08 °C and 1006.53 mbar with the
/// calibration above
const BMP280_BASE_TEMPERATURE: i32 = 519_888;
const BMP280_BASE_PRESSURE: i32 = 415_148;

trait Device {
    fn write(&mut self, bytes: &[u8]);
    fn read(&mut self, buffer: &mut [u8]);
}

/// Seconds since the simulator started, for the slow drift of the readings
fn elapsed_secs() -> f32 {
    Instant::now().as_millis() as f32 / 1000.0
}

// =============================================================================
// AHT20
// =============================================================================

struct SimAht20 {
    calibrated: bool,
    conversion_done: Option<Instant>,
    frame: [u8; 7],
}

impl SimAht20 {
    fn new() -> Self {
        Self {
            calibrated: false,
            conversion_done: None,
            frame: [0; 7],
        }
    }

    fn busy(&self) -> bool {
        self.conversion_done
            .is_some_and(|done| Instant::now() < done)
    }

    fn status(&self) -> u8 {
        let mut status = 0x10;
        if self.busy() {
            status |= 1 << 7;
        }
        if self.calibrated {
            status |= 1 << 3;
        }
        status
    }

    fn sample(&mut self) {
        let t = elapsed_secs();
        let humidity = 45.0 + 8.0 * (t / 60.0).sin();
        let temperature = 21.5 + 1.5 * (t / 90.0).cos();

        let raw_h = (humidity / 100.0 * (1u32 << 20) as f32) as u32;
        let raw_t = ((temperature + 50.0) / 200.0 * (1u32 << 20) as f32) as u32;

        self.frame[1] = (raw_h >> 12) as u8;
        self.frame[2] = (raw_h >> 4) as u8;
        self.frame[3] = ((raw_h & 0x0F) << 4) as u8 | ((raw_t >> 16) & 0x0F) as u8;
        self.frame[4] = (raw_t >> 8) as u8;
        self.frame[5] = raw_t as u8;
    }
}

impl Device for SimAht20 {
    fn write(&mut self, bytes: &[u8]) {
        match bytes {
            [0xBE, ..] => self.calibrated = true,
            [0xAC, 0x33, 0x00] => {
                self.conversion_done = Some(Instant::now() + AHT20_CONVERSION_TIME);
                self.sample();
            }
            [0xBA] => {
                self.conversion_done = None;
                self.frame = [0; 7];
            }
            _ => {}
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        self.frame[0] = self.status();
        self.frame[6] = crc8(&self.frame[..6]);
        let len = buffer.len().min(self.frame.len());
        buffer[..len].copy_from_slice(&self.frame[..len]);
    }
}

// =============================================================================
// BMP280
// =============================================================================

struct SimBmp280 {
    registers: [u8; 256],
    pointer: u8,
    conversion_done: Option<Instant>,
}

impl SimBmp280 {
    const CTRL_MEAS: usize = 0xF4;
    const STATUS: usize = 0xF3;
    const DATA: usize = 0xF7;

    fn new() -> Self {
        let mut registers = [0u8; 256];
        registers[0xD0] = 0x58;
        registers[0x88..0x88 + BMP280_CALIBRATION.len()].copy_from_slice(&BMP280_CALIBRATION);
        Self {
            registers,
            pointer: 0,
            conversion_done: None,
        }
    }

    fn convert(&mut self) {
        let t = elapsed_secs();
        let temperature = BMP280_BASE_TEMPERATURE + (400.0 * (t / 75.0).sin()) as i32;
        let pressure = BMP280_BASE_PRESSURE + (900.0 * (t / 120.0).cos()) as i32;

        for (offset, code) in [(0, pressure), (3, temperature)] {
            let base = Self::DATA + offset;
            self.registers[base] = (code >> 12) as u8;
            self.registers[base + 1] = (code >> 4) as u8;
            self.registers[base + 2] = ((code & 0x0F) << 4) as u8;
        }
    }

    /// Advance the conversion state machine to the current time.
    fn tick(&mut self) {
        let mode = self.registers[Self::CTRL_MEAS] & 0x03;

        if let Some(done) = self.conversion_done {
            if Instant::now() >= done {
                self.conversion_done = None;
                self.convert();
                if mode != 0b11 {
                    // Forced mode: back to sleep
                    self.registers[Self::CTRL_MEAS] &= 0xFC;
                }
            }
        } else if mode == 0b11 {
            self.convert();
        }

        let measuring = if self.conversion_done.is_some() { 1 << 3 } else { 0 };
        self.registers[Self::STATUS] = measuring;
    }
}

impl Device for SimBmp280 {
    fn write(&mut self, bytes: &[u8]) {
        self.tick();
        match bytes {
            [register] => self.pointer = *register,
            pairs => {
                for pair in pairs.chunks_exact(2) {
                    let (register, value) = (pair[0] as usize, pair[1]);
                    self.registers[register] = value;
                    if register == Self::CTRL_MEAS && matches!(value & 0x03, 0b01 | 0b10) {
                        self.conversion_done = Some(Instant::now() + BMP280_CONVERSION_TIME);
                    }
                }
            }
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        self.tick();
        for byte in buffer.iter_mut() {
            *byte = self.registers[self.pointer as usize];
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

// =============================================================================
// Bus
// =============================================================================

/// I2C bus with both simulated sensors attached.
pub struct SimBus {
    aht20: SimAht20,
    bmp280: SimBmp280,
    bmp280_address: u8,
}

impl SimBus {
    pub fn new(bmp280_address: u8) -> Self {
        Self {
            aht20: SimAht20::new(),
            bmp280: SimBmp280::new(),
            bmp280_address,
        }
    }

    fn device(&mut self, address: u8) -> Result<&mut dyn Device, ErrorKind> {
        if address == AHT20_ADDRESS {
            Ok(&mut self.aht20)
        } else if address == self.bmp280_address {
            Ok(&mut self.bmp280)
        } else {
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        }
    }
}

impl ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let device = self.device(address)?;
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    trace!("sim: {:#04x} <- {:02x?}", address, bytes);
                    device.write(bytes);
                }
                Operation::Read(buffer) => {
                    device.read(buffer);
                    trace!("sim: {:#04x} -> {:02x?}", address, buffer);
                }
            }
        }
        Ok(())
    }
}
