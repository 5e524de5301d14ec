pub mod aht20;
pub mod bmp280;

use embedded_hal::i2c::I2c;
use serde::Serialize;

use crate::error::{Readiness, SensorError};
use crate::scheduler::{Rearm, Scheduler};

pub use aht20::Aht20;
pub use bmp280::Bmp280;

/// Polling contract shared by the non-blocking drivers.
pub trait Sensor {
    /// Error type of the underlying bus.
    type Error;

    /// Start a measurement, or pick up a finished one.
    fn measure(&mut self) -> Result<Readiness, SensorError<Self::Error>>;

    /// Whether a complete measurement is available.
    fn has_data(&self) -> bool;

    /// Alarm callback. Runs in the alarm context and must not block; any
    /// waiting is expressed by returning [`Rearm::After`].
    fn on_alarm(&mut self) -> Rearm;
}

/// Snapshot of the station's sensors in physical units.
///
/// A field is `None` when its sensor had no data when the snapshot was taken.
/// This is what the telemetry side turns into a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnvironmentReading {
    /// Air temperature from the humidity sensor (°C)
    pub temperature_c: Option<f32>,
    /// Relative humidity (%)
    pub humidity_percent: Option<f32>,
    /// Station pressure (mbar)
    pub pressure_mbar: Option<f32>,
    /// Die temperature reported alongside the pressure (°C)
    pub pressure_sensor_temperature_c: Option<f32>,
}

impl EnvironmentReading {
    /// Collect whatever the two drivers currently have.
    ///
    /// Reading the pressure consumes the BMP280's data-ready flag, so a second
    /// call without a new measurement reports no pressure.
    pub fn sample<A, AS, B, BS>(humidity: &Aht20<A, AS>, pressure: &mut Bmp280<B, BS>) -> Self
    where
        A: I2c,
        AS: Scheduler,
        B: I2c,
        BS: Scheduler,
    {
        let mut reading = Self::default();

        if humidity.has_data() {
            reading.temperature_c = Some(humidity.temperature());
            reading.humidity_percent = Some(humidity.humidity());
        }

        if pressure.has_data() {
            reading.pressure_sensor_temperature_c = Some(pressure.temperature());
            reading.pressure_mbar = Some(pressure.pressure());
        }

        reading
    }

    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none()
            && self.humidity_percent.is_none()
            && self.pressure_mbar.is_none()
            && self.pressure_sensor_temperature_c.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::aht20::{AHT20_ADDRESS, MEASUREMENT_DELAY, POWER_ON_DELAY};
    use super::bmp280::Bmp280Address;
    use super::*;
    use crate::testing::ManualScheduler;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    const AHT20_FRAME: [u8; 7] = [0x1C, 0x65, 0xB4, 0x25, 0xCD, 0x26, 0xC6];
    const BMP280_DATA: [u8; 6] = [0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00];
    const BMP280_CALIBRATION: [u8; 26] = [
        0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C,
        0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17, 0x00, 0x00,
    ];

    /// Drive both sensors through one forced measurement
    fn measured_pair(
        aht20_i2c: &I2cMock,
        bmp280_i2c: &I2cMock,
    ) -> (Aht20<I2cMock, ManualScheduler>, Bmp280<I2cMock, ManualScheduler>) {
        let scheduler = ManualScheduler::new();
        let mut aht20 = Aht20::new(aht20_i2c.clone(), scheduler.clone());
        let mut bmp280 = Bmp280::new(
            bmp280_i2c.clone(),
            scheduler.clone(),
            Bmp280Address::Primary,
        )
        .unwrap();

        scheduler.advance(POWER_ON_DELAY);
        assert!(aht20.measure().unwrap().is_ready());
        assert!(bmp280.measure().unwrap().is_busy());

        scheduler.advance(MEASUREMENT_DELAY);
        // Deliver both alarms, running each callback by hand
        assert!(scheduler.take_due().is_some());
        assert!(scheduler.take_due().is_some());
        assert_eq!(aht20.on_alarm(), Rearm::Done);
        assert_eq!(bmp280.on_alarm(), Rearm::Done);
        (aht20, bmp280)
    }

    fn aht20_expectations() -> Vec<Transaction> {
        vec![
            Transaction::write(AHT20_ADDRESS, vec![0x71]),
            Transaction::read(AHT20_ADDRESS, vec![0x18]),
            Transaction::write(AHT20_ADDRESS, vec![0xAC, 0x33, 0x00]),
            Transaction::read(AHT20_ADDRESS, vec![0x18]),
            Transaction::read(AHT20_ADDRESS, AHT20_FRAME.to_vec()),
        ]
    }

    fn bmp280_expectations() -> Vec<Transaction> {
        vec![
            Transaction::write_read(0x76, vec![0xD0], vec![0x58]),
            Transaction::write_read(0x76, vec![0x88], BMP280_CALIBRATION.to_vec()),
            Transaction::write_read(0x76, vec![0xF4], vec![0x54, 0x00]),
            Transaction::write_read(0x76, vec![0xF4], vec![0x54]),
            Transaction::write(0x76, vec![0xF4, 0x55]),
            Transaction::write_read(0x76, vec![0xF3], vec![0x00]),
            Transaction::write_read(0x76, vec![0xF7], BMP280_DATA.to_vec()),
        ]
    }

    #[test]
    fn test_sample_collects_both_sensors() {
        let mut aht20_i2c = I2cMock::new(&aht20_expectations());
        let mut bmp280_i2c = I2cMock::new(&bmp280_expectations());
        let (aht20, mut bmp280) = measured_pair(&aht20_i2c, &bmp280_i2c);

        let reading = EnvironmentReading::sample(&aht20, &mut bmp280);
        assert!(!reading.is_empty());
        assert!((reading.temperature_c.unwrap() - 22.517).abs() < 0.001);
        assert!((reading.humidity_percent.unwrap() - 39.728).abs() < 0.001);
        assert!((reading.pressure_sensor_temperature_c.unwrap() - 25.08).abs() < 1e-4);
        assert!((reading.pressure_mbar.unwrap() - 1006.5325).abs() < 1e-3);

        // The pressure was consumed, the humidity frame stays
        let again = EnvironmentReading::sample(&aht20, &mut bmp280);
        assert_eq!(again.pressure_mbar, None);
        assert_eq!(again.temperature_c, reading.temperature_c);

        aht20_i2c.done();
        bmp280_i2c.done();
    }

    #[test]
    fn test_sample_without_data_is_empty() {
        let mut aht20_i2c = I2cMock::new(&[]);
        let mut bmp280_i2c = I2cMock::new(&bmp280_expectations()[..3]);
        let scheduler = ManualScheduler::new();
        let aht20 = Aht20::new(aht20_i2c.clone(), scheduler.clone());
        let mut bmp280 =
            Bmp280::new(bmp280_i2c.clone(), scheduler, Bmp280Address::Primary).unwrap();

        let reading = EnvironmentReading::sample(&aht20, &mut bmp280);
        assert!(reading.is_empty());
        assert_eq!(reading, EnvironmentReading::default());

        aht20_i2c.done();
        bmp280_i2c.done();
    }
}
