//! Station sensor configuration.
//!
//! Defaults reproduce the settings the station has always run with. The
//! types are serde-serializable so a board can keep overrides in flash.

use serde::{Deserialize, Serialize};

use crate::sensors::bmp280::{Bmp280Address, Filter, Mode, Oversampling, Standby};

/// BMP280 measurement settings, applied by
/// [`Bmp280::configure`](crate::sensors::Bmp280::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bmp280Config {
    pub temperature_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub filter: Filter,
    pub standby: Standby,
    pub mode: Mode,
}

impl Default for Bmp280Config {
    fn default() -> Self {
        Self {
            temperature_oversampling: Oversampling::X2,
            pressure_oversampling: Oversampling::X16,
            filter: Filter::X4,
            standby: Standby::SixteenthS,
            mode: Mode::Normal,
        }
    }
}

impl Bmp280Config {
    /// Decode the settings held in the `ctrl_meas` and `config` registers.
    pub fn from_registers(ctrl_meas: u8, config: u8) -> Self {
        let (temperature_oversampling, pressure_oversampling) =
            Oversampling::from_ctrl_meas(ctrl_meas);
        Self {
            temperature_oversampling,
            pressure_oversampling,
            filter: Filter::from_register(config),
            standby: Standby::from_register(config),
            mode: Mode::from_register(ctrl_meas),
        }
    }
}

/// Configuration for every sensor on the station bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorConfig {
    pub pressure_address: Bmp280Address,
    pub pressure: Bmp280Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SensorConfig::default();
        assert_eq!(config.pressure_address.value(), 0x76);
        assert_eq!(config.pressure.mode, Mode::Normal);
        assert_eq!(config.pressure.standby, Standby::SixteenthS);
    }

    #[test]
    fn test_decodes_station_defaults_from_registers() {
        assert_eq!(
            Bmp280Config::from_registers(0b010_101_11, 0b001_010_00),
            Bmp280Config::default()
        );

        let reset = Bmp280Config::from_registers(0x00, 0x00);
        assert_eq!(reset.temperature_oversampling, Oversampling::Off);
        assert_eq!(reset.filter, Filter::Off);
        assert_eq!(reset.standby, Standby::HalfMs);
        assert_eq!(reset.mode, Mode::Sleep);
    }

    #[test]
    fn test_survives_postcard_storage() {
        let config = SensorConfig {
            pressure_address: Bmp280Address::Secondary,
            pressure: Bmp280Config {
                mode: Mode::Forced,
                standby: Standby::OneS,
                ..Bmp280Config::default()
            },
        };

        let bytes = postcard::to_allocvec(&config).unwrap();
        let restored: SensorConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(restored, config);
    }
}
