//! BMP280 register map and field encodings

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

pub const REG_CALIBRATION: u8 = 0x88;
pub const REG_CHIP_ID: u8 = 0xD0;
pub const REG_STATUS: u8 = 0xF3;
pub const REG_CTRL_MEAS: u8 = 0xF4;
pub const REG_CONFIG: u8 = 0xF5;
/// First of the six data registers: press_msb, press_lsb, press_xlsb,
/// temp_msb, temp_lsb, temp_xlsb
pub const REG_DATA: u8 = 0xF7;

pub const CHIP_ID: u8 = 0x58;

/// 24 bytes of trimming coefficients plus two reserved bytes
pub const CALIBRATION_LEN: usize = 26;
pub const DATA_LEN: usize = 6;

/// `status` register: conversion running
pub const STATUS_MEASURING: u8 = 1 << 3;

const OSRS_T_SHIFT: u8 = 5;
const OSRS_P_SHIFT: u8 = 2;
const FILTER_SHIFT: u8 = 2;
const STANDBY_SHIFT: u8 = 5;

/// `ctrl_meas` bits kept when writing the oversampling fields
pub const CTRL_MEAS_KEEP_MODE: u8 = 0x03;
/// `ctrl_meas` bits kept when writing the mode field
pub const CTRL_MEAS_KEEP_OVERSAMPLING: u8 = 0xFC;
/// `config` bits kept when writing the filter field
pub const CONFIG_KEEP_STANDBY: u8 = 0xE3;
/// `config` bits kept when writing the standby field
pub const CONFIG_KEEP_FILTER: u8 = 0x1F;

/// I2C address, selected by the SDO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Bmp280Address {
    /// SDO tied to ground
    #[default]
    Primary,
    /// SDO tied to VDDIO
    Secondary,
}

impl Bmp280Address {
    pub const fn value(self) -> u8 {
        match self {
            Self::Primary => 0x76,
            Self::Secondary => 0x77,
        }
    }
}

/// Oversampling of one measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Oversampling {
    /// Channel skipped, output reads 0x80000
    Off = 0b000,
    /// 16 bit resolution
    X1 = 0b001,
    /// 17 bit resolution
    X2 = 0b010,
    /// 18 bit resolution
    X4 = 0b011,
    /// 19 bit resolution
    X8 = 0b100,
    /// 20 bit resolution
    X16 = 0b101,
}

impl Oversampling {
    /// Convert from a raw 3-bit field value. Codes above `X16` all mean ×16.
    pub fn from_register(val: u8) -> Self {
        match val & 0b111 {
            0b000 => Self::Off,
            0b001 => Self::X1,
            0b010 => Self::X2,
            0b011 => Self::X4,
            0b100 => Self::X8,
            _ => Self::X16,
        }
    }

    /// Temperature and pressure oversampling held in a `ctrl_meas` value
    pub fn from_ctrl_meas(ctrl_meas: u8) -> (Self, Self) {
        (
            Self::from_register(ctrl_meas >> OSRS_T_SHIFT),
            Self::from_register(ctrl_meas >> OSRS_P_SHIFT),
        )
    }

    /// `ctrl_meas` bits for temperature and pressure oversampling
    pub fn ctrl_meas_bits(temperature: Self, pressure: Self) -> u8 {
        (temperature as u8) << OSRS_T_SHIFT | (pressure as u8) << OSRS_P_SHIFT
    }
}

/// IIR filter coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Filter {
    Off = 0b000,
    X2 = 0b001,
    X4 = 0b010,
    X8 = 0b011,
    X16 = 0b100,
}

impl Filter {
    pub fn from_register(val: u8) -> Self {
        match (val >> FILTER_SHIFT) & 0b111 {
            0b000 => Self::Off,
            0b001 => Self::X2,
            0b010 => Self::X4,
            0b011 => Self::X8,
            _ => Self::X16,
        }
    }

    pub fn to_register(self) -> u8 {
        (self as u8) << FILTER_SHIFT
    }
}

/// Inactive time between conversions in normal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Standby {
    /// 0.5 ms, the power-on value
    #[default]
    HalfMs = 0b000,
    SixteenthS = 0b001,
    EighthS = 0b010,
    QuarterS = 0b011,
    HalfS = 0b100,
    OneS = 0b101,
    TwoS = 0b110,
    FourS = 0b111,
}

impl Standby {
    pub fn from_register(val: u8) -> Self {
        match (val >> STANDBY_SHIFT) & 0b111 {
            0b000 => Self::HalfMs,
            0b001 => Self::SixteenthS,
            0b010 => Self::EighthS,
            0b011 => Self::QuarterS,
            0b100 => Self::HalfS,
            0b101 => Self::OneS,
            0b110 => Self::TwoS,
            _ => Self::FourS,
        }
    }

    pub fn to_register(self) -> u8 {
        (self as u8) << STANDBY_SHIFT
    }

    /// How long a forced conversion is given before its result is collected.
    ///
    /// Half of the nominal standby time, except for the shortest setting.
    pub const fn measurement_delay(self) -> Duration {
        let micros = match self {
            Self::HalfMs => 750,
            Self::SixteenthS => 31_250,
            Self::EighthS => 62_500,
            Self::QuarterS => 125_000,
            Self::HalfS => 250_000,
            Self::OneS => 500_000,
            Self::TwoS => 1_000_000,
            Self::FourS => 2_000_000,
        };
        Duration::from_micros(micros)
    }
}

/// Power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    #[default]
    Sleep = 0b00,
    /// One conversion, then back to sleep
    Forced = 0b01,
    /// Continuous conversions separated by the standby time
    Normal = 0b11,
}

impl Mode {
    pub fn from_register(val: u8) -> Self {
        match val & 0b11 {
            0b00 => Self::Sleep,
            0b11 => Self::Normal,
            _ => Self::Forced,
        }
    }

    pub fn to_register(self) -> u8 {
        self as u8
    }
}
