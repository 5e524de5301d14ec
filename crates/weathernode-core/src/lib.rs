//! Hardware-independent core library for weathernode
//!
//! This crate contains the non-blocking drivers for the station's two I2C
//! environmental sensors (an AHT20 humidity/temperature sensor and a BMP280
//! pressure/temperature sensor), the alarm scheduling contract they are driven
//! by, and the helpers used to share the bus and the drivers between the
//! foreground loop and the timer interrupt.
//!
//! It is `#![no_std]` so it compiles on both embedded targets and desktop
//! hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod crc;
pub mod error;
pub mod scheduler;
pub mod sensors;
pub mod shared;

#[cfg(test)]
mod testing;

pub use error::{Readiness, SensorError};
pub use scheduler::{AlarmHandle, Rearm, Scheduler};
