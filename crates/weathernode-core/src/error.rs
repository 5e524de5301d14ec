//! Status and error types shared by the sensor drivers

use thiserror_no_std::Error;

/// Outcome of a polled driver operation that did not fail.
///
/// `Busy` is the expected answer while a sensor is settling or converting;
/// callers simply poll again later.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The operation completed or was successfully started
    Ready,
    /// The device or an earlier operation is still in progress
    Busy,
}

impl Readiness {
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Errors surfaced to the caller of a driver operation.
///
/// `E` is the error type of the underlying I2C bus.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SensorError<E> {
    #[error("{sensor}: I2C {operation} failed: {error:?}")]
    I2c {
        sensor: &'static str,
        operation: &'static str,
        error: E,
    },
    #[error("{sensor}: no alarm slot available")]
    Schedule { sensor: &'static str },
}
