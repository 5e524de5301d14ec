//! Interrupt-safe sharing of the I2C bus and of the drivers themselves
//!
//! The drivers are touched from two contexts: the foreground loop issuing
//! commands and the timer interrupt running their alarm callbacks. Both
//! reach a driver only through a [`Shared`] cell, whose critical section makes
//! every frame commit appear atomic to the other context.
//!
//! The bus itself sits in a [`SharedBus`] and each driver talks to it through
//! its own [`CriticalSectionDevice`], so transactions from the two drivers
//! never interleave on the wire.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

pub use embedded_hal_bus::i2c::CriticalSectionDevice;

/// A value shared between the foreground and interrupt contexts.
///
/// # Example
///
/// ```no_run
/// use core::cell::RefCell;
/// use embassy_sync::blocking_mutex::Mutex;
/// use weathernode_core::shared::Shared;
///
/// static COUNTER: Shared<u32> = Mutex::new(RefCell::new(0));
///
/// COUNTER.lock(|counter| *counter.borrow_mut() += 1);
/// ```
pub type Shared<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

/// Create a new [`Shared`] cell.
pub const fn shared<T>(value: T) -> Shared<T> {
    Mutex::new(RefCell::new(value))
}

/// An I2C bus handed out to several drivers as [`CriticalSectionDevice`]s.
///
/// # Example
///
/// ```no_run
/// # fn bus() -> embedded_hal_mock::eh1::i2c::Mock { unimplemented!() }
/// use weathernode_core::shared::{CriticalSectionDevice, SharedBus, shared_bus};
///
/// let bus: SharedBus<_> = shared_bus(bus());
/// let for_humidity = CriticalSectionDevice::new(&bus);
/// let for_pressure = CriticalSectionDevice::new(&bus);
/// ```
pub type SharedBus<T> = critical_section::Mutex<RefCell<T>>;

/// Create a new [`SharedBus`].
pub const fn shared_bus<T>(bus: T) -> SharedBus<T> {
    critical_section::Mutex::new(RefCell::new(bus))
}
