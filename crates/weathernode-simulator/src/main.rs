//! Desktop simulator for the weathernode sensor drivers.
//!
//! Runs the AHT20 and BMP280 drivers against simulated devices on a shared
//! I2C bus. A timer thread plays the part of the alarm interrupt and the main
//! thread is the firmware's foreground loop: start measurements, poll status,
//! log a reading whenever one is available.
//!
//! # Usage
//!
//! ```text
//! RUST_LOG=info weathernode-simulator [READINGS]
//! ```
//!
//! Without `READINGS` the loop runs until interrupted.

mod devices;

use std::cell::RefCell;
use std::sync::LazyLock;
use std::time::Duration as StdDuration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use embedded_hal::i2c::ErrorKind;
use log::{debug, error, info};

use weathernode_core::config::{Bmp280Config, SensorConfig};
use weathernode_core::scheduler::{AlarmQueue, AlarmSlot, SharedAlarms, dispatch};
use weathernode_core::sensors::bmp280::Mode;
use weathernode_core::sensors::{Aht20, Bmp280, EnvironmentReading};
use weathernode_core::shared::{CriticalSectionDevice, Shared, SharedBus, shared, shared_bus};
use weathernode_core::{Readiness, Rearm, SensorError};

use devices::SimBus;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

const ALARM_CAPACITY: usize = 4;

const HUMIDITY_OWNER: u8 = 0;
const PRESSURE_OWNER: u8 = 1;

/// Longest the simulated timer sleeps, so newly armed alarms are noticed.
const TIMER_TICK: Duration = Duration::from_millis(1);

/// Loop delay after a reading was logged, and while waiting for one.
const READING_INTERVAL: StdDuration = StdDuration::from_millis(1000);
const POLL_INTERVAL: StdDuration = StdDuration::from_millis(80);

type Bus = CriticalSectionDevice<'static, SimBus>;
type Slot = AlarmSlot<'static, ALARM_CAPACITY>;
type HumiditySensor = Aht20<Bus, Slot>;
type PressureSensor = Bmp280<Bus, Slot>;

static CONFIG: LazyLock<SensorConfig> = LazyLock::new(|| SensorConfig {
    pressure: Bmp280Config {
        // Forced conversions on demand, so both drivers run through the alarm path
        mode: Mode::Sleep,
        ..Bmp280Config::default()
    },
    ..SensorConfig::default()
});

static ALARMS: SharedAlarms<ALARM_CAPACITY> = Mutex::new(RefCell::new(AlarmQueue::new()));
static BUS: LazyLock<SharedBus<SimBus>> =
    LazyLock::new(|| shared_bus(SimBus::new(CONFIG.pressure_address.value())));

static HUMIDITY: Shared<Option<HumiditySensor>> = shared(None);
static PRESSURE: Shared<Option<PressureSensor>> = shared(None);

/// Run `f` on a driver stored in a [`Shared`] cell, if it is installed.
fn with_sensor<T, R>(cell: &Shared<Option<T>>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    cell.lock(|sensor| sensor.borrow_mut().as_mut().map(f))
}

// ---------------------------------------------------------------------------
// Alarm context
// ---------------------------------------------------------------------------

fn fire(owner: u8) -> Rearm {
    let rearm = match owner {
        HUMIDITY_OWNER => with_sensor(&HUMIDITY, |sensor| sensor.on_alarm()),
        PRESSURE_OWNER => with_sensor(&PRESSURE, |sensor| sensor.on_alarm()),
        _ => None,
    };
    rearm.unwrap_or(Rearm::Done)
}

fn spawn_timer() {
    std::thread::spawn(|| {
        loop {
            dispatch(&ALARMS, Instant::now(), fire);

            // Sleep until the next deadline, as a compare register would
            let next = ALARMS.lock(|queue| queue.borrow().next_deadline());
            let wait = next.map_or(TIMER_TICK, |deadline| {
                deadline
                    .saturating_duration_since(Instant::now())
                    .min(TIMER_TICK)
            });
            std::thread::sleep(StdDuration::from_micros(wait.as_micros()));
        }
    });
}

// ---------------------------------------------------------------------------
// Foreground
// ---------------------------------------------------------------------------

fn install_sensors() -> Result<(), SensorError<ErrorKind>> {
    let humidity = Aht20::new(
        CriticalSectionDevice::new(&*BUS),
        AlarmSlot::new(&ALARMS, HUMIDITY_OWNER, Instant::now),
    );

    let mut pressure = Bmp280::new(
        CriticalSectionDevice::new(&*BUS),
        AlarmSlot::new(&ALARMS, PRESSURE_OWNER, Instant::now),
        CONFIG.pressure_address,
    )?;
    info!("BMP280 chip id {:#04x}", pressure.chip_id());
    pressure.configure(&CONFIG.pressure)?;

    HUMIDITY.lock(|cell| *cell.borrow_mut() = Some(humidity));
    PRESSURE.lock(|cell| *cell.borrow_mut() = Some(pressure));
    Ok(())
}

fn take_reading() -> EnvironmentReading {
    HUMIDITY.lock(|humidity| {
        PRESSURE.lock(|pressure| {
            match (humidity.borrow().as_ref(), pressure.borrow_mut().as_mut()) {
                (Some(humidity), Some(pressure)) => EnvironmentReading::sample(humidity, pressure),
                _ => EnvironmentReading::default(),
            }
        })
    })
}

fn main() {
    env_logger::init();
    info!("Starting weathernode simulator");

    let limit: Option<usize> = std::env::args().nth(1).and_then(|arg| arg.parse().ok());

    if let Err(e) = install_sensors() {
        error!("Sensor setup failed: {}", e);
        return;
    }
    spawn_timer();

    let mut readings = 0;
    while limit.is_none_or(|limit| readings < limit) {
        debug!("Starting measurement...");
        match with_sensor(&HUMIDITY, |sensor| sensor.measure()) {
            Some(Err(e)) => error!("Failed to write to sensor: {}", e),
            Some(Ok(Readiness::Busy)) => debug!("AHT20 busy"),
            _ => {}
        }
        if let Some(Err(e)) = with_sensor(&PRESSURE, |sensor| sensor.measure()) {
            error!("Failed to start pressure measurement: {}", e);
        }
        if let Some(Err(e)) = with_sensor(&HUMIDITY, |sensor| sensor.update_status()) {
            error!("Status read failed: {}", e);
        }

        let reading = take_reading();
        match (reading.humidity_percent, reading.temperature_c) {
            (Some(humidity), Some(temperature)) => {
                info!(
                    "{:.2}%RH {:.2}°F {:.2} mbar",
                    humidity,
                    temperature * 1.8 + 32.0,
                    reading.pressure_mbar.unwrap_or_default()
                );
                readings += 1;
                std::thread::sleep(READING_INTERVAL);
            }
            _ => {
                let busy = with_sensor(&HUMIDITY, |sensor| sensor.busy()).unwrap_or_default();
                debug!("has_data == false\tbusy == {}", busy);
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    let armed = ALARMS.lock(|queue| queue.borrow().len());
    info!("Simulator exiting with {} alarms armed", armed);
}
