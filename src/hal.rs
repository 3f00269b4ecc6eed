//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the two plant sensors.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (dht11 + ads1115 via gpio.rs) and a development machine (mock values).
//!
//! contract:
//!     - each read is independent; one sensor failing never affects the other.
//!     - reads are blocking; the poller moves them onto blocking threads and
//!       bounds them with a timeout.
//!     - every poller reads through one SharedSensors, so a physical sensor
//!       is never driven by two threads at once.
//!
//! relationships:
//!     - used by: poller.rs (one shared provider for every user's poller)
//!     - uses: gpio.rs (on feature="hardware")
//!
//! ==============================================================================

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::SensorsConfig;
use crate::error::SensorError;

pub trait SensorProvider: Send + Sync {
    /// whole degrees celsius
    fn read_temperature(&self) -> Result<i32, SensorError>;
    /// raw moisture sensor voltage
    fn read_moisture_voltage(&self) -> Result<f64, SensorError>;
}

// ==============================================================================================
// SHARED ACCESS (one transaction per sensor at a time, fanned out to every poller)
// ==============================================================================================
type Slot<T> = Mutex<Option<(Instant, T)>>;

/// serialises access to each sensor and hands a fresh sample to every
/// poller that asks within `max_age`
pub struct SharedSensors {
    inner: Arc<dyn SensorProvider>,
    max_age: Duration,
    temperature: Slot<i32>,
    voltage: Slot<f64>,
}

impl SharedSensors {
    pub fn new(inner: Arc<dyn SensorProvider>, max_age: Duration) -> Self {
        Self { inner, max_age, temperature: Mutex::new(None), voltage: Mutex::new(None) }
    }

    /// failed reads are not cached; the next caller tries the sensor again
    fn sample<T: Copy>(
        &self,
        slot: &Slot<T>,
        read: impl FnOnce() -> Result<T, SensorError>,
    ) -> Result<T, SensorError> {
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((taken, value)) = *slot {
            if taken.elapsed() <= self.max_age {
                return Ok(value);
            }
        }
        let value = read()?;
        *slot = Some((Instant::now(), value));
        Ok(value)
    }
}

impl SensorProvider for SharedSensors {
    fn read_temperature(&self) -> Result<i32, SensorError> {
        self.sample(&self.temperature, || self.inner.read_temperature())
    }

    fn read_moisture_voltage(&self) -> Result<f64, SensorError> {
        self.sample(&self.voltage, || self.inner.read_moisture_voltage())
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Hal {
    temperature: i32,
    moisture_voltage: f64,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new(config: &SensorsConfig) -> anyhow::Result<Self> {
        tracing::info!(
            temperature = config.mock.temperature,
            moisture_voltage = config.mock.moisture_voltage,
            "Using MOCK HAL (No hardware access)"
        );
        Ok(Self {
            temperature: config.mock.temperature,
            moisture_voltage: config.mock.moisture_voltage,
        })
    }
}

#[cfg(not(feature = "hardware"))]
impl SensorProvider for Hal {
    fn read_temperature(&self) -> Result<i32, SensorError> {
        tracing::trace!("[MOCK DHT11] temperature {}", self.temperature);
        Ok(self.temperature)
    }

    fn read_moisture_voltage(&self) -> Result<f64, SensorError> {
        tracing::trace!("[MOCK ADS1115] voltage {}", self.moisture_voltage);
        Ok(self.moisture_voltage)
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    dht_pin: u8,
    dht_timeout: Duration,
    adc_address: u8,
    adc_channel: u8,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new(config: &SensorsConfig) -> anyhow::Result<Self> {
        let adc_address = config.ads1115.address()?;
        tracing::info!(
            dht_pin = config.dht11.gpio_pin,
            adc_address = format!("0x{:02X}", adc_address),
            adc_channel = config.ads1115.channel,
            "Using REAL HARDWARE HAL (rppal)"
        );
        Ok(Self {
            dht_pin: config.dht11.gpio_pin,
            dht_timeout: config.dht11.read_timeout(),
            adc_address,
            adc_channel: config.ads1115.channel,
        })
    }
}

#[cfg(feature = "hardware")]
impl SensorProvider for Hal {
    fn read_temperature(&self) -> Result<i32, SensorError> {
        crate::gpio::read_dht11(self.dht_pin, self.dht_timeout)
    }

    fn read_moisture_voltage(&self) -> Result<f64, SensorError> {
        let volts = crate::gpio::read_ads1115(self.adc_address, self.adc_channel)?;
        if !volts.is_finite() {
            return Err(SensorError::Implausible {
                sensor: crate::gpio::ADS1115,
                value: volts.to_string(),
            });
        }
        Ok(volts)
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::DHT11;
    use crate::poller::testing::{driver_error, ScriptedSensors};
    use std::sync::atomic::Ordering;

    fn slow_sensors() -> Arc<ScriptedSensors> {
        let mut sensors = ScriptedSensors::steady(22, 1.9);
        sensors.temperature_delay = Some(Duration::from_millis(50));
        Arc::new(sensors)
    }

    fn read_from_threads(shared: &Arc<SharedSensors>, n: usize) {
        let threads: Vec<_> = (0..n)
            .map(|_| {
                let shared = Arc::clone(shared);
                std::thread::spawn(move || shared.read_temperature().unwrap())
            })
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap(), 22);
        }
    }

    #[test]
    fn test_concurrent_pollers_share_one_read() {
        let sensors = slow_sensors();
        let shared = Arc::new(SharedSensors::new(sensors.clone(), Duration::from_secs(5)));

        read_from_threads(&shared, 4);
        assert_eq!(sensors.temperature_reads.load(Ordering::SeqCst), 1);
        assert_eq!(sensors.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reads_are_serialised_without_sharing() {
        let sensors = slow_sensors();
        let shared = Arc::new(SharedSensors::new(sensors.clone(), Duration::ZERO));

        read_from_threads(&shared, 4);
        assert_eq!(sensors.temperature_reads.load(Ordering::SeqCst), 4);
        assert_eq!(sensors.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_read_is_not_shared() {
        let sensors = Arc::new(ScriptedSensors::steady(22, 1.9));
        sensors.queue_temperature(Err(driver_error(DHT11)));
        let shared = SharedSensors::new(sensors.clone(), Duration::from_secs(5));

        assert!(shared.read_temperature().is_err());
        assert_eq!(shared.read_temperature().unwrap(), 22);
        assert_eq!(shared.read_moisture_voltage().unwrap(), 1.9);
        assert_eq!(sensors.temperature_reads.load(Ordering::SeqCst), 2);
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_mock_serves_configured_values() {
        let mut config = SensorsConfig::default();
        config.mock.temperature = 19;
        config.mock.moisture_voltage = 2.2;

        let hal = Hal::new(&config).unwrap();
        assert_eq!(hal.read_temperature().unwrap(), 19);
        assert_eq!(hal.read_moisture_voltage().unwrap(), 2.2);
    }
}
