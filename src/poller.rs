//! ==============================================================================
//! poller.rs - per-user sensor polling loop
//! ==============================================================================
//!
//! purpose:
//!     one poller per logged-in user: read temperature, read moisture voltage,
//!     calibrate, persist, sleep, repeat.
//!
//! failure policy:
//!     - any sensor failure or timeout skips the whole cycle (no partial write)
//!       and retries after `failure_backoff`.
//!     - a missing record or a storage error is logged; the loop carries on.
//!     - a sensor worker thread dying is fatal for this poller only; the
//!       registry's supervisor logs it and deregisters the handle.
//!
//! lifecycle:
//!
//! ```text
//!     Idle ──start──▶ Running ──cancel / fatal error / panic──▶ Stopped
//!                        │                                        ▲
//!                        └──cancel, cycle still in flight──▶ Stopping
//! ```
//!
//! ```text
//!     cancellation is observed at the top of each cycle and during the sleep.
//! ```
//!
//! relationships:
//!     - used by: registry.rs (spawns run_poller under a supervisor)
//!     - uses: hal.rs (SensorProvider), calibration.rs, store.rs
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::calibration::Calibration;
use crate::config::MonitorConfig;
use crate::domain::Reading;
use crate::error::{PollerError, SensorError, StoreError};
use crate::gpio::{ADS1115, DHT11};
use crate::hal::SensorProvider;
use crate::store::PlantStore;

/// everything a poller needs; shared by all pollers
pub struct PollerContext {
    pub sensors: Arc<dyn SensorProvider>,
    pub store: PlantStore,
    pub calibration: Calibration,
    pub interval: Duration,
    pub sensor_timeout: Duration,
    pub failure_backoff: Duration,
    pub show_sensor_data: bool,
}

impl PollerContext {
    pub fn from_config(
        config: &MonitorConfig,
        sensors: Arc<dyn SensorProvider>,
        store: PlantStore,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            sensors,
            store,
            calibration: config.calibration.to_calibration()?,
            interval: config.polling.interval(),
            sensor_timeout: config.polling.sensor_timeout(),
            failure_backoff: config.polling.failure_backoff(),
            show_sensor_data: config.logging.show_sensor_data,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    /// cancelled, the current cycle has not finished yet
    Stopping,
    Stopped,
}

/// result of a single read-transform-store cycle
#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    Stored(Reading),
    /// a sensor gave no sample; nothing was written
    Skipped,
    /// the user has no plant record; nothing was written
    RecordMissing,
    /// the write failed and was rolled back
    PersistFailed,
}

/// run a blocking sensor read on a worker thread, bounded by `timeout`
///
/// the outer error is fatal (the worker died); the inner one is an ordinary
/// missed sample.
async fn read_sensor<T, F>(
    sensors: &Arc<dyn SensorProvider>,
    sensor: &'static str,
    timeout: Duration,
    read: F,
) -> Result<Result<T, SensorError>, PollerError>
where
    T: Send + 'static,
    F: FnOnce(&dyn SensorProvider) -> Result<T, SensorError> + Send + 'static,
{
    let sensors = Arc::clone(sensors);
    let worker = tokio::task::spawn_blocking(move || read(sensors.as_ref()));

    match tokio::time::timeout(timeout, worker).await {
        // the blocking thread is left to finish on its own
        Err(_) => Ok(Err(SensorError::Timeout {
            sensor,
            millis: timeout.as_millis() as u64,
        })),
        Ok(Err(join)) => Err(PollerError::SensorWorker { sensor, message: join.to_string() }),
        Ok(Ok(sample)) => Ok(sample),
    }
}

/// one read-transform-store cycle for `user_id`
pub async fn poll_once(ctx: &PollerContext, user_id: i64) -> Result<CycleOutcome, PollerError> {
    let temperature = match read_sensor(&ctx.sensors, DHT11, ctx.sensor_timeout, |s| {
        s.read_temperature()
    })
    .await?
    {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Skipping update due to failed temperature reading");
            return Ok(CycleOutcome::Skipped);
        }
    };

    let voltage = match read_sensor(&ctx.sensors, ADS1115, ctx.sensor_timeout, |s| {
        s.read_moisture_voltage()
    })
    .await?
    {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Skipping update due to failed moisture reading");
            return Ok(CycleOutcome::Skipped);
        }
    };

    let reading = Reading {
        timestamp: Utc::now(),
        temperature,
        soil_moisture: ctx.calibration.percent(voltage),
    };

    if ctx.show_sensor_data {
        tracing::info!(
            user_id,
            temperature = reading.temperature,
            soil_moisture = reading.soil_moisture,
            voltage,
            "[SENSORS] reading"
        );
    } else {
        tracing::debug!(
            user_id,
            temperature = reading.temperature,
            soil_moisture = reading.soil_moisture,
            voltage,
            "reading"
        );
    }

    match ctx.store.upsert_reading(user_id, reading).await {
        Ok(()) => Ok(CycleOutcome::Stored(reading)),
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(user_id, "No plant record; reading dropped");
            Ok(CycleOutcome::RecordMissing)
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "Database update failed");
            Ok(CycleOutcome::PersistFailed)
        }
    }
}

/// loop until cancelled or a fatal error
pub async fn run_poller(
    ctx: Arc<PollerContext>,
    user_id: i64,
    cancel: CancellationToken,
) -> Result<(), PollerError> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let pause = match poll_once(&ctx, user_id).await? {
            CycleOutcome::Skipped => ctx.failure_backoff,
            _ => ctx.interval,
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
