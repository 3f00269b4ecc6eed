//! ==============================================================================
//! plant-monitor - per-user soil moisture and temperature polling host
//! ==============================================================================
//!
//! module map:
//!     config       plant.toml schema and loader
//!     hal / gpio   sensor trait, shared access, mock + raspberry pi drivers
//!     calibration  moisture voltage -> percent
//!     poller       one read-transform-store loop per user
//!     registry     at most one poller per user, explicit cancellation
//!     store        sqlite users + plant records
//!     auth         password hashing, expiring sessions, login extractors
//!     http / views axum routes and html pages
//!     logging      tracing subscriber
//!
//! ==============================================================================

pub mod auth;
pub mod calibration;
pub mod config;
pub mod domain;
pub mod error;
pub mod gpio;
pub mod hal;
pub mod http;
pub mod logging;
pub mod poller;
pub mod registry;
pub mod store;
pub mod views;

pub use config::MonitorConfig;
pub use domain::{PlantRecord, Reading, StatusView, SystemStatus};
pub use hal::{SensorProvider, SharedSensors};
pub use http::{build_router, AppState};
pub use poller::{PollerContext, PollerState};
pub use registry::PollerRegistry;
pub use store::PlantStore;

use std::sync::Arc;

/// wire store, sensors and registry into router state
///
/// every poller reads `sensors` through one `SharedSensors`.
pub fn app_state(
    config: &MonitorConfig,
    sensors: Arc<dyn SensorProvider>,
    store: PlantStore,
) -> anyhow::Result<AppState> {
    let shared: Arc<dyn SensorProvider> =
        Arc::new(SharedSensors::new(sensors, config.sensors.share_window()));
    let ctx = PollerContext::from_config(config, shared, store.clone())?;
    Ok(AppState {
        store,
        registry: PollerRegistry::new(ctx),
        sessions: auth::SessionStore::new(&config.sessions),
        refresh_interval: config.polling.interval(),
    })
}

/// create any configured seed account that does not exist yet
pub async fn provision_users(config: &MonitorConfig, store: &PlantStore) -> anyhow::Result<usize> {
    let mut created = 0;
    for seed in &config.users {
        if store.find_user_by_email(&seed.email).await?.is_some() {
            continue;
        }
        let id = store
            .create_user(&seed.email, &seed.first_name, &auth::hash_password(&seed.password)?)
            .await?;
        tracing::info!(user_id = id, email = %seed.email, "Provisioned user");
        created += 1;
    }
    Ok(created)
}
