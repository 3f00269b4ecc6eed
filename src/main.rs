//! ==============================================================================
//! main.rs - plant monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     hosts the plant dashboard and the per-user sensor pollers.
//!
//! responsibilities:
//!     - load plant.toml (or defaults) and set up tracing
//!     - open the sqlite store and provision seed accounts
//!     - pick the HAL (mock, or rppal with --features hardware)
//!     - serve the web ui; pollers start on login / home visits
//!     - sweep expired sessions, stopping pollers nobody is watching
//!     - on ctrl-c, stop accepting requests and cancel every poller
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                      rust host (this file)                    │
//!     │  ┌─────────────┐   start/stop   ┌──────────────────────────┐  │
//!     │  │ web server  │ ─────────────▶ │ poller registry           │  │
//!     │  │ (port 5000) │                │  user 1 ─▶ poll loop (5s) │  │
//!     │  └──────┬──────┘                │  user 2 ─▶ poll loop (5s) │  │
//!     │         │ read                  └────────────┬─────────────┘  │
//!     │         ▼                                    │ write          │
//!     │   ┌───────────┐◀─────────────────────────────┘                │
//!     │   │  sqlite   │                                               │
//!     │   └───────────┘          hal: dht11 (gpio) + ads1115 (i2c)    │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use plant_monitor::config::MonitorConfig;
use plant_monitor::hal::Hal;
use plant_monitor::{app_state, build_router, http, logging, provision_users, PlantStore};

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration, then logging
    let loaded = MonitorConfig::load_or_default()?;
    let config = loaded.config;
    logging::init(&config.logging)?;

    tracing::info!("Plant Monitor startup");
    match &loaded.source {
        Some(path) => tracing::info!(path = %path.display(), "[CONFIG] Loaded"),
        None => tracing::info!("[CONFIG] Using built-in defaults"),
    }
    for warning in &loaded.warnings {
        tracing::warn!("[CONFIG] {}", warning);
    }
    tracing::info!(
        poll_interval_s = config.polling.interval_seconds,
        dry_voltage = config.calibration.dry_voltage,
        wet_voltage = config.calibration.wet_voltage,
        database = %config.database.path.display(),
        "[CONFIG] Summary"
    );

    // step 2: storage and seed accounts
    let store = PlantStore::open(&config.database.path, config.plant.clone())
        .with_context(|| format!("opening {}", config.database.path.display()))?;
    let created = provision_users(&config, &store).await?;
    if created > 0 {
        tracing::info!(created, "[STARTUP] Seed users provisioned");
    }

    // step 3: sensors
    let hal = Hal::new(&config.sensors).context("initializing sensors")?;
    tracing::info!("[STARTUP] Sensors initialized");

    // step 4: web server; pollers are started per user by the handlers
    let state = app_state(&config, Arc::new(hal), store)?;
    let registry = state.registry.clone();
    let sweeper_cancel = CancellationToken::new();
    let sweeper = tokio::spawn(http::sweep_sessions(
        state.clone(),
        config.sessions.sweep_interval(),
        sweeper_cancel.clone(),
    ));
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(address = %addr, "[STARTUP] Dashboard live");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // step 5: no poller outlives the server
    sweeper_cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "[SHUTDOWN] Session sweeper failed");
    }
    tracing::info!(active = registry.active_count(), "[SHUTDOWN] Stopping pollers");
    registry.stop_all().await;
    tracing::info!("[SHUTDOWN] Done");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
