//! ==============================================================================
//! http.rs - routes, handlers and the status api
//! ==============================================================================
//!
//! routes:
//!     GET  /landing        public landing page
//!     GET  /login          login form
//!     POST /login          check credentials, open session, start poller
//!     GET  /logout         drop session; on the user's last session also
//!                          mark Not Connected and stop the poller
//!     GET|POST /           mark Connected, start poller, render dashboard
//!     GET|POST /system     latest reading as json (Unknown sentinel if none)
//!     GET  /health         liveness + active poller count
//!
//! no poller failure ever reaches these handlers; they only see the store.
//!
//! sweep_sessions runs beside the server and disconnects users whose last
//! session expired, so a closed browser does not keep a poller alive.
//!
//! ==============================================================================

use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, ApiUser, CurrentUser, SessionStore};
use crate::domain::{StatusView, SystemStatus};
use crate::error::{AppError, StoreError};
use crate::registry::PollerRegistry;
use crate::store::PlantStore;
use crate::views::{self, Flash};

/// shared by every handler; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub store: PlantStore,
    pub registry: PollerRegistry,
    pub sessions: SessionStore,
    /// how often the dashboard refreshes `/system`
    pub refresh_interval: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home).post(home))
        .route("/landing", get(landing))
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", get(logout))
        .route("/system", get(system).post(system))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// latest persisted reading for `user_id`, or the Unknown sentinel
pub async fn get_status(store: &PlantStore, user_id: i64) -> Result<StatusView, StoreError> {
    Ok(store
        .plant(user_id)
        .await?
        .map(|plant| StatusView::from(&plant))
        .unwrap_or_else(StatusView::unknown))
}

/// mark the user Not Connected and stop their poller
pub async fn disconnect(state: &AppState, user_id: i64) -> Result<(), StoreError> {
    match state
        .store
        .set_system_status(user_id, SystemStatus::NotConnected)
        .await
    {
        Ok(()) | Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    state.registry.stop(user_id).await;
    Ok(())
}

/// drop sessions that are no longer live at `now` and disconnect every user
/// left without one; returns how many users were disconnected
pub async fn expire_sessions(state: &AppState, now: Instant) -> usize {
    let mut disconnected = 0;
    for user_id in state.sessions.expire(now) {
        // a login may have raced the sweep
        if state.sessions.has_live_session(user_id) {
            continue;
        }
        match disconnect(state, user_id).await {
            Ok(()) => {
                tracing::info!(user_id, "Session expired; poller stopped");
                disconnected += 1;
            }
            Err(e) => tracing::error!(user_id, error = %e, "Failed to disconnect expired session"),
        }
    }
    disconnected
}

/// periodically expire sessions until `cancel` fires
pub async fn sweep_sessions(state: AppState, every: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(every) => {}
        }
        expire_sessions(&state, Instant::now()).await;
    }
}

async fn landing() -> Html<String> {
    Html(views::landing())
}

#[derive(Deserialize)]
struct LoginQuery {
    logged_out: Option<String>,
}

async fn login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    let flash = query.logged_out.map(|_| (Flash::Success, "Logged out."));
    Html(views::login(flash, ""))
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let Some(user) = state.store.find_user_by_email(&form.email).await? else {
        tracing::info!(email = %form.email, "Login for unknown email");
        return Ok(Html(views::login(
            Some((Flash::Error, "Email does not exist.")),
            &form.email,
        ))
        .into_response());
    };

    if !auth::verify_password(&user.password_hash, &form.password) {
        tracing::info!(user_id = user.id, "Login with wrong password");
        return Ok(Html(views::login(
            Some((Flash::Error, "Incorrect password, try again.")),
            &form.email,
        ))
        .into_response());
    }

    let token = state.sessions.create(user.id);
    state.registry.start(user.id);
    tracing::info!(user_id = user.id, "Logged in");

    Ok((
        [(SET_COOKIE, auth::session_cookie(&token, state.sessions.ttl()))],
        Redirect::to("/?logged_in=1"),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, user: CurrentUser) -> Result<Response, AppError> {
    state.sessions.remove(&user.token);
    if state.sessions.has_live_session(user.id) {
        tracing::info!(user_id = user.id, "Logged out; other sessions keep the poller");
    } else {
        disconnect(&state, user.id).await?;
        tracing::info!(user_id = user.id, "Logged out");
    }

    Ok((
        [(SET_COOKIE, auth::clear_session_cookie())],
        Redirect::to("/login?logged_out=1"),
    )
        .into_response())
}

#[derive(Deserialize)]
struct HomeQuery {
    logged_in: Option<String>,
}

async fn home(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HomeQuery>,
) -> Result<Html<String>, AppError> {
    let account = state.store.user(user.id).await?.ok_or(AppError::NotFound)?;
    state
        .store
        .set_system_status(user.id, SystemStatus::Connected)
        .await?;
    state.registry.start(user.id);

    let flash = query
        .logged_in
        .map(|_| (Flash::Success, "Logged in successfully!"));
    Ok(Html(views::home(
        flash,
        &account.first_name,
        state.refresh_interval.as_millis() as u64,
    )))
}

async fn system(State(state): State<AppState>, user: ApiUser) -> Result<Json<StatusView>, AppError> {
    Ok(Json(get_status(&state.store, user.id).await?))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_pollers": state.registry.active_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, PlantConfig};
    use crate::poller::testing::{store_with_user, ScriptedSensors};
    use std::sync::Arc;

    async fn state_with_user() -> (AppState, i64) {
        let (store, id) = store_with_user().await;
        let sensors = Arc::new(ScriptedSensors::steady(22, 1.9));
        let state = crate::app_state(&MonitorConfig::default(), sensors, store).unwrap();
        (state, id)
    }

    #[tokio::test]
    async fn test_expired_session_stops_poller() {
        let (state, id) = state_with_user().await;
        state.sessions.create(id);
        state.store.set_system_status(id, SystemStatus::Connected).await.unwrap();
        assert!(state.registry.start(id));

        assert_eq!(expire_sessions(&state, Instant::now()).await, 0);
        assert!(state.registry.is_running(id));

        let tomorrow = Instant::now() + Duration::from_secs(24 * 60 * 60);
        assert_eq!(expire_sessions(&state, tomorrow).await, 1);
        assert!(!state.registry.is_running(id));
        let plant = state.store.plant(id).await.unwrap().unwrap();
        assert_eq!(plant.system_status, SystemStatus::NotConnected);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let (state, _) = state_with_user().await;
        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(sweep_sessions(
            state,
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(1), sweeper).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_for_missing_record_is_unknown() {
        let store = PlantStore::open_in_memory(PlantConfig::default()).unwrap();
        assert_eq!(get_status(&store, 99).await.unwrap(), StatusView::unknown());
    }

    #[tokio::test]
    async fn test_status_for_fresh_user() {
        let store = PlantStore::open_in_memory(PlantConfig::default()).unwrap();
        let id = store.create_user("sage@example.com", "Sage", "s$h").await.unwrap();

        let status = get_status(&store, id).await.unwrap();
        assert_eq!(status.last_watered, None);
        assert_eq!(status.system_status, "Not Connected");
        assert_eq!(status.plant_status, "Not Connected");
    }
}
