//! ==============================================================================
//! auth.rs - password hashing, in-memory sessions, login extractors
//! ==============================================================================
//!
//! passwords are stored as argon2id PHC strings. sessions are opaque uuid
//! tokens in an HttpOnly cookie, mapped to a user id in process memory; a
//! restart logs everyone out.
//!
//! a session is live while it is younger than `ttl` and was used within
//! `idle`. expired entries are invisible to lookups and are dropped by
//! `expire`, which reports the users left without any live session.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;

use crate::config::SessionConfig;
use crate::error::AppError;
use crate::http::AppState;

pub const SESSION_COOKIE: &str = "plant_session";

/// argon2id digest in PHC string form
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("failed to encode salt: {}", e))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// false for a wrong password and for a stored value that is not a PHC string
pub fn verify_password(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is unreadable");
            false
        }
    }
}

struct Session {
    user_id: i64,
    issued: Instant,
    last_seen: Instant,
}

impl Session {
    fn is_live(&self, now: Instant, ttl: Duration, idle: Duration) -> bool {
        now.duration_since(self.issued) < ttl && now.duration_since(self.last_seen) < idle
    }
}

/// token -> session
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Session>>>,
    ttl: Duration,
    idle: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl: config.ttl(),
            idle: config.idle(),
        }
    }

    /// absolute session lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self, user_id: i64) -> String {
        self.create_at(user_id, Instant::now())
    }

    fn create_at(&self, user_id: i64, now: Instant) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.sessions()
            .insert(token.clone(), Session { user_id, issued: now, last_seen: now });
        token
    }

    /// user behind a live token; counts as activity
    pub fn user_id(&self, token: &str) -> Option<i64> {
        self.touch_at(token, Instant::now())
    }

    fn touch_at(&self, token: &str, now: Instant) -> Option<i64> {
        let mut sessions = self.sessions();
        let session = sessions.get_mut(token)?;
        if !session.is_live(now, self.ttl, self.idle) {
            return None;
        }
        session.last_seen = now;
        Some(session.user_id)
    }

    pub fn remove(&self, token: &str) -> Option<i64> {
        self.sessions().remove(token).map(|session| session.user_id)
    }

    pub fn has_live_session(&self, user_id: i64) -> bool {
        self.has_live_session_at(user_id, Instant::now())
    }

    fn has_live_session_at(&self, user_id: i64, now: Instant) -> bool {
        self.sessions()
            .values()
            .any(|s| s.user_id == user_id && s.is_live(now, self.ttl, self.idle))
    }

    /// drop every session that is no longer live at `now`
    ///
    /// returns the users whose last live session just went away.
    pub fn expire(&self, now: Instant) -> Vec<i64> {
        let mut sessions = self.sessions();
        let mut evicted = Vec::new();
        sessions.retain(|_, session| {
            let live = session.is_live(now, self.ttl, self.idle);
            if !live {
                evicted.push(session.user_id);
            }
            live
        });

        evicted.sort_unstable();
        evicted.dedup();
        evicted.retain(|user_id| !sessions.values().any(|s| s.user_id == *user_id));
        evicted
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `Set-Cookie` value opening a session that lives for `max_age`
pub fn session_cookie(token: &str, max_age: Duration) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        max_age.as_secs()
    )
}

/// `Set-Cookie` value expiring the session cookie
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// pull the session token out of the request cookies
pub fn session_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// logged-in user for html pages; redirects to /login otherwise
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub token: String,
}

/// logged-in user for json endpoints; 401 otherwise
#[derive(Debug, Clone)]
pub struct ApiUser {
    pub id: i64,
}

fn resolve(parts: &Parts, state: &AppState) -> Option<CurrentUser> {
    let token = session_token(parts)?;
    let id = state.sessions.user_id(&token)?;
    Some(CurrentUser { id, token })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state).ok_or(AppError::Unauthorized)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for ApiUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .map(|user| ApiUser { id: user.id })
            .ok_or(AppError::UnauthorizedApi)
    }
}
