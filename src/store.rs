//! ==============================================================================
//! store.rs - sqlite persistence for users and plant records
//! ==============================================================================
//!
//! one connection behind a mutex; every public operation runs on a blocking
//! thread and is a single transaction. the poller is the only writer of the
//! sensor columns; request handlers only touch `system_status`.
//!
//! ==============================================================================

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::config::PlantConfig;
use crate::domain::{
    plant_status_label, PlantRecord, Reading, SystemStatus, User, PLANT_STATUS_PENDING,
};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    password_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS plants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    last_watered TEXT,
    soil_moisture INTEGER NOT NULL DEFAULT 0,
    temperature INTEGER NOT NULL DEFAULT 0,
    system_status TEXT NOT NULL DEFAULT 'Not Connected',
    plant_status TEXT NOT NULL DEFAULT 'Not Connected'
);
";

#[derive(Clone)]
pub struct PlantStore {
    conn: Arc<Mutex<Connection>>,
    thresholds: PlantConfig,
}

impl PlantStore {
    /// open (or create) the database file and apply the schema
    pub fn open<P: AsRef<Path>>(path: P, thresholds: PlantConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::from_connection(conn, thresholds)
    }

    pub fn open_in_memory(thresholds: PlantConfig) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, thresholds)
    }

    fn from_connection(conn: Connection, thresholds: PlantConfig) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Arc::new(Mutex::new(conn)), thresholds };
        store.migrate_blocking()?;
        Ok(store)
    }

    fn migrate_blocking(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Task("connection lock poisoned".to_string()))
    }

    /// run `f` against the connection on a blocking thread
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &PlantConfig) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.lock()?;
            f(&mut conn, &store.thresholds)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// apply the schema; idempotent
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.blocking(|conn, _| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    /// create a user together with its plant record
    pub async fn create_user(
        &self,
        email: &str,
        first_name: &str,
        password_hash: &str,
    ) -> Result<i64, StoreError> {
        let email = email.trim().to_string();
        let first_name = first_name.to_string();
        let password_hash = password_hash.to_string();
        self.blocking(move |conn, _| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (email, first_name, password_hash) VALUES (?1, ?2, ?3)",
                params![email, first_name, password_hash],
            )?;
            let user_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO plants (user_id, system_status, plant_status) VALUES (?1, ?2, ?3)",
                params![user_id, SystemStatus::NotConnected, PLANT_STATUS_PENDING],
            )?;
            tx.commit()?;
            Ok(user_id)
        })
        .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.trim().to_string();
        self.blocking(move |conn, _| {
            let user = conn
                .query_row(
                    "SELECT id, email, first_name, password_hash FROM users WHERE email = ?1",
                    params![email],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        self.blocking(move |conn, _| {
            let user = conn
                .query_row(
                    "SELECT id, email, first_name, password_hash FROM users WHERE id = ?1",
                    params![user_id],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn plant(&self, user_id: i64) -> Result<Option<PlantRecord>, StoreError> {
        self.blocking(move |conn, _| {
            let record = conn
                .query_row(
                    "SELECT user_id, last_watered, soil_moisture, temperature, system_status, plant_status
                     FROM plants WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(PlantRecord {
                            user_id: row.get(0)?,
                            last_watered: row.get(1)?,
                            soil_moisture: row.get(2)?,
                            temperature: row.get(3)?,
                            system_status: row.get(4)?,
                            plant_status: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// write the latest reading into the user's record
    ///
    /// `NotFound` when the user has no record. On any error the transaction
    /// is rolled back and the previous values stay in place.
    pub async fn upsert_reading(&self, user_id: i64, reading: Reading) -> Result<(), StoreError> {
        self.blocking(move |conn, thresholds| {
            let tx = conn.transaction()?;
            let exists = tx
                .query_row(
                    "SELECT 1 FROM plants WHERE user_id = ?1",
                    params![user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound(user_id));
            }

            tx.execute(
                "UPDATE plants
                 SET temperature = ?2, soil_moisture = ?3, last_watered = ?4, plant_status = ?5
                 WHERE user_id = ?1",
                params![
                    user_id,
                    reading.temperature,
                    reading.soil_moisture,
                    reading.timestamp,
                    plant_status_label(reading.soil_moisture, thresholds),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn set_system_status(
        &self,
        user_id: i64,
        status: SystemStatus,
    ) -> Result<(), StoreError> {
        self.blocking(move |conn, _| {
            let updated = conn.execute(
                "UPDATE plants SET system_status = ?2 WHERE user_id = ?1",
                params![user_id, status],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(user_id));
            }
            Ok(())
        })
        .await
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

impl ToSql for SystemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// an unknown label is an error, never silently read as Not Connected
impl FromSql for SystemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        SystemStatus::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown system status {:?}", text).into()))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        password_hash: row.get(3)?,
    })
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(temperature: i32, soil_moisture: u8) -> Reading {
        Reading {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temperature,
            soil_moisture,
        }
    }

    async fn store_with_user() -> (PlantStore, i64) {
        let store = PlantStore::open_in_memory(PlantConfig::default()).unwrap();
        let id = store.create_user("ivy@example.com", "Ivy", "salt$hash").await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_new_user_gets_pending_record() {
        let (store, id) = store_with_user().await;
        let plant = store.plant(id).await.unwrap().unwrap();
        assert_eq!(plant.system_status, SystemStatus::NotConnected);
        assert_eq!(plant.plant_status, PLANT_STATUS_PENDING);
        assert_eq!(plant.last_watered, None);
        assert_eq!(plant.soil_moisture, 0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_latest() {
        let (store, id) = store_with_user().await;
        store.upsert_reading(id, reading(20, 10)).await.unwrap();
        store.upsert_reading(id, reading(22, 50)).await.unwrap();

        let plant = store.plant(id).await.unwrap().unwrap();
        assert_eq!(plant.temperature, 22);
        assert_eq!(plant.soil_moisture, 50);
        assert_eq!(plant.plant_status, "Healthy");
        assert_eq!(plant.last_watered, Some(reading(0, 0).timestamp));
    }

    #[tokio::test]
    async fn test_upsert_without_record_is_not_found() {
        let store = PlantStore::open_in_memory(PlantConfig::default()).unwrap();
        let err = store.upsert_reading(42, reading(22, 50)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_failed_upsert_leaves_record_untouched() {
        let (store, id) = store_with_user().await;
        store.upsert_reading(id, reading(18, 40)).await.unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER reject_update BEFORE UPDATE ON plants
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let err = store.upsert_reading(id, reading(30, 90)).await.unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));

        let plant = store.plant(id).await.unwrap().unwrap();
        assert_eq!(plant.temperature, 18);
        assert_eq!(plant.soil_moisture, 40);
    }

    #[tokio::test]
    async fn test_system_status_round_trip() {
        let (store, id) = store_with_user().await;
        store.set_system_status(id, SystemStatus::Connected).await.unwrap();
        assert_eq!(
            store.plant(id).await.unwrap().unwrap().system_status,
            SystemStatus::Connected
        );
        assert!(matches!(
            store.set_system_status(id + 1, SystemStatus::Connected).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_system_status_is_an_error() {
        let (store, id) = store_with_user().await;
        store
            .execute_batch("UPDATE plants SET system_status = 'Sideways'")
            .unwrap();

        let err = store.plant(id).await.unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert!(err.to_string().contains("Sideways"));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (store, _) = store_with_user().await;
        assert!(store.create_user("ivy@example.com", "Other", "x$y").await.is_err());
        let found = store.find_user_by_email(" ivy@example.com ").await.unwrap().unwrap();
        assert_eq!(found.first_name, "Ivy");
        assert_eq!(store.user(found.id).await.unwrap(), Some(found));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plants.db");
        let id = {
            let store = PlantStore::open(&path, PlantConfig::default()).unwrap();
            let id = store.create_user("moss@example.com", "Moss", "s$h").await.unwrap();
            store.upsert_reading(id, reading(21, 33)).await.unwrap();
            id
        };

        let reopened = PlantStore::open(&path, PlantConfig::default()).unwrap();
        reopened.migrate().await.unwrap();
        let plant = reopened.plant(id).await.unwrap().unwrap();
        assert_eq!(plant.temperature, 21);
        assert_eq!(plant.soil_moisture, 33);
    }
}
