use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PlantConfig;

/// display format for timestamps in the UI and status JSON
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// one successful sensor cycle
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// degrees celsius as reported by the sensor
    pub temperature: i32,
    /// 0-100
    pub soil_moisture: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    #[serde(rename = "Connected")]
    Connected,
    #[serde(rename = "Not Connected")]
    NotConnected,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Connected => "Connected",
            SystemStatus::NotConnected => "Not Connected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Connected" => Some(SystemStatus::Connected),
            "Not Connected" => Some(SystemStatus::NotConnected),
            _ => None,
        }
    }
}

/// account row; the hash is an argon2 PHC string
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub password_hash: String,
}

/// per-user persisted plant state
#[derive(Clone, Debug, PartialEq)]
pub struct PlantRecord {
    pub user_id: i64,
    pub last_watered: Option<DateTime<Utc>>,
    pub soil_moisture: u8,
    pub temperature: i32,
    pub system_status: SystemStatus,
    pub plant_status: String,
}

/// label stored before the first reading arrives
pub const PLANT_STATUS_PENDING: &str = "Not Connected";

/// derive the plant label from the latest moisture
pub fn plant_status_label(soil_moisture: u8, thresholds: &PlantConfig) -> &'static str {
    if soil_moisture < thresholds.thirsty_below {
        "Needs Water"
    } else if soil_moisture > thresholds.soaked_above {
        "Overwatered"
    } else {
        "Healthy"
    }
}

/// body of `GET /system`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub last_watered: Option<String>,
    pub soil_moisture: u8,
    pub temperature: i32,
    pub system_status: String,
    pub plant_status: String,
}

impl StatusView {
    /// sentinel served when a user has no plant record
    pub fn unknown() -> Self {
        Self {
            last_watered: Some("Unknown".to_string()),
            soil_moisture: 0,
            temperature: 0,
            system_status: "Unknown".to_string(),
            plant_status: "Unknown".to_string(),
        }
    }
}

impl From<&PlantRecord> for StatusView {
    fn from(record: &PlantRecord) -> Self {
        Self {
            last_watered: record
                .last_watered
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()),
            soil_moisture: record.soil_moisture,
            temperature: record.temperature,
            system_status: record.system_status.as_str().to_string(),
            plant_status: record.plant_status.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_serializes_with_space() {
        let json = serde_json::to_string(&SystemStatus::NotConnected).unwrap();
        assert_eq!(json, "\"Not Connected\"");
        assert_eq!(SystemStatus::parse("Connected"), Some(SystemStatus::Connected));
        assert_eq!(SystemStatus::parse("connected"), None);
    }

    #[test]
    fn test_plant_status_thresholds() {
        let thresholds = PlantConfig::default();
        assert_eq!(plant_status_label(0, &thresholds), "Needs Water");
        assert_eq!(plant_status_label(29, &thresholds), "Needs Water");
        assert_eq!(plant_status_label(30, &thresholds), "Healthy");
        assert_eq!(plant_status_label(90, &thresholds), "Healthy");
        assert_eq!(plant_status_label(91, &thresholds), "Overwatered");
    }

    #[test]
    fn test_status_view_from_record() {
        let record = PlantRecord {
            user_id: 7,
            last_watered: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()),
            soil_moisture: 50,
            temperature: 22,
            system_status: SystemStatus::Connected,
            plant_status: "Healthy".to_string(),
        };
        let view = StatusView::from(&record);
        assert_eq!(view.last_watered.as_deref(), Some("2024-05-01 08:30:00"));
        assert_eq!(view.system_status, "Connected");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["soil_moisture"], 50);
        assert_eq!(json["temperature"], 22);
    }

    #[test]
    fn test_unknown_sentinel_shape() {
        let json = serde_json::to_value(StatusView::unknown()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "last_watered": "Unknown",
                "soil_moisture": 0,
                "temperature": 0,
                "system_status": "Unknown",
                "plant_status": "Unknown",
            })
        );
    }
}
