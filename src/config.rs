//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `plant.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: bind address and port (PORT env overrides the port).
//!     - PollingConfig: poll cadence, sensor read timeout, failure backoff.
//!     - SensorsConfig: DHT11 GPIO pin, ADS1115 I2C address/channel, mock values.
//!     - CalibrationConfig: dry/wet reference voltages for the moisture sensor.
//!     - PlantConfig: moisture thresholds behind the plant status label.
//!     - SessionConfig: login lifetime, idle expiry and the sweep cadence.
//!     - LoggingConfig: level, format, optional rolling log files.
//!     - SeedUser: accounts provisioned at startup.
//!
//! every section is optional in the file; missing keys take the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::Calibration;

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "PLANT_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub sensors: SensorsConfig,
    pub calibration: CalibrationConfig,
    pub plant: PlantConfig,
    pub database: DatabaseConfig,
    pub sessions: SessionConfig,
    pub logging: LoggingConfig,
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub sensor_timeout_ms: u64,
    pub failure_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    /// pollers asking within this window share one sample
    pub share_window_ms: u64,
    pub dht11: Dht11Config,
    pub ads1115: Ads1115Config,
    pub mock: MockSensorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Dht11Config {
    pub gpio_pin: u8,
    /// the python helper is killed after this long
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Ads1115Config {
    pub i2c_address: String,
    pub channel: u8,
}

/// values served by the mock HAL when built without `hardware`
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MockSensorConfig {
    pub temperature: i32,
    pub moisture_voltage: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationConfig {
    pub dry_voltage: f64,
    pub wet_voltage: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlantConfig {
    pub thirsty_below: u8,
    pub soaked_above: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// absolute lifetime; also the cookie Max-Age
    pub ttl_seconds: u64,
    /// a session unused for this long expires
    pub idle_seconds: u64,
    /// how often expired sessions are swept
    pub sweep_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub show_sensor_data: bool,
    /// when set, logs are also written to rolling files here
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub rotation: LogRotation,
    /// rotated files kept on disk
    pub max_files: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedUser {
    pub email: String,
    pub first_name: String,
    pub password: String,
}

/// outcome of config discovery, reported once logging is up
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: MonitorConfig,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: MonitorConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// an explicit `PLANT_CONFIG` path must load; the conventional locations
    /// are tried in order and skipped with a warning when broken.
    pub fn load_or_default() -> anyhow::Result<LoadedConfig> {
        let mut warnings = Vec::new();

        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(explicit);
            let mut config = Self::load(&path)?;
            config.apply_env_overrides(&mut warnings);
            return Ok(LoadedConfig { config, source: Some(path), warnings });
        }

        let paths = [
            PathBuf::from("config").join("plant.toml"),
            PathBuf::from("..").join("config").join("plant.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut config) => {
                        config.apply_env_overrides(&mut warnings);
                        return Ok(LoadedConfig {
                            config,
                            source: Some(path.clone()),
                            warnings,
                        });
                    }
                    Err(e) => {
                        warnings.push(format!("Failed to load {}: {}", path.display(), e));
                    }
                }
            }
        }

        warnings.push("No config file found - using defaults".to_string());
        let mut config = Self::default();
        config.apply_env_overrides(&mut warnings);
        Ok(LoadedConfig { config, source: None, warnings })
    }

    fn apply_env_overrides(&mut self, warnings: &mut Vec<String>) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warnings.push(format!("Ignoring unparsable PORT={}", port)),
            }
        }
    }

    /// Reject settings the poller cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling.interval_seconds == 0 {
            anyhow::bail!("polling.interval_seconds must be at least 1");
        }
        if self.polling.sensor_timeout_ms == 0 {
            anyhow::bail!("polling.sensor_timeout_ms must be at least 1");
        }
        if self.sensors.dht11.read_timeout_ms == 0
            || self.sensors.dht11.read_timeout_ms > self.polling.sensor_timeout_ms
        {
            anyhow::bail!(
                "sensors.dht11.read_timeout_ms must be between 1 and polling.sensor_timeout_ms ({})",
                self.polling.sensor_timeout_ms
            );
        }
        self.calibration.to_calibration()?;
        self.sensors.ads1115.address()?;
        if self.sensors.ads1115.channel > 3 {
            anyhow::bail!(
                "sensors.ads1115.channel must be 0-3, got {}",
                self.sensors.ads1115.channel
            );
        }
        if self.sessions.ttl_seconds == 0
            || self.sessions.idle_seconds == 0
            || self.sessions.sweep_seconds == 0
        {
            anyhow::bail!("sessions.ttl_seconds, idle_seconds and sweep_seconds must be at least 1");
        }
        if self.logging.directory.is_some() && self.logging.max_files == 0 {
            anyhow::bail!("logging.max_files must be at least 1");
        }
        if self.plant.thirsty_below > self.plant.soaked_above {
            anyhow::bail!("plant.thirsty_below must not exceed plant.soaked_above");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_seconds)
    }
}

impl SensorsConfig {
    pub fn share_window(&self) -> Duration {
        Duration::from_millis(self.share_window_ms)
    }
}

impl Dht11Config {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl CalibrationConfig {
    pub fn to_calibration(&self) -> anyhow::Result<Calibration> {
        Calibration::new(self.dry_voltage, self.wet_voltage)
            .map_err(|e| anyhow::anyhow!("invalid calibration: {}", e))
    }
}

impl Ads1115Config {
    /// parse "0x48" / "72" into a 7-bit address
    pub fn address(&self) -> anyhow::Result<u8> {
        let raw = self.i2c_address.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => raw.parse::<u8>(),
        };
        match parsed {
            Ok(addr) if addr <= 0x7F => Ok(addr),
            _ => anyhow::bail!("invalid sensors.ads1115.i2c_address {:?}", self.i2c_address),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 5000 }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 5, sensor_timeout_ms: 2000, failure_backoff_ms: 5000 }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            share_window_ms: 1000,
            dht11: Dht11Config::default(),
            ads1115: Ads1115Config::default(),
            mock: MockSensorConfig::default(),
        }
    }
}

impl Default for Dht11Config {
    fn default() -> Self {
        Self { gpio_pin: 4, read_timeout_ms: 1500 }
    }
}

impl Default for Ads1115Config {
    fn default() -> Self {
        Self { i2c_address: "0x48".to_string(), channel: 0 }
    }
}

impl Default for MockSensorConfig {
    fn default() -> Self {
        Self { temperature: 22, moisture_voltage: 1.9 }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { dry_voltage: 1.0, wet_voltage: 2.8 }
    }
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self { thirsty_below: 30, soaked_above: 90 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("plant-monitor.db") }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_seconds: 12 * 60 * 60, idle_seconds: 30 * 60, sweep_seconds: 60 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            show_sensor_data: false,
            directory: None,
            file_prefix: "app".to_string(),
            rotation: LogRotation::Daily,
            max_files: 10,
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.polling.interval(), Duration::from_secs(5));
        assert_eq!(config.sensors.ads1115.address().unwrap(), 0x48);
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
[polling]
interval_seconds = 10

[calibration]
dry_voltage = 0.8

[[users]]
email = "fern@example.com"
first_name = "Fern"
password = "photosynthesis"
"#,
        )
        .unwrap();

        assert_eq!(config.polling.interval_seconds, 10);
        assert_eq!(config.polling.sensor_timeout_ms, 2000);
        assert_eq!(config.calibration.dry_voltage, 0.8);
        assert_eq!(config.calibration.wet_voltage, 2.8);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].first_name, "Fern");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_json_log_format() {
        let config = MonitorConfig::from_toml("[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.directory, None);
    }

    #[test]
    fn test_log_file_settings() {
        let config = MonitorConfig::from_toml(
            "[logging]\ndirectory = \"logs\"\nrotation = \"hourly\"\nmax_files = 3\n",
        )
        .unwrap();
        assert_eq!(config.logging.directory, Some(PathBuf::from("logs")));
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
        assert_eq!(config.logging.max_files, 3);
        assert_eq!(config.logging.file_prefix, "app");

        assert!(MonitorConfig::from_toml("[logging]\ndirectory = \"logs\"\nmax_files = 0\n").is_err());
    }

    #[test]
    fn test_rejects_equal_calibration_voltages() {
        let err = MonitorConfig::from_toml(
            "[calibration]\ndry_voltage = 2.0\nwet_voltage = 2.0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("calibration"));
    }

    #[test]
    fn test_rejects_zero_interval() {
        assert!(MonitorConfig::from_toml("[polling]\ninterval_seconds = 0\n").is_err());
    }

    #[test]
    fn test_i2c_address_forms() {
        let mut ads = Ads1115Config::default();
        ads.i2c_address = "72".to_string();
        assert_eq!(ads.address().unwrap(), 0x48);
        ads.i2c_address = "0x49".to_string();
        assert_eq!(ads.address().unwrap(), 0x49);
        ads.i2c_address = "0x80".to_string();
        assert!(ads.address().is_err());
        ads.i2c_address = "bogus".to_string();
        assert!(ads.address().is_err());
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join("plant.toml");
        let config = MonitorConfig::load(path).unwrap();
        assert_eq!(config.server.port, 5000);
        assert!(config.logging.show_sensor_data);
        assert_eq!(config.users[0].email, "gardener@example.com");
    }

    #[test]
    fn test_session_and_dht_limits() {
        let config = MonitorConfig::default();
        assert_eq!(config.sessions.ttl(), Duration::from_secs(43200));
        assert_eq!(config.sessions.idle(), Duration::from_secs(1800));
        assert_eq!(config.sensors.dht11.read_timeout(), Duration::from_millis(1500));

        assert!(MonitorConfig::from_toml("[sessions]\nidle_seconds = 0\n").is_err());
        // the helper must be reaped before the poller gives up on it
        assert!(MonitorConfig::from_toml("[sensors.dht11]\nread_timeout_ms = 2500\n").is_err());
        assert!(MonitorConfig::from_toml(
            "[polling]\nsensor_timeout_ms = 3000\n[sensors.dht11]\nread_timeout_ms = 2500\n"
        )
        .is_ok());
    }

    #[test]
    fn test_rejects_bad_channel() {
        assert!(MonitorConfig::from_toml("[sensors.ads1115]\nchannel = 4\n").is_err());
    }
}
