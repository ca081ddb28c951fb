//! Device configuration.
//!
//! Every section is `#[serde(default)]`, so a configuration file only needs to
//! name the values it changes:
//! - Linux: TOML file passed with `--config`
//! - ESP32: compiled defaults plus build-time secrets
//!
//! Defaults reproduce the behavior of the shipping firmware.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::PollPolicy;

/// Errors found while validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the lifecycle cannot work with.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Complete device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub access_point: AccessPointSettings,
    pub station: StationSettings,
    pub portal: PortalSettings,
    pub cloud: CloudConfig,
    pub maintenance: MaintenanceSettings,
}

/// Fallback access point hosting the config portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPointSettings {
    /// Well-known network name.
    pub ssid: String,
    /// Empty for an open network.
    pub password: String,
    /// Local address of the device on its own network.
    pub address: Ipv4Addr,
    /// Radio channel.
    pub channel: u8,
    /// Tries before the access point is declared unavailable.
    pub start_attempts: u32,
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            ssid: "ESP32_Config_Portal".to_string(),
            password: String::new(),
            address: Ipv4Addr::new(192, 168, 4, 1),
            channel: 1,
            start_attempts: 3,
        }
    }
}

/// Station join polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            interval_ms: 400,
            max_attempts: 50,
        }
    }
}

impl StationSettings {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::new(self.interval_ms, self.max_attempts)
    }
}

/// Config portal behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    /// HTTP port on the device.
    pub port: u16,
    /// Delay between answering a mutating request and restarting.
    pub restart_delay_ms: u64,
    /// Title shown on the portal page.
    pub title: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            port: 80,
            restart_delay_ms: 2000,
            title: "ESP32 WiFi Configuration".to_string(),
        }
    }
}

impl PortalSettings {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Cloud realtime database session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub api_key: String,
    pub database_url: String,
    pub user_email: String,
    pub user_password: String,

    /// Path whose value changes are streamed to the display.
    pub watch_path: String,
    /// Path read once per update for the "last updated" line.
    pub last_updated_path: String,
    /// Shown when the "last updated" read fails.
    pub placeholder: String,

    pub time_servers: Vec<String>,
    pub utc_offset_secs: i32,

    pub time_sync_interval_ms: u64,
    pub time_sync_max_attempts: u32,
    pub token_interval_ms: u64,
    pub token_max_attempts: u32,

    /// Silence on the stream longer than this counts as a timeout.
    pub stream_timeout_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            database_url: String::new(),
            user_email: String::new(),
            user_password: String::new(),
            watch_path: "/texts/sample_text".to_string(),
            last_updated_path: "/texts/last_updated".to_string(),
            placeholder: "-".to_string(),
            time_servers: vec!["pool.ntp.org".to_string(), "time.nist.gov".to_string()],
            utc_offset_secs: 28_800,
            time_sync_interval_ms: 500,
            time_sync_max_attempts: 120,
            token_interval_ms: 300,
            token_max_attempts: 100,
            stream_timeout_ms: 45_000,
        }
    }
}

/// POSIX `TZ` value for a fixed offset east of UTC.
///
/// POSIX counts the other way round, so UTC+8 is `UTC-08`.
pub fn posix_timezone(utc_offset_secs: i32) -> String {
    let sign = if utc_offset_secs > 0 { '-' } else { '+' };
    let offset = utc_offset_secs.unsigned_abs();
    let (hours, minutes) = (offset / 3600, offset % 3600 / 60);
    if minutes == 0 {
        format!("UTC{}{:02}", sign, hours)
    } else {
        format!("UTC{}{:02}:{:02}", sign, hours, minutes)
    }
}

impl CloudConfig {
    /// Local timezone as a POSIX `TZ` value.
    pub fn timezone(&self) -> String {
        posix_timezone(self.utc_offset_secs)
    }

    pub fn time_sync_policy(&self) -> PollPolicy {
        PollPolicy::new(self.time_sync_interval_ms, self.time_sync_max_attempts)
    }

    pub fn token_policy(&self) -> PollPolicy {
        PollPolicy::new(self.token_interval_ms, self.token_max_attempts)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    /// True when enough is set to talk to a real database.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.database_url.is_empty()
    }
}

/// Control loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub token_check_interval_ms: u64,
    pub loop_interval_ms: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            token_check_interval_ms: 5_000,
            loop_interval_ms: 10,
        }
    }
}

impl MaintenanceSettings {
    pub fn token_check_interval(&self) -> Duration {
        Duration::from_millis(self.token_check_interval_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

impl DeviceConfig {
    /// Reject values that would make a wait unbounded or a radio call fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ap = &self.access_point;
        if ap.ssid.is_empty() || ap.ssid.len() > 32 {
            return Err(invalid("access_point.ssid", "must be 1 to 32 bytes"));
        }
        if !ap.password.is_empty() && !(8..=63).contains(&ap.password.len()) {
            return Err(invalid(
                "access_point.password",
                "must be empty (open network) or 8 to 63 bytes",
            ));
        }
        if ap.start_attempts == 0 {
            return Err(invalid("access_point.start_attempts", "must be at least 1"));
        }

        if self.station.max_attempts == 0 || self.station.interval_ms == 0 {
            return Err(invalid("station", "poll interval and attempts must be non-zero"));
        }

        let cloud = &self.cloud;
        for (field, path) in [
            ("cloud.watch_path", &cloud.watch_path),
            ("cloud.last_updated_path", &cloud.last_updated_path),
        ] {
            if !path.starts_with('/') {
                return Err(invalid(field, format!("'{}' must start with '/'", path)));
            }
        }
        if cloud.time_sync_max_attempts == 0 || cloud.token_max_attempts == 0 {
            return Err(invalid("cloud", "time sync and token attempts must be non-zero"));
        }
        if cloud.stream_timeout_ms == 0 {
            return Err(invalid("cloud.stream_timeout_ms", "must be non-zero"));
        }

        if self.maintenance.token_check_interval_ms == 0 {
            return Err(invalid("maintenance.token_check_interval_ms", "must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = DeviceConfig::default();
        config.validate().unwrap();

        assert_eq!(config.station.policy().ceiling(), Duration::from_secs(20));
        assert_eq!(config.portal.restart_delay(), Duration::from_secs(2));
        assert_eq!(config.access_point.ssid, "ESP32_Config_Portal");
        assert!(config.access_point.password.is_empty());
        assert!(!config.cloud.is_configured());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DeviceConfig = toml::from_str(
            r#"
            [station]
            max_attempts = 20

            [cloud]
            api_key = "key"
            database_url = "https://example.firebaseio.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.station.max_attempts, 20);
        assert_eq!(config.station.interval_ms, 400);
        assert_eq!(config.cloud.watch_path, "/texts/sample_text");
        assert_eq!(config.access_point.address, Ipv4Addr::new(192, 168, 4, 1));
        assert!(config.cloud.is_configured());
    }

    #[test]
    fn test_ap_address_from_toml() {
        let config: DeviceConfig = toml::from_str(
            r#"
            [access_point]
            ssid = "Setup"
            address = "10.0.0.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.access_point.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.access_point.start_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_short_ap_password() {
        let mut config = DeviceConfig::default();
        config.access_point.password = "short".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("access_point.password"));
    }

    #[test]
    fn test_validate_rejects_unbounded_station_wait() {
        let mut config = DeviceConfig::default();
        config.station.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_watch_path() {
        let mut config = DeviceConfig::default();
        config.cloud.watch_path = "texts/sample_text".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cloud.watch_path"));
    }

    #[test]
    fn test_posix_timezone() {
        assert_eq!(CloudConfig::default().timezone(), "UTC-08");
        assert_eq!(posix_timezone(0), "UTC+00");
        assert_eq!(posix_timezone(-5 * 3600), "UTC+05");
        assert_eq!(posix_timezone(19_800), "UTC-05:30");
    }
}
