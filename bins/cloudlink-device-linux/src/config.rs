//! Host configuration: the device sections plus the host-only simulation
//! and demo settings, loaded from one TOML file.

use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::Context;
use cloudlink_core::DeviceConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(flatten)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub demo: DemoSettings,
}

impl HostConfig {
    /// Read and validate `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(text)?;
        config.device.validate()?;
        Ok(config)
    }
}

/// Networks the simulated radio can see.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub networks: Vec<SimulatedNetwork>,
    /// When false every access point start fails.
    pub access_point_available: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            access_point_available: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedNetwork {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_station_address")]
    pub address: Ipv4Addr,
    /// Status polls before the link comes up.
    #[serde(default = "default_join_polls")]
    pub join_polls: u32,
}

fn default_station_address() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, 50)
}

fn default_join_polls() -> u32 {
    3
}

/// Local stand-in for the realtime database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Interval between generated values.
    pub interval_ms: u64,
    /// Lifetime of an issued demo token.
    pub token_lifetime_secs: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            token_lifetime_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = HostConfig::parse("").unwrap();
        assert_eq!(config.device.portal.port, 80);
        assert!(config.simulation.networks.is_empty());
        assert!(config.simulation.access_point_available);
        assert_eq!(config.demo.interval_ms, 5000);
    }

    #[test]
    fn test_full_host_file() {
        let text = r#"
            [access_point]
            ssid = "Bench_Portal"

            [portal]
            port = 8080

            [cloud]
            watch_path = "/bench/value"

            [[simulation.networks]]
            ssid = "HomeNet"
            password = "secret123"
            join_polls = 1

            [[simulation.networks]]
            ssid = "Cafe"

            [demo]
            interval_ms = 250
        "#;

        let config = HostConfig::parse(text).unwrap();

        assert_eq!(config.device.access_point.ssid, "Bench_Portal");
        assert_eq!(config.device.portal.port, 8080);
        assert_eq!(config.device.cloud.watch_path, "/bench/value");
        assert_eq!(
            config.simulation.networks,
            vec![
                SimulatedNetwork {
                    ssid: "HomeNet".to_string(),
                    password: "secret123".to_string(),
                    address: Ipv4Addr::new(192, 168, 1, 50),
                    join_polls: 1,
                },
                SimulatedNetwork {
                    ssid: "Cafe".to_string(),
                    password: String::new(),
                    address: Ipv4Addr::new(192, 168, 1, 50),
                    join_polls: 3,
                },
            ]
        );
        assert_eq!(config.demo.interval_ms, 250);
        assert_eq!(config.demo.token_lifetime_secs, 3600);
    }

    #[test]
    fn test_invalid_device_section_rejected() {
        let err = HostConfig::parse("[cloud]\nwatch_path = \"texts\"\n").unwrap_err();
        assert!(err.to_string().contains("watch_path"));
    }
}
