//! A radio simulated from the `[simulation]` config section.
//!
//! A join succeeds when the name and password match a configured network,
//! after that network's `join_polls` status polls. Anything else keeps
//! reporting `Connecting` until the connector gives up.

use std::net::Ipv4Addr;

use cloudlink_core::config::AccessPointSettings;
use cloudlink_core::{LinkStatus, Radio, RadioError};
use tracing::{debug, info};

use crate::config::{SimulatedNetwork, SimulationSettings};

#[derive(Debug)]
enum Link {
    Down,
    Joining {
        network: Option<SimulatedNetwork>,
        polls: u32,
    },
    Up(SimulatedNetwork),
    AccessPoint(Ipv4Addr),
}

#[derive(Debug)]
pub struct SimulatedRadio {
    settings: SimulationSettings,
    link: Link,
    auto_reconnect: bool,
}

impl SimulatedRadio {
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            settings,
            link: Link::Down,
            auto_reconnect: false,
        }
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn access_point_address(&self) -> Option<Ipv4Addr> {
        match self.link {
            Link::AccessPoint(address) => Some(address),
            _ => None,
        }
    }
}

impl Radio for SimulatedRadio {
    fn disconnect_all(&mut self) {
        self.link = Link::Down;
    }

    fn begin_station(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError> {
        let network = self
            .settings
            .networks
            .iter()
            .find(|n| n.ssid == ssid && n.password == secret)
            .cloned();
        if network.is_none() {
            debug!("'{}' not reachable with the given password", ssid);
        }
        self.link = Link::Joining { network, polls: 0 };
        Ok(())
    }

    fn station_status(&mut self) -> LinkStatus {
        match &mut self.link {
            Link::Up(_) => LinkStatus::Connected,
            Link::Joining {
                network: Some(network),
                polls,
            } => {
                *polls += 1;
                if *polls >= network.join_polls {
                    let network = network.clone();
                    info!("Simulated link up on '{}'", network.ssid);
                    self.link = Link::Up(network);
                    LinkStatus::Connected
                } else {
                    LinkStatus::Connecting
                }
            }
            Link::Joining { network: None, .. } => LinkStatus::Connecting,
            Link::Down | Link::AccessPoint(_) => LinkStatus::Idle,
        }
    }

    fn station_address(&self) -> Option<Ipv4Addr> {
        match &self.link {
            Link::Up(network) => Some(network.address),
            _ => None,
        }
    }

    fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.auto_reconnect = enabled;
        Ok(())
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<Ipv4Addr, RadioError> {
        if !self.settings.access_point_available {
            return Err(RadioError::Driver("simulated access point unavailable".to_string()));
        }
        info!("Simulated access point '{}' on {}", settings.ssid, settings.address);
        self.link = Link::AccessPoint(settings.address);
        Ok(settings.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudlink_core::{ConnectionState, Credentials, LogSink, ManualClock, NetworkConnector, PollPolicy};
    use pretty_assertions::assert_eq;

    fn settings() -> SimulationSettings {
        SimulationSettings {
            networks: vec![SimulatedNetwork {
                ssid: "HomeNet".to_string(),
                password: "secret123".to_string(),
                address: Ipv4Addr::new(10, 0, 0, 7),
                join_polls: 2,
            }],
            access_point_available: true,
        }
    }

    fn connector(settings: SimulationSettings) -> NetworkConnector<SimulatedRadio> {
        NetworkConnector::new(
            SimulatedRadio::new(settings),
            PollPolicy::new(400, 50),
            AccessPointSettings::default(),
        )
    }

    #[test]
    fn test_known_network_joins_after_polls() {
        let mut radio = SimulatedRadio::new(settings());
        radio.begin_station("HomeNet", "secret123").unwrap();

        assert_eq!(radio.station_status(), LinkStatus::Connecting);
        assert_eq!(radio.station_address(), None);
        assert_eq!(radio.station_status(), LinkStatus::Connected);
        assert_eq!(radio.station_address(), Some(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn test_wrong_password_never_joins() {
        let mut radio = SimulatedRadio::new(settings());
        radio.begin_station("HomeNet", "wrong").unwrap();

        for _ in 0..10 {
            assert_eq!(radio.station_status(), LinkStatus::Connecting);
        }
    }

    #[test]
    fn test_connector_reaches_station() {
        let mut connector = connector(settings());
        let clock = ManualClock::new();

        let state = connector
            .connect(
                &Credentials::new("HomeNet", "secret123", "dev-42"),
                &clock,
                &mut LogSink,
            )
            .unwrap();

        assert_eq!(state, ConnectionState::ConnectedStation);
        assert!(connector.radio().auto_reconnect());
    }

    #[test]
    fn test_connector_falls_back_to_access_point() {
        let mut connector = connector(settings());
        let clock = ManualClock::new();

        let state = connector
            .connect(&Credentials::new("Cafe", "", "dev-42"), &clock, &mut LogSink)
            .unwrap();

        assert_eq!(state, ConnectionState::AccessPointActive);
        assert_eq!(
            connector.radio().access_point_address(),
            Some(Ipv4Addr::new(192, 168, 4, 1))
        );
    }

    #[test]
    fn test_unavailable_access_point_is_an_error() {
        let mut radio = SimulatedRadio::new(SimulationSettings {
            access_point_available: false,
            ..settings()
        });

        assert!(radio.start_access_point(&AccessPointSettings::default()).is_err());
    }
}
