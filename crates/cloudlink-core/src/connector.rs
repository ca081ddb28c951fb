//! Network connector: station join with bounded retry, access-point fallback.
//!
//! ```text
//!                  network name set
//!   Disconnected ──────────────────▶ ConnectingStation ──link up──▶ ConnectedStation
//!        │                                 │
//!        │ no network name                 │ rejected / budget exhausted
//!        ▼                                 ▼
//!   AccessPointActive ◀────────────────────┘
//! ```
//!
//! The connector runs once per boot cycle. Both end states are stable until
//! the device restarts.

use std::net::Ipv4Addr;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, PollPolicy};
use crate::config::AccessPointSettings;
use crate::credentials::Credentials;
use crate::sink::{StatusLines, StatusSink};

/// Connectivity of the device, owned by the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    ConnectingStation,
    ConnectedStation,
    AccessPointActive,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ConnectingStation => "connecting",
            ConnectionState::ConnectedStation => "station",
            ConnectionState::AccessPointActive => "access-point",
        }
    }
}

/// Station link status as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Errors raised by a radio driver.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio driver error: {0}")]
    Driver(String),

    #[error("invalid network parameter: {0}")]
    InvalidParameter(String),
}

/// Errors raised by [`NetworkConnector::connect`].
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// `connect` was already called in this boot cycle.
    #[error("connector already ran in this boot cycle")]
    AlreadyStarted,

    /// The fallback access point could not be started.
    #[error("access point failed to start after {attempts} attempts: {source}")]
    AccessPointUnavailable {
        attempts: u32,
        #[source]
        source: RadioError,
    },
}

/// Wireless radio driver.
///
/// Join requests must return immediately; completion is observed through
/// [`Radio::station_status`].
pub trait Radio {
    /// Tear down any station link and access point.
    fn disconnect_all(&mut self);

    /// Issue a station join request.
    fn begin_station(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError>;

    fn station_status(&mut self) -> LinkStatus;

    /// Address assigned to the station interface, once connected.
    fn station_address(&self) -> Option<Ipv4Addr>;

    /// Enable reconnection after link loss and persist the radio configuration.
    fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), RadioError>;

    /// Start an access point and return its local address.
    fn start_access_point(
        &mut self,
        settings: &AccessPointSettings,
    ) -> Result<Ipv4Addr, RadioError>;
}

impl<N: Radio + ?Sized> Radio for Box<N> {
    fn disconnect_all(&mut self) {
        (**self).disconnect_all()
    }

    fn begin_station(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError> {
        (**self).begin_station(ssid, secret)
    }

    fn station_status(&mut self) -> LinkStatus {
        (**self).station_status()
    }

    fn station_address(&self) -> Option<Ipv4Addr> {
        (**self).station_address()
    }

    fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), RadioError> {
        (**self).set_auto_reconnect(enabled)
    }

    fn start_access_point(
        &mut self,
        settings: &AccessPointSettings,
    ) -> Result<Ipv4Addr, RadioError> {
        (**self).start_access_point(settings)
    }
}

/// Drives the radio between station and access-point mode.
pub struct NetworkConnector<N: Radio> {
    radio: N,
    state: ConnectionState,
    station: PollPolicy,
    access_point: AccessPointSettings,
    started: bool,
    station_polls: u32,
    address: Option<Ipv4Addr>,
}

impl<N: Radio> NetworkConnector<N> {
    pub fn new(radio: N, station: PollPolicy, access_point: AccessPointSettings) -> Self {
        Self {
            radio,
            state: ConnectionState::Disconnected,
            station,
            access_point,
            started: false,
            station_polls: 0,
            address: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Local address in the current mode, if any.
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    /// True once [`Self::connect`] has run in this boot cycle.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Link status polls spent on the station join.
    pub fn station_polls(&self) -> u32 {
        self.station_polls
    }

    pub fn radio(&self) -> &N {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut N {
        &mut self.radio
    }

    pub fn access_point(&self) -> &AccessPointSettings {
        &self.access_point
    }

    /// Bring the network up: station mode if a network is stored, otherwise
    /// or on failure the fallback access point.
    pub fn connect<C, S>(
        &mut self,
        credentials: &Credentials,
        clock: &C,
        sink: &mut S,
    ) -> Result<ConnectionState, ConnectorError>
    where
        C: Clock + ?Sized,
        S: StatusSink + ?Sized,
    {
        if self.started {
            return Err(ConnectorError::AlreadyStarted);
        }
        self.started = true;

        self.radio.disconnect_all();

        if !credentials.has_network() {
            info!("No stored network, skipping station mode");
            return self.activate_access_point(sink);
        }

        if self.join_station(credentials, clock, sink) {
            return Ok(self.state);
        }

        self.radio.disconnect_all();
        self.activate_access_point(sink)
    }

    fn join_station<C, S>(&mut self, credentials: &Credentials, clock: &C, sink: &mut S) -> bool
    where
        C: Clock + ?Sized,
        S: StatusSink + ?Sized,
    {
        let ssid = &credentials.network_name;
        self.state = ConnectionState::ConnectingStation;
        sink.show(&StatusLines::new("Connecting to", ssid.as_str(), "Please wait..."));
        info!("Attempting connection to '{}'", ssid);

        if let Err(e) = self
            .radio
            .begin_station(ssid, &credentials.network_secret)
        {
            warn!("Join request for '{}' rejected: {}", ssid, e);
            return false;
        }

        let radio = &mut self.radio;
        let outcome = self.station.wait(clock, "station join", || {
            radio.station_status() == LinkStatus::Connected
        });
        self.station_polls = outcome.attempts();

        if !outcome.is_ready() {
            warn!(
                "Connection to '{}' failed after {} polls",
                ssid,
                outcome.attempts()
            );
            return false;
        }

        if let Err(e) = self.radio.set_auto_reconnect(true) {
            warn!("Could not enable auto-reconnect: {}", e);
        }

        self.address = self.radio.station_address();
        let address = self
            .address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("Connected to '{}', local address {}", ssid, address);
        debug!("Station join took {} polls", outcome.attempts());

        self.state = ConnectionState::ConnectedStation;
        sink.show(&StatusLines::new("Connected", ssid.as_str(), address));
        true
    }

    fn activate_access_point<S>(&mut self, sink: &mut S) -> Result<ConnectionState, ConnectorError>
    where
        S: StatusSink + ?Sized,
    {
        let attempts = self.access_point.start_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.radio.start_access_point(&self.access_point) {
                Ok(address) => {
                    info!(
                        "Access point '{}' started, portal at http://{}/",
                        self.access_point.ssid, address
                    );
                    self.address = Some(address);
                    self.state = ConnectionState::AccessPointActive;
                    sink.show(&StatusLines::new(
                        "AP Mode",
                        self.access_point.ssid.as_str(),
                        address.to_string(),
                    ));
                    return Ok(self.state);
                }
                Err(e) => {
                    warn!("Access point start failed ({}/{}): {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        self.state = ConnectionState::Disconnected;
        let source = last_error
            .unwrap_or_else(|| RadioError::Driver("access point never attempted".to_string()));
        error!("Access point unavailable: {}", source);
        sink.show(&StatusLines::new("AP failed", self.access_point.ssid.as_str(), "Restarting..."));
        Err(ConnectorError::AccessPointUnavailable { attempts, source })
    }
}
