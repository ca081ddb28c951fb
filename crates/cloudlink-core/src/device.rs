//! The device context object and its cooperative control loop.
//!
//! [`Device`] owns every stateful component of the lifecycle. A boot cycle is
//! [`Device::boot`] followed by [`Device::run`]; `run` returns once a restart
//! is due and the caller performs it (hardware reset on the device, rebuild
//! from storage on a host).

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::config::{DeviceConfig, MaintenanceSettings};
use crate::connector::{ConnectionState, ConnectorError, NetworkConnector, Radio};
use crate::credentials::Credentials;
use crate::portal::{ConfigPortal, PortalRequest, PortalResponse};
use crate::region::ByteRegion;
use crate::session::{CloudBackend, CloudSession, CloudSessionManager, TokenCheck};
use crate::sink::{StatusLines, StatusSink};
use crate::store::CredentialStore;
use crate::transport::PortalTransport;

/// Why the device asked to be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// New credentials were written by the portal.
    CredentialsSaved,
    /// Stored credentials were wiped by the portal.
    CredentialsWiped,
    /// The fallback access point could not be started.
    AccessPointUnavailable,
}

impl RestartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartReason::CredentialsSaved => "credentials saved",
            RestartReason::CredentialsWiped => "credentials wiped",
            RestartReason::AccessPointUnavailable => "access point unavailable",
        }
    }
}

/// Result of one control loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Restart(RestartReason),
}

/// What happened during [`Device::boot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub state: ConnectionState,
    pub credentials: Credentials,
    /// True when the cloud session came up during boot.
    pub cloud_ready: bool,
    /// Restart already scheduled by the boot sequence.
    pub restart: Option<RestartReason>,
}

#[derive(Debug, Clone, Copy)]
struct PendingRestart {
    at: Duration,
    reason: RestartReason,
}

/// Explicit context object for one boot cycle.
pub struct Device<R, N, B, C, S>
where
    R: ByteRegion,
    N: Radio,
    B: CloudBackend,
    C: Clock,
    S: StatusSink,
{
    store: CredentialStore<R>,
    connector: NetworkConnector<N>,
    session: CloudSessionManager<B>,
    portal: Option<ConfigPortal>,
    portal_title: String,
    restart_delay: Duration,
    maintenance: MaintenanceSettings,
    clock: C,
    sink: S,
    credentials: Credentials,
    pending_restart: Option<PendingRestart>,
    next_token_check: Duration,
}

impl<R, N, B, C, S> Device<R, N, B, C, S>
where
    R: ByteRegion,
    N: Radio,
    B: CloudBackend,
    C: Clock,
    S: StatusSink,
{
    pub fn new(config: &DeviceConfig, region: R, radio: N, backend: B, clock: C, sink: S) -> Self {
        Self {
            store: CredentialStore::new(region),
            connector: NetworkConnector::new(
                radio,
                config.station.policy(),
                config.access_point.clone(),
            ),
            session: CloudSessionManager::new(backend, config.cloud.clone()),
            portal: None,
            portal_title: config.portal.title.clone(),
            restart_delay: config.portal.restart_delay(),
            maintenance: config.maintenance.clone(),
            clock,
            sink,
            credentials: Credentials::default(),
            pending_restart: None,
            next_token_check: Duration::ZERO,
        }
    }

    /// Bring the device up: load credentials, connect, then start either the
    /// cloud session or the config portal.
    ///
    /// A failing cloud session does not fail the boot; the periodic token
    /// check keeps retrying it.
    pub fn boot(&mut self) -> Result<BootReport, ConnectorError> {
        if self.connector.started() {
            return Err(ConnectorError::AlreadyStarted);
        }

        self.sink
            .show(&StatusLines::new("CloudLink", "Starting up", "Please wait..."));

        self.credentials = self.store.load();

        let mut cloud_ready = false;
        let state = match self
            .connector
            .connect(&self.credentials, &self.clock, &mut self.sink)
        {
            Ok(ConnectionState::ConnectedStation) => {
                cloud_ready = self.start_cloud();
                ConnectionState::ConnectedStation
            }
            Ok(ConnectionState::AccessPointActive) => {
                self.portal = Some(ConfigPortal::new(self.portal_title.clone(), self.restart_delay));
                info!("Config portal active");
                ConnectionState::AccessPointActive
            }
            Ok(other) => other,
            Err(ConnectorError::AccessPointUnavailable { attempts, source }) => {
                warn!(
                    "No connectivity and no access point ({} attempts, last error: {}), restarting",
                    attempts, source
                );
                self.schedule_restart(RestartReason::AccessPointUnavailable);
                self.connector.state()
            }
            Err(e) => return Err(e),
        };

        Ok(BootReport {
            state,
            credentials: self.credentials.clone(),
            cloud_ready,
            restart: self.pending_restart.map(|p| p.reason),
        })
    }

    fn start_cloud(&mut self) -> bool {
        let result = self
            .session
            .initialize(&self.clock)
            .and_then(|()| self.session.subscribe());
        self.next_token_check = self.clock.now() + self.maintenance.token_check_interval();

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Cloud session not available yet: {}", e);
                false
            }
        }
    }

    fn schedule_restart(&mut self, reason: RestartReason) {
        if let Some(pending) = self.pending_restart {
            debug!("Restart already pending ({})", pending.reason.as_str());
            return;
        }
        self.pending_restart = Some(PendingRestart {
            at: self.clock.now() + self.restart_delay,
            reason,
        });
    }

    /// One cooperative iteration of the control loop.
    pub fn tick<T: PortalTransport + ?Sized>(&mut self, transport: &mut T) -> Tick {
        if let Some(pending) = self.pending_restart {
            if self.clock.now() >= pending.at {
                info!("Restarting: {}", pending.reason.as_str());
                return Tick::Restart(pending.reason);
            }
        }

        match self.connector.state() {
            ConnectionState::AccessPointActive => self.service_portal(transport),
            ConnectionState::ConnectedStation => self.maintain_session(),
            _ => {}
        }

        Tick::Continue
    }

    fn service_portal<T: PortalTransport + ?Sized>(&mut self, transport: &mut T) {
        let Some(portal) = self.portal.as_ref() else {
            return;
        };
        let store = &mut self.store;
        let mut requested = None;

        transport.service(&mut |request: &PortalRequest| -> PortalResponse {
            let response = portal.handle(store, request);
            if response.restart.is_some() {
                requested = response.restart;
            }
            response
        });

        if let Some(reason) = requested {
            self.schedule_restart(reason);
        }
    }

    fn maintain_session(&mut self) {
        self.session.pump();
        self.session
            .dispatch(&self.credentials.device_id, &mut self.sink);

        if self.clock.now() < self.next_token_check {
            return;
        }

        match self.session.check_token(&self.clock) {
            Ok(TokenCheck::Healthy) => trace!("Cloud session healthy"),
            Ok(TokenCheck::Rebuilt) => info!("Cloud session rebuilt"),
            Err(e) => warn!("Cloud session rebuild failed: {}", e),
        }
        self.next_token_check = self.clock.now() + self.maintenance.token_check_interval();
    }

    /// Tick until a restart is due.
    pub fn run<T: PortalTransport + ?Sized>(&mut self, transport: &mut T) -> RestartReason {
        loop {
            if let Tick::Restart(reason) = self.tick(transport) {
                return reason;
            }
            self.clock.sleep(self.maintenance.loop_interval());
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connector.state()
    }

    /// Copy of the credentials loaded at boot.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn session(&self) -> &CloudSession {
        self.session.session()
    }

    pub fn session_manager(&self) -> &CloudSessionManager<B> {
        &self.session
    }

    pub fn session_manager_mut(&mut self) -> &mut CloudSessionManager<B> {
        &mut self.session
    }

    pub fn connector(&self) -> &NetworkConnector<N> {
        &self.connector
    }

    pub fn store(&self) -> &CredentialStore<R> {
        &self.store
    }

    pub fn portal_active(&self) -> bool {
        self.portal.is_some()
    }

    pub fn pending_restart(&self) -> Option<RestartReason> {
        self.pending_restart.map(|p| p.reason)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tear the device down, keeping the storage region for the next cycle.
    pub fn into_region(self) -> R {
        self.store.into_region()
    }
}
