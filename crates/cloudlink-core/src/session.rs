//! Cloud session manager.
//!
//! Owns the session with the realtime database: wall-clock sync, token
//! issuance, one watch on a remote path, and the periodic health check that
//! rebuilds the whole session when anything looks wrong.
//!
//! The backend never calls back into the manager. Stream activity is queued
//! as [`SessionEvent`]s that the control loop drains with
//! [`CloudSessionManager::pump`] and [`CloudSessionManager::dispatch`].

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CloudConfig;
use crate::sink::{StatusLines, StatusSink};

/// Smallest epoch value accepted as a synchronized wall clock.
pub const TIME_SYNC_THRESHOLD_SECS: u64 = 8 * 3600 * 2;

/// Payload of a stream update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Text(String),
    /// Anything that is not a string (number, object, null...).
    Other { kind: String },
}

/// Activity on the subscription, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DataReceived(StreamUpdate),
    /// The stream went silent or was closed by the server.
    TimedOut,
}

/// Errors raised by a cloud backend.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("time sync failed: {0}")]
    TimeSync(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("read of {path} failed: {reason}")]
    Read { path: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors raised while building or maintaining the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("wall clock not synchronized after {attempts} polls")]
    TimeSyncStalled { attempts: u32 },

    #[error("no auth token after {attempts} polls")]
    TokenStalled { attempts: u32 },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Outcome of [`CloudSessionManager::check_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Healthy,
    Rebuilt,
}

/// Client of a realtime database.
///
/// Every method returns promptly; progress is observed by polling.
pub trait CloudBackend {
    /// Start wall-clock synchronization.
    fn start_time_sync(&mut self, servers: &[String], utc_offset_secs: i32) -> Result<(), CloudError>;

    /// Current wall-clock time as seconds since the Unix epoch.
    fn epoch_seconds(&self) -> u64;

    /// Configure credentials and request token issuance.
    fn begin(&mut self, config: &CloudConfig) -> Result<(), CloudError>;

    fn has_token(&mut self) -> bool;

    /// True when the backend can serve requests.
    fn is_ready(&mut self) -> bool;

    fn is_token_expired(&self) -> bool;

    /// Open the watch on `path`, replacing any previous one.
    fn begin_stream(&mut self, path: &str) -> Result<(), CloudError>;

    /// Next queued stream event, if any.
    fn poll_event(&mut self) -> Option<SessionEvent>;

    /// One-shot read of a string value.
    fn get_string(&mut self, path: &str) -> Result<String, CloudError>;
}

impl<B: CloudBackend + ?Sized> CloudBackend for Box<B> {
    fn start_time_sync(&mut self, servers: &[String], utc_offset_secs: i32) -> Result<(), CloudError> {
        (**self).start_time_sync(servers, utc_offset_secs)
    }

    fn epoch_seconds(&self) -> u64 {
        (**self).epoch_seconds()
    }

    fn begin(&mut self, config: &CloudConfig) -> Result<(), CloudError> {
        (**self).begin(config)
    }

    fn has_token(&mut self) -> bool {
        (**self).has_token()
    }

    fn is_ready(&mut self) -> bool {
        (**self).is_ready()
    }

    fn is_token_expired(&self) -> bool {
        (**self).is_token_expired()
    }

    fn begin_stream(&mut self, path: &str) -> Result<(), CloudError> {
        (**self).begin_stream(path)
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        (**self).poll_event()
    }

    fn get_string(&mut self, path: &str) -> Result<String, CloudError> {
        (**self).get_string(path)
    }
}

/// Observable state of the cloud session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudSession {
    pub auth_token_valid: bool,
    pub subscription_active: bool,
    pub last_stream_value: Option<String>,
    pub last_update_timestamp: Option<String>,
}

pub struct CloudSessionManager<B: CloudBackend> {
    backend: B,
    config: CloudConfig,
    session: CloudSession,
    events: VecDeque<SessionEvent>,
    rebuilds: u32,
}

impl<B: CloudBackend> CloudSessionManager<B> {
    pub fn new(backend: B, config: CloudConfig) -> Self {
        Self {
            backend,
            config,
            session: CloudSession::default(),
            events: VecDeque::new(),
            rebuilds: 0,
        }
    }

    pub fn session(&self) -> &CloudSession {
        &self.session
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Number of full rebuilds performed by [`Self::check_token`].
    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }

    /// Events queued but not yet dispatched.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Sync the wall clock, sign in and wait for a token.
    ///
    /// Both waits are bounded; exhausting either returns an error and leaves
    /// the session marked invalid.
    pub fn initialize<C: Clock + ?Sized>(&mut self, clock: &C) -> Result<(), SessionError> {
        self.session.auth_token_valid = false;
        self.session.subscription_active = false;

        self.backend
            .start_time_sync(&self.config.time_servers, self.config.utc_offset_secs)?;

        let backend = &self.backend;
        let synced = self.config.time_sync_policy().wait(clock, "time sync", || {
            backend.epoch_seconds() >= TIME_SYNC_THRESHOLD_SECS
        });
        if !synced.is_ready() {
            warn!("Wall clock not synchronized after {} polls", synced.attempts());
            return Err(SessionError::TimeSyncStalled {
                attempts: synced.attempts(),
            });
        }
        info!("Time is synced");

        self.backend.begin(&self.config)?;

        let backend = &mut self.backend;
        let token = self
            .config
            .token_policy()
            .wait(clock, "token issuance", || backend.has_token());
        if !token.is_ready() {
            warn!("No auth token after {} polls", token.attempts());
            return Err(SessionError::TokenStalled {
                attempts: token.attempts(),
            });
        }

        self.session.auth_token_valid = true;
        info!("Cloud session established");
        Ok(())
    }

    /// Open the watch on the configured path.
    ///
    /// Events queued by a previous subscription are discarded.
    pub fn subscribe(&mut self) -> Result<(), SessionError> {
        self.events.clear();
        match self.backend.begin_stream(&self.config.watch_path) {
            Ok(()) => {
                self.session.subscription_active = true;
                info!("Watching {}", self.config.watch_path);
                Ok(())
            }
            Err(e) => {
                self.session.subscription_active = false;
                warn!("Failed to start stream on {}: {}", self.config.watch_path, e);
                Err(e.into())
            }
        }
    }

    /// Move stream events from the backend into the session queue.
    pub fn pump(&mut self) -> usize {
        let mut moved = 0;
        while let Some(event) = self.backend.poll_event() {
            self.events.push_back(event);
            moved += 1;
        }
        moved
    }

    /// Handle every queued event. Returns the number of sink updates.
    pub fn dispatch<S: StatusSink + ?Sized>(&mut self, device_id: &str, sink: &mut S) -> usize {
        let mut updates = 0;
        while let Some(event) = self.events.pop_front() {
            match event {
                SessionEvent::DataReceived(StreamUpdate::Text(value)) => {
                    self.on_text(device_id, value, sink);
                    updates += 1;
                }
                SessionEvent::DataReceived(StreamUpdate::Other { kind }) => {
                    debug!("Ignoring non-text stream value of type {}", kind);
                }
                SessionEvent::TimedOut => {
                    warn!("Stream timeout occurred");
                    self.session.subscription_active = false;
                }
            }
        }
        updates
    }

    fn on_text<S: StatusSink + ?Sized>(&mut self, device_id: &str, value: String, sink: &mut S) {
        let path = &self.config.last_updated_path;
        let timestamp = match self.backend.get_string(path) {
            Ok(timestamp) => timestamp,
            Err(e) => {
                warn!("Could not read {}: {}", path, e);
                self.config.placeholder.clone()
            }
        };

        info!("Stream value '{}' (updated {})", value, timestamp);
        sink.show(&StatusLines::new(device_id, value.as_str(), timestamp.as_str()));
        self.session.last_stream_value = Some(value);
        self.session.last_update_timestamp = Some(timestamp);
    }

    /// Rebuild the session if the backend is not ready, the token expired
    /// or the subscription is gone.
    pub fn check_token<C: Clock + ?Sized>(&mut self, clock: &C) -> Result<TokenCheck, SessionError> {
        let reason = if !self.backend.is_ready() {
            Some("backend not ready")
        } else if self.backend.is_token_expired() {
            Some("token expired")
        } else if !self.session.subscription_active {
            Some("subscription inactive")
        } else {
            None
        };

        let Some(reason) = reason else {
            return Ok(TokenCheck::Healthy);
        };

        self.rebuilds += 1;
        info!("Renewing cloud session ({})", reason);
        self.initialize(clock)?;
        self.subscribe()?;
        Ok(TokenCheck::Rebuilt)
    }
}
