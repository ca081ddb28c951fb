//! # cloudlink-core
//!
//! Connectivity lifecycle manager for a headless wireless device.
//!
//! This crate provides:
//! - Credential store over a fixed-layout persistent byte region
//! - Network connector (station join with bounded retry, access-point fallback)
//! - Config portal request handlers (framework-agnostic)
//! - Cloud session manager (time sync, token issuance, watch, rebuild)
//! - The `Device` context object and its cooperative control loop
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux hosts and ESP32 (esp-idf) targets. Every
//! blocking wait goes through [`clock::PollPolicy`] with an injectable
//! [`clock::Clock`], so the whole lifecycle can be driven from tests.

pub mod clock;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod device;
pub mod portal;
pub mod region;
pub mod session;
pub mod sink;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, PollOutcome, PollPolicy, SystemClock};
pub use config::{
    AccessPointSettings, CloudConfig, ConfigError, DeviceConfig, MaintenanceSettings, PortalSettings,
    StationSettings,
};
pub use connector::{ConnectionState, ConnectorError, LinkStatus, NetworkConnector, Radio, RadioError};
pub use credentials::Credentials;
pub use device::{BootReport, Device, RestartReason, Tick};
pub use portal::{ConfigPortal, Method, PortalRequest, PortalResponse};
pub use region::{ByteRegion, MemoryRegion, StorageError};
pub use session::{
    CloudBackend, CloudError, CloudSession, CloudSessionManager, SessionError, SessionEvent,
    StreamUpdate, TokenCheck,
};
pub use sink::{LogSink, StatusLines, StatusSink};
pub use store::CredentialStore;
pub use transport::{
    channel_transport, ChannelTransport, NoTransport, PortalCallError, PortalClient, PortalTransport,
    DEFAULT_CALL_TIMEOUT,
};
