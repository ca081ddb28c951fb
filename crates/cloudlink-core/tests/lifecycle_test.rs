//! End-to-end tests of the device lifecycle.
//!
//! A scripted radio and cloud backend stand in for the hardware, and a
//! `ManualClock` lets the bounded waits run without real sleeps.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use cloudlink_core::config::AccessPointSettings;
use cloudlink_core::credentials::REGION_SIZE;
use cloudlink_core::{
    channel_transport, Clock, CloudBackend, CloudConfig, CloudError, ConnectionState, ConnectorError,
    CredentialStore, Credentials, Device, DeviceConfig, LinkStatus, ManualClock, MemoryRegion,
    NoTransport, PortalRequest, PortalResponse, PortalTransport, Radio, RadioError, RestartReason,
    SessionEvent, StatusLines, StatusSink, StreamUpdate, Tick,
};

#[derive(Default)]
struct RecordingSink(Vec<StatusLines>);

impl StatusSink for RecordingSink {
    fn show(&mut self, lines: &StatusLines) {
        self.0.push(lines.clone());
    }
}

/// Radio that can join a fixed set of networks.
#[derive(Default)]
struct FakeRadio {
    reachable: Vec<(String, String)>,
    polls_until_up: u32,
    ap_broken: bool,
    target: Option<(String, String)>,
    polls: u32,
    joins: u32,
    ap_starts: u32,
}

impl FakeRadio {
    fn with_network(ssid: &str, secret: &str) -> Self {
        Self {
            reachable: vec![(ssid.to_string(), secret.to_string())],
            polls_until_up: 2,
            ..Default::default()
        }
    }

    fn joined(&self) -> bool {
        match &self.target {
            Some(target) => self.reachable.contains(target) && self.polls >= self.polls_until_up,
            None => false,
        }
    }
}

impl Radio for FakeRadio {
    fn disconnect_all(&mut self) {
        self.target = None;
    }

    fn begin_station(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError> {
        self.joins += 1;
        self.target = Some((ssid.to_string(), secret.to_string()));
        Ok(())
    }

    fn station_status(&mut self) -> LinkStatus {
        self.polls += 1;
        if self.joined() {
            LinkStatus::Connected
        } else {
            LinkStatus::Connecting
        }
    }

    fn station_address(&self) -> Option<Ipv4Addr> {
        self.joined().then(|| Ipv4Addr::new(192, 168, 1, 77))
    }

    fn set_auto_reconnect(&mut self, _enabled: bool) -> Result<(), RadioError> {
        Ok(())
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<Ipv4Addr, RadioError> {
        self.ap_starts += 1;
        if self.ap_broken {
            return Err(RadioError::Driver("softap init failed".to_string()));
        }
        Ok(settings.address)
    }
}

/// Cloud backend with an always-synced clock and an instant token.
struct FakeCloud {
    expired: bool,
    last_updated: Option<String>,
    events: VecDeque<SessionEvent>,
    begins: u32,
}

impl FakeCloud {
    fn new() -> Self {
        Self {
            expired: false,
            last_updated: Some("10:42".to_string()),
            events: VecDeque::new(),
            begins: 0,
        }
    }
}

impl CloudBackend for FakeCloud {
    fn start_time_sync(&mut self, _servers: &[String], _offset: i32) -> Result<(), CloudError> {
        Ok(())
    }

    fn epoch_seconds(&self) -> u64 {
        1_717_000_000
    }

    fn begin(&mut self, _config: &CloudConfig) -> Result<(), CloudError> {
        self.begins += 1;
        self.expired = false;
        Ok(())
    }

    fn has_token(&mut self) -> bool {
        self.begins > 0
    }

    fn is_ready(&mut self) -> bool {
        self.begins > 0
    }

    fn is_token_expired(&self) -> bool {
        self.expired
    }

    fn begin_stream(&mut self, _path: &str) -> Result<(), CloudError> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn get_string(&mut self, path: &str) -> Result<String, CloudError> {
        self.last_updated.clone().ok_or_else(|| CloudError::Read {
            path: path.to_string(),
            reason: "timeout".to_string(),
        })
    }
}

/// Transport replaying a fixed list of requests, one per service call.
#[derive(Default)]
struct ScriptedTransport {
    requests: VecDeque<PortalRequest>,
    responses: Vec<PortalResponse>,
}

impl PortalTransport for ScriptedTransport {
    fn service(&mut self, handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> bool {
        match self.requests.pop_front() {
            Some(request) => {
                self.responses.push(handler(&request));
                true
            }
            None => false,
        }
    }
}

type TestDevice = Device<MemoryRegion, FakeRadio, FakeCloud, ManualClock, RecordingSink>;

fn device(region: MemoryRegion, radio: FakeRadio) -> TestDevice {
    Device::new(
        &DeviceConfig::default(),
        region,
        radio,
        FakeCloud::new(),
        ManualClock::new(),
        RecordingSink::default(),
    )
}

fn region_with(credentials: &Credentials) -> MemoryRegion {
    let mut store = CredentialStore::new(MemoryRegion::new(REGION_SIZE));
    store.save(credentials).unwrap();
    store.into_region()
}

fn home() -> Credentials {
    Credentials::new("HomeNet", "secret123", "dev-42")
}

#[test]
fn test_empty_storage_boots_into_portal() {
    let mut device = device(MemoryRegion::new(REGION_SIZE), FakeRadio::default());

    let report = device.boot().unwrap();

    assert_eq!(report.state, ConnectionState::AccessPointActive);
    assert_eq!(report.credentials, Credentials::default());
    assert!(device.portal_active());
    assert_eq!(device.connector().radio().joins, 0);
    assert_eq!(device.connector().radio().polls, 0);
    assert_eq!(
        device.sink().0.last().unwrap(),
        &StatusLines::new("AP Mode", "ESP32_Config_Portal", "192.168.4.1")
    );
}

#[test]
fn test_stored_network_boots_into_station() {
    let mut device = device(region_with(&home()), FakeRadio::with_network("HomeNet", "secret123"));

    let report = device.boot().unwrap();

    assert_eq!(report.state, ConnectionState::ConnectedStation);
    assert_eq!(report.credentials, home());
    assert!(report.cloud_ready);
    assert!(!device.portal_active());
    assert!(device.session().subscription_active);
    assert_eq!(
        device.sink().0.last().unwrap(),
        &StatusLines::new("Connected", "HomeNet", "192.168.1.77")
    );
}

#[test]
fn test_unreachable_network_falls_back_within_ceiling() {
    let mut device = device(region_with(&home()), FakeRadio::default());

    let report = device.boot().unwrap();

    assert_eq!(report.state, ConnectionState::AccessPointActive);
    assert_eq!(device.connector().radio().polls, 50);
    assert_eq!(device.connector().radio().ap_starts, 1);
    assert_eq!(device.clock().now(), Duration::from_secs(20));
    assert!(!device.session().auth_token_valid);
}

#[test]
fn test_apply_stores_credentials_and_restarts() {
    let mut device = device(MemoryRegion::new(REGION_SIZE), FakeRadio::default());
    device.boot().unwrap();

    let mut transport = ScriptedTransport::default();
    transport
        .requests
        .push_back(PortalRequest::get("/apply?ssid=NewNet&password=pw&devid=id9"));

    assert_eq!(device.tick(&mut transport), Tick::Continue);
    assert_eq!(transport.responses[0].status, 200);
    assert_eq!(device.pending_restart(), Some(RestartReason::CredentialsSaved));
    assert_eq!(device.store().load(), Credentials::new("NewNet", "pw", "id9"));

    // The restart fires only after the configured delay.
    let started = device.clock().now();
    let reason = device.run(&mut transport);
    assert_eq!(reason, RestartReason::CredentialsSaved);
    assert!(device.clock().now() - started >= Duration::from_secs(2));

    // The next boot cycle picks the new network up from storage.
    let region = device.into_region();
    let mut next = self::device(region, FakeRadio::with_network("NewNet", "pw"));
    let report = next.boot().unwrap();
    assert_eq!(report.state, ConnectionState::ConnectedStation);
    assert_eq!(report.credentials.device_id, "id9");
}

#[test]
fn test_reset_wipes_and_restarts_into_portal() {
    let mut device = device(region_with(&home()), FakeRadio::default());
    device.boot().unwrap();

    let mut transport = ScriptedTransport::default();
    transport.requests.push_back(PortalRequest::get("/reset"));

    assert_eq!(device.run(&mut transport), RestartReason::CredentialsWiped);

    let mut next = self::device(device.into_region(), FakeRadio::default());
    let report = next.boot().unwrap();
    assert_eq!(report.state, ConnectionState::AccessPointActive);
    assert_eq!(next.connector().radio().joins, 0);
}

#[test]
fn test_stream_value_with_failed_aux_read() {
    let mut device = device(region_with(&home()), FakeRadio::with_network("HomeNet", "secret123"));
    device.boot().unwrap();

    let backend = device.session_manager_mut().backend_mut();
    backend.last_updated = None;
    backend
        .events
        .push_back(SessionEvent::DataReceived(StreamUpdate::Text("42".to_string())));

    assert_eq!(device.tick(&mut NoTransport), Tick::Continue);

    assert_eq!(
        device.sink().0.last().unwrap(),
        &StatusLines::new("dev-42", "42", "-")
    );
    assert_eq!(device.session().last_stream_value.as_deref(), Some("42"));
}

#[test]
fn test_expired_token_rebuilds_exactly_once() {
    let mut device = device(region_with(&home()), FakeRadio::with_network("HomeNet", "secret123"));
    device.boot().unwrap();
    device.session_manager_mut().backend_mut().expired = true;

    // Not due yet.
    device.tick(&mut NoTransport);
    assert_eq!(device.session_manager().rebuilds(), 0);

    device.clock().advance(Duration::from_secs(5));
    device.tick(&mut NoTransport);
    assert_eq!(device.session_manager().rebuilds(), 1);
    assert_eq!(device.session_manager().backend().begins, 2);

    device.clock().advance(Duration::from_secs(5));
    device.tick(&mut NoTransport);
    assert_eq!(device.session_manager().rebuilds(), 1);
    assert!(device.session().auth_token_valid);
    assert!(device.session().subscription_active);
}

#[test]
fn test_stream_timeout_recovered_by_token_check() {
    let mut device = device(region_with(&home()), FakeRadio::with_network("HomeNet", "secret123"));
    device.boot().unwrap();
    device
        .session_manager_mut()
        .backend_mut()
        .events
        .push_back(SessionEvent::TimedOut);

    device.tick(&mut NoTransport);
    assert!(!device.session().subscription_active);

    device.clock().advance(Duration::from_secs(5));
    device.tick(&mut NoTransport);
    assert!(device.session().subscription_active);
    assert_eq!(device.session_manager().rebuilds(), 1);
}

#[test]
fn test_access_point_failure_schedules_restart() {
    let radio = FakeRadio {
        ap_broken: true,
        ..Default::default()
    };
    let mut device = device(MemoryRegion::new(REGION_SIZE), radio);

    let report = device.boot().unwrap();

    assert_eq!(report.restart, Some(RestartReason::AccessPointUnavailable));
    assert_eq!(device.connector().radio().ap_starts, 3);
    assert!(!device.portal_active());
    assert_eq!(device.run(&mut NoTransport), RestartReason::AccessPointUnavailable);
}

#[test]
fn test_second_boot_is_rejected() {
    let mut device = device(MemoryRegion::new(REGION_SIZE), FakeRadio::default());
    device.boot().unwrap();

    assert!(device.boot().is_err());
    assert_eq!(device.connector().radio().ap_starts, 1);
}

#[test]
fn test_second_boot_leaves_device_untouched() {
    let mut device = device(MemoryRegion::new(REGION_SIZE), FakeRadio::default());
    device.boot().unwrap();

    let mut transport = ScriptedTransport::default();
    transport
        .requests
        .push_back(PortalRequest::get("/apply?ssid=NewNet&password=pw&devid=id9"));
    device.tick(&mut transport);
    let screens = device.sink().0.len();

    let err = device.boot().unwrap_err();

    assert!(matches!(err, ConnectorError::AlreadyStarted));
    assert_eq!(device.sink().0.len(), screens);
    assert_eq!(*device.credentials(), Credentials::default());
    assert_eq!(device.state(), ConnectionState::AccessPointActive);
}

#[test]
fn test_portal_over_channel_transport() {
    let mut device = device(MemoryRegion::new(REGION_SIZE), FakeRadio::default());
    device.boot().unwrap();

    let (client, mut transport) = channel_transport(4);
    let caller = thread::spawn(move || {
        client.call(PortalRequest::get("/"), Duration::from_secs(5))
    });

    for _ in 0..500 {
        device.tick(&mut transport);
        if caller.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    let response = caller.join().unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.contains("Saved WiFi"));
    assert_eq!(device.pending_restart(), None);
}
