//! cloudlink firmware for ESP32
//!
//! Boots from the credential block in NVS, joins the stored network or
//! opens the config portal, then runs the control loop on the main task
//! until a restart is due.
//!
//! Build with the ESP32 Rust toolchain (https://esp-rs.github.io/book/):
//!
//! ```text
//! CLOUDLINK_API_KEY=... CLOUDLINK_DATABASE_URL=https://... \
//! CLOUDLINK_USER_EMAIL=... CLOUDLINK_USER_PASSWORD=... \
//! cargo build --release
//! ```

use anyhow::Result;
use cloudlink_core::{channel_transport, ConnectionState, Device, LogSink, SystemClock};
use cloudlink_esp32::cloud::FirebaseBackend;
use cloudlink_esp32::config::{device_config, NVS_NAMESPACE};
use cloudlink_esp32::http::start_portal_server;
use cloudlink_esp32::nvs::NvsRegion;
use cloudlink_esp32::wifi::EspRadio;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info};

/// Portal requests waiting for the control loop.
const PORTAL_QUEUE: usize = 4;

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("cloudlink v{}", env!("CARGO_PKG_VERSION"));

    let config = device_config();
    if let Err(e) = config.validate() {
        error!("Invalid device configuration: {}", e);
        cloudlink_esp32::restart();
    }

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let region = NvsRegion::open(nvs_partition.clone(), NVS_NAMESPACE)?;
    let radio = EspRadio::new(peripherals.modem, sysloop, Some(nvs_partition))?;

    let mut device = Device::new(
        &config,
        region,
        radio,
        FirebaseBackend::new(),
        SystemClock::new(),
        LogSink,
    );

    let report = device.boot()?;
    info!(
        "Boot finished: {} (cloud ready: {})",
        report.state.as_str(),
        report.cloud_ready
    );

    let (client, mut transport) = channel_transport(PORTAL_QUEUE);

    // The server only exists while the access point is up and is dropped
    // together with the loop.
    let _server = if report.state == ConnectionState::AccessPointActive {
        Some(start_portal_server(client, config.portal.port)?)
    } else {
        drop(client);
        None
    };

    let reason = device.run(&mut transport);
    info!("Control loop finished: {}", reason.as_str());

    cloudlink_esp32::restart()
}
