//! ESP32 adapters for cloudlink.
//!
//! This crate provides the platform side of the lifecycle traits:
//! - [`wifi::EspRadio`]: station join and access point over `EspWifi`
//! - [`nvs::NvsRegion`]: the 512-byte credential block as one NVS blob
//! - [`http::start_portal_server`]: the config portal on `EspHttpServer`
//! - [`cloud::FirebaseBackend`]: SNTP, password sign-in and the event stream
//!
//! # Example
//!
//! ```ignore
//! use cloudlink_esp32::{config, http, nvs::NvsRegion, wifi::EspRadio};
//!
//! let config = config::device_config();
//! let region = NvsRegion::open(nvs_partition.clone(), "cloudlink")?;
//! let radio = EspRadio::new(peripherals.modem, sysloop, Some(nvs_partition))?;
//! let (client, transport) = cloudlink_core::channel_transport(4);
//! let _server = http::start_portal_server(client, config.portal.port)?;
//! ```

pub mod cloud;
pub mod config;
pub mod http;
pub mod nvs;
pub mod wifi;

/// Reset the chip. Never returns.
pub fn restart() -> ! {
    log::info!("Restarting...");
    unsafe { esp_idf_svc::sys::esp_restart() }
}
