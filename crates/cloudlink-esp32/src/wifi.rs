//! WiFi radio for ESP32.
//!
//! Implements [`Radio`] over a non-blocking `EspWifi`: join requests return
//! immediately and the connector polls [`Radio::station_status`].

use std::net::Ipv4Addr;

use anyhow::Result;
use cloudlink_core::config::AccessPointSettings;
use cloudlink_core::{LinkStatus, Radio, RadioError};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, peripheral},
    nvs::EspDefaultNvsPartition,
    sys::EspError,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi},
};
use log::{info, warn};

fn driver(e: EspError) -> RadioError {
    RadioError::Driver(e.to_string())
}

/// The ESP32 radio.
pub struct EspRadio {
    wifi: Box<EspWifi<'static>>,
    auto_reconnect: bool,
    was_connected: bool,
}

impl EspRadio {
    pub fn new(
        modem: impl peripheral::Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi: Box::new(wifi),
            auto_reconnect: false,
            was_connected: false,
        })
    }

    fn is_up(&self) -> Result<bool, EspError> {
        Ok(self.wifi.is_connected()? && self.wifi.sta_netif().is_up()?)
    }
}

impl Radio for EspRadio {
    fn disconnect_all(&mut self) {
        if self.wifi.is_started().unwrap_or(false) {
            let _ = self.wifi.disconnect();
            let _ = self.wifi.stop();
        }
        self.was_connected = false;
    }

    fn begin_station(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError> {
        let auth_method = if secret.is_empty() {
            info!("WiFi password is empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| RadioError::InvalidParameter("SSID too long".to_string()))?,
                password: secret
                    .try_into()
                    .map_err(|_| RadioError::InvalidParameter("password too long".to_string()))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(driver)?;

        self.wifi.start().map_err(driver)?;
        self.wifi.connect().map_err(driver)?;
        info!("Join request sent for '{}'", ssid);
        Ok(())
    }

    fn station_status(&mut self) -> LinkStatus {
        match self.is_up() {
            Ok(true) => {
                self.was_connected = true;
                LinkStatus::Connected
            }
            Ok(false) if self.was_connected && self.auto_reconnect => {
                warn!("Station link lost, reconnecting");
                self.was_connected = false;
                if let Err(e) = self.wifi.connect() {
                    warn!("Reconnect request failed: {}", e);
                    return LinkStatus::Failed;
                }
                LinkStatus::Connecting
            }
            Ok(false) => LinkStatus::Connecting,
            Err(e) => {
                warn!("Could not read station status: {}", e);
                LinkStatus::Failed
            }
        }
    }

    fn station_address(&self) -> Option<Ipv4Addr> {
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }

    fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.auto_reconnect = enabled;
        // Keep the station configuration in flash across resets.
        esp_idf_svc::sys::esp!(unsafe {
            esp_idf_svc::sys::esp_wifi_set_storage(esp_idf_svc::sys::wifi_storage_t_WIFI_STORAGE_FLASH)
        })
        .map_err(driver)
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<Ipv4Addr, RadioError> {
        self.disconnect_all();

        let auth_method = if settings.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: settings
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::InvalidParameter("AP SSID too long".to_string()))?,
                password: settings
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::InvalidParameter("AP password too long".to_string()))?,
                auth_method,
                channel: settings.channel,
                ..Default::default()
            }))
            .map_err(driver)?;
        self.wifi.start().map_err(driver)?;

        let address = self.wifi.ap_netif().get_ip_info().map_err(driver)?.ip;
        if address != settings.address {
            warn!(
                "Access point address is {}, configured {} (netif default kept)",
                address, settings.address
            );
        }
        info!("AP Mode started, connect to WiFi '{}'", settings.ssid);
        Ok(address)
    }
}
