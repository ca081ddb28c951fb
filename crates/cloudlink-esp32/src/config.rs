//! Device configuration for ESP32 builds.
//!
//! There is no file system to read a configuration from, so the firmware
//! runs on the compiled defaults. Cloud secrets are taken from the build
//! environment:
//!
//! ```text
//! CLOUDLINK_API_KEY=... CLOUDLINK_DATABASE_URL=https://... \
//! CLOUDLINK_USER_EMAIL=... CLOUDLINK_USER_PASSWORD=... cargo build --release
//! ```

use cloudlink_core::DeviceConfig;

/// NVS namespace holding the credential blob.
pub const NVS_NAMESPACE: &str = "cloudlink";

/// Build the device configuration from defaults and build-time secrets.
pub fn device_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();

    let cloud = &mut config.cloud;
    cloud.api_key = option_env!("CLOUDLINK_API_KEY").unwrap_or_default().to_string();
    cloud.database_url = option_env!("CLOUDLINK_DATABASE_URL")
        .unwrap_or_default()
        .to_string();
    cloud.user_email = option_env!("CLOUDLINK_USER_EMAIL")
        .unwrap_or_default()
        .to_string();
    cloud.user_password = option_env!("CLOUDLINK_USER_PASSWORD")
        .unwrap_or_default()
        .to_string();

    if !cloud.is_configured() {
        log::warn!("Cloud secrets not set at build time, the cloud session will not start");
    }

    config
}
