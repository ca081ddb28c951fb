//! Boot cycles of the host device.
//!
//! A restart on a host rebuilds the whole device from the region file, the
//! same way a reset brings the firmware back up from flash.

use std::path::PathBuf;

use anyhow::Context;
use cloudlink_core::{
    CloudBackend, ConnectionState, Device, LogSink, PortalTransport, RestartReason, SystemClock,
};
use tracing::info;

use crate::cloud::{DemoCloud, RestCloud};
use crate::config::HostConfig;
use crate::radio::SimulatedRadio;
use crate::region::FileRegion;

pub type HostDevice = Device<FileRegion, SimulatedRadio, Box<dyn CloudBackend>, SystemClock, LogSink>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudMode {
    Rest,
    Demo,
}

pub struct Runner {
    config: HostConfig,
    region_path: PathBuf,
    cloud: CloudMode,
}

impl Runner {
    pub fn new(config: HostConfig, region_path: impl Into<PathBuf>, cloud: CloudMode) -> Self {
        Self {
            config,
            region_path: region_path.into(),
            cloud,
        }
    }

    /// A freshly powered-on device.
    pub fn build(&self) -> anyhow::Result<HostDevice> {
        let region = FileRegion::open(&self.region_path)
            .with_context(|| format!("opening {}", self.region_path.display()))?;
        let radio = SimulatedRadio::new(self.config.simulation.clone());
        let backend: Box<dyn CloudBackend> = match self.cloud {
            CloudMode::Rest => Box::new(RestCloud::new()?),
            CloudMode::Demo => Box::new(DemoCloud::new(self.config.demo.clone())),
        };

        Ok(Device::new(
            &self.config.device,
            region,
            radio,
            backend,
            SystemClock::new(),
            LogSink,
        ))
    }

    /// Boot once and run until a restart is due.
    pub fn boot_cycle<T: PortalTransport + ?Sized>(&self, transport: &mut T) -> anyhow::Result<RestartReason> {
        let mut device = self.build()?;
        let report = device.boot()?;
        info!(
            "Boot finished: {} as '{}' (cloud ready: {})",
            report.state.as_str(),
            report.credentials.device_id,
            report.cloud_ready
        );
        if report.state == ConnectionState::AccessPointActive {
            info!("Config portal reachable on the HTTP address");
        }

        Ok(device.run(transport))
    }

    /// Boot cycles forever.
    pub fn run<T: PortalTransport + ?Sized>(&self, transport: &mut T) -> anyhow::Result<()> {
        for boot in 1u64.. {
            info!("Boot #{}", boot);
            let reason = self.boot_cycle(transport)?;
            info!("Restarting: {}", reason.as_str());
        }
        Ok(())
    }
}
