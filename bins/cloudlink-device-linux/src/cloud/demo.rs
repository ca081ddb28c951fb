use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Local;
use cloudlink_core::{CloudBackend, CloudConfig, CloudError, SessionEvent, StreamUpdate};
use tracing::{debug, info};

use crate::config::DemoSettings;

/// Local stand-in for the realtime database.
///
/// Issues tokens with a fixed lifetime and, once a stream is open, writes a
/// counter to the watched path every `interval_ms` with the current local
/// time under the last-updated path.
#[derive(Debug)]
pub struct DemoCloud {
    settings: DemoSettings,
    config: Option<CloudConfig>,
    token_issued: Option<Instant>,
    next_value: Option<Instant>,
    counter: u64,
    last_updated: Option<String>,
}

impl DemoCloud {
    pub fn new(settings: DemoSettings) -> Self {
        Self {
            settings,
            config: None,
            token_issued: None,
            next_value: None,
            counter: 0,
            last_updated: None,
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.interval_ms)
    }

    fn read_error(path: &str, reason: &str) -> CloudError {
        CloudError::Read {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl CloudBackend for DemoCloud {
    fn start_time_sync(&mut self, _servers: &[String], _utc_offset_secs: i32) -> Result<(), CloudError> {
        Ok(())
    }

    fn epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn begin(&mut self, config: &CloudConfig) -> Result<(), CloudError> {
        self.config = Some(config.clone());
        self.next_value = None;
        self.token_issued = Some(Instant::now());
        info!(
            "Demo token issued, valid for {} s",
            self.settings.token_lifetime_secs
        );
        Ok(())
    }

    fn has_token(&mut self) -> bool {
        self.token_issued.is_some()
    }

    fn is_ready(&mut self) -> bool {
        self.token_issued.is_some() && !self.is_token_expired()
    }

    fn is_token_expired(&self) -> bool {
        self.token_issued
            .map(|issued| issued.elapsed() >= Duration::from_secs(self.settings.token_lifetime_secs))
            .unwrap_or(false)
    }

    fn begin_stream(&mut self, path: &str) -> Result<(), CloudError> {
        if !self.is_ready() {
            return Err(CloudError::Stream("no valid demo token".to_string()));
        }
        debug!("Demo stream on {}", path);
        self.next_value = Some(Instant::now() + self.interval());
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        let due = self.next_value?;
        if Instant::now() < due {
            return None;
        }

        self.counter += 1;
        self.last_updated = Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        self.next_value = Some(due + self.interval());
        Some(SessionEvent::DataReceived(StreamUpdate::Text(
            self.counter.to_string(),
        )))
    }

    fn get_string(&mut self, path: &str) -> Result<String, CloudError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| CloudError::Auth("backend not started".to_string()))?;

        if path == config.last_updated_path {
            self.last_updated
                .clone()
                .ok_or_else(|| Self::read_error(path, "no value written yet"))
        } else if path == config.watch_path {
            Ok(self.counter.to_string())
        } else {
            Err(Self::read_error(path, "no such path"))
        }
    }
}
