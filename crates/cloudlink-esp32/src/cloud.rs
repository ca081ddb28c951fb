//! Realtime database backend for ESP32.
//!
//! Sign-in and one-shot reads are blocking HTTPS requests on the caller's
//! task. The stream runs on its own thread: it decodes the event stream and
//! queues session events for [`CloudBackend::poll_event`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use cloudlink_core::config::posix_timezone;
use cloudlink_core::{CloudBackend, CloudConfig, CloudError, SessionEvent};
use cloudlink_protocol::{
    database_url, decode_sign_in, decode_string_value, sign_in_url, IdToken, SignInRequest,
    SseDecoder, StreamEvent,
};
use embedded_svc::http::client::Client as HttpClient;
use embedded_svc::http::Status;
use esp_idf_svc::http::client::{Configuration as HttpClientConfiguration, EspHttpConnection};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{Read, Write};
use esp_idf_svc::sntp::{EspSntp, SntpConf};
use log::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const STREAM_QUEUE: usize = 16;
const STREAM_STACK_SIZE: usize = 10 * 1024;

fn transport(e: impl std::fmt::Debug) -> CloudError {
    CloudError::Transport(format!("{:?}", e))
}

fn http_client(timeout: Duration) -> Result<HttpClient<EspHttpConnection>, CloudError> {
    let conf = HttpClientConfiguration {
        timeout: Some(timeout),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    Ok(HttpClient::wrap(EspHttpConnection::new(&conf).map_err(transport)?))
}

fn read_body(response: &mut impl Read) -> Result<String, CloudError> {
    let mut body = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let read = response.read(&mut chunk).map_err(transport)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

struct StreamHandle {
    events: Receiver<SessionEvent>,
    stop: Arc<AtomicBool>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Firebase-style realtime database client.
#[derive(Default)]
pub struct FirebaseBackend {
    config: Option<CloudConfig>,
    sntp: Option<EspSntp<'static>>,
    token: Option<IdToken>,
    stream: Option<StreamHandle>,
}

impl FirebaseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn sign_in(config: &CloudConfig) -> Result<IdToken, CloudError> {
        let body = serde_json::to_string(&SignInRequest::new(
            config.user_email.as_str(),
            config.user_password.as_str(),
        ))
        .map_err(|e| CloudError::Auth(e.to_string()))?;
        let length = body.len().to_string();

        let mut client = http_client(REQUEST_TIMEOUT)?;
        let mut request = client
            .post(
                &sign_in_url(&config.api_key),
                &[("Content-Type", "application/json"), ("Content-Length", length.as_str())],
            )
            .map_err(transport)?;
        request.write_all(body.as_bytes()).map_err(transport)?;
        request.flush().map_err(transport)?;
        let mut response = request.submit().map_err(transport)?;

        let text = read_body(&mut response)?;
        let reply = decode_sign_in(&text).map_err(|e| CloudError::Auth(e.to_string()))?;
        IdToken::from_response(reply, Utc::now()).map_err(|e| CloudError::Auth(e.to_string()))
    }

    fn url(&self, path: &str) -> Result<String, CloudError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| CloudError::Auth("backend not started".to_string()))?;
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| CloudError::Auth("no token".to_string()))?;
        Ok(database_url(&config.database_url, path, Some(&token.token)))
    }
}

impl CloudBackend for FirebaseBackend {
    fn start_time_sync(&mut self, servers: &[String], utc_offset_secs: i32) -> Result<(), CloudError> {
        if self.sntp.is_some() {
            return Ok(());
        }

        // Local time for chrono::Local and any libc time formatting.
        let timezone = posix_timezone(utc_offset_secs);
        std::env::set_var("TZ", &timezone);
        unsafe { esp_idf_svc::sys::tzset() };

        let mut conf = SntpConf::default();
        for (slot, server) in conf.servers.iter_mut().zip(servers) {
            *slot = server.as_str();
        }
        let sntp = EspSntp::new(&conf).map_err(|e| CloudError::TimeSync(e.to_string()))?;
        info!("SNTP started ({}), timezone {}", servers.join(", "), timezone);
        self.sntp = Some(sntp);
        Ok(())
    }

    fn epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn begin(&mut self, config: &CloudConfig) -> Result<(), CloudError> {
        self.stream = None;
        self.token = None;
        self.config = Some(config.clone());

        if !config.is_configured() {
            return Err(CloudError::Auth("API key or database URL missing".to_string()));
        }

        let token = Self::sign_in(config)?;
        info!("Signed in as {}, token valid until {}", token.uid, token.expires_at);
        self.token = Some(token);
        Ok(())
    }

    fn has_token(&mut self) -> bool {
        self.token.is_some()
    }

    fn is_ready(&mut self) -> bool {
        self.token.is_some() && !self.is_token_expired()
    }

    fn is_token_expired(&self) -> bool {
        self.token
            .as_ref()
            .map(|t| t.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    fn begin_stream(&mut self, path: &str) -> Result<(), CloudError> {
        self.stream = None;

        let url = self.url(path)?;
        let timeout = self
            .config
            .as_ref()
            .map(|c| c.stream_timeout())
            .unwrap_or(REQUEST_TIMEOUT);

        let (events_tx, events_rx) = mpsc::sync_channel(STREAM_QUEUE);
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        thread::Builder::new()
            .name("cloud-stream".into())
            .stack_size(STREAM_STACK_SIZE)
            .spawn(move || run_stream(url, timeout, opened_tx, events_tx, thread_stop))
            .map_err(|e| CloudError::Stream(e.to_string()))?;

        match opened_rx.recv_timeout(REQUEST_TIMEOUT + Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.stream = Some(StreamHandle {
                    events: events_rx,
                    stop,
                });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                Err(CloudError::Stream("no answer from stream thread".to_string()))
            }
        }
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.stream.as_ref()?.events.try_recv().ok()
    }

    fn get_string(&mut self, path: &str) -> Result<String, CloudError> {
        let url = self.url(path)?;
        let mut client = http_client(REQUEST_TIMEOUT)?;
        let request = client.request(Method::Get, &url, &[]).map_err(transport)?;
        let mut response = request.submit().map_err(transport)?;

        let status = response.status();
        let body = read_body(&mut response)?;
        if !(200..300).contains(&status) {
            return Err(CloudError::Read {
                path: path.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        decode_string_value(&body).map_err(|e| CloudError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Stream thread body. Reports the open result once, then forwards events
/// until the stream ends or the handle is dropped.
fn run_stream(
    url: String,
    timeout: Duration,
    opened: SyncSender<Result<(), CloudError>>,
    events: SyncSender<SessionEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut client = match http_client(timeout) {
        Ok(client) => client,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };

    let headers = [("Accept", "text/event-stream")];
    let request = match client.request(Method::Get, &url, &headers) {
        Ok(request) => request,
        Err(e) => {
            let _ = opened.send(Err(CloudError::Stream(format!("{:?}", e))));
            return;
        }
    };
    let mut response = match request.submit() {
        Ok(response) => response,
        Err(e) => {
            let _ = opened.send(Err(CloudError::Stream(format!("{:?}", e))));
            return;
        }
    };

    let status = response.status();
    if !(200..300).contains(&status) {
        let reason = read_body(&mut response).unwrap_or_default();
        let _ = opened.send(Err(CloudError::Stream(format!("HTTP {} {}", status, reason.trim()))));
        return;
    }
    let _ = opened.send(Ok(()));

    let mut decoder = SseDecoder::new();
    let mut chunk = [0u8; 512];
    while !stop.load(Ordering::SeqCst) {
        // The read timeout equals the stream timeout, so a silent server
        // surfaces here as an error.
        let read = match response.read(&mut chunk) {
            Ok(0) => {
                warn!("Stream closed by server");
                break;
            }
            Ok(read) => read,
            Err(e) => {
                warn!("Stream read failed: {:?}", e);
                break;
            }
        };

        for decoded in decoder.push(&chunk[..read]) {
            let event = match decoded {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping undecodable stream event: {}", e);
                    continue;
                }
            };
            debug!("Stream event {}", event.name());
            let ends_stream = matches!(event, StreamEvent::Cancel | StreamEvent::AuthRevoked);
            if let Some(session_event) = event.into_session_event() {
                match events.try_send(session_event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!("Stream queue full, event dropped"),
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
            if ends_stream {
                return;
            }
        }
    }

    if !stop.load(Ordering::SeqCst) {
        let _ = events.send(SessionEvent::TimedOut);
    }
}
