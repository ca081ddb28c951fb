use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use cloudlink_core::{CloudBackend, CloudConfig, CloudError, SessionEvent};
use cloudlink_protocol::{
    database_url, decode_sign_in, decode_string_value, sign_in_url, IdToken, SignInRequest,
    SseDecoder, StreamEvent,
};
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const STREAM_QUEUE: usize = 16;

fn transport(e: reqwest::Error) -> CloudError {
    CloudError::Transport(e.to_string())
}

/// Shared between the stream reader and the backend.
struct StreamShared {
    opened: Instant,
    /// Milliseconds after `opened` of the last received bytes.
    last_activity_ms: AtomicU64,
    stop: AtomicBool,
}

impl StreamShared {
    fn touch(&self) {
        let elapsed = self.opened.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.opened.elapsed().saturating_sub(last)
    }
}

struct StreamHandle {
    events: Receiver<SessionEvent>,
    shared: Arc<StreamShared>,
    timeout: Duration,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

/// Client for the event stream. On the blocking client the timeout bounds
/// every body read, so a silent stream ends the reader after `timeout`.
fn stream_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(REQUEST_TIMEOUT)
        .timeout(timeout)
        .build()
}

/// Realtime database client over HTTPS.
///
/// Each body read of the stream is bounded by the stream timeout; the
/// last-activity stamp lets `poll_event` report silence without waiting
/// for the reader.
pub struct RestCloud {
    http: Client,
    config: Option<CloudConfig>,
    token: Option<IdToken>,
    stream: Option<StreamHandle>,
}

impl RestCloud {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config: None,
            token: None,
            stream: None,
        })
    }

    fn sign_in(&self, config: &CloudConfig) -> Result<IdToken, CloudError> {
        let body = self
            .http
            .post(sign_in_url(&config.api_key))
            .json(&SignInRequest::new(
                config.user_email.as_str(),
                config.user_password.as_str(),
            ))
            .send()
            .and_then(Response::text)
            .map_err(transport)?;

        let reply = decode_sign_in(&body).map_err(|e| CloudError::Auth(e.to_string()))?;
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

impl CloudBackend for RestCloud {
    fn start_time_sync(&mut self, servers: &[String], utc_offset_secs: i32) -> Result<(), CloudError> {
        debug!(
            "Host clock is kept by the OS (servers {} and offset {} s unused)",
            servers.join(", "),
            utc_offset_secs
        );
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

        let token = self.sign_in(config)?;
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
        let shared = Arc::new(StreamShared {
            opened: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });

        let client = stream_client(timeout).map_err(|e| CloudError::Stream(e.to_string()))?;
        let reader_shared = shared.clone();
        thread::Builder::new()
            .name("cloud-stream".into())
            .spawn(move || run_stream(client, url, opened_tx, events_tx, reader_shared))
            .map_err(|e| CloudError::Stream(e.to_string()))?;

        match opened_rx.recv_timeout(REQUEST_TIMEOUT + Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.stream = Some(StreamHandle {
                    events: events_rx,
                    shared,
                    timeout,
                });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                shared.stop.store(true, Ordering::SeqCst);
                Err(CloudError::Stream("no answer from stream thread".to_string()))
            }
        }
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        let stream = self.stream.as_ref()?;
        if let Ok(event) = stream.events.try_recv() {
            return Some(event);
        }

        if stream.shared.idle() > stream.timeout {
            warn!("No stream activity for {:?}, dropping stream", stream.timeout);
            self.stream = None;
            return Some(SessionEvent::TimedOut);
        }
        None
    }

    fn get_string(&mut self, path: &str) -> Result<String, CloudError> {
        let url = self.url(path)?;
        let response = self.http.get(url).send().map_err(transport)?;

        let status = response.status();
        let body = response.text().map_err(transport)?;
        if !status.is_success() {
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

/// Stream reader body. Reports the open result once, then forwards events
/// until the stream ends or the handle is dropped.
fn run_stream(
    client: Client,
    url: String,
    opened: SyncSender<Result<(), CloudError>>,
    events: SyncSender<SessionEvent>,
    shared: Arc<StreamShared>,
) {
    let mut response = match client.get(url).header(ACCEPT, "text/event-stream").send() {
        Ok(response) => response,
        Err(e) => {
            let _ = opened.send(Err(CloudError::Stream(e.to_string())));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let reason = response.text().unwrap_or_default();
        let _ = opened.send(Err(CloudError::Stream(format!("HTTP {} {}", status, reason.trim()))));
        return;
    }
    shared.touch();
    let _ = opened.send(Ok(()));

    let mut decoder = SseDecoder::new();
    let mut chunk = [0u8; 1024];
    while !shared.stop.load(Ordering::SeqCst) {
        let read = match response.read(&mut chunk) {
            Ok(0) => {
                warn!("Stream closed by server");
                break;
            }
            Ok(read) => read,
            Err(e) => {
                warn!("Stream read failed: {}", e);
                break;
            }
        };
        shared.touch();

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

    if !shared.stop.load(Ordering::SeqCst) {
        let _ = events.send(SessionEvent::TimedOut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn shared() -> StreamShared {
        StreamShared {
            opened: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        }
    }

    #[test]
    fn test_touch_resets_idle_time() {
        let shared = shared();
        thread::sleep(Duration::from_millis(30));
        assert!(shared.idle() >= Duration::from_millis(30));

        shared.touch();
        assert!(shared.idle() < Duration::from_millis(30));
    }

    #[test]
    fn test_unstarted_backend_has_no_token() {
        let mut cloud = RestCloud::new().unwrap();

        assert!(!cloud.has_token());
        assert!(!cloud.is_ready());
        assert!(!cloud.is_token_expired());
        assert!(cloud.poll_event().is_none());
        assert!(matches!(cloud.get_string("/texts/last_updated"), Err(CloudError::Auth(_))));
    }

    #[test]
    fn test_begin_without_secrets_fails_before_any_request() {
        let mut cloud = RestCloud::new().unwrap();

        let result = cloud.begin(&CloudConfig::default());

        assert!(matches!(result, Err(CloudError::Auth(_))));
        assert!(!cloud.has_token());
    }

    #[test]
    fn test_silent_stream_ends_reader_after_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts the stream request, sends headers, then stays silent with
        // the connection open.
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request);
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n",
                )
                .unwrap();
            thread::sleep(Duration::from_secs(3));
        });

        let client = stream_client(Duration::from_millis(200)).unwrap();
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);
        let (events_tx, events_rx) = mpsc::sync_channel(4);
        let url = format!("http://{}/texts/sample_text.json", addr);
        let reader = thread::spawn(move || {
            run_stream(client, url, opened_tx, events_tx, Arc::new(shared()))
        });

        assert!(matches!(
            opened_rx.recv_timeout(Duration::from_secs(5)),
            Ok(Ok(()))
        ));
        assert_eq!(
            events_rx.recv_timeout(Duration::from_secs(2)),
            Ok(SessionEvent::TimedOut)
        );
        reader.join().unwrap();
        peer.join().unwrap();
    }
}
