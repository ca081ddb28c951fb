//! Config portal request handlers.
//!
//! Framework-agnostic: the HTTP server on each platform turns its native
//! request into a [`PortalRequest`] and writes back the [`PortalResponse`].
//! A mutating request only asks for a restart; the device loop decides when
//! it happens.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::credentials::Credentials;
use crate::device::RestartReason;
use crate::region::ByteRegion;
use crate::store::CredentialStore;

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

pub const SAVED_MESSAGE: &str = "Credentials saved. Rebooting...";
pub const CLEARED_MESSAGE: &str = "Stored credentials cleared. Restarting...";

/// HTTP method of a portal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

/// A request as seen by the portal: method, path and decoded query fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl PortalRequest {
    /// Build a request from a method and a raw target (`/apply?ssid=...`).
    pub fn parse(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(name), decode_component(value))
            })
            .collect();

        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            params,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::parse(Method::Get, target)
    }

    /// First value of query field `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Query field `name`, empty when absent.
    pub fn field(&self, name: &str) -> &str {
        self.param(name).unwrap_or("")
    }
}

/// Form-style decoding: `+` is a space, then percent escapes. Invalid UTF-8
/// is replaced rather than rejected.
fn decode_component(raw: &str) -> String {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Answer to a portal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    /// Restart requested once the response has been sent.
    pub restart: Option<RestartReason>,
}

impl PortalResponse {
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: CONTENT_TYPE_HTML,
            body: body.into(),
            restart: None,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: CONTENT_TYPE_TEXT,
            body: body.into(),
            restart: None,
        }
    }

    pub fn not_found() -> Self {
        Self::text(404, "Not Found")
    }

    pub fn method_not_allowed() -> Self {
        Self::text(405, "Method Not Allowed")
    }

    pub fn unavailable() -> Self {
        Self::text(503, "Portal busy, try again")
    }

    fn with_restart(mut self, reason: RestartReason) -> Self {
        self.restart = Some(reason);
        self
    }
}

/// Handlers for `/`, `/apply` and `/reset`.
#[derive(Debug, Clone)]
pub struct ConfigPortal {
    title: String,
    restart_delay: Duration,
}

impl ConfigPortal {
    pub fn new(title: impl Into<String>, restart_delay: Duration) -> Self {
        Self {
            title: title.into(),
            restart_delay,
        }
    }

    /// Delay between a successful apply/reset and the restart.
    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    pub fn handle<R: ByteRegion>(
        &self,
        store: &mut CredentialStore<R>,
        request: &PortalRequest,
    ) -> PortalResponse {
        debug!("Portal request {:?} {}", request.method, request.path);

        let route = match request.path.as_str() {
            "/" | "/apply" | "/reset" => request.path.as_str(),
            _ => return PortalResponse::not_found(),
        };
        if request.method != Method::Get {
            return PortalResponse::method_not_allowed();
        }

        match route {
            "/apply" => self.apply(store, request),
            "/reset" => self.reset(store),
            _ => self.index(store),
        }
    }

    fn index<R: ByteRegion>(&self, store: &CredentialStore<R>) -> PortalResponse {
        let credentials = store.load();
        PortalResponse::html(200, render_page(&self.title, &credentials))
    }

    fn apply<R: ByteRegion>(
        &self,
        store: &mut CredentialStore<R>,
        request: &PortalRequest,
    ) -> PortalResponse {
        let credentials = Credentials::new(
            request.field("ssid"),
            request.field("password"),
            request.field("devid"),
        );

        match store.save(&credentials) {
            Ok(stored) => {
                info!(
                    "New credentials applied for network '{}', restarting in {:?}",
                    stored.network_name, self.restart_delay
                );
                PortalResponse::html(200, SAVED_MESSAGE).with_restart(RestartReason::CredentialsSaved)
            }
            Err(e) => {
                error!("Failed to save credentials: {}", e);
                PortalResponse::text(500, format!("Failed to save credentials: {}", e))
            }
        }
    }

    fn reset<R: ByteRegion>(&self, store: &mut CredentialStore<R>) -> PortalResponse {
        match store.wipe() {
            Ok(()) => {
                info!("Credentials wiped, restarting in {:?}", self.restart_delay);
                PortalResponse::html(200, CLEARED_MESSAGE).with_restart(RestartReason::CredentialsWiped)
            }
            Err(e) => {
                error!("Failed to clear credentials: {}", e);
                PortalResponse::text(500, format!("Failed to clear credentials: {}", e))
            }
        }
    }
}

/// Escape text for inclusion in HTML content and attribute values.
pub fn escape_html(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn render_page(title: &str, credentials: &Credentials) -> String {
    let mut page = String::with_capacity(1536);
    page.push_str("<!DOCTYPE html><html><head><meta charset='utf-8'><title>WiFi Setup</title>");
    page.push_str(
        "<style>body{font-family:sans-serif;}input{width:100%;padding:8px;margin:5px 0;}\
         label{font-weight:bold;}button{padding:8px;background:#007BFF;color:#fff;border:none;cursor:pointer;}</style>",
    );
    let _ = write!(page, "</head><body><h2>{}</h2><hr>", escape_html(title));

    // The secret is shown in plaintext; the portal is only reachable on the
    // device's own open network.
    let _ = write!(
        page,
        "<p><strong>Saved WiFi:</strong><br>SSID: {}<br>Password: {}<br>Device ID: {}</p><hr>",
        escape_html(&credentials.network_name),
        escape_html(&credentials.network_secret),
        escape_html(&credentials.device_id),
    );

    page.push_str("<form action='/apply' method='get'>");
    page.push_str("<label>New SSID:</label><input type='text' name='ssid' maxlength='19'><br>");
    page.push_str("<label>New Password:</label><input type='password' name='password' maxlength='19'><br>");
    page.push_str("<label>Device ID:</label><input type='text' name='devid' maxlength='19'><br>");
    page.push_str("<button type='submit'>Save Settings</button></form><br>");
    page.push_str(
        "<form action='/reset' method='get'><button type='submit' style='background:red;'>Clear stored settings</button></form>",
    );
    page.push_str("</body></html>");
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::REGION_SIZE;
    use crate::region::{MemoryRegion, StorageError};
    use pretty_assertions::assert_eq;

    struct ReadOnlyRegion(MemoryRegion);

    impl ByteRegion for ReadOnlyRegion {
        fn size(&self) -> usize {
            self.0.size()
        }

        fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
            self.0.read(offset, buf)
        }

        fn write(&mut self, _offset: usize, _data: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Write("write protected".to_string()))
        }

        fn commit(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn portal() -> ConfigPortal {
        ConfigPortal::new("ESP32 WiFi Configuration", Duration::from_secs(2))
    }

    fn store() -> CredentialStore<MemoryRegion> {
        CredentialStore::new(MemoryRegion::new(REGION_SIZE))
    }

    #[test]
    fn test_parse_query() {
        let request = PortalRequest::get("/apply?ssid=Home+Net&password=p%26w%3D1&devid=");

        assert_eq!(request.path, "/apply");
        assert_eq!(request.field("ssid"), "Home Net");
        assert_eq!(request.field("password"), "p&w=1");
        assert_eq!(request.param("devid"), Some(""));
        assert_eq!(request.param("missing"), None);
        assert_eq!(request.field("missing"), "");
    }

    #[test]
    fn test_parse_without_query() {
        let request = PortalRequest::parse(Method::Post, "/reset");
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/reset");
        assert!(request.params.is_empty());

        assert_eq!(PortalRequest::get("?a=1").path, "/");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("get"), Method::Get);
        assert_eq!(Method::parse("POST"), Method::Post);
        assert_eq!(Method::parse("DELETE"), Method::Other);
    }

    #[test]
    fn test_index_shows_escaped_credentials() {
        let mut store = store();
        store
            .save(&Credentials::new("<Home>", "pw&1", "dev-42"))
            .unwrap();

        let response = portal().handle(&mut store, &PortalRequest::get("/"));

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, CONTENT_TYPE_HTML);
        assert!(response.body.contains("SSID: &lt;Home&gt;"));
        assert!(response.body.contains("Password: pw&amp;1"));
        assert!(response.body.contains("Device ID: dev-42"));
        assert!(response.body.contains("action='/apply'"));
        assert!(response.body.contains("action='/reset'"));
        assert_eq!(response.restart, None);
    }

    #[test]
    fn test_apply_persists_and_requests_restart() {
        let mut store = store();

        let response = portal().handle(
            &mut store,
            &PortalRequest::get("/apply?ssid=NewNet&password=pw&devid=id9"),
        );

        assert_eq!(response.status, 200);
        assert_eq!(response.body, SAVED_MESSAGE);
        assert_eq!(response.restart, Some(RestartReason::CredentialsSaved));
        assert_eq!(store.load(), Credentials::new("NewNet", "pw", "id9"));
    }

    #[test]
    fn test_apply_missing_fields_are_empty() {
        let mut store = store();
        store
            .save(&Credentials::new("Old", "oldpw", "old-id"))
            .unwrap();

        portal().handle(&mut store, &PortalRequest::get("/apply?ssid=OnlyName"));

        assert_eq!(store.load(), Credentials::new("OnlyName", "", ""));
    }

    #[test]
    fn test_apply_truncates_long_values() {
        let mut store = store();
        let target = format!("/apply?ssid={}&password=pw&devid=id", "x".repeat(40));

        let response = portal().handle(&mut store, &PortalRequest::get(&target));

        assert_eq!(response.status, 200);
        assert_eq!(store.load().network_name, "x".repeat(19));
    }

    #[test]
    fn test_reset_wipes_and_requests_restart() {
        let mut store = store();
        store
            .save(&Credentials::new("HomeNet", "secret123", "dev-42"))
            .unwrap();

        let response = portal().handle(&mut store, &PortalRequest::get("/reset"));

        assert_eq!(response.status, 200);
        assert_eq!(response.body, CLEARED_MESSAGE);
        assert_eq!(response.restart, Some(RestartReason::CredentialsWiped));
        assert_eq!(store.load(), Credentials::default());
    }

    #[test]
    fn test_storage_fault_is_500_without_restart() {
        let mut store = CredentialStore::new(ReadOnlyRegion(MemoryRegion::new(REGION_SIZE)));

        let apply = portal().handle(&mut store, &PortalRequest::get("/apply?ssid=a"));
        let reset = portal().handle(&mut store, &PortalRequest::get("/reset"));

        for response in [apply, reset] {
            assert_eq!(response.status, 500);
            assert!(response.body.contains("write protected"));
            assert_eq!(response.restart, None);
        }
    }

    #[test]
    fn test_unknown_path_and_method() {
        let mut store = store();

        let missing = portal().handle(&mut store, &PortalRequest::get("/favicon.ico"));
        assert_eq!(missing.status, 404);

        let post = portal().handle(&mut store, &PortalRequest::parse(Method::Post, "/apply?ssid=x"));
        assert_eq!(post.status, 405);
        assert_eq!(store.load(), Credentials::default());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("plain"), "plain");
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
    }
}
