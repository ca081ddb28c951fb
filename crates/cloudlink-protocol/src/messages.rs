//! Message types for the realtime database REST API.
//!
//! This module covers:
//! - Password sign-in: request, response and the derived [`IdToken`]
//! - REST URL layout for reads and streams
//! - Stream events and their mapping onto session events
//!
//! All payloads are JSON.

use chrono::{DateTime, Duration, Utc};
use cloudlink_core::{SessionEvent, StreamUpdate};
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Host of the password sign-in endpoint.
pub const IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Tokens are treated as expired this long before the server says so.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

// ============================================================================
// Sign-in
// ============================================================================

/// Body of `accounts:signInWithPassword`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
    pub return_secure_token: bool,
}

impl SignInRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            return_secure_token: true,
        }
    }
}

/// Successful sign-in response.
///
/// # Example
/// ```json
/// {
///   "idToken": "eyJhbGciOi...",
///   "refreshToken": "AMf-vBx...",
///   "expiresIn": "3600",
///   "localId": "tRcfmLH7..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Token lifetime in seconds, sent as a string.
    pub expires_in: String,
    pub local_id: String,
}

/// Error body returned by the identity and database endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiError {
    /// Identity endpoint: `{"error": {"code": 400, "message": "INVALID_PASSWORD"}}`
    Detailed {
        #[serde(default)]
        code: u16,
        message: String,
    },
    /// Database endpoint: `{"error": "Permission denied"}`
    Plain(String),
}

impl ApiError {
    pub fn message(&self) -> &str {
        match self {
            ApiError::Detailed { message, .. } => message,
            ApiError::Plain(message) => message,
        }
    }
}

/// URL of the password sign-in endpoint for `api_key`.
pub fn sign_in_url(api_key: &str) -> String {
    format!(
        "{}/accounts:signInWithPassword?key={}",
        IDENTITY_BASE_URL,
        urlencoding::encode(api_key)
    )
}

/// Decode a sign-in reply, turning an error body into [`CodecError::Api`].
pub fn decode_sign_in(body: &str) -> Result<SignInResponse, CodecError> {
    if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
        return Err(CodecError::Api(error.error.message().to_string()));
    }
    Ok(serde_json::from_str(body)?)
}

/// An issued ID token with its local expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdToken {
    pub token: String,
    pub refresh_token: String,
    pub uid: String,
    pub expires_at: DateTime<Utc>,
}

impl IdToken {
    /// Build a token from a sign-in response received at `now`.
    pub fn from_response(response: SignInResponse, now: DateTime<Utc>) -> Result<Self, CodecError> {
        let lifetime: i64 = response
            .expires_in
            .trim()
            .parse()
            .map_err(|_| CodecError::InvalidExpiry(response.expires_in.clone()))?;

        Ok(Self {
            token: response.id_token,
            refresh_token: response.refresh_token,
            uid: response.local_id,
            expires_at: now + Duration::seconds(lifetime),
        })
    }

    /// True once `now` is within the safety margin of the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

// ============================================================================
// REST paths
// ============================================================================

/// REST URL of `path` under `database_url`, authenticated with `token`.
///
/// Each path segment is percent-encoded; empty segments are dropped.
pub fn database_url(database_url: &str, path: &str, token: Option<&str>) -> String {
    let mut url = database_url.trim_end_matches('/').to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url.push_str(".json");
    if let Some(token) = token {
        url.push_str("?auth=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}

// ============================================================================
// Stream events
// ============================================================================

/// `data:` payload of a `put` or `patch` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    /// Location of the change, relative to the watched path.
    pub path: String,
    pub data: serde_json::Value,
}

/// One event of the database event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put(StreamPayload),
    Patch(StreamPayload),
    KeepAlive,
    /// The server stopped the stream (rules changed, permission lost).
    Cancel,
    /// The token used for the stream is no longer valid.
    AuthRevoked,
}

/// JSON type name of `value`.
pub fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_f64() => "float",
        serde_json::Value::Number(_) => "int",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "json",
    }
}

impl StreamEvent {
    /// Map onto the session event queue.
    ///
    /// Keep-alives carry nothing and yield `None`. A cancelled or revoked
    /// stream is reported as a timeout so the periodic check rebuilds it.
    pub fn into_session_event(self) -> Option<SessionEvent> {
        match self {
            StreamEvent::Put(payload) | StreamEvent::Patch(payload) => {
                let update = match payload.data {
                    serde_json::Value::String(text) => StreamUpdate::Text(text),
                    other => StreamUpdate::Other {
                        kind: value_kind(&other).to_string(),
                    },
                };
                Some(SessionEvent::DataReceived(update))
            }
            StreamEvent::KeepAlive => None,
            StreamEvent::Cancel | StreamEvent::AuthRevoked => Some(SessionEvent::TimedOut),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Put(_) => "put",
            StreamEvent::Patch(_) => "patch",
            StreamEvent::KeepAlive => "keep-alive",
            StreamEvent::Cancel => "cancel",
            StreamEvent::AuthRevoked => "auth_revoked",
        }
    }
}

/// Decode a one-shot read of a string value.
///
/// A JSON string yields its content; any other value is rendered as JSON text.
pub fn decode_string_value(body: &str) -> Result<String, CodecError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(CodecError::Api(error.to_string()));
    }
    match value {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Null => Err(CodecError::Missing),
        other => Ok(other.to_string()),
    }
}
