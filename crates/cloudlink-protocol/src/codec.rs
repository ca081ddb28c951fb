//! Server-sent-event codec for the database stream.
//!
//! The stream is `text/event-stream`: `event:` and `data:` lines, one event
//! per blank-line-terminated block. Network reads split the byte stream at
//! arbitrary points, so the decoder buffers until a block is complete.

use thiserror::Error;

use crate::messages::{StreamEvent, StreamPayload};

/// Errors that can occur while decoding wire data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON payload could not be parsed.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Event name not part of the stream protocol.
    #[error("unknown stream event '{0}'")]
    UnknownEvent(String),

    /// `put`/`patch` without a payload.
    #[error("stream event '{0}' has no data")]
    MissingData(String),

    /// Token lifetime is not a number of seconds.
    #[error("invalid token lifetime '{0}'")]
    InvalidExpiry(String),

    /// The server answered with an error body.
    #[error("server error: {0}")]
    Api(String),

    /// The requested value does not exist.
    #[error("value not found")]
    Missing,
}

/// Incremental decoder for the event stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, CodecError>> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.finish_block() {
                    events.push(event);
                }
                continue;
            }
            self.push_line(line);
        }
        events
    }

    fn push_line(&mut self, line: &str) {
        // Comment line
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn finish_block(&mut self) -> Option<Result<StreamEvent, CodecError>> {
        let name = self.event.take();
        let data = std::mem::take(&mut self.data);
        let name = name?;
        Some(decode_event(&name, &data.join("\n")))
    }
}

/// Decode one event from its name and joined `data:` lines.
pub fn decode_event(name: &str, data: &str) -> Result<StreamEvent, CodecError> {
    match name {
        "put" | "patch" => {
            if data.trim().is_empty() || data.trim() == "null" {
                return Err(CodecError::MissingData(name.to_string()));
            }
            let payload: StreamPayload = serde_json::from_str(data)?;
            Ok(if name == "put" {
                StreamEvent::Put(payload)
            } else {
                StreamEvent::Patch(payload)
            })
        }
        "keep-alive" => Ok(StreamEvent::KeepAlive),
        "cancel" => Ok(StreamEvent::Cancel),
        "auth_revoked" => Ok(StreamEvent::AuthRevoked),
        other => Err(CodecError::UnknownEvent(other.to_string())),
    }
}
