//! # cloudlink-protocol
//!
//! Wire formats of the realtime database used by the cloud session.
//!
//! This crate defines the password sign-in exchange, REST URL layout and the
//! server-sent-event stream codec. It performs no I/O; platform backends feed
//! it bytes and forward the resulting [`cloudlink_core::SessionEvent`]s.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, SseDecoder};
pub use messages::*;
