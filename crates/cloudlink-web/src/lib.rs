//! # cloudlink-web
//!
//! The config portal served over HTTP on a Linux host.
//!
//! The router owns no device state. Every request is handed to the device
//! control loop through a [`PortalClient`] and answered with whatever the
//! loop returns, so the credential store is only ever touched by the loop.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cloudlink_core::channel_transport;
//! use cloudlink_web::{create_router, PortalState};
//!
//! let (client, transport) = channel_transport(8);
//! let app = create_router(PortalState::new(client));
//!
//! let listener = TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod routes;

// Re-exports
pub use routes::create_router;

use std::sync::Arc;
use std::time::Duration;

use cloudlink_core::{PortalClient, DEFAULT_CALL_TIMEOUT};

/// Shared state of the portal handlers.
pub struct PortalState {
    pub client: PortalClient,
    /// How long a handler waits for the control loop.
    pub timeout: Duration,
}

impl PortalState {
    pub fn new(client: PortalClient) -> Self {
        Self {
            client,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<PortalState>;
