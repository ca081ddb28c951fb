//! HTTP routes of the config portal.
//!
//! Routes are organized as:
//! - `/` - current credentials and the entry forms
//! - `/apply` - store new credentials
//! - `/reset` - wipe stored credentials
//!
//! Method checks and unknown paths are answered by the portal itself, so the
//! fallback forwards as well.

pub mod portal;

use std::sync::Arc;

use axum::{routing::any, Router};

use crate::PortalState;

/// Create the portal router.
pub fn create_router(state: PortalState) -> Router {
    Router::new()
        .route("/", any(portal::forward))
        .route("/apply", any(portal::forward))
        .route("/reset", any(portal::forward))
        .fallback(portal::forward)
        .with_state(Arc::new(state))
}
