//! HTTP front of the config portal.

use std::net::SocketAddr;

use cloudlink_web::{create_router, PortalState};
use tower_http::trace::TraceLayer;

pub fn app(state: PortalState) -> axum::Router {
    create_router(state).layer(TraceLayer::new_for_http())
}

/// Serve the portal on `addr` until the task is dropped.
pub async fn serve(addr: SocketAddr, state: PortalState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Portal HTTP server listening on {}", addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
