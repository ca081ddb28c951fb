//! Forwarding of HTTP requests to the device control loop.

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use cloudlink_core::{portal, PortalCallError, PortalRequest, PortalResponse};
use tracing::{debug, error, warn};

use crate::AppState;

/// Hand the request to the control loop and relay its answer.
///
/// The portal client blocks, so the call runs on the blocking pool.
pub async fn forward(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let request = PortalRequest::parse(portal::Method::parse(method.as_str()), &target);
    debug!("Forwarding {} {}", method, request.path);

    let client = state.client.clone();
    let timeout = state.timeout;
    match tokio::task::spawn_blocking(move || client.call(request, timeout)).await {
        Ok(Ok(response)) => into_http(response),
        Ok(Err(e)) => {
            warn!("Portal request {} not serviced: {}", target, e);
            (call_error_status(&e), e.to_string()).into_response()
        }
        Err(e) => {
            error!("Portal forwarding task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn call_error_status(error: &PortalCallError) -> StatusCode {
    match error {
        PortalCallError::Busy | PortalCallError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        PortalCallError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// Convert a portal response into an HTTP response.
pub fn into_http(response: PortalResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_call_error_status() {
        assert_eq!(
            call_error_status(&PortalCallError::Busy),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            call_error_status(&PortalCallError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_into_http_keeps_status_and_type() {
        let response = into_http(PortalResponse::text(405, "Method Not Allowed"));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
