//! Config portal on the ESP-IDF HTTP server.
//!
//! Handlers run on the server task. They only translate between the HTTP
//! connection and the portal types; the control loop answers through the
//! [`PortalClient`].

use anyhow::Result;
use cloudlink_core::{portal, PortalClient, PortalRequest, PortalResponse, DEFAULT_CALL_TIMEOUT};
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use log::{info, warn};

/// Start the portal server on `port`.
///
/// The server stops when the returned handle is dropped.
pub fn start_portal_server(client: PortalClient, port: u16) -> Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 10 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for (method, portal_method) in [
        (Method::Get, portal::Method::Get),
        (Method::Post, portal::Method::Post),
    ] {
        let client = client.clone();
        server.fn_handler::<anyhow::Error, _>("/*", method, move |req| {
            let request = PortalRequest::parse(portal_method, req.uri());
            let response = match client.call(request, DEFAULT_CALL_TIMEOUT) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Portal request not serviced: {}", e);
                    PortalResponse::unavailable()
                }
            };
            write_response(req, &response)
        })?;
    }

    info!("Access Point web interface started on port {}", port);
    Ok(server)
}

fn write_response(req: Request<&mut EspHttpConnection<'_>>, response: &PortalResponse) -> Result<()> {
    req.into_response(response.status, None, &[("Content-Type", response.content_type)])?
        .write_all(response.body.as_bytes())?;
    Ok(())
}
