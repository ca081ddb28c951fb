//! Portal transport: how HTTP requests reach the control loop.
//!
//! On multi-tasking platforms the HTTP server answers on its own tasks. Those
//! tasks never touch the credential store; they post the request over a
//! bounded channel and wait for the control loop to service it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::portal::{PortalRequest, PortalResponse};

/// Default time an HTTP task waits for the control loop.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of pending portal requests, serviced by the control loop.
pub trait PortalTransport {
    /// Hand at most one pending request to `handler`.
    ///
    /// Returns true if a request was serviced.
    fn service(&mut self, handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> bool;
}

/// Transport with nothing to service, for devices running in station mode
/// without a portal server.
#[derive(Debug, Default)]
pub struct NoTransport;

impl PortalTransport for NoTransport {
    fn service(&mut self, _handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> bool {
        false
    }
}

/// Errors seen by an HTTP task calling into the control loop.
#[derive(Debug, Error)]
pub enum PortalCallError {
    /// Too many requests already queued.
    #[error("portal queue is full")]
    Busy,

    /// The control loop is gone (device restarting).
    #[error("control loop is not running")]
    Closed,

    #[error("no reply from control loop within {0:?}")]
    Timeout(Duration),
}

type Envelope = (PortalRequest, SyncSender<PortalResponse>);

/// Create a connected client/transport pair with room for `capacity`
/// queued requests.
pub fn channel_transport(capacity: usize) -> (PortalClient, ChannelTransport) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (PortalClient { tx }, ChannelTransport { rx })
}

/// Handle used by HTTP tasks. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PortalClient {
    tx: SyncSender<Envelope>,
}

impl PortalClient {
    /// Post `request` and block until the control loop answers or `timeout`
    /// elapses.
    pub fn call(
        &self,
        request: PortalRequest,
        timeout: Duration,
    ) -> Result<PortalResponse, PortalCallError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);

        match self.tx.try_send((request, reply_tx)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(PortalCallError::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(PortalCallError::Closed),
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => Err(PortalCallError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PortalCallError::Closed),
        }
    }
}

/// Control-loop side of [`channel_transport`].
#[derive(Debug)]
pub struct ChannelTransport {
    rx: Receiver<Envelope>,
}

impl PortalTransport for ChannelTransport {
    fn service(&mut self, handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> bool {
        let (request, reply) = match self.rx.try_recv() {
            Ok(envelope) => envelope,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return false,
        };

        let response = handler(&request);
        debug!("Serviced {} -> {}", request.path, response.status);
        if reply.send(response).is_err() {
            warn!("Portal caller for {} went away before the reply", request.path);
        }
        true
    }
}
