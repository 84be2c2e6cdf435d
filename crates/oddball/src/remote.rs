//! Remote hold/continue endpoint.
//!
//! A REP socket bound once per run. The controller is a blocking REQ
//! client, so this is a strict request/reply protocol: every received
//! request gets exactly one `"ACK"` before the next poll, or the peer
//! deadlocks waiting for its reply. Unrecognized messages are still
//! acknowledged; they just produce no command.
//!
//! The socket is exclusively owned and exclusively polled by the engine
//! loop; state changes are applied by the scheduler from the returned
//! command, never here.

use anyhow::{Context as _, Result};
use tracing::{debug, info, warn};

/// Reply sent for every request.
pub const ACK: &str = "ACK";

/// Source of remote commands, polled once per scheduler cycle.
///
/// The scheduler only needs the bounded poll; tests script commands
/// through this seam without a socket.
pub trait CommandSource {
    fn poll(&self, timeout_ms: i64) -> Result<Option<RemoteCommand>>;
}

/// Decoded controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Pause at the current trial, replaying filler cycles.
    Hold,
    /// Resume the held trial.
    Continue,
}

/// REP endpoint for the hold/continue protocol.
pub struct RemoteControl {
    // Context must outlive the socket.
    _context: zmq::Context,
    socket: zmq::Socket,
    endpoint: String,
}

impl RemoteControl {
    /// Bind the endpoint. One binding per run.
    pub fn bind(endpoint: &str) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::REP)
            .context("failed to create remote-control REP socket")?;
        // Don't block on close - let pending messages drop
        socket
            .set_linger(0)
            .context("failed to set LINGER on remote-control socket")?;
        socket
            .bind(endpoint)
            .with_context(|| format!("failed to bind remote-control socket to {endpoint}"))?;
        info!(endpoint, "remote control bound");
        Ok(Self {
            _context: context,
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait at most `timeout_ms` for one request and decode it.
    ///
    /// Returns `Ok(None)` when no request arrived, when the message is
    /// outside the two-string vocabulary, or when it is not UTF-8. Every
    /// received request is acknowledged exactly once before returning.
    pub fn poll(&self, timeout_ms: i64) -> Result<Option<RemoteCommand>> {
        let events = self
            .socket
            .poll(zmq::POLLIN, timeout_ms)
            .context("remote-control poll failed")?;
        if events == 0 {
            return Ok(None);
        }
        let message = self
            .socket
            .recv_string(0)
            .context("failed to receive remote-control request")?;
        self.socket
            .send(ACK, 0)
            .context("failed to acknowledge remote-control request")?;
        match message {
            Ok(text) => match text.as_str() {
                "hold" => {
                    info!("remote hold requested");
                    Ok(Some(RemoteCommand::Hold))
                }
                "continue" => {
                    info!("remote continue requested");
                    Ok(Some(RemoteCommand::Continue))
                }
                other => {
                    debug!(message = other, "unrecognized remote message, acknowledged");
                    Ok(None)
                }
            },
            Err(bytes) => {
                warn!(len = bytes.len(), "non-UTF-8 remote message, acknowledged");
                Ok(None)
            }
        }
    }
}

impl CommandSource for RemoteControl {
    fn poll(&self, timeout_ms: i64) -> Result<Option<RemoteCommand>> {
        RemoteControl::poll(self, timeout_ms)
    }
}
