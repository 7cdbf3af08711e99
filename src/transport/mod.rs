//! Transport seam between the connection manager and the wire
//!
//! A [`Transport`] is the persistent duplex primitive to the hub. The
//! manager is the only owner: it builds transports through a
//! [`TransportFactory`], starts and stops them, and receives inbound
//! traffic through the [`TransportEvents`] handle it passes at creation.

mod protocol;
mod websocket;

pub use protocol::{HubMessage, ProtocolError, RECORD_SEPARATOR};
pub use websocket::{
    to_websocket_url, WebSocketTransport, WebSocketTransportFactory, DEFAULT_INVOKE_TIMEOUT,
    DEFAULT_PING_INTERVAL,
};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the connection failed
    #[error("Transport start failed: {0}")]
    Start(String),
    /// An operation on the connection did not finish in time
    #[error("Transport operation timed out after {0:?}")]
    Timeout(Duration),
    /// Operation needs an open connection
    #[error("Transport is not open")]
    NotOpen,
    /// Connection closed while an operation was pending
    #[error("Transport closed: {0}")]
    Closed(String),
    /// Outgoing frame could not be written
    #[error("Send failed: {0}")]
    Send(String),
    /// The hub completed an invocation with an error
    #[error("Invocation failed: {0}")]
    Invocation(String),
    /// Malformed traffic from the hub
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Persistent duplex connection to a hub endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection. Calling it again after a failure or a close
    /// reopens the same instance.
    async fn start(&self) -> Result<(), TransportError>;

    /// Close the connection. A close initiated here is never reported
    /// through [`TransportEvents::closed`].
    async fn stop(&self) -> Result<(), TransportError>;

    /// Fire-and-forget invocation of a hub method
    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError>;

    /// Invoke a hub method and wait for its completion
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError>;
}

/// Builds transports bound to an endpoint. Holds no per-connection state.
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &str, events: TransportEvents) -> Arc<dyn Transport>;
}

/// Receiver side of transport traffic, implemented by the manager
pub trait TransportListener: Send + Sync {
    /// An invocation of `target` arrived from the hub
    fn on_message(&self, generation: u64, target: &str, args: &[Value]);

    /// The connection dropped without a local `stop()`
    fn on_closed(self: Arc<Self>, generation: u64, error: Option<TransportError>);
}

/// Handle a transport uses to report inbound messages and drops.
///
/// Every transport instance gets its own generation number so reports from
/// an instance the manager already discarded are ignored.
#[derive(Clone)]
pub struct TransportEvents {
    generation: u64,
    listener: Weak<dyn TransportListener>,
}

impl TransportEvents {
    pub fn new(generation: u64, listener: Weak<dyn TransportListener>) -> Self {
        Self {
            generation,
            listener,
        }
    }

    /// Generation of the transport this handle belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an inbound invocation
    pub fn message(&self, target: &str, args: &[Value]) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_message(self.generation, target, args);
        }
    }

    /// Report an unexpected close
    pub fn closed(&self, error: Option<TransportError>) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_closed(self.generation, error);
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .field("attached", &(self.listener.strong_count() > 0))
            .finish()
    }
}
