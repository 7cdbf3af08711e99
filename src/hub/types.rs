//! Connection manager types and configuration

use super::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::transport::TransportError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default number of reconnect attempts before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default bound on a single transport open or close
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Connectivity state of a [`ConnectionManager`](super::ConnectionManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport, or stopped by `disconnect()`
    Disconnected,
    /// First open attempt of a `connect()` in progress
    Connecting,
    /// Transport open
    Connected,
    /// Retry loop running
    Reconnecting,
    /// Retry loop exhausted its attempts
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a connect or retry attempt is in flight
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    /// Stable numeric code for the state gauge
    pub fn code(&self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the connection manager
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// The retry loop used up every attempt without connecting
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    /// `disconnect()` interrupted the connection attempt
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,
    /// A call needing a live connection could not get one
    #[error("Not connected: {0}")]
    NotConnected(String),
    /// The live transport rejected a send or invoke
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Connection manager configuration
#[derive(Clone)]
pub struct ManagerConfig {
    /// Hub endpoint URL
    pub endpoint: String,
    /// Retry loop attempts before entering `Failed`
    pub max_reconnect_attempts: u32,
    /// Wait before each retry attempt
    pub backoff: Arc<dyn BackoffPolicy>,
    /// Bound on a single transport open or close (None = transport's own)
    pub open_timeout: Option<Duration>,
}

impl ManagerConfig {
    /// Create a config for the given endpoint with defaults
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff: Arc::new(ExponentialBackoff::default()),
            open_timeout: Some(DEFAULT_OPEN_TIMEOUT),
        }
    }

    /// Set maximum reconnect attempts
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Replace the backoff policy
    pub fn backoff(mut self, policy: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Arc::new(policy);
        self
    }

    /// Set the open/close timeout
    pub fn open_timeout(mut self, d: Duration) -> Self {
        self.open_timeout = Some(d);
        self
    }

    /// Rely on the transport's own timeouts
    pub fn no_open_timeout(mut self) -> Self {
        self.open_timeout = None;
        self
    }
}

impl std::fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("endpoint", &self.endpoint)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("open_timeout", &self.open_timeout)
            .finish_non_exhaustive()
    }
}
