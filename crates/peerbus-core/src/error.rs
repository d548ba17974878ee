//! Error types for the peerbus engine.
//!
//! Every failure the engine can surface is a [`CommsError`]. The variants
//! follow the engine's error taxonomy: I/O failures are contained to one
//! connection, protocol failures tear down only the offending connection,
//! dispatch failures are reported to the remote side, and configuration
//! failures are returned synchronously before any I/O starts.

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the peerbus engine.
#[derive(Debug, Error)]
pub enum CommsError {
    // I/O errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        /// Remote or local address involved, when known
        addr: Option<SocketAddr>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Peer {peer} is not connected")]
    NotConnected { peer: u64 },

    #[error("Connect to {target} timed out after {timeout:?}")]
    ConnectTimeout {
        target: String,
        timeout: std::time::Duration,
    },

    #[error("Send queue of peer {peer} is full ({queued} of {max} bytes)")]
    SendQueueFull { peer: u64, queued: usize, max: usize },

    #[error("Nothing heard from peer for {silence:?}")]
    KeepAliveTimeout { silence: std::time::Duration },

    // Protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Transport errors
    #[error("Transport {transport} failed: {message}")]
    Transport {
        transport: &'static str,
        message: String,
    },

    // Dispatch errors
    #[error("Unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("Remote error: {message}")]
    Remote {
        code: i64,
        message: String,
        payload: serde_json::Value,
    },

    // Configuration errors
    #[error("Methods {first} and {second} share hash {hash:#018x}")]
    DuplicateMethodHash {
        first: String,
        second: String,
        hash: u64,
    },

    #[error("Invalid address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Invalid port {port}: must be in 1-65535")]
    InvalidPort { port: u32 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Reactor is not running")]
    ReactorStopped,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for peerbus operations.
pub type Result<T> = std::result::Result<T, CommsError>;

impl From<std::io::Error> for CommsError {
    fn from(err: std::io::Error) -> Self {
        CommsError::Io {
            message: err.to_string(),
            addr: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CommsError {
    fn from(err: serde_json::Error) -> Self {
        CommsError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CommsError {
    /// Create an IO error with address context.
    pub fn io_with_addr(err: std::io::Error, addr: SocketAddr) -> Self {
        CommsError::Io {
            message: err.to_string(),
            addr: Some(addr),
            source: Some(err),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        CommsError::Protocol {
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32603: Internal error
    ///
    /// Engine-defined codes (-32000 to -32099):
    /// - -32000: Connection/transport failure
    /// - -32001: Peer not connected or not accepting more data
    /// - -32002: Configuration error
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            CommsError::Json { .. } => -32700,

            CommsError::Protocol { .. } | CommsError::MessageTooLarge { .. } => -32600,

            CommsError::UnknownMethod { .. } => -32601,

            CommsError::Io { .. }
            | CommsError::ConnectionClosed
            | CommsError::ConnectTimeout { .. }
            | CommsError::KeepAliveTimeout { .. }
            | CommsError::Transport { .. } => -32000,

            CommsError::NotConnected { .. }
            | CommsError::SendQueueFull { .. }
            | CommsError::ReactorStopped => -32001,

            CommsError::DuplicateMethodHash { .. }
            | CommsError::InvalidAddress { .. }
            | CommsError::InvalidPort { .. }
            | CommsError::Config { .. } => -32002,

            CommsError::Remote { code, .. } => *code,

            CommsError::Other(_) => -32603,
        }
    }

    /// Check if this error should trigger a reconnect attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommsError::Io { .. }
                | CommsError::ConnectionClosed
                | CommsError::ConnectTimeout { .. }
                | CommsError::KeepAliveTimeout { .. }
        )
    }

    /// Malformed input from the remote side.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            CommsError::Protocol { .. }
                | CommsError::MessageTooLarge { .. }
                | CommsError::Json { .. }
        )
    }

    /// Configuration failures are reported before the reactor serves anything.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CommsError::DuplicateMethodHash { .. }
                | CommsError::InvalidAddress { .. }
                | CommsError::InvalidPort { .. }
                | CommsError::Config { .. }
        )
    }
}
