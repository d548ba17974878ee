//! Centralized configuration for the peerbus engine.
//!
//! Compile-time defaults live on [`CommsConfig`]. Per-peer behavior is set
//! through [`PeerConfig`] and the reactor itself through [`ReactorConfig`].

use crate::network::RetryConfig;
use crate::transport::{PlaintextFactory, TransportFactory};
use std::sync::Arc;
use std::time::Duration;

/// Engine-wide defaults and limits.
pub struct CommsConfig;

impl CommsConfig {
    /// Size handed to the transport's buffer allocator before each read.
    pub const READ_BUFFER_SIZE: usize = 64 * 1024;
    /// Largest single frame accepted from a remote peer.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    /// Byte terminating every frame on the wire.
    pub const FRAME_DELIMITER: u8 = 0;
    /// Bytes a peer may hold in its send queue before `send` is refused.
    pub const MAX_SEND_QUEUE: usize = 64 * 1024 * 1024;
    pub const LISTEN_BACKLOG: u32 = 1024;
    /// First pause after a failed `accept`, doubled while failures persist.
    pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(10);
    pub const ACCEPT_ERROR_MAX_DELAY: Duration = Duration::from_secs(1);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REACTOR_THREAD_NAME: &'static str = "peerbus-reactor";

    // Keep-alive: ping once silence exceeds interval / 4, drop the
    // connection once it exceeds interval * 4.
    pub const KEEPALIVE_PING_DIVISOR: u32 = 4;
    pub const KEEPALIVE_TIMEOUT_MULTIPLIER: u32 = 4;
}

/// Behavior of a single peer and of the peers it spawns.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Reconnect policy for active peers.
    pub retry: RetryConfig,
    /// Bound on each individual connect attempt.
    pub connect_timeout: Duration,
    /// Keep-alive tick. `None` disables keep-alive.
    pub keepalive_interval: Option<Duration>,
    pub max_message_size: usize,
    pub read_buffer_size: usize,
    /// Cap on unsent bytes held for the remote.
    pub max_send_queue: usize,
    /// Produces one fresh transport engine per connection.
    pub transport: Arc<dyn TransportFactory>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            connect_timeout: CommsConfig::CONNECT_TIMEOUT,
            keepalive_interval: None,
            max_message_size: CommsConfig::MAX_MESSAGE_SIZE,
            read_buffer_size: CommsConfig::READ_BUFFER_SIZE,
            max_send_queue: CommsConfig::MAX_SEND_QUEUE,
            transport: Arc::new(PlaintextFactory),
        }
    }
}

impl PeerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_max_send_queue(mut self, bytes: usize) -> Self {
        self.max_send_queue = bytes;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = transport;
        self
    }
}

/// Configuration for the reactor thread.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    pub thread_name: String,
    /// How long `shutdown` waits for every peer to reach `Destroyed`.
    pub shutdown_timeout: Duration,
    /// Applied to peers created without an explicit config.
    pub peer: PeerConfig,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            thread_name: CommsConfig::REACTOR_THREAD_NAME.to_string(),
            shutdown_timeout: CommsConfig::SHUTDOWN_TIMEOUT,
            peer: PeerConfig::default(),
        }
    }
}

impl ReactorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_peer_config(mut self, peer: PeerConfig) -> Self {
        self.peer = peer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_reasonable() {
        let config = PeerConfig::default();
        assert!(config.connect_timeout > Duration::ZERO);
        assert!(config.keepalive_interval.is_none());
        assert!(config.read_buffer_size > 0);
        assert!(config.max_message_size >= config.read_buffer_size);
        assert_eq!(config.transport.name(), "plaintext");
    }

    #[test]
    fn test_builder_overrides() {
        let config = PeerConfig::new()
            .with_keepalive(Duration::from_millis(200))
            .with_max_message_size(128)
            .with_retry(RetryConfig::new().with_max_attempts(2));

        assert_eq!(config.keepalive_interval, Some(Duration::from_millis(200)));
        assert_eq!(config.max_message_size, 128);
        assert_eq!(config.retry.max_attempts, Some(2));
    }
}
