//! peerbus - peer connection engine with JSON-RPC style dispatch.
//!
//! The engine establishes, maintains and tears down TCP connections between
//! agents and layers a request/result/error protocol over them. A
//! [`Reactor`] owns a dedicated thread on which all socket I/O runs; peers
//! are created through it and driven from any thread via [`PeerHandle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use peerbus::{MethodRegistry, PeerEvent, Reactor, ReactorConfig};
//! use serde_json::json;
//!
//! fn main() -> peerbus::Result<()> {
//!     let registry = MethodRegistry::builder().echo().build()?;
//!     let reactor = Reactor::start(ReactorConfig::default(), registry)?;
//!
//!     reactor.connect_active("policy.example", "8009", |peer, event| {
//!         if let PeerEvent::Connected = event {
//!             let _ = peer.send("send_identity", json!({"name": "agent-1"}));
//!         }
//!     })?;
//!
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod network;
pub mod peer;
pub mod reactor;
pub mod rpc;
pub mod transport;

// Re-export commonly used types
pub use config::{CommsConfig, PeerConfig, ReactorConfig};
pub use directory::PeerDirectory;
pub use error::{CommsError, Result};
pub use network::{Backoff, RetryConfig};
pub use peer::{EventHandler, LifecycleState, PeerEvent, PeerHandle, PeerRole};
pub use reactor::Reactor;
pub use rpc::{
    methods, CorrelationId, ErrorObject, FrameDecoder, Message, MethodHandler, MethodName,
    MethodRegistry, Reply, Request,
};
pub use transport::{PlaintextFactory, ReadEvent, TransportEngine, TransportFactory};
