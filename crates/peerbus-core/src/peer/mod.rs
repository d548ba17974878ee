//! Communication peers.
//!
//! A peer is one logical connection: an outbound [`PeerRole::Active`] peer,
//! an accepted [`PeerRole::Passive`] peer or a [`PeerRole::Listening`]
//! socket. Each runs as one task on the reactor runtime and is reached from
//! other threads through its [`PeerHandle`].

pub(crate) mod active;
mod handle;
pub(crate) mod listener;
pub(crate) mod passive;
pub(crate) mod pending;
mod session;
mod state;

pub use handle::{EventHandler, PeerEvent, PeerHandle};
pub use state::{DestroyOutcome, InvalidTransition, Lifecycle, LifecycleState, PeerRole};

use crate::directory::PeerDirectory;
use crate::rpc::{dispatch, MethodRegistry};
use std::sync::Arc;
use tracing::debug;

/// Shared state every peer task runs with.
#[derive(Clone)]
pub(crate) struct PeerContext {
    pub directory: PeerDirectory,
    pub registry: Arc<MethodRegistry>,
}

/// Release a peer whose socket is gone. Only the first call has effect.
pub(crate) fn finalize(peer: &PeerHandle, ctx: &PeerContext) {
    if !peer.confirm_closed() {
        return;
    }

    dispatch::fail_pending(&ctx.registry, peer);
    ctx.directory.remove(peer);
    debug!("Peer {} ({}) destroyed", peer.id(), peer.role());
    peer.emit(PeerEvent::Destroyed);
}
