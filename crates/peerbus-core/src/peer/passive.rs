use super::handle::PeerEvent;
use super::session::{self, SessionEnd};
use super::{finalize, PeerContext, PeerHandle};
use tokio::net::TcpStream;
use tracing::debug;

/// Serve one accepted connection. There is no reconnect: when the
/// connection is lost the peer is destroyed.
pub(crate) async fn run(peer: PeerHandle, ctx: PeerContext, stream: TcpStream) {
    peer.emit(PeerEvent::Connected);

    if let SessionEnd::Failed(err) = session::run(&peer, &ctx, stream).await {
        debug!("Passive peer {} ({}) closing: {}", peer.id(), peer.target(), err);
        peer.connection_lost(false);
        peer.emit(PeerEvent::Disconnected);
    }

    finalize(&peer, &ctx);
}
