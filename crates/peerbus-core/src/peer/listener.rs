use super::handle::PeerEvent;
use super::state::PeerRole;
use super::{finalize, passive, PeerContext, PeerHandle};
use crate::config::CommsConfig;
use crate::network::{Backoff, RetryConfig};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Accept loop of a listening peer.
///
/// Every accepted connection becomes a Passive peer that shares the
/// listener's configuration and event handler.
pub(crate) async fn run(peer: PeerHandle, ctx: PeerContext, listener: TcpListener) {
    info!("Peer {} listening on {}", peer.id(), peer.target());
    peer.emit(PeerEvent::Connected);

    let retry = accept_retry();
    let mut backoff = Backoff::new();

    loop {
        tokio::select! {
            _ = peer.destroy_requested() => {
                debug!("Peer {} stops accepting", peer.id());
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        backoff.reset();
                        let child = PeerHandle::new(
                            ctx.directory.allocate_id(),
                            PeerRole::Passive,
                            remote.to_string(),
                            peer.config().clone(),
                            peer.event_handler(),
                        );
                        debug!(
                            "Peer {} accepted {} as peer {}",
                            peer.id(),
                            remote,
                            child.id()
                        );
                        ctx.directory.insert(child.clone());
                        tokio::spawn(passive::run(child, ctx.clone(), stream));
                    }
                    Err(e) => {
                        // EMFILE and similar errors persist until descriptors free up.
                        let delay = backoff
                            .next_delay(&retry)
                            .unwrap_or(CommsConfig::ACCEPT_ERROR_MAX_DELAY);
                        error!(
                            "Peer {} accept error: {}, pausing {:?}",
                            peer.id(),
                            e,
                            delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = peer.destroy_requested() => break,
                        }
                    }
                }
            }
        }
    }

    drop(listener);
    finalize(&peer, &ctx);
}

/// Pause policy after failed accepts. Never gives up.
fn accept_retry() -> RetryConfig {
    RetryConfig::new()
        .unlimited()
        .with_base_delay(CommsConfig::ACCEPT_ERROR_DELAY)
        .with_max_delay(CommsConfig::ACCEPT_ERROR_MAX_DELAY)
}
