//! Outbound connection task with reconnect.

use super::handle::PeerEvent;
use super::session::{self, SessionEnd};
use super::state::LifecycleState;
use super::{finalize, PeerContext, PeerHandle};
use crate::error::{CommsError, Result};
use crate::network::Backoff;
use crate::rpc::dispatch;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info, warn};

pub(crate) async fn run(peer: PeerHandle, ctx: PeerContext, host: String, port: u16) {
    let retry = peer.config().retry.clone();
    let connect_timeout = peer.config().connect_timeout;
    let mut backoff = Backoff::new();

    loop {
        if peer.is_closing() {
            break;
        }

        let attempt = tokio::select! {
            result = connect(&host, port, connect_timeout) => result,
            _ = peer.destroy_requested() => break,
        };

        let failure = match attempt {
            Ok(stream) => {
                backoff.reset();
                if peer.transition(LifecycleState::Connected).is_err() {
                    break;
                }
                info!("Peer {} connected to {}:{}", peer.id(), host, port);
                peer.emit(PeerEvent::Connected);

                match session::run(&peer, &ctx, stream).await {
                    SessionEnd::Closed => break,
                    SessionEnd::Failed(err) => {
                        let retryable = err.is_retryable();
                        let reconnecting = peer.connection_lost(retryable);
                        peer.emit(PeerEvent::Disconnected);
                        dispatch::fail_pending(&ctx.registry, &peer);
                        if !retryable {
                            warn!("Peer {} giving up: {}", peer.id(), err);
                            peer.emit(PeerEvent::Failed(err));
                            break;
                        }
                        if !reconnecting {
                            break;
                        }
                        err
                    }
                }
            }
            Err(err) => {
                debug!(
                    "Peer {} connect to {}:{} failed: {}",
                    peer.id(),
                    host,
                    port,
                    err
                );
                if peer.transition(LifecycleState::Reconnecting).is_err() {
                    break;
                }
                err
            }
        };

        let Some(delay) = backoff.next_delay(&retry) else {
            warn!(
                "Peer {} giving up on {}:{} after {} attempts",
                peer.id(),
                host,
                port,
                backoff.failures()
            );
            peer.emit(PeerEvent::Failed(failure));
            break;
        };

        peer.emit(PeerEvent::Reconnecting {
            attempt: backoff.failures(),
            delay,
        });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = peer.destroy_requested() => break,
        }

        if peer.transition(LifecycleState::Connecting).is_err() {
            break;
        }
    }

    finalize(&peer, &ctx);
}

/// Try every address `host` resolves to, in order.
async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let target = format!("{}:{}", host, port);
    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| CommsError::InvalidAddress {
            address: target.clone(),
            message: e.to_string(),
        })?;

    let mut last_error = None;
    for addr in addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(CommsError::io_with_addr(e, addr));
            }
            Err(_) => {
                debug!("Connect to {} timed out", addr);
                last_error = Some(CommsError::ConnectTimeout {
                    target: addr.to_string(),
                    timeout,
                });
            }
        }
    }

    Err(last_error.unwrap_or(CommsError::InvalidAddress {
        address: target,
        message: "no addresses resolved".to_string(),
    }))
}
