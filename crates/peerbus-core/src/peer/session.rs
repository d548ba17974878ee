//! The I/O loop for one established connection.
//!
//! Each turn of the loop moves the send queue into the outbound buffer,
//! honors a pending teardown and then waits for whichever comes first: bytes
//! from the socket, room to write, a wake-up from another thread, or a
//! keep-alive tick. Reads continue while a write is stalled, and a forced
//! teardown is seen even when the remote stops reading.

use super::{PeerContext, PeerHandle};
use crate::config::CommsConfig;
use crate::error::{CommsError, Result};
use crate::rpc::{dispatch, FrameDecoder};
use crate::transport::{ReadEvent, TransportEngine};
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// How a session ended.
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// Teardown was requested locally.
    Closed,
    /// The connection failed.
    Failed(CommsError),
}

pub(crate) async fn run(peer: &PeerHandle, ctx: &PeerContext, stream: TcpStream) -> SessionEnd {
    match drive(peer, ctx, stream).await {
        Ok(()) => SessionEnd::Closed,
        Err(e) if peer.is_closing() => {
            debug!("Peer {} ({}) closed with: {}", peer.id(), peer.role(), e);
            SessionEnd::Closed
        }
        Err(e) => {
            if e.is_protocol() {
                warn!("Peer {} ({}) protocol error: {}", peer.id(), peer.role(), e);
            } else {
                debug!("Peer {} ({}) connection lost: {}", peer.id(), peer.role(), e);
            }
            SessionEnd::Failed(e)
        }
    }
}

async fn drive(peer: &PeerHandle, ctx: &PeerContext, stream: TcpStream) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Peer {}: cannot set TCP_NODELAY: {}", peer.id(), e);
    }
    peer.set_addrs(stream.local_addr().ok(), stream.peer_addr().ok());

    let config = peer.config();
    let (mut reader, mut writer) = stream.into_split();
    let mut engine = config.transport.create();
    let mut decoder = FrameDecoder::new(config.max_message_size);
    let mut buffer = Vec::new();
    let mut outbound = BytesMut::new();
    let mut keepalive = config.keepalive_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        (ticker, period)
    });

    debug!(
        "Peer {} ({}) session started over {} transport",
        peer.id(),
        peer.role(),
        engine.name()
    );

    loop {
        match take_queued(peer, engine.as_mut(), &mut outbound)? {
            Queue::Open => {}
            Queue::Closing if outbound.is_empty() => {
                // Best effort; the remote may already be gone.
                let _ = writer.shutdown().await;
                return Ok(());
            }
            Queue::Closing => {}
            Queue::Abort => return Ok(()),
        }

        engine.alloc_buffer(&mut buffer, config.read_buffer_size)?;

        tokio::select! {
            read = reader.read(&mut buffer) => {
                let event = match read {
                    Ok(0) => ReadEvent::Eof,
                    Ok(n) => ReadEvent::Data(&buffer[..n]),
                    Err(e) => ReadEvent::Failed(e),
                };
                engine.on_data(event, &mut decoder)?;
                peer.mark_heard();

                while let Some(message) = decoder.next_message()? {
                    dispatch::dispatch(&ctx.registry, peer, message);
                }
            }
            written = writer.write(&outbound[..]), if !outbound.is_empty() => {
                match written? {
                    0 => return Err(CommsError::ConnectionClosed),
                    n => outbound.advance(n),
                }
            }
            _ = peer.woken() => {}
            _ = tick(&mut keepalive) => {
                if let Some((_, period)) = &keepalive {
                    check_liveness(peer, *period)?;
                }
            }
        }
    }
}

enum Queue {
    Open,
    /// Graceful teardown: write what is left, then close.
    Closing,
    /// Forced teardown: close without writing.
    Abort,
}

/// Move the send queue through the transport into `outbound` once the
/// previous batch is fully written. Frames left in the queue count against
/// the peer's send queue limit.
fn take_queued(
    peer: &PeerHandle,
    engine: &mut dyn TransportEngine,
    outbound: &mut BytesMut,
) -> Result<Queue> {
    let (frames, closing, now) = {
        let mut inner = peer.lock();
        let closing = inner.lifecycle.is_closing();
        let now = inner.lifecycle.destroy_now();
        let frames: Vec<Vec<u8>> = if outbound.is_empty() || (closing && now) {
            inner.queued_bytes = 0;
            inner.send_queue.drain(..).collect()
        } else {
            Vec::new()
        };
        (frames, closing, now)
    };

    if closing && now {
        if !frames.is_empty() || !outbound.is_empty() {
            debug!(
                "Peer {} dropping {} queued frames and {} unwritten bytes",
                peer.id(),
                frames.len(),
                outbound.len()
            );
        }
        outbound.clear();
        return Ok(Queue::Abort);
    }

    for frame in frames {
        outbound.extend_from_slice(&engine.on_send(frame)?);
    }

    Ok(if closing { Queue::Closing } else { Queue::Open })
}

async fn tick(keepalive: &mut Option<(Interval, Duration)>) {
    match keepalive {
        Some((ticker, _)) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn check_liveness(peer: &PeerHandle, period: Duration) -> Result<()> {
    let silence = peer.lock().last_heard.elapsed();

    if silence > period * CommsConfig::KEEPALIVE_TIMEOUT_MULTIPLIER {
        return Err(CommsError::KeepAliveTimeout { silence });
    }
    if silence > period / CommsConfig::KEEPALIVE_PING_DIVISOR {
        match peer.send_keepalive() {
            Ok(id) => debug!("Peer {} keep-alive {}", peer.id(), id),
            Err(e) => debug!("Peer {} keep-alive not sent: {}", peer.id(), e),
        }
    }
    Ok(())
}
