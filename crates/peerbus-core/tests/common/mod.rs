//! Shared helpers for the loopback integration tests.

#![allow(dead_code)]

use peerbus::{PeerEvent, PeerHandle, PeerRole, Reactor};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Owned summary of a [`PeerEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
    Failed(String),
    Destroyed,
}

impl From<&PeerEvent> for Seen {
    fn from(event: &PeerEvent) -> Self {
        match event {
            PeerEvent::Connected => Seen::Connected,
            PeerEvent::Reconnecting { attempt, delay } => Seen::Reconnecting {
                attempt: *attempt,
                delay: *delay,
            },
            PeerEvent::Disconnected => Seen::Disconnected,
            PeerEvent::Failed(err) => Seen::Failed(err.to_string()),
            PeerEvent::Destroyed => Seen::Destroyed,
        }
    }
}

pub struct Events {
    rx: mpsc::UnboundedReceiver<(PeerHandle, Seen)>,
}

/// An event handler forwarding into an [`Events`] receiver.
pub fn events() -> (
    impl Fn(&PeerHandle, &PeerEvent) + Send + Sync + 'static,
    Events,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |peer: &PeerHandle, event: &PeerEvent| {
        let _ = tx.send((peer.clone(), Seen::from(event)));
    };
    (handler, Events { rx })
}

impl Events {
    pub async fn next(&mut self) -> (PeerHandle, Seen) {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a peer event")
            .expect("event channel closed")
    }

    /// Skip events until one from a `role` peer matches.
    pub async fn wait_for(
        &mut self,
        role: PeerRole,
        matches: impl Fn(&Seen) -> bool,
    ) -> (PeerHandle, Seen) {
        loop {
            let (peer, seen) = self.next().await;
            if peer.role() == role && matches(&seen) {
                return (peer, seen);
            }
        }
    }

    /// Everything received within `window`.
    pub async fn collect_for(&mut self, window: Duration) -> Vec<(PeerHandle, Seen)> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            seen.push(event);
        }
        seen
    }
}

/// A loopback port with nothing listening on it.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a loopback listener on `reactor`.
pub fn listen<F>(reactor: &Reactor, on_event: F) -> (PeerHandle, SocketAddr)
where
    F: Fn(&PeerHandle, &PeerEvent) + Send + Sync + 'static,
{
    let listener = reactor
        .listen_passive("127.0.0.1", u32::from(free_port()), on_event)
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) {
    let mut frame = serde_json::to_vec(value).unwrap();
    frame.push(0);
    writer.write_all(&frame).await.unwrap();
}

/// Next NUL-terminated frame, or `None` once the remote closed.
pub async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Option<Value> {
    let mut frame = Vec::new();
    let n = tokio::time::timeout(WAIT, reader.read_until(0, &mut frame))
        .await
        .expect("timed out reading a frame")
        .ok()?;
    if n == 0 || frame.last() != Some(&0) {
        return None;
    }
    frame.pop();
    Some(serde_json::from_slice(&frame).unwrap())
}
