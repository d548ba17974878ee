//! Thread-safe handle to one peer.
//!
//! # Thread Safety
//!
//! Only the peer's task on the reactor thread owns the socket. Every other
//! thread goes through [`PeerHandle`]: it takes the per-peer lock, mutates
//! the send queue or lifecycle, releases the lock and wakes the task. Frames
//! are encoded while the lock is held, so wire order equals lock order.

use super::pending::{Completion, Pending, PendingTransactions};
use super::state::{DestroyOutcome, InvalidTransition, Lifecycle, LifecycleState, PeerRole};
use crate::config::PeerConfig;
use crate::error::{CommsError, Result};
use crate::rpc::{codec, methods, CorrelationId, Message};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle notification delivered to a peer's event handler.
#[derive(Debug)]
pub enum PeerEvent {
    /// Connected (Active/Passive) or bound (Listening).
    Connected,
    /// An Active peer is waiting before its next connect attempt.
    Reconnecting { attempt: u32, delay: std::time::Duration },
    /// An established connection was lost.
    Disconnected,
    /// The peer gave up; teardown follows.
    Failed(CommsError),
    /// Final event, delivered exactly once.
    Destroyed,
}

/// Callback receiving peer events. Runs on the reactor thread.
pub type EventHandler = Arc<dyn Fn(&PeerHandle, &PeerEvent) + Send + Sync>;

pub(crate) struct PeerInner {
    pub lifecycle: Lifecycle,
    pub send_queue: VecDeque<Vec<u8>>,
    /// Total size of the frames in `send_queue`.
    pub queued_bytes: usize,
    pub pending: PendingTransactions,
    next_request: u64,
    pub last_heard: Instant,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

struct PeerShared {
    id: u64,
    role: PeerRole,
    target: String,
    config: PeerConfig,
    inner: Mutex<PeerInner>,
    /// Send queue has data, or teardown was requested.
    wake: Notify,
    /// Teardown was requested.
    destroy: Notify,
    on_event: EventHandler,
}

/// Cheap, cloneable reference to a peer.
#[derive(Clone)]
pub struct PeerHandle {
    shared: Arc<PeerShared>,
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("target", &self.shared.target)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for PeerHandle {}

impl PeerHandle {
    pub(crate) fn new(
        id: u64,
        role: PeerRole,
        target: impl Into<String>,
        config: PeerConfig,
        on_event: EventHandler,
    ) -> Self {
        Self {
            shared: Arc::new(PeerShared {
                id,
                role,
                target: target.into(),
                config,
                inner: Mutex::new(PeerInner {
                    lifecycle: Lifecycle::new(role),
                    send_queue: VecDeque::new(),
                    queued_bytes: 0,
                    pending: PendingTransactions::default(),
                    next_request: 1,
                    last_heard: Instant::now(),
                    local_addr: None,
                    remote_addr: None,
                }),
                wake: Notify::new(),
                destroy: Notify::new(),
                on_event,
            }),
        }
    }

    /// A peer with no task behind it, for exercising handlers directly.
    #[cfg(test)]
    pub(crate) fn detached(role: PeerRole) -> Self {
        Self::new(
            0,
            role,
            "detached",
            PeerConfig::default(),
            Arc::new(|_: &PeerHandle, _: &PeerEvent| {}),
        )
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn role(&self) -> PeerRole {
        self.shared.role
    }

    /// `host:port` for Active peers, the remote address for Passive peers
    /// and the bound address for listeners.
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().lifecycle.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LifecycleState::Connected
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock().remote_addr
    }

    /// Send a Request whose response goes to the method's handler.
    pub fn send(&self, method: &str, params: Value) -> Result<CorrelationId> {
        self.enqueue_request(method, params, Completion::Handler)
    }

    /// Send a Request and wait for its Result.
    ///
    /// An Error response becomes [`CommsError::Remote`]; teardown of the
    /// peer before a response arrives becomes [`CommsError::ConnectionClosed`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.enqueue_request(method, params, Completion::Waiter(tx))?;
        rx.await.map_err(|_| CommsError::ConnectionClosed)?
    }

    /// Answer a Request with a Result.
    pub fn respond_result(&self, id: &CorrelationId, result: Value) -> Result<()> {
        self.enqueue(Message::result(id.clone(), result))
    }

    /// Answer a Request with an Error.
    pub fn respond_error(&self, id: &CorrelationId, error: Value) -> Result<()> {
        self.enqueue(Message::error(id.clone(), error))
    }

    /// Close after flushing already queued frames. Idempotent.
    pub fn disconnect(&self) {
        self.request_destroy(false);
    }

    /// Close without flushing. Escalates a pending [`disconnect`](Self::disconnect).
    pub fn destroy_now(&self) {
        self.request_destroy(true);
    }

    fn enqueue_request(
        &self,
        method: &str,
        params: Value,
        completion: Completion,
    ) -> Result<CorrelationId> {
        let mut inner = self.lock();
        self.ensure_sendable(&inner)?;

        let id = CorrelationId::local(method, inner.next_request);
        let frame = codec::encode(&Message::request(id.clone(), method, params))?;
        self.push_frame(&mut inner, frame)?;
        inner.next_request += 1;
        inner.pending.insert(id.clone(), method, completion);
        drop(inner);

        self.shared.wake.notify_one();
        Ok(id)
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        let mut inner = self.lock();
        self.ensure_sendable(&inner)?;

        let frame = codec::encode(&message)?;
        self.push_frame(&mut inner, frame)?;
        drop(inner);

        self.shared.wake.notify_one();
        Ok(())
    }

    fn ensure_sendable(&self, inner: &PeerInner) -> Result<()> {
        if self.shared.role == PeerRole::Listening
            || inner.lifecycle.state() != LifecycleState::Connected
        {
            return Err(CommsError::NotConnected {
                peer: self.shared.id,
            });
        }
        Ok(())
    }

    fn push_frame(&self, inner: &mut PeerInner, frame: Vec<u8>) -> Result<()> {
        let max = self.shared.config.max_send_queue;
        if inner.queued_bytes + frame.len() > max {
            return Err(CommsError::SendQueueFull {
                peer: self.shared.id,
                queued: inner.queued_bytes,
                max,
            });
        }
        inner.queued_bytes += frame.len();
        inner.send_queue.push_back(frame);
        Ok(())
    }

    fn request_destroy(&self, now: bool) {
        let outcome = self.lock().lifecycle.request_destroy(now);
        match outcome {
            DestroyOutcome::Requested | DestroyOutcome::Escalated => {
                debug!(
                    "Peer {} ({}) destroy requested{}",
                    self.shared.id,
                    self.shared.role,
                    if now { " immediately" } else { "" }
                );
                self.shared.destroy.notify_one();
                self.shared.wake.notify_one();
            }
            DestroyOutcome::AlreadyRequested => {
                warn!(
                    "Peer {} ({}) destroy already requested, ignoring",
                    self.shared.id, self.shared.role
                );
            }
            DestroyOutcome::AlreadyDestroyed => {
                debug!("Peer {} already destroyed", self.shared.id);
            }
        }
    }

    // Reactor-side helpers

    pub(crate) fn lock(&self) -> MutexGuard<'_, PeerInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: PeerEvent) {
        (self.shared.on_event)(self, &event);
    }

    pub(crate) fn event_handler(&self) -> EventHandler {
        self.shared.on_event.clone()
    }

    pub(crate) fn transition(
        &self,
        to: LifecycleState,
    ) -> std::result::Result<(), InvalidTransition> {
        let result = self.lock().lifecycle.transition(to);
        match &result {
            Ok(()) => debug!("Peer {} ({}) -> {:?}", self.shared.id, self.shared.role, to),
            Err(e) => debug!("Peer {} ({}): {}", self.shared.id, self.shared.role, e),
        }
        result
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.lock().lifecycle.is_closing()
    }

    /// Wait until teardown is requested.
    pub(crate) async fn destroy_requested(&self) {
        loop {
            if self.is_closing() {
                return;
            }
            self.shared.destroy.notified().await;
        }
    }

    pub(crate) async fn woken(&self) {
        self.shared.wake.notified().await;
    }

    pub(crate) fn take_pending(&self, id: &CorrelationId) -> Option<Pending> {
        self.lock().pending.take(id)
    }

    pub(crate) fn drain_pending(&self) -> Vec<Pending> {
        self.lock().pending.drain()
    }

    pub(crate) fn mark_heard(&self) {
        self.lock().last_heard = Instant::now();
    }

    pub(crate) fn set_addrs(&self, local: Option<SocketAddr>, remote: Option<SocketAddr>) {
        let mut inner = self.lock();
        inner.local_addr = local;
        inner.remote_addr = remote;
        inner.last_heard = Instant::now();
    }

    /// Send an `echo` carrying the local time; its answer only refreshes
    /// the last-heard timestamp.
    pub(crate) fn send_keepalive(&self) -> Result<CorrelationId> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        self.enqueue_request(
            methods::ECHO.as_str(),
            json!({ "timestamp": now_ms }),
            Completion::Discard,
        )
    }

    /// Leave `Connected` after the connection dropped, discarding frames
    /// that were never written. An Active peer that will `reconnect` moves
    /// to `Reconnecting`; otherwise teardown starts. Returns `false` when
    /// the peer cannot reconnect.
    pub(crate) fn connection_lost(&self, reconnect: bool) -> bool {
        let mut inner = self.lock();
        if !inner.send_queue.is_empty() {
            debug!(
                "Peer {} dropping {} unsent frames",
                self.shared.id,
                inner.send_queue.len()
            );
        }
        inner.send_queue.clear();
        inner.queued_bytes = 0;

        if reconnect && inner.lifecycle.transition(LifecycleState::Reconnecting).is_ok() {
            return true;
        }
        inner.lifecycle.request_destroy(true);
        false
    }

    /// Mark the peer closed. Returns `true` for the one caller that should
    /// release it.
    pub(crate) fn confirm_closed(&self) -> bool {
        let mut inner = self.lock();
        inner.lifecycle.request_destroy(true);
        if !inner.lifecycle.confirm_closed() {
            return false;
        }
        inner.send_queue.clear();
        inner.queued_bytes = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_peer() -> PeerHandle {
        PeerHandle::detached(PeerRole::Passive)
    }

    #[test]
    fn test_ids_are_method_and_counter() {
        let peer = connected_peer();
        let first = peer.send("policy_resolve", json!({})).unwrap();
        let second = peer.send("echo", json!("x")).unwrap();

        assert_eq!(first.as_value(), &json!(["policy_resolve", 1]));
        assert_eq!(second.as_value(), &json!(["echo", 2]));
        assert_eq!(peer.pending_count(), 2);
        assert_eq!(peer.lock().send_queue.len(), 2);
    }

    #[test]
    fn test_send_requires_connected() {
        let active = PeerHandle::detached(PeerRole::Active);
        assert!(matches!(
            active.send("echo", Value::Null),
            Err(CommsError::NotConnected { .. })
        ));

        let listener = PeerHandle::detached(PeerRole::Listening);
        assert!(listener.send("echo", Value::Null).is_err());
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let peer = connected_peer();
        peer.disconnect();
        assert_eq!(peer.state(), LifecycleState::DestroyRequested);
        assert!(peer.respond_result(&CorrelationId::from(1), Value::Null).is_err());
    }

    #[test]
    fn test_repeated_destroy_is_harmless() {
        let peer = connected_peer();
        for _ in 0..5 {
            peer.disconnect();
        }
        peer.destroy_now();
        assert!(peer.lock().lifecycle.destroy_now());

        assert!(peer.confirm_closed());
        assert!(!peer.confirm_closed());
        assert_eq!(peer.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn test_lost_connection_leaves_connected_and_drops_queue() {
        let active = PeerHandle::detached(PeerRole::Active);
        active.transition(LifecycleState::Connected).unwrap();
        active.send("policy_resolve", json!({})).unwrap();

        assert!(active.connection_lost(true));
        assert_eq!(active.state(), LifecycleState::Reconnecting);
        assert!(active.lock().send_queue.is_empty());
        assert_eq!(active.lock().queued_bytes, 0);
        assert!(matches!(
            active.send("echo", Value::Null),
            Err(CommsError::NotConnected { .. })
        ));

        // Passive peers never reconnect.
        let passive = connected_peer();
        passive.send("echo", Value::Null).unwrap();
        assert!(!passive.connection_lost(true));
        assert_eq!(passive.state(), LifecycleState::DestroyRequested);
        assert!(passive.lock().send_queue.is_empty());
    }

    #[test]
    fn test_send_queue_is_capped() {
        let peer = PeerHandle::new(
            1,
            PeerRole::Passive,
            "capped",
            PeerConfig::default().with_max_send_queue(300),
            Arc::new(|_: &PeerHandle, _: &PeerEvent| {}),
        );
        let big = "x".repeat(200);
        peer.send("echo", json!(big)).unwrap();

        match peer.send("echo", json!(big)) {
            Err(CommsError::SendQueueFull { queued, max, .. }) => {
                assert!(queued > 200);
                assert_eq!(max, 300);
            }
            other => panic!("Expected SendQueueFull, got: {:?}", other),
        }

        // The refused request used no id and left nothing pending.
        assert_eq!(peer.pending_count(), 1);
        let id = peer.send("echo", json!("s")).unwrap();
        assert_eq!(id.as_value(), &json!(["echo", 2]));
    }

    #[test]
    fn test_keepalive_carries_timestamp() {
        let peer = connected_peer();
        let id = peer.send_keepalive().unwrap();
        assert_eq!(id.as_value()[0], "echo");

        let frame = peer.lock().send_queue[0].clone();
        let value: Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();
        assert!(value["params"]["timestamp"].as_u64().unwrap() > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_call_fails_when_peer_closes() {
        let peer = connected_peer();
        let caller = peer.clone();
        let call = tokio::spawn(async move { caller.call("echo", json!("hi")).await });

        while peer.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        drop(peer.drain_pending());

        let result = call.await.unwrap();
        assert!(matches!(result, Err(CommsError::ConnectionClosed)));
    }

    #[test]
    fn test_events_reach_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let peer = PeerHandle::new(
            9,
            PeerRole::Active,
            "localhost:1",
            PeerConfig::default(),
            Arc::new(move |peer: &PeerHandle, event: &PeerEvent| {
                sink.lock().unwrap().push(format!("{}:{:?}", peer.id(), event));
            }),
        );

        peer.emit(PeerEvent::Connected);
        peer.emit(PeerEvent::Destroyed);
        assert_eq!(*seen.lock().unwrap(), vec!["9:Connected", "9:Destroyed"]);
    }
}
