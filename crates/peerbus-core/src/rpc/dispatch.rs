//! Routing of inbound messages to method handlers.
//!
//! Requests are resolved by the hash of their method name. Results and
//! Errors are first matched against the peer's pending transactions; the
//! entry found there decides whether a `call` waiter or the method's handler
//! receives the payload. Nothing here ever closes the connection.

use super::message::{ErrorObject, Message};
use super::method::method_hash;
use super::registry::{MethodRegistry, Reply, Request};
use crate::error::CommsError;
use crate::peer::pending::{Completion, Pending};
use crate::peer::PeerHandle;
use serde_json::Value;
use tracing::{debug, warn};

/// Dispatch one inbound message on the reactor thread.
pub(crate) fn dispatch(registry: &MethodRegistry, peer: &PeerHandle, message: Message) {
    match message {
        Message::Request { id, method, params } => {
            let request = Request { id, method, params };
            dispatch_request(registry, peer, &request);
        }
        Message::Result { id, result } => match peer.take_pending(&id) {
            Some(pending) => complete(registry, peer, pending, Ok(result)),
            None => warn!(
                "Peer {} sent result for unknown id {}, discarding",
                peer.id(),
                id
            ),
        },
        Message::Error { id, error } => match peer.take_pending(&id) {
            Some(pending) => complete(registry, peer, pending, Err(error)),
            None => warn!(
                "Peer {} sent error for unknown id {}, discarding",
                peer.id(),
                id
            ),
        },
    }
}

fn dispatch_request(registry: &MethodRegistry, peer: &PeerHandle, request: &Request) {
    let reply = match registry.resolve(method_hash(&request.method)) {
        Some(descriptor) if descriptor.name == request.method => {
            descriptor.handler.on_request(peer, request)
        }
        _ => {
            debug!(
                "Peer {} requested unknown method {}",
                peer.id(),
                request.method
            );
            Reply::error(ErrorObject::method_not_found(&request.method))
        }
    };

    let sent = match reply {
        Reply::Result(result) => peer.respond_result(&request.id, result),
        Reply::Error(error) => peer.respond_error(&request.id, error),
        Reply::None => Ok(()),
    };
    if let Err(e) = sent {
        debug!(
            "Peer {} reply to {} dropped: {}",
            peer.id(),
            request.id,
            e
        );
    }
}

/// Deliver a response, or the "connection closed" failure, to whoever is
/// waiting for `pending`.
pub(crate) fn complete(
    registry: &MethodRegistry,
    peer: &PeerHandle,
    pending: Pending,
    outcome: std::result::Result<Value, Value>,
) {
    match pending.completion {
        Completion::Waiter(tx) => {
            let result = outcome.map_err(|payload| {
                ErrorObject::from_payload(&payload).into_error(payload)
            });
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(result);
        }
        Completion::Discard => {}
        Completion::Handler => {
            let Some(descriptor) = registry.resolve_name(&pending.method) else {
                warn!(
                    "Peer {} response {} for method {} with no handler, discarding",
                    peer.id(),
                    pending.id,
                    pending.method
                );
                return;
            };
            match outcome {
                Ok(result) => descriptor.handler.on_result(peer, &pending.id, &result),
                Err(error) => descriptor.handler.on_error(peer, &pending.id, &error),
            }
        }
    }
}

/// Fail every outstanding request of `peer` with "connection closed".
pub(crate) fn fail_pending(registry: &MethodRegistry, peer: &PeerHandle) {
    let drained = peer.drain_pending();
    if drained.is_empty() {
        return;
    }
    debug!(
        "Peer {} failing {} pending requests",
        peer.id(),
        drained.len()
    );

    for Pending { id, method, completion } in drained {
        match completion {
            Completion::Waiter(tx) => {
                let _ = tx.send(Err(CommsError::ConnectionClosed));
            }
            completion => {
                let pending = Pending { id, method, completion };
                complete(
                    registry,
                    peer,
                    pending,
                    Err(ErrorObject::connection_closed().to_value()),
                );
            }
        }
    }
}
