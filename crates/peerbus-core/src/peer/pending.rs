use crate::error::Result;
use crate::rpc::CorrelationId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Who receives the response to an outbound request.
#[derive(Debug)]
pub(crate) enum Completion {
    /// The method's result/error handler.
    Handler,
    /// A caller awaiting [`PeerHandle::call`](super::PeerHandle::call).
    Waiter(oneshot::Sender<Result<Value>>),
    /// Engine-internal request whose answer only proves liveness.
    Discard,
}

#[derive(Debug)]
pub(crate) struct Pending {
    pub id: CorrelationId,
    pub method: String,
    pub completion: Completion,
}

/// Outstanding requests of one peer, keyed by correlation id.
#[derive(Debug, Default)]
pub(crate) struct PendingTransactions {
    entries: HashMap<String, Pending>,
}

impl PendingTransactions {
    pub fn insert(&mut self, id: CorrelationId, method: impl Into<String>, completion: Completion) {
        self.entries.insert(
            id.key(),
            Pending {
                id,
                method: method.into(),
                completion,
            },
        );
    }

    /// Remove the entry for `id`; a second take for the same id finds nothing.
    pub fn take(&mut self, id: &CorrelationId) -> Option<Pending> {
        self.entries.remove(&id.key())
    }

    pub fn drain(&mut self) -> Vec<Pending> {
        self.entries.drain().map(|(_, pending)| pending).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
