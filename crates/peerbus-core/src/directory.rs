//! Registry of live peers, partitioned by role.
//!
//! Peers are inserted when created and removed only after reaching
//! `Destroyed`. One coarse lock guards the whole directory; callers never
//! hold it while calling into a peer.

use crate::peer::{PeerHandle, PeerRole};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct Partitions {
    active: BTreeMap<u64, PeerHandle>,
    passive: BTreeMap<u64, PeerHandle>,
    listening: BTreeMap<u64, PeerHandle>,
}

impl Partitions {
    fn for_role(&mut self, role: PeerRole) -> &mut BTreeMap<u64, PeerHandle> {
        match role {
            PeerRole::Active => &mut self.active,
            PeerRole::Passive => &mut self.passive,
            PeerRole::Listening => &mut self.listening,
        }
    }

    fn len(&self) -> usize {
        self.active.len() + self.passive.len() + self.listening.len()
    }
}

#[derive(Debug, Default)]
struct DirectoryInner {
    peers: Mutex<Partitions>,
    /// Signalled whenever a peer is removed.
    removed: Condvar,
    next_id: AtomicU64,
}

/// Shared view of every peer owned by a reactor.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<DirectoryInner>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Partitions> {
        self.inner
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn insert(&self, peer: PeerHandle) {
        self.lock().for_role(peer.role()).insert(peer.id(), peer);
    }

    pub(crate) fn remove(&self, peer: &PeerHandle) {
        let removed = self.lock().for_role(peer.role()).remove(&peer.id());
        if removed.is_some() {
            self.inner.removed.notify_all();
        }
    }

    pub fn get(&self, id: u64) -> Option<PeerHandle> {
        let peers = self.lock();
        peers
            .active
            .get(&id)
            .or_else(|| peers.passive.get(&id))
            .or_else(|| peers.listening.get(&id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live peers with `role`.
    pub fn count(&self, role: PeerRole) -> usize {
        self.lock().for_role(role).len()
    }

    /// Snapshot of the peers with `role`, in creation order.
    pub fn peers(&self, role: PeerRole) -> Vec<PeerHandle> {
        self.lock().for_role(role).values().cloned().collect()
    }

    /// Snapshot of every peer.
    pub fn all(&self) -> Vec<PeerHandle> {
        let peers = self.lock();
        peers
            .active
            .values()
            .chain(peers.passive.values())
            .chain(peers.listening.values())
            .cloned()
            .collect()
    }

    /// Send a Request to every connected Active and Passive peer. Returns
    /// how many peers accepted it.
    pub fn broadcast(&self, method: &str, params: Value) -> usize {
        let targets: Vec<PeerHandle> = {
            let peers = self.lock();
            peers
                .active
                .values()
                .chain(peers.passive.values())
                .cloned()
                .collect()
        };

        targets
            .iter()
            .filter(|peer| match peer.send(method, params.clone()) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Broadcast {} skipped peer {}: {}", method, peer.id(), e);
                    false
                }
            })
            .count()
    }

    /// Request destruction of every peer.
    pub fn destroy_all(&self, now: bool) {
        for peer in self.all() {
            if now {
                peer.destroy_now();
            } else {
                peer.disconnect();
            }
        }
    }

    /// Block until the directory is empty or `timeout` elapses. Returns
    /// whether it drained.
    pub fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut peers = self.lock();
        while peers.len() > 0 {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            peers = match self.inner.removed.wait_timeout(peers, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::peer::PeerEvent;
    use serde_json::json;

    fn peer(directory: &PeerDirectory, role: PeerRole) -> PeerHandle {
        let peer = PeerHandle::new(
            directory.allocate_id(),
            role,
            "test",
            PeerConfig::default(),
            Arc::new(|_: &PeerHandle, _: &PeerEvent| {}),
        );
        directory.insert(peer.clone());
        peer
    }

    #[test]
    fn test_partitioned_by_role() {
        let directory = PeerDirectory::new();
        let listener = peer(&directory, PeerRole::Listening);
        peer(&directory, PeerRole::Passive);
        peer(&directory, PeerRole::Passive);

        assert_eq!(directory.len(), 3);
        assert_eq!(directory.count(PeerRole::Passive), 2);
        assert_eq!(directory.count(PeerRole::Active), 0);
        assert_eq!(directory.get(listener.id()), Some(listener.clone()));

        directory.remove(&listener);
        assert_eq!(directory.count(PeerRole::Listening), 0);
        assert!(directory.get(listener.id()).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let directory = PeerDirectory::new();
        let a = directory.allocate_id();
        let b = directory.allocate_id();
        assert_ne!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn test_broadcast_skips_unconnected_peers() {
        let directory = PeerDirectory::new();
        let passive = peer(&directory, PeerRole::Passive);
        peer(&directory, PeerRole::Active); // still Connecting
        peer(&directory, PeerRole::Listening);

        assert_eq!(directory.broadcast("policy_update", json!({})), 1);
        assert_eq!(passive.pending_count(), 1);
    }

    #[test]
    fn test_wait_empty() {
        let directory = PeerDirectory::new();
        assert!(directory.wait_empty(Duration::ZERO));

        let p = peer(&directory, PeerRole::Passive);
        assert!(!directory.wait_empty(Duration::from_millis(20)));

        let remover = directory.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remover.remove(&p);
        });
        assert!(directory.wait_empty(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
