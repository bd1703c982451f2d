use std::hash::Hash;

use dashmap::DashMap;

use super::Peer;

/// Adapter-owned cache mapping native connection keys to their [`Peer`].
///
/// Invariants:
/// - At most one peer exists per key; concurrent first events for a new connection all
///   observe the same peer
/// - A removed key is never revived: the next lookup creates a fresh peer
#[derive(Debug)]
pub struct PeerStore<K: Eq + Hash> {
    peers: DashMap<K, Peer>,
}

impl<K: Eq + Hash> Default for PeerStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> PeerStore<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Get the peer for `key`, creating it with `init` on first use.
    ///
    /// `init` runs at most once per key, under the entry's shard lock.
    pub fn get_or_create<F: FnOnce() -> Peer>(&self, key: K, init: F) -> Peer {
        self.peers.entry(key).or_insert_with(init).clone()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<Peer> {
        self.peers.get(key).map(|entry| entry.value().clone())
    }

    /// Forget the peer for `key`, typically once its close event was dispatched.
    pub fn remove(&self, key: &K) -> Option<Peer> {
        self.peers.remove(key).map(|(_, peer)| peer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of all live peers.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }
}
