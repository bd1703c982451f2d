use std::collections::HashMap;

use dashmap::{DashMap, Entry};

use super::{ConnectionId, Peer, WeakPeer};
use crate::message::Message;

/// Topic membership for transports without native pub/sub.
///
/// One registry belongs to one core instance and is shared by all of its connections.
/// Subscriptions hold weak references, so they never keep a closed connection alive.
#[derive(Default)]
pub struct TopicRegistry {
    topics: DashMap<String, HashMap<ConnectionId, WeakPeer>>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer` to `topic`. Idempotent.
    pub fn subscribe(&self, topic: &str, peer: &Peer) {
        let inserted = self
            .topics
            .entry(topic.to_owned())
            .or_default()
            .insert(peer.connection_id(), peer.downgrade())
            .is_none();

        if inserted {
            #[cfg(feature = "tracing")]
            tracing::debug!(%peer, topic, "Subscribed to topic");
        }
    }

    /// Remove `peer` from `topic`. A no-op when it was not subscribed.
    pub fn unsubscribe(&self, topic: &str, peer: &Peer) {
        // Entry API keeps the removal and the empty-topic cleanup atomic
        if let Entry::Occupied(mut entry) = self.topics.entry(topic.to_owned()) {
            let removed = entry.get_mut().remove(&peer.connection_id()).is_some();
            if entry.get().is_empty() {
                entry.remove();
            }

            if removed {
                #[cfg(feature = "tracing")]
                tracing::debug!(%peer, topic, "Unsubscribed from topic");
            }
        }
    }

    /// Send `message` to every live subscriber of `topic` other than `sender`.
    ///
    /// Returns how many subscribers accepted the frame. Individual send failures are
    /// logged and skipped.
    pub fn publish(
        &self,
        topic: &str,
        message: &Message,
        sender: Option<&Peer>,
        compress: bool,
    ) -> usize {
        let skip = sender.map(Peer::connection_id);

        // Snapshot first so no shard lock is held while transports run
        let (targets, dead): (Vec<_>, Vec<_>) = match self.topics.get(topic) {
            Some(subscribers) => subscribers
                .values()
                .filter(|weak| Some(weak.connection_id()) != skip)
                .map(|weak| (weak.connection_id(), weak.upgrade()))
                .partition(|(_, peer)| peer.is_some()),
            None => return 0,
        };

        if !dead.is_empty() {
            self.prune(topic, dead.into_iter().map(|(id, _)| id));
        }

        let mut delivered = 0;
        for peer in targets.into_iter().filter_map(|(_, peer)| peer) {
            let state = peer.ready_state();
            if !state.is_open() {
                continue;
            }
            match peer.inner.transport.send(message, compress) {
                Ok(status) if status.is_accepted() => delivered += 1,
                Ok(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%peer, topic, "Publish dropped by transport");
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%peer, topic, error = %e, "Failed to publish to subscriber");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }

        delivered
    }

    fn prune<I: IntoIterator<Item = ConnectionId>>(&self, topic: &str, ids: I) {
        if let Entry::Occupied(mut entry) = self.topics.entry(topic.to_owned()) {
            for id in ids {
                entry.get_mut().remove(&id);
            }
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Drop every subscription held by a connection.
    pub fn remove_peer(&self, connection_id: ConnectionId) {
        self.topics.retain(|_, subscribers| {
            subscribers.remove(&connection_id);
            !subscribers.is_empty()
        });
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |subscribers| subscribers.len())
    }

    #[must_use]
    pub fn topics_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|entry| entry.value().contains_key(&connection_id))
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
