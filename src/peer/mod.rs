//! Normalized per-connection handles.
//!
//! A [`Peer`] is what hooks see of a connection: identity, the originating request and
//! transport operations. The runtime-specific part lives behind [`Transport`], which the
//! adapter implements and keeps as the peer's opaque context.

pub mod store;
pub mod topics;
pub mod transport;

use std::any::Any;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use http::HeaderMap;

pub use store::PeerStore;
pub use topics::TopicRegistry;
pub use transport::{PubSub, ReadyState, SendOptions, SendStatus, Transport, TransportError};

use crate::Result;
use crate::message::Message;
use crate::upgrade::UpgradeRequest;

/// Identity used when a runtime cannot report the remote address.
pub const UNKNOWN_PEER_ID: &str = "unknown";

/// Process-unique number assigned to every peer by the core that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canonical textual peer id for a remote address.
///
/// IPv6 addresses are bracketed, socket addresses keep their standard form and anything
/// else containing a colon is bracketed as well.
#[must_use]
pub fn normalize_peer_id(addr: Option<&str>) -> String {
    let Some(addr) = addr.map(str::trim).filter(|a| !a.is_empty()) else {
        return UNKNOWN_PEER_ID.to_owned();
    };

    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.to_string();
    }

    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        Ok(IpAddr::V4(ip)) => ip.to_string(),
        Err(_) if addr.contains(':') && !addr.starts_with('[') => format!("[{addr}]"),
        Err(_) => addr.to_owned(),
    }
}

struct Inner {
    connection_id: ConnectionId,
    id: String,
    request: Arc<UpgradeRequest>,
    transport: Box<dyn Transport>,
    topics: Arc<TopicRegistry>,
    compress: bool,
}

/// Normalized handle to one live WebSocket connection.
///
/// Clones refer to the same connection. Once the connection closes the peer is inert:
/// its ready state reports `CLOSED` and sends fail with [`TransportError::NotOpen`].
#[derive(Clone)]
pub struct Peer {
    inner: Arc<Inner>,
}

impl Peer {
    pub(crate) fn new(
        connection_id: ConnectionId,
        transport: Box<dyn Transport>,
        request: Arc<UpgradeRequest>,
        topics: Arc<TopicRegistry>,
        compress: bool,
    ) -> Self {
        let id = normalize_peer_id(transport.remote_addr().as_deref());
        Self {
            inner: Arc::new(Inner {
                connection_id,
                id,
                request,
                transport,
                topics,
                compress,
            }),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    /// Identity derived from the remote address.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// URL of the upgrade request that opened this connection.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.request.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.request.headers
    }

    #[must_use]
    pub fn request(&self) -> &UpgradeRequest {
        &self.inner.request
    }

    /// Current transport state, read live on every call.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.transport.ready_state()
    }

    /// The adapter's native context, if it is of type `T`.
    #[must_use]
    pub fn context<T: Transport>(&self) -> Option<&T> {
        let any: &dyn Any = &*self.inner.transport;
        any.downcast_ref::<T>()
    }

    /// Whether both handles refer to the same connection.
    #[must_use]
    pub fn same_as(&self, other: &Peer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn compress(&self, options: SendOptions) -> bool {
        options.compress.unwrap_or(self.inner.compress)
    }

    fn ensure_open(&self) -> Result<()> {
        let state = self.ready_state();
        if state.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen { state }.into())
        }
    }

    /// Transmit a frame on this connection.
    ///
    /// Fails with [`TransportError::NotOpen`] unless the connection is OPEN. Failures
    /// are reported, never retried.
    pub fn send<M: Into<Message>>(&self, message: M, options: SendOptions) -> Result<SendStatus> {
        self.ensure_open()?;
        let message = message.into();

        #[cfg(feature = "tracing")]
        tracing::trace!(peer = %self, kind = %message.kind(), len = message.len(), "send");

        self.inner.transport.send(&message, self.compress(options))
    }

    /// Deliver a frame to every subscriber of `topic` except this peer.
    ///
    /// Fails with [`TransportError::NotOpen`] unless this peer is OPEN.
    pub fn publish<M: Into<Message>>(
        &self,
        topic: &str,
        message: M,
        options: SendOptions,
    ) -> Result<SendStatus> {
        self.ensure_open()?;
        let message = message.into();
        let compress = self.compress(options);

        if let Some(pubsub) = self.inner.transport.pubsub() {
            return pubsub.publish(topic, &message, compress);
        }

        let delivered = self.inner.topics.publish(topic, &message, Some(self), compress);
        if delivered == 0 {
            Ok(SendStatus::Dropped)
        } else {
            Ok(SendStatus::Sent(message.len()))
        }
    }

    /// Join `topic`. Subscribing twice is the same as subscribing once.
    ///
    /// Fails with [`TransportError::NotOpen`] unless this peer is OPEN, so a closed peer
    /// cannot re-enter the registry after removal.
    pub fn subscribe(&self, topic: &str) -> Result<()> {
        self.ensure_open()?;
        if let Some(pubsub) = self.inner.transport.pubsub() {
            return pubsub.subscribe(topic);
        }
        self.inner.topics.subscribe(topic, self);
        Ok(())
    }

    /// Leave `topic`. Leaving a topic that was never joined is a no-op, as is leaving
    /// after the connection closed.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        if !self.ready_state().is_open() {
            return Ok(());
        }
        if let Some(pubsub) = self.inner.transport.pubsub() {
            return pubsub.unsubscribe(topic);
        }
        self.inner.topics.unsubscribe(topic, self);
        Ok(())
    }

    /// Topics joined through the core's registry.
    ///
    /// Runtimes with native pub/sub keep their own membership, which is not visible here.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.inner.topics.topics_of(self.connection_id())
    }

    /// Ask the runtime to close the connection.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        self.inner.transport.close(code, reason)
    }

    pub(crate) fn downgrade(&self) -> WeakPeer {
        WeakPeer {
            connection_id: self.connection_id(),
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("connection_id", &self.inner.connection_id)
            .field("id", &self.inner.id)
            .field("url", &self.url())
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.inner.id, self.inner.connection_id)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Peer {}

/// Non-owning peer reference held by the topic registry.
#[derive(Clone)]
pub(crate) struct WeakPeer {
    connection_id: ConnectionId,
    inner: Weak<Inner>,
}

impl WeakPeer {
    pub(crate) fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub(crate) fn upgrade(&self) -> Option<Peer> {
        self.inner.upgrade().map(|inner| Peer { inner })
    }
}
