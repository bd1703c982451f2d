//! The contract every runtime integration implements.

use std::any::Any;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::hooks::{CloseDetails, Dispatched};
use crate::hub::CrossWs;
use crate::message::Message;
use crate::peer::Peer;

/// Translates one runtime's WebSocket callbacks into normalized hook events.
///
/// Implementors supply the runtime-facing pieces: how an upgrade request is handled and
/// how a native connection maps to its [`Peer`]. The provided callbacks then emit the
/// `"<name>:<event>"` diagnostic with the native connection as payload and dispatch the
/// normalized event. Callbacks for one connection must be awaited in the order the
/// runtime delivers them.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// What the runtime hands over for an upgrade attempt
    type Request: Send;
    /// What [`handle_upgrade`](Self::handle_upgrade) produces on success
    type Upgraded: Send;
    /// The runtime's native connection handle
    type Connection: Any + Send + Sync;

    /// Short runtime name used as the diagnostic prefix.
    fn name(&self) -> &str;

    fn core(&self) -> &CrossWs;

    /// The peer for `connection`, created on first use. Must return the same peer for
    /// every callback of one connection.
    fn peer(&self, connection: &Self::Connection) -> Peer;

    /// Forget the peer for `connection`.
    fn evict(&self, connection: &Self::Connection);

    /// Negotiate an upgrade and hand the connection to the runtime.
    async fn handle_upgrade(&self, request: Self::Request) -> Result<Self::Upgraded>;

    /// Emit `"<name>:<event>"` on the instrumentation channel.
    fn instrument(&self, event: &str, peer: &Peer, connection: &Self::Connection) {
        let name = format!("{}:{event}", self.name());
        self.core().instrument(&name, Some(peer), Some(connection));
    }

    async fn on_open(&self, connection: &Self::Connection) -> Dispatched {
        let peer = self.peer(connection);
        self.instrument("open", &peer, connection);
        self.core().open(&peer).await
    }

    async fn on_message(&self, connection: &Self::Connection, message: Message) -> Dispatched {
        let peer = self.peer(connection);
        self.instrument("message", &peer, connection);
        self.core().message(&peer, message).await
    }

    /// Dispatch `close` and evict the peer.
    async fn on_close(&self, connection: &Self::Connection, details: CloseDetails) -> Dispatched {
        let peer = self.peer(connection);
        self.instrument("close", &peer, connection);
        let dispatched = self.core().close(&peer, details).await;
        self.evict(connection);
        dispatched
    }

    async fn on_drain(&self, connection: &Self::Connection) -> Dispatched {
        let peer = self.peer(connection);
        self.instrument("drain", &peer, connection);
        self.core().drain(&peer).await
    }

    async fn on_ping(&self, connection: &Self::Connection, data: Bytes) -> Dispatched {
        let peer = self.peer(connection);
        self.instrument("ping", &peer, connection);
        self.core().ping(&peer, data).await
    }

    async fn on_pong(&self, connection: &Self::Connection, data: Bytes) -> Dispatched {
        let peer = self.peer(connection);
        self.instrument("pong", &peer, connection);
        self.core().pong(&peer, data).await
    }
}
