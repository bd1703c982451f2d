//! The core instance shared by a server and its adapter.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::config::Config;
use crate::error::Error;
use crate::hooks::{
    CloseDetails, Diagnostic, Dispatched, EventKind, Hook, HookEvent, HookRegistry,
};
use crate::message::Message;
use crate::peer::{ConnectionId, Peer, TopicRegistry, Transport};
use crate::upgrade::{
    Negotiator, PermissivePolicy, UpgradeDecision, UpgradeHook, UpgradePolicy, UpgradeRequest,
};

struct Inner {
    config: Arc<Config>,
    hooks: Arc<HookRegistry>,
    negotiator: Negotiator,
    topics: Arc<TopicRegistry>,
    next_connection: AtomicU64,
}

/// A hook set, its upgrade negotiator and the topic registry of one server.
///
/// Cheap to clone; clones share everything. Separate instances share nothing.
///
/// ```
/// use crossws::{CrossWs, HookEvent};
///
/// let ws = CrossWs::builder()
///     .on_message(|event: HookEvent| async move {
///         if let (Some(peer), Some(message)) = (event.peer(), event.message()) {
///             peer.send(message.clone(), Default::default())?;
///         }
///         Ok::<_, crossws::Error>(())
///     })
///     .build();
///
/// assert_eq!(ws.hooks().len(crossws::EventKind::Message), 1);
/// ```
#[derive(Clone)]
pub struct CrossWs {
    inner: Arc<Inner>,
}

impl CrossWs {
    #[must_use]
    pub fn builder() -> CrossWsBuilder {
        CrossWsBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    #[must_use]
    pub fn negotiator(&self) -> &Negotiator {
        &self.inner.negotiator
    }

    #[must_use]
    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.inner.topics
    }

    /// Decide whether `request` may become a WebSocket.
    pub async fn upgrade(&self, request: &UpgradeRequest) -> UpgradeDecision {
        self.inner.negotiator.negotiate(request).await
    }

    /// Like [`upgrade`](Self::upgrade), with the runtime's own requirements checked first.
    pub async fn upgrade_with(
        &self,
        request: &UpgradeRequest,
        policy: &dyn UpgradePolicy,
    ) -> UpgradeDecision {
        self.inner
            .negotiator
            .negotiate_with(request, Some(policy))
            .await
    }

    /// Wrap a native connection in a new [`Peer`].
    ///
    /// Adapters call this once per connection, usually through a
    /// [`PeerStore`](crate::PeerStore). Without a request the peer reports `GET /`.
    pub fn new_peer<T: Transport>(
        &self,
        transport: T,
        request: Option<Arc<UpgradeRequest>>,
    ) -> Peer {
        let connection_id =
            ConnectionId::new(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        let peer = Peer::new(
            connection_id,
            Box::new(transport),
            request.unwrap_or_default(),
            Arc::clone(&self.inner.topics),
            self.inner.config.compress,
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(%peer, url = peer.url(), "Peer created");

        peer
    }

    pub async fn open(&self, peer: &Peer) -> Dispatched {
        self.dispatch(HookEvent::Open { peer: peer.clone() }).await
    }

    pub async fn message(&self, peer: &Peer, message: Message) -> Dispatched {
        self.dispatch(HookEvent::Message {
            peer: peer.clone(),
            message,
        })
        .await
    }

    /// Dispatch `close`, then drop the peer's emulated subscriptions.
    pub async fn close(&self, peer: &Peer, details: CloseDetails) -> Dispatched {
        let dispatched = self
            .dispatch(HookEvent::Close {
                peer: peer.clone(),
                details,
            })
            .await;
        self.inner.topics.remove_peer(peer.connection_id());

        #[cfg(feature = "tracing")]
        tracing::debug!(%peer, "Peer closed");

        dispatched
    }

    /// Report an error from the runtime to the `error` hooks.
    pub async fn error(&self, peer: Option<&Peer>, error: Error) -> Dispatched {
        self.dispatch(HookEvent::Error {
            peer: peer.cloned(),
            error: Arc::new(error),
        })
        .await
    }

    pub async fn drain(&self, peer: &Peer) -> Dispatched {
        self.dispatch(HookEvent::Drain { peer: peer.clone() }).await
    }

    pub async fn ping(&self, peer: &Peer, data: Bytes) -> Dispatched {
        self.dispatch(HookEvent::Ping {
            peer: peer.clone(),
            data,
        })
        .await
    }

    pub async fn pong(&self, peer: &Peer, data: Bytes) -> Dispatched {
        self.dispatch(HookEvent::Pong {
            peer: peer.clone(),
            data,
        })
        .await
    }

    pub async fn dispatch(&self, event: HookEvent) -> Dispatched {
        self.inner.hooks.dispatch(event).await
    }

    /// Emit a runtime-native diagnostic, such as `"tungstenite:message"`.
    pub fn instrument(
        &self,
        name: &str,
        peer: Option<&Peer>,
        raw: Option<&(dyn Any + Send + Sync)>,
    ) {
        self.inner.hooks.instrument_event(name, peer, raw);
    }
}

impl Default for CrossWs {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for CrossWs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossWs")
            .field("config", &self.inner.config)
            .field("hooks", &self.inner.hooks)
            .field("upgrade_hooks", &self.inner.negotiator.len())
            .field("topics", &self.inner.topics.topic_count())
            .finish()
    }
}

/// Collects the configuration and hooks of a [`CrossWs`].
pub struct CrossWsBuilder {
    config: Config,
    policy: Box<dyn UpgradePolicy>,
    hooks: HookRegistry,
    upgrade_hooks: Vec<Arc<dyn UpgradeHook>>,
}

impl Default for CrossWsBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            policy: Box::new(PermissivePolicy::new()),
            hooks: HookRegistry::new(),
            upgrade_hooks: Vec::new(),
        }
    }
}

impl CrossWsBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Validation applied to every upgrade before hooks run.
    #[must_use]
    pub fn policy<P: UpgradePolicy>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    #[must_use]
    pub fn on<H: Hook>(self, kind: EventKind, hook: H) -> Self {
        self.hooks.on(kind, hook);
        self
    }

    #[must_use]
    pub fn on_open<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Open, hook)
    }

    #[must_use]
    pub fn on_message<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Message, hook)
    }

    #[must_use]
    pub fn on_close<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Close, hook)
    }

    #[must_use]
    pub fn on_error<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Error, hook)
    }

    #[must_use]
    pub fn on_drain<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Drain, hook)
    }

    #[must_use]
    pub fn on_ping<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Ping, hook)
    }

    #[must_use]
    pub fn on_pong<H: Hook>(self, hook: H) -> Self {
        self.on(EventKind::Pong, hook)
    }

    #[must_use]
    pub fn on_upgrade<H: UpgradeHook>(mut self, hook: H) -> Self {
        self.upgrade_hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn instrument<F>(self, hook: F) -> Self
    where
        F: Fn(&Diagnostic<'_>) + Send + Sync + 'static,
    {
        self.hooks.instrument(hook);
        self
    }

    #[must_use]
    pub fn build(self) -> CrossWs {
        let config = Arc::new(self.config);
        let hooks = Arc::new(self.hooks);
        let negotiator = Negotiator::new(Arc::clone(&config), self.policy, Arc::clone(&hooks));
        for hook in self.upgrade_hooks {
            negotiator.on_upgrade_arc(hook);
        }

        CrossWs {
            inner: Arc::new(Inner {
                config,
                hooks,
                negotiator,
                topics: Arc::new(TopicRegistry::new()),
                next_connection: AtomicU64::new(1),
            }),
        }
    }
}

impl fmt::Debug for CrossWsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossWsBuilder")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("upgrade_hooks", &self.upgrade_hooks.len())
            .finish_non_exhaustive()
    }
}
