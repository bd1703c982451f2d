#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crossws::hooks::BoxError;
use crossws::peer::PubSub;
use crossws::{
    Adapter, CrossWs, Diagnostic, HookEvent, Message, Peer, PeerStore, ReadyState, SendStatus,
    Transport, TransportError, UpgradeRequest,
};

pub type HookResult = Result<(), BoxError>;

/// Everything a [`MockTransport`] was asked to do.
#[derive(Debug, Default)]
pub struct Recorded {
    pub sent: Vec<(Message, bool)>,
    pub closed: Vec<(Option<u16>, Option<String>)>,
    pub published: Vec<(String, Message)>,
    pub topics: HashSet<String>,
}

/// In-memory transport whose state the test controls.
#[derive(Clone)]
pub struct MockTransport {
    addr: Option<String>,
    state: Arc<AtomicU8>,
    recorded: Arc<Mutex<Recorded>>,
    native_pubsub: bool,
    status: Arc<Mutex<Option<SendStatus>>>,
}

impl MockTransport {
    #[must_use]
    pub fn new(addr: &str) -> Self {
        Self {
            addr: Some(addr.to_owned()),
            state: Arc::new(AtomicU8::new(ReadyState::Open as u8)),
            recorded: Arc::default(),
            native_pubsub: false,
            status: Arc::default(),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            addr: None,
            ..Self::new("")
        }
    }

    /// A transport that handles pub/sub itself.
    #[must_use]
    pub fn with_native_pubsub(mut self) -> Self {
        self.native_pubsub = true;
        self
    }

    pub fn set_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Force the status reported by subsequent sends.
    pub fn respond_with(&self, status: SendStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    #[must_use]
    pub fn sent_texts(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(message, _)| message.as_text().to_owned())
            .collect()
    }

    pub fn recorded<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&self.recorded.lock().unwrap())
    }
}

impl Transport for MockTransport {
    fn remote_addr(&self) -> Option<String> {
        self.addr.clone()
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::try_from(self.state.load(Ordering::SeqCst)).unwrap()
    }

    fn send(&self, message: &Message, compress: bool) -> crossws::Result<SendStatus> {
        if !self.ready_state().is_open() {
            return Err(TransportError::Closed.into());
        }
        self.recorded
            .lock()
            .unwrap()
            .sent
            .push((message.clone(), compress));
        Ok(self
            .status
            .lock()
            .unwrap()
            .unwrap_or(SendStatus::Sent(message.len())))
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> crossws::Result<()> {
        self.set_state(ReadyState::Closing);
        self.recorded
            .lock()
            .unwrap()
            .closed
            .push((code, reason.map(str::to_owned)));
        Ok(())
    }

    fn pubsub(&self) -> Option<&dyn PubSub> {
        self.native_pubsub.then_some(self as &dyn PubSub)
    }
}

impl PubSub for MockTransport {
    fn publish(
        &self,
        topic: &str,
        message: &Message,
        _compress: bool,
    ) -> crossws::Result<SendStatus> {
        self.recorded
            .lock()
            .unwrap()
            .published
            .push((topic.to_owned(), message.clone()));
        Ok(SendStatus::Sent(message.len()))
    }

    fn subscribe(&self, topic: &str) -> crossws::Result<()> {
        self.recorded.lock().unwrap().topics.insert(topic.to_owned());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> crossws::Result<()> {
        self.recorded.lock().unwrap().topics.remove(topic);
        Ok(())
    }
}

/// Native connection handle of the mock runtime.
#[derive(Clone)]
pub struct MockConnection {
    pub key: u64,
    pub transport: MockTransport,
    pub request: Arc<UpgradeRequest>,
}

/// Adapter for a runtime that exists only in memory.
pub struct MockAdapter {
    core: CrossWs,
    peers: PeerStore<u64>,
    next_key: AtomicU64,
}

impl MockAdapter {
    #[must_use]
    pub fn new(core: CrossWs) -> Self {
        Self {
            core,
            peers: PeerStore::new(),
            next_key: AtomicU64::new(1),
        }
    }

    /// Simulate a runtime accepting a connection from `addr`.
    #[must_use]
    pub fn connect(&self, addr: &str) -> MockConnection {
        MockConnection {
            key: self.next_key.fetch_add(1, Ordering::SeqCst),
            transport: MockTransport::new(addr),
            request: Arc::new(UpgradeRequest::builder().url("/ws").build()),
        }
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    type Request = UpgradeRequest;
    type Upgraded = http::HeaderMap;
    type Connection = MockConnection;

    fn name(&self) -> &str {
        "mock"
    }

    fn core(&self) -> &CrossWs {
        &self.core
    }

    fn peer(&self, connection: &MockConnection) -> Peer {
        self.peers.get_or_create(connection.key, || {
            self.core.new_peer(
                connection.transport.clone(),
                Some(Arc::clone(&connection.request)),
            )
        })
    }

    fn evict(&self, connection: &MockConnection) {
        self.peers.remove(&connection.key);
    }

    async fn handle_upgrade(&self, request: UpgradeRequest) -> crossws::Result<http::HeaderMap> {
        self.core.upgrade(&request).await.into_result()
    }
}

/// Collects diagnostic names seen on the instrumentation channel.
#[derive(Clone, Default)]
pub struct DiagnosticLog(Arc<Mutex<Vec<String>>>);

impl DiagnosticLog {
    pub fn observer(&self) -> impl Fn(&Diagnostic<'_>) + Send + Sync + 'static {
        let log = Arc::clone(&self.0);
        move |diagnostic: &Diagnostic<'_>| log.lock().unwrap().push(diagnostic.name.to_owned())
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Hook that records the text of every message event it sees under `label`.
pub fn recording_hook(
    label: &'static str,
    log: &Arc<Mutex<Vec<String>>>,
) -> impl Fn(HookEvent) -> std::future::Ready<HookResult> + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |event: HookEvent| {
        let entry = match event.message() {
            Some(message) => format!("{label}:{}", message.as_text()),
            None => format!("{label}:{}", event.kind()),
        };
        log.lock().unwrap().push(entry);
        std::future::ready(Ok(()))
    }
}
