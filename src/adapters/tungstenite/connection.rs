use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::Result;
use crate::message::Message;
use crate::peer::{ReadyState, SendStatus, Transport, TransportError};
use crate::upgrade::UpgradeRequest;

struct Shared {
    key: u64,
    remote_addr: SocketAddr,
    request: Arc<UpgradeRequest>,
    state: AtomicU8,
    /// Bytes handed to the writer task and not yet written
    queued: AtomicUsize,
    backpressured: AtomicBool,
    watermark: usize,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// One upgraded TCP connection: the adapter's native handle and the peer's transport.
///
/// Frames are queued to a writer task; sends never block the caller.
#[derive(Clone)]
pub struct TungsteniteConnection {
    shared: Arc<Shared>,
}

impl TungsteniteConnection {
    pub(crate) fn new(
        key: u64,
        remote_addr: SocketAddr,
        request: Arc<UpgradeRequest>,
        outbound: mpsc::UnboundedSender<Frame>,
        watermark: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                key,
                remote_addr,
                request,
                state: AtomicU8::new(ReadyState::Connecting as u8),
                queued: AtomicUsize::new(0),
                backpressured: AtomicBool::new(false),
                watermark,
                outbound,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> u64 {
        self.shared.key
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    #[must_use]
    pub fn request(&self) -> &Arc<UpgradeRequest> {
        &self.shared.request
    }

    /// Bytes waiting for the writer task.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: ReadyState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    /// Hand `frame` to the writer task. Returns `true` when the queue is now past the
    /// watermark.
    ///
    /// The backpressure flag is raised before the frame becomes visible to the writer, so
    /// a writer that empties the queue right away still observes it and fires the drain.
    fn enqueue(&self, frame: Frame) -> Result<bool> {
        let len = frame.len();
        let queued = self.shared.queued.fetch_add(len, Ordering::AcqRel) + len;
        let over = queued > self.shared.watermark;
        if over {
            self.shared.backpressured.store(true, Ordering::Release);
        }
        if self.shared.outbound.send(frame).is_err() {
            self.shared.queued.fetch_sub(len, Ordering::AcqRel);
            return Err(TransportError::Closed.into());
        }
        Ok(over)
    }

    /// Account for `len` written bytes. Returns `true` when a backpressured queue has
    /// just emptied and a drain event is due.
    pub(crate) fn release(&self, len: usize) -> bool {
        let remaining = self.shared.queued.fetch_sub(len, Ordering::AcqRel) - len;
        remaining == 0 && self.shared.backpressured.swap(false, Ordering::AcqRel)
    }
}

impl Transport for TungsteniteConnection {
    fn remote_addr(&self) -> Option<String> {
        Some(self.shared.remote_addr.to_string())
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::try_from(self.shared.state.load(Ordering::Acquire))
            .unwrap_or(ReadyState::Closed)
    }

    /// `compress` is ignored: tungstenite has no per-message deflate.
    fn send(&self, message: &Message, _compress: bool) -> Result<SendStatus> {
        let state = self.ready_state();
        if !state.is_open() {
            return Err(TransportError::NotOpen { state }.into());
        }

        let len = message.len();
        if self.enqueue(Frame::from(message))? {
            Ok(SendStatus::Backpressured(len))
        } else {
            Ok(SendStatus::Sent(len))
        }
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        let was_open = self
            .shared
            .state
            .compare_exchange(
                ReadyState::Open as u8,
                ReadyState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !was_open {
            return Ok(());
        }

        let frame = match (code, reason) {
            (None, None) => None,
            (code, reason) => Some(CloseFrame {
                code: CloseCode::from(code.unwrap_or(1000)),
                reason: reason.unwrap_or_default().into(),
            }),
        };
        self.enqueue(Frame::Close(frame))?;
        Ok(())
    }
}

impl fmt::Debug for TungsteniteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TungsteniteConnection")
            .field("key", &self.shared.key)
            .field("remote_addr", &self.shared.remote_addr)
            .field("state", &self.ready_state())
            .field("queued", &self.queued_bytes())
            .finish_non_exhaustive()
    }
}
