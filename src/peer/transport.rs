//! The seam between a [`Peer`](super::Peer) and the runtime's native connection.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use crate::Result;
use crate::error::{Error, Kind};
use crate::message::Message;

/// Connection state, numbered like the WHATWG `WebSocket.readyState` values.
#[non_exhaustive]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl TryFrom<u8> for ReadyState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Connecting),
            1 => Ok(Self::Open),
            2 => Ok(Self::Closing),
            3 => Ok(Self::Closed),
            other => Err(Error::validation(format!("unknown ready state {other}"))),
        }
    }
}

/// Per-message transport options.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Request per-message compression. `None` falls back to the configured preference.
    pub compress: Option<bool>,
}

impl SendOptions {
    #[must_use]
    pub const fn compressed(compress: bool) -> Self {
        Self {
            compress: Some(compress),
        }
    }
}

/// What the native transport reported for a send.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the transport.
    Sent(usize),
    /// Accepted, but the send buffer is over its watermark; a `drain` event follows.
    Backpressured(usize),
    /// The transport discarded the frame.
    Dropped,
}

impl SendStatus {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Sent(_) | Self::Backpressured(_))
    }
}

/// Errors raised by transport operations.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Operation requires an OPEN connection
    NotOpen {
        /// State observed when the operation was attempted
        state: ReadyState,
    },
    /// The native connection is gone
    Closed,
    /// The runtime has no way to perform this operation
    Unsupported {
        operation: &'static str,
    },
    /// The native runtime reported a failure
    Backend(Box<dyn StdError + Send + Sync + 'static>),
}

impl TransportError {
    pub fn backend<E: Into<Box<dyn StdError + Send + Sync + 'static>>>(error: E) -> Self {
        Self::Backend(error.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen { state } => write!(f, "connection is not open (state: {state})"),
            Self::Closed => write!(f, "connection closed"),
            Self::Unsupported { operation } => {
                write!(f, "{operation} is not supported by this transport")
            }
            Self::Backend(e) => write!(f, "transport failure: {e}"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Backend(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::with_source(Kind::Transport, e)
    }
}

/// Native pub/sub primitive exposed by some runtimes.
///
/// Transports that return `None` from [`Transport::pubsub`] get topic fan-out emulated
/// by the core's [`TopicRegistry`](super::topics::TopicRegistry).
pub trait PubSub: Send + Sync {
    /// Deliver to every subscriber of `topic` except the publishing connection.
    fn publish(&self, topic: &str, message: &Message, compress: bool) -> Result<SendStatus>;

    fn subscribe(&self, topic: &str) -> Result<()>;

    fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// Adapter-owned handle to one native connection.
///
/// The implementing type is the peer's opaque context; it is reachable again through
/// [`Peer::context`](super::Peer::context).
pub trait Transport: Any + Send + Sync {
    /// Remote address in whatever textual form the runtime provides.
    fn remote_addr(&self) -> Option<String>;

    /// Live state of the native connection. Must not be cached.
    fn ready_state(&self) -> ReadyState;

    fn send(&self, message: &Message, compress: bool) -> Result<SendStatus>;

    /// Start a close handshake.
    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()>;

    fn pubsub(&self) -> Option<&dyn PubSub> {
        None
    }
}
