use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;
use crate::message::Message;
use crate::peer::Peer;

/// Lifecycle events that hooks can subscribe to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Open,
    Message,
    Close,
    /// Error reports, including faults raised by other hooks
    Error,
    Drain,
    Ping,
    Pong,
}

impl EventKind {
    pub const ALL: [Self; 7] = [
        Self::Open,
        Self::Message,
        Self::Close,
        Self::Error,
        Self::Drain,
        Self::Ping,
        Self::Pong,
    ];
}

/// Close code and reason as reported by the runtime.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseDetails {
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl CloseDetails {
    #[must_use]
    pub fn new<S: Into<String>>(code: Option<u16>, reason: Option<S>) -> Self {
        Self {
            code,
            reason: reason.map(Into::into),
        }
    }
}

/// A normalized lifecycle event, handed by value to every matching hook.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum HookEvent {
    Open {
        peer: Peer,
    },
    Message {
        peer: Peer,
        message: Message,
    },
    Close {
        peer: Peer,
        details: CloseDetails,
    },
    Error {
        /// `None` when the failure is not tied to a connection
        peer: Option<Peer>,
        error: Arc<Error>,
    },
    Drain {
        peer: Peer,
    },
    Ping {
        peer: Peer,
        data: Bytes,
    },
    Pong {
        peer: Peer,
        data: Bytes,
    },
}

impl HookEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open { .. } => EventKind::Open,
            Self::Message { .. } => EventKind::Message,
            Self::Close { .. } => EventKind::Close,
            Self::Error { .. } => EventKind::Error,
            Self::Drain { .. } => EventKind::Drain,
            Self::Ping { .. } => EventKind::Ping,
            Self::Pong { .. } => EventKind::Pong,
        }
    }

    #[must_use]
    pub fn peer(&self) -> Option<&Peer> {
        match self {
            Self::Open { peer }
            | Self::Message { peer, .. }
            | Self::Close { peer, .. }
            | Self::Drain { peer }
            | Self::Ping { peer, .. }
            | Self::Pong { peer, .. } => Some(peer),
            Self::Error { peer, .. } => peer.as_ref(),
        }
    }

    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Message { message, .. } => Some(message),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// One record on the instrumentation channel.
///
/// `raw` carries the runtime-native payload (the native connection, a rejection, an
/// error), which observers may downcast.
#[non_exhaustive]
#[derive(Clone, Copy)]
pub struct Diagnostic<'a> {
    pub name: &'a str,
    pub peer: Option<&'a Peer>,
    pub raw: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> Diagnostic<'a> {
    #[must_use]
    pub fn new(
        name: &'a str,
        peer: Option<&'a Peer>,
        raw: Option<&'a (dyn Any + Send + Sync)>,
    ) -> Self {
        Self { name, peer, raw }
    }

    /// The raw payload, if it is a `T`.
    #[must_use]
    pub fn raw<T: Any>(&self) -> Option<&'a T> {
        self.raw?.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Diagnostic<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostic")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("raw", &self.raw.is_some())
            .finish()
    }
}
