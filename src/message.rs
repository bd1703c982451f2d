//! Normalized inbound frames.
//!
//! Every runtime hands over frames differently: owned strings, byte buffers, shared
//! buffer views. [`Message`] wraps whichever of those arrived into one immutable value
//! whose accessors never re-parse the payload.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;

/// Whether a frame arrived as text or binary.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    Text,
    Binary,
}

/// The frame exactly as the transport handed it over.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Bytes),
}

impl RawFrame {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Binary(_) => MessageKind::Binary,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for RawFrame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawFrame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for RawFrame {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for RawFrame {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(bytes))
    }
}

#[derive(Debug)]
struct Inner {
    raw: RawFrame,
    /// Lossy UTF-8 decoding of a binary frame, filled on first `as_text()` call.
    decoded: OnceLock<String>,
}

/// An immutable, normalized WebSocket frame.
///
/// Cloning is cheap and clones share the lazily decoded text, so a message can be
/// handed to every hook registered for an event.
#[derive(Clone)]
pub struct Message {
    inner: Arc<Inner>,
}

impl Message {
    /// Wrap whatever frame representation the transport produced.
    #[must_use]
    pub fn normalize<R: Into<RawFrame>>(raw: R) -> Self {
        Self {
            inner: Arc::new(Inner {
                raw: raw.into(),
                decoded: OnceLock::new(),
            }),
        }
    }

    #[must_use]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::normalize(RawFrame::Text(text.into()))
    }

    #[must_use]
    pub fn binary<B: Into<Bytes>>(bytes: B) -> Self {
        Self::normalize(RawFrame::Binary(bytes.into()))
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.inner.raw.kind()
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.kind() == MessageKind::Text
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.kind() == MessageKind::Binary
    }

    /// Text form of the frame.
    ///
    /// Binary frames are decoded as UTF-8 on first access, with invalid sequences
    /// replaced by U+FFFD. The decoded string is cached for later calls and clones.
    #[must_use]
    pub fn as_text(&self) -> &str {
        match &self.inner.raw {
            RawFrame::Text(text) => text,
            RawFrame::Binary(bytes) => self
                .inner
                .decoded
                .get_or_init(|| String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Strict text form: fails instead of substituting replacement characters.
    pub fn try_text(&self) -> Result<&str> {
        match &self.inner.raw {
            RawFrame::Text(text) => Ok(text),
            RawFrame::Binary(bytes) => std::str::from_utf8(bytes).map_err(|e| {
                Error::invalid_message(format!("binary frame is not valid UTF-8: {e}"))
            }),
        }
    }

    /// Raw payload bytes. Never copies.
    #[must_use]
    pub fn as_binary(&self) -> &[u8] {
        self.inner.raw.as_bytes()
    }

    /// The frame as originally handed over by the transport.
    #[must_use]
    pub fn raw(&self) -> &RawFrame {
        &self.inner.raw
    }

    /// Payload as [`Bytes`]; shares the buffer when the frame arrived binary.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match &self.inner.raw {
            RawFrame::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            RawFrame::Binary(bytes) => bytes.clone(),
        }
    }

    /// Deserialize the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(self.as_binary())?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_binary().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.inner.raw == other.inner.raw
    }
}

impl Eq for Message {}

impl From<RawFrame> for Message {
    fn from(raw: RawFrame) -> Self {
        Self::normalize(raw)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::normalize(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::normalize(text)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self::normalize(bytes)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::normalize(bytes)
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Self::normalize(bytes)
    }
}

#[cfg(feature = "tungstenite")]
impl From<&Message> for tokio_tungstenite::tungstenite::Message {
    fn from(message: &Message) -> Self {
        match message.raw() {
            RawFrame::Text(text) => Self::Text(text.as_str().into()),
            RawFrame::Binary(bytes) => Self::Binary(bytes.clone()),
        }
    }
}
