use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// HTTP status code type, re-exported for use with error inspection.
pub use http::StatusCode;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Upgrade handshake declined by validation or by a hook veto
    UpgradeRejected,
    /// A user-registered hook faulted
    Hook,
    /// The underlying native connection refused or failed an operation
    Transport,
    /// A frame could not be interpreted in the requested form
    InvalidMessage,
    /// Error related to invalid input handed to crossws
    Validation,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn invalid_message<S: Into<String>>(reason: S) -> Self {
        InvalidMessage {
            reason: reason.into(),
        }
        .into()
    }

    pub fn upgrade_rejected<S: Into<String>>(status: StatusCode, reason: S) -> Self {
        UpgradeRejected {
            status,
            reason: reason.into(),
        }
        .into()
    }

    pub fn hook<E: fmt::Display, S: Into<String>>(event: E, message: S) -> Self {
        HookExecution {
            event: event.to_string(),
            message: message.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// An upgrade handshake that was declined.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct UpgradeRejected {
    pub status: StatusCode,
    pub reason: String,
}

impl fmt::Display for UpgradeRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upgrade rejected ({}): {}", self.status, self.reason)
    }
}

impl StdError for UpgradeRejected {}

/// A hook that returned an error or panicked while handling an event.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct HookExecution {
    /// Name of the event whose hook failed (`message`, `upgrade`, ...)
    pub event: String,
    pub message: String,
}

impl fmt::Display for HookExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook failed: {}", self.event, self.message)
    }
}

impl StdError for HookExecution {}

#[non_exhaustive]
#[derive(Debug)]
pub struct InvalidMessage {
    pub reason: String,
}

impl fmt::Display for InvalidMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message: {}", self.reason)
    }
}

impl StdError for InvalidMessage {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<UpgradeRejected> for Error {
    fn from(err: UpgradeRejected) -> Self {
        Error::with_source(Kind::UpgradeRejected, err)
    }
}

impl From<HookExecution> for Error {
    fn from(err: HookExecution) -> Self {
        Error::with_source(Kind::Hook, err)
    }
}

impl From<InvalidMessage> for Error {
    fn from(err: InvalidMessage) -> Self {
        Error::with_source(Kind::InvalidMessage, err)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::InvalidMessage, e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::with_source(Kind::Transport, e)
    }
}

#[cfg(feature = "tungstenite")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::Transport, e)
    }
}
