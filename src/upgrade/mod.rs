//! Upgrade negotiation: validation, upgrade hooks and the accept/reject decision.

mod negotiator;
mod policy;
mod request;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, StatusCode};

pub use negotiator::Negotiator;
pub use policy::{PermissivePolicy, Rfc6455Policy, UpgradePolicy, WEBSOCKET_VERSION};
pub use request::UpgradeRequest;

use crate::Result;
use crate::error::Error;
use crate::hooks::BoxError;

/// A declined upgrade: the status, reason and headers of the HTTP response to send.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

impl Rejection {
    #[must_use]
    pub fn new<S: Into<String>>(status: StatusCode, reason: S) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn bad_request<S: Into<String>>(reason: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    /// The status used for hook vetoes that do not pick one.
    #[must_use]
    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, reason)
    }

    #[must_use]
    pub fn unauthorized<S: Into<String>>(reason: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, reason)
    }

    #[must_use]
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Error::upgrade_rejected(rejection.status, rejection.reason)
    }
}

/// What one upgrade hook decided.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum UpgradeVerdict {
    /// No objection, nothing to add
    Continue,
    /// No objection; add these headers to the 101 response
    Headers(HeaderMap),
    /// Veto the upgrade. Later hooks are skipped.
    Reject(Rejection),
}

impl UpgradeVerdict {
    /// Veto with `403 Forbidden`.
    #[must_use]
    pub fn reject<S: Into<String>>(reason: S) -> Self {
        Self::Reject(Rejection::forbidden(reason))
    }
}

impl From<HeaderMap> for UpgradeVerdict {
    fn from(headers: HeaderMap) -> Self {
        Self::Headers(headers)
    }
}

impl From<Rejection> for UpgradeVerdict {
    fn from(rejection: Rejection) -> Self {
        Self::Reject(rejection)
    }
}

/// Final outcome of negotiating one upgrade request.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeDecision {
    Accepted { headers: HeaderMap },
    Rejected(Rejection),
}

impl UpgradeDecision {
    #[must_use]
    pub fn accept(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected(rejection) => Some(&rejection.reason),
        }
    }

    /// `101 Switching Protocols` when accepted, otherwise the rejection status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Accepted { .. } => StatusCode::SWITCHING_PROTOCOLS,
            Self::Rejected(rejection) => rejection.status,
        }
    }

    /// Headers for the response, whichever way it went.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        match self {
            Self::Accepted { headers } => headers,
            Self::Rejected(rejection) => &rejection.headers,
        }
    }

    /// The response headers on acceptance, or a [`Kind::UpgradeRejected`](crate::Kind) error.
    pub fn into_result(self) -> Result<HeaderMap> {
        match self {
            Self::Accepted { headers } => Ok(headers),
            Self::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

/// An async gate consulted for every upgrade request, in registration order.
///
/// Implemented for every `Fn(UpgradeRequest) -> impl Future<Output = Result<V, E>>`
/// where `V` converts into an [`UpgradeVerdict`].
#[async_trait]
pub trait UpgradeHook: Send + Sync + 'static {
    async fn upgrade(
        &self,
        request: &UpgradeRequest,
    ) -> std::result::Result<UpgradeVerdict, BoxError>;
}

#[async_trait]
impl<F, Fut, V, E> UpgradeHook for F
where
    F: Fn(UpgradeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    V: Into<UpgradeVerdict> + 'static,
    E: Into<BoxError> + 'static,
{
    async fn upgrade(
        &self,
        request: &UpgradeRequest,
    ) -> std::result::Result<UpgradeVerdict, BoxError> {
        self(request.clone())
            .await
            .map(Into::into)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Kind, UpgradeRejected};

    #[test]
    fn accepted_decision_has_101() {
        let decision = UpgradeDecision::Accepted {
            headers: HeaderMap::new(),
        };

        assert!(decision.accept());
        assert_eq!(decision.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(decision.reason(), None);
        assert!(decision.into_result().is_ok());
    }

    #[test]
    fn rejected_decision_into_error() {
        let decision = UpgradeDecision::Rejected(Rejection::unauthorized("unauthorized"));

        assert!(!decision.accept());
        assert_eq!(decision.reason(), Some("unauthorized"));

        let error = decision.into_result().unwrap_err();
        assert_eq!(error.kind(), Kind::UpgradeRejected);
        assert_eq!(
            error.downcast_ref::<UpgradeRejected>().unwrap().status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn verdict_reject_defaults_to_forbidden() {
        let UpgradeVerdict::Reject(rejection) = UpgradeVerdict::reject("nope") else {
            panic!("expected a rejection");
        };
        assert_eq!(rejection.status, StatusCode::FORBIDDEN);
    }
}
