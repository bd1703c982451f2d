use http::header::{CONNECTION, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderValue, Method, StatusCode};

use super::{Rejection, UpgradeRequest};

/// The only protocol version defined by RFC 6455.
pub const WEBSOCKET_VERSION: &str = "13";

/// Decides whether a request is structurally acceptable as a WebSocket upgrade.
///
/// Runs before any upgrade hook. Runtimes that validate natively use
/// [`PermissivePolicy`]; adapters that own the HTTP exchange use [`Rfc6455Policy`].
pub trait UpgradePolicy: Send + Sync + 'static {
    fn validate(&self, request: &UpgradeRequest) -> Result<(), Rejection>;
}

/// Accepts every request.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissivePolicy;

impl PermissivePolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl UpgradePolicy for PermissivePolicy {
    fn validate(&self, _request: &UpgradeRequest) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Opening-handshake checks from RFC 6455 section 4.2.1.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc6455Policy;

impl Rfc6455Policy {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl UpgradePolicy for Rfc6455Policy {
    fn validate(&self, request: &UpgradeRequest) -> Result<(), Rejection> {
        if request.method != Method::GET {
            return Err(Rejection::new(
                StatusCode::METHOD_NOT_ALLOWED,
                "WebSocket upgrade requires GET",
            ));
        }
        if !request.header_has_token(UPGRADE, "websocket") {
            return Err(Rejection::bad_request("Missing or invalid Upgrade header"));
        }
        if !request.header_has_token(CONNECTION, "upgrade") {
            return Err(Rejection::bad_request("Missing or invalid Connection header"));
        }
        if request
            .header(SEC_WEBSOCKET_KEY)
            .is_none_or(|key| key.trim().is_empty())
        {
            return Err(Rejection::bad_request("Missing Sec-WebSocket-Key header"));
        }
        if request.header(SEC_WEBSOCKET_VERSION).map(str::trim) != Some(WEBSOCKET_VERSION) {
            // Section 4.4: advertise the version we do speak
            return Err(
                Rejection::new(StatusCode::UPGRADE_REQUIRED, "Unsupported WebSocket version")
                    .with_header(
                        SEC_WEBSOCKET_VERSION,
                        HeaderValue::from_static(WEBSOCKET_VERSION),
                    ),
            );
        }
        Ok(())
    }
}
