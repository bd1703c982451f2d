use bon::Builder;
use http::header::{AsHeaderName, CONNECTION, SEC_WEBSOCKET_PROTOCOL, UPGRADE};
use http::{HeaderMap, Method};
use url::Url;

use crate::Result;

/// Base used to resolve origin-form request targets such as `/chat?room=1`.
const RELATIVE_BASE: &str = "http://localhost";

/// The HTTP request a client sent to open a WebSocket.
///
/// Adapters build it from whatever their runtime hands them; hooks only ever see it
/// through [`Peer::request`](crate::Peer::request) or the upgrade hooks.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct UpgradeRequest {
    #[builder(default = Method::GET)]
    pub method: Method,
    /// Absolute URL when the runtime knows the host, otherwise the request target
    #[builder(into, default = "/".to_owned())]
    pub url: String,
    #[builder(default)]
    pub headers: HeaderMap,
    #[builder(into)]
    pub remote_addr: Option<String>,
}

impl Default for UpgradeRequest {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: "/".to_owned(),
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }
}

impl UpgradeRequest {
    /// Header value as text. Values that are not visible ASCII are treated as absent.
    #[must_use]
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether a comma-separated header carries `token`, compared case-insensitively.
    #[must_use]
    pub fn header_has_token<K: AsHeaderName>(&self, name: K, token: &str) -> bool {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// `Connection: upgrade` together with `Upgrade: websocket`.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header_has_token(CONNECTION, "upgrade")
            && self.header_has_token(UPGRADE, "websocket")
    }

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in client preference order.
    #[must_use]
    pub fn requested_protocols(&self) -> Vec<&str> {
        self.headers
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// The request URL, resolved against `http://localhost` when it is not absolute.
    pub fn parsed_url(&self) -> Result<Url> {
        match Url::parse(&self.url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(Url::parse(RELATIVE_BASE)?.join(&self.url)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path component of the request URL.
    #[must_use]
    pub fn path(&self) -> String {
        self.parsed_url()
            .map_or_else(|_| self.url.clone(), |url| url.path().to_owned())
    }
}
