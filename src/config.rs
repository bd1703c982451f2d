#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use bon::Builder;
use http::HeaderMap;

const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;
const DEFAULT_MAX_HANDSHAKE_BYTES: usize = 16 << 10;

/// Behavior shared by every connection of one core instance.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Compression preference for sends that do not choose one
    #[builder(default)]
    pub compress: bool,
    /// Supported subprotocols. The first one the client also offers is echoed back.
    #[builder(default, into)]
    pub protocols: Vec<String>,
    /// Headers added to every accepted upgrade response. Upgrade hooks override them.
    #[builder(default)]
    pub response_headers: HeaderMap,
    /// Largest message accepted by adapters that can enforce a limit
    #[builder(default = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
    /// Largest HTTP upgrade head an adapter buffers before answering `431`. Adapters may
    /// round it up to the smallest buffer their HTTP stack supports.
    #[builder(default = DEFAULT_MAX_HANDSHAKE_BYTES)]
    pub max_handshake_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compress: false,
            protocols: Vec::new(),
            response_headers: HeaderMap::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_handshake_bytes: DEFAULT_MAX_HANDSHAKE_BYTES,
        }
    }
}

impl Config {
    /// First protocol in the client's list that this server supports.
    #[must_use]
    pub fn select_protocol<'a, I: IntoIterator<Item = &'a str>>(
        &self,
        requested: I,
    ) -> Option<&str> {
        requested.into_iter().find_map(|offered| {
            self.protocols
                .iter()
                .find(|supported| supported.as_str() == offered)
                .map(String::as_str)
        })
    }
}
