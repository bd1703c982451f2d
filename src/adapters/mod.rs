//! Runtime integrations built on the [`Adapter`](crate::Adapter) contract.

#[cfg(feature = "tungstenite")]
pub mod tungstenite;
