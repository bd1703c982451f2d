#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod error;
pub mod hooks;
pub mod hub;
pub mod message;
pub mod peer;
pub mod upgrade;

pub use adapter::Adapter;
pub use config::Config;
pub use error::{Error, Kind};
pub use hooks::{CloseDetails, Diagnostic, EventKind, HookEvent, HookRegistry};
pub use hub::{CrossWs, CrossWsBuilder};
pub use message::{Message, MessageKind, RawFrame};
pub use peer::{
    ConnectionId, Peer, PeerStore, ReadyState, SendOptions, SendStatus, Transport,
    TransportError,
};
pub use upgrade::{Rejection, UpgradeDecision, UpgradePolicy, UpgradeRequest, UpgradeVerdict};

pub type Result<T> = std::result::Result<T, Error>;
