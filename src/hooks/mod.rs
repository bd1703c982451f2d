//! Hook registration and ordered, fault-isolated dispatch.
//!
//! Handlers are plain async closures:
//!
//! ```
//! use crossws::hooks::{EventKind, HookEvent, HookRegistry};
//!
//! let hooks = HookRegistry::new();
//! hooks.on(EventKind::Message, |event: HookEvent| async move {
//!     if let (Some(peer), Some(message)) = (event.peer(), event.message()) {
//!         peer.send(message.clone(), Default::default())?;
//!     }
//!     Ok::<_, crossws::Error>(())
//! });
//! assert_eq!(hooks.len(EventKind::Message), 1);
//! ```

mod event;
mod registry;

use std::error::Error as StdError;
use std::future::Future;

use async_trait::async_trait;

pub use event::{CloseDetails, Diagnostic, EventKind, HookEvent};
pub use registry::{Dispatched, HOOK_ERROR_DIAGNOSTIC, HookRegistry};
pub(crate) use registry::panic_message;

/// Error type returned by user hooks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An async handler for one kind of lifecycle event.
///
/// Implemented for every `Fn(HookEvent) -> impl Future<Output = Result<(), E>>`.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    async fn call(&self, event: HookEvent) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut, E> Hook for F
where
    F: Fn(HookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn call(&self, event: HookEvent) -> Result<(), BoxError> {
        self(event).await.map_err(Into::into)
    }
}

/// Synchronous observer on the instrumentation channel.
pub trait InstrumentHook: Send + Sync + 'static {
    fn observe(&self, diagnostic: &Diagnostic<'_>);
}

impl<F> InstrumentHook for F
where
    F: Fn(&Diagnostic<'_>) + Send + Sync + 'static,
{
    fn observe(&self, diagnostic: &Diagnostic<'_>) {
        self(diagnostic);
    }
}
