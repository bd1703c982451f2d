use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt as _;

use super::{Diagnostic, EventKind, Hook, HookEvent, InstrumentHook};
use crate::error::Error;
use crate::peer::Peer;

/// Diagnostic emitted on the instrumentation channel whenever a hook faults.
pub const HOOK_ERROR_DIAGNOSTIC: &str = "hook:error";

const ERROR_EVENT: &str = "error";

/// Outcome of one [`HookRegistry::dispatch`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// Handlers that ran
    pub handlers: usize,
    /// Handlers that returned an error or panicked
    pub faults: usize,
}

/// Registered hooks of one core instance.
///
/// Handlers for an event run one after another in registration order. A handler that
/// errors or panics is reported and skipped; the remaining handlers still run.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<EventKind, Vec<Arc<dyn Hook>>>>,
    instruments: RwLock<Vec<Arc<dyn InstrumentHook>>>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<H: Hook>(&self, kind: EventKind, hook: H) {
        self.on_arc(kind, Arc::new(hook));
    }

    pub fn on_arc(&self, kind: EventKind, hook: Arc<dyn Hook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(hook);
    }

    /// Register an observer on the instrumentation channel.
    pub fn instrument<F>(&self, hook: F)
    where
        F: Fn(&Diagnostic<'_>) + Send + Sync + 'static,
    {
        self.instruments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn len(&self, kind: EventKind) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(Vec::is_empty)
    }

    fn handlers(&self, kind: EventKind) -> Vec<Arc<dyn Hook>> {
        // Cloned out so no lock is held while handlers run
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Run every handler registered for the event's kind.
    ///
    /// Never fails: faults are logged, mirrored on the instrumentation channel and
    /// forwarded to the `error` hooks.
    pub async fn dispatch(&self, event: HookEvent) -> Dispatched {
        let kind = event.kind();
        let handlers = self.handlers(kind);

        #[cfg(feature = "tracing")]
        tracing::trace!(event = %kind, handlers = handlers.len(), "dispatch");

        let mut dispatched = Dispatched {
            handlers: handlers.len(),
            faults: 0,
        };

        for (index, hook) in handlers.iter().enumerate() {
            let Some(fault) = invoke(hook.as_ref(), event.clone()).await else {
                continue;
            };
            dispatched.faults += 1;

            #[cfg(feature = "tracing")]
            tracing::warn!(event = %kind, index, error = %fault, "Hook failed");
            #[cfg(not(feature = "tracing"))]
            let _ = index;

            self.report(&kind.to_string(), event.peer(), fault).await;
        }

        dispatched
    }

    /// Surface a hook fault through the instrumentation channel and the `error` hooks.
    ///
    /// Faults raised by `error` hooks themselves are only logged.
    pub(crate) async fn report(&self, event: &str, peer: Option<&Peer>, fault: String) {
        let error = Arc::new(Error::hook(event, fault));
        self.instrument_event(HOOK_ERROR_DIAGNOSTIC, peer, Some(&*error));

        if event == ERROR_EVENT {
            return;
        }
        self.dispatch_error(peer.cloned(), error).await;
    }

    /// Deliver an error report to the `error` hooks without recursing on their faults.
    pub(crate) async fn dispatch_error(&self, peer: Option<Peer>, error: Arc<Error>) {
        let event = HookEvent::Error { peer, error };
        for hook in self.handlers(EventKind::Error) {
            if let Some(fault) = invoke(hook.as_ref(), event.clone()).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %fault, "Error hook failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &fault;
            }
        }
    }

    /// Emit a diagnostic to every instrumentation observer.
    ///
    /// Observers are synchronous; a panicking observer is logged and skipped.
    pub fn instrument_event(
        &self,
        name: &str,
        peer: Option<&Peer>,
        raw: Option<&(dyn Any + Send + Sync)>,
    ) {
        let instruments = self
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if instruments.is_empty() {
            return;
        }

        let diagnostic = Diagnostic::new(name, peer, raw);
        for observer in instruments {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.observe(&diagnostic)));
            if let Err(panic) = outcome {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    diagnostic = name,
                    error = %panic_message(panic.as_ref()),
                    "Instrumentation hook panicked"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &panic;
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(kind, hooks)| (*kind, hooks.len()))
            .collect();
        f.debug_struct("HookRegistry")
            .field("hooks", &counts)
            .field(
                "instruments",
                &self
                    .instruments
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .finish()
    }
}

/// Run one handler, returning its fault as text.
async fn invoke(hook: &dyn Hook, event: HookEvent) -> Option<String> {
    match AssertUnwindSafe(hook.call(event)).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
