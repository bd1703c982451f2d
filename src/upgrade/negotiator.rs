use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt as _;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::{HeaderMap, HeaderValue, StatusCode};

use super::{
    Rejection, UpgradeDecision, UpgradeHook, UpgradePolicy, UpgradeRequest, UpgradeVerdict,
};
use crate::config::Config;
use crate::hooks::{HookRegistry, panic_message};

const UPGRADE_EVENT: &str = "upgrade";
const HOOK_FAILED_REASON: &str = "Upgrade hook failed";

/// Runs validation and upgrade hooks and folds them into one [`UpgradeDecision`].
///
/// Order:
/// 1. The caller's policy, if any, then the configured policy
/// 2. Upgrade hooks in registration order; the first veto wins and later hooks are skipped
/// 3. Configured response headers and the negotiated subprotocol, overridden by
///    headers contributed by hooks
pub struct Negotiator {
    policy: Box<dyn UpgradePolicy>,
    hooks: RwLock<Vec<Arc<dyn UpgradeHook>>>,
    faults: Arc<HookRegistry>,
    config: Arc<Config>,
}

impl Negotiator {
    /// `faults` receives reports about upgrade hooks that fail.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        policy: Box<dyn UpgradePolicy>,
        faults: Arc<HookRegistry>,
    ) -> Self {
        Self {
            policy,
            hooks: RwLock::new(Vec::new()),
            faults,
            config,
        }
    }

    pub fn on_upgrade<H: UpgradeHook>(&self, hook: H) {
        self.on_upgrade_arc(Arc::new(hook));
    }

    pub fn on_upgrade_arc(&self, hook: Arc<dyn UpgradeHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn negotiate(&self, request: &UpgradeRequest) -> UpgradeDecision {
        self.negotiate_with(request, None).await
    }

    /// Negotiate with an extra policy that runs ahead of the configured one.
    pub async fn negotiate_with(
        &self,
        request: &UpgradeRequest,
        policy: Option<&dyn UpgradePolicy>,
    ) -> UpgradeDecision {
        let validated = policy
            .map_or(Ok(()), |policy| policy.validate(request))
            .and_then(|()| self.policy.validate(request));
        if let Err(rejection) = validated {
            return self.reject(request, rejection);
        }

        let mut headers = self.default_headers(request);

        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            let outcome = AssertUnwindSafe(hook.upgrade(request))
                .catch_unwind()
                .await;
            let fault = match outcome {
                Ok(Ok(UpgradeVerdict::Continue)) => continue,
                Ok(Ok(UpgradeVerdict::Headers(extra))) => {
                    headers.extend(extra);
                    continue;
                }
                Ok(Ok(UpgradeVerdict::Reject(rejection))) => {
                    return self.reject(request, rejection);
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(url = %request.url, error = %fault, "Upgrade hook failed");

            self.faults.report(UPGRADE_EVENT, None, fault).await;
            return self.reject(
                request,
                Rejection::new(StatusCode::INTERNAL_SERVER_ERROR, HOOK_FAILED_REASON),
            );
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %request.url, "Upgrade accepted");

        UpgradeDecision::Accepted { headers }
    }

    fn default_headers(&self, request: &UpgradeRequest) -> HeaderMap {
        let mut headers = self.config.response_headers.clone();
        if let Some(protocol) = self.config.select_protocol(request.requested_protocols()) {
            match HeaderValue::from_str(protocol) {
                Ok(value) => {
                    headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(protocol, error = %e, "Invalid subprotocol header value");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }
        headers
    }

    fn reject(&self, request: &UpgradeRequest, rejection: Rejection) -> UpgradeDecision {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            url = %request.url,
            status = %rejection.status,
            reason = %rejection.reason,
            "Upgrade rejected"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = request;

        self.faults
            .instrument_event("upgrade:rejected", None, Some(&rejection));
        UpgradeDecision::Rejected(rejection)
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("hooks", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::hooks::BoxError;
    use crate::upgrade::{PermissivePolicy, Rfc6455Policy};

    fn negotiator(config: Config) -> Negotiator {
        Negotiator::new(
            Arc::new(config),
            Box::new(PermissivePolicy::new()),
            Arc::new(HookRegistry::new()),
        )
    }

    #[tokio::test]
    async fn no_hooks_accepts() {
        let decision = negotiator(Config::default())
            .negotiate(&UpgradeRequest::default())
            .await;

        assert!(decision.accept());
        assert!(decision.headers().is_empty());
    }

    #[tokio::test]
    async fn first_veto_wins() {
        let negotiator = negotiator(Config::default());
        let later_ran = Arc::new(Mutex::new(false));

        negotiator.on_upgrade(|_req: UpgradeRequest| async {
            Ok::<_, BoxError>(UpgradeVerdict::Reject(Rejection::unauthorized("unauthorized")))
        });
        {
            let later_ran = Arc::clone(&later_ran);
            negotiator.on_upgrade(move |_req: UpgradeRequest| {
                *later_ran.lock().unwrap() = true;
                async { Ok::<_, BoxError>(UpgradeVerdict::Continue) }
            });
        }

        let decision = negotiator.negotiate(&UpgradeRequest::default()).await;

        assert!(!decision.accept());
        assert_eq!(decision.reason(), Some("unauthorized"));
        assert_eq!(decision.status(), StatusCode::UNAUTHORIZED);
        assert!(!*later_ran.lock().unwrap());
    }

    #[tokio::test]
    async fn hook_headers_override_defaults() {
        let mut defaults = HeaderMap::new();
        defaults.insert("x-server", HeaderValue::from_static("default"));
        defaults.insert("x-keep", HeaderValue::from_static("kept"));
        let negotiator = negotiator(Config::builder().response_headers(defaults).build());

        negotiator.on_upgrade(|_req: UpgradeRequest| async {
            let mut headers = HeaderMap::new();
            headers.insert("x-server", HeaderValue::from_static("hook"));
            Ok::<_, BoxError>(headers)
        });

        let decision = negotiator.negotiate(&UpgradeRequest::default()).await;
        let headers = decision.into_result().unwrap();

        assert_eq!(headers.get("x-server").unwrap(), "hook");
        assert_eq!(headers.get("x-keep").unwrap(), "kept");
    }

    #[tokio::test]
    async fn failing_hook_rejects_with_500() {
        let negotiator = negotiator(Config::default());
        negotiator.on_upgrade(|_req: UpgradeRequest| async {
            Err::<UpgradeVerdict, _>("database unavailable")
        });

        let decision = negotiator.negotiate(&UpgradeRequest::default()).await;

        assert_eq!(decision.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(decision.reason(), Some(HOOK_FAILED_REASON));
    }

    #[tokio::test]
    async fn panicking_hook_rejects_with_500() {
        let negotiator = negotiator(Config::default());
        negotiator.on_upgrade(|_req: UpgradeRequest| async {
            if true {
                panic!("hook exploded");
            }
            Ok::<_, BoxError>(UpgradeVerdict::Continue)
        });

        let decision = negotiator.negotiate(&UpgradeRequest::default()).await;

        assert_eq!(decision.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn caller_policy_runs_first() {
        let negotiator = negotiator(Config::default());
        let decision = negotiator
            .negotiate_with(&UpgradeRequest::default(), Some(&Rfc6455Policy::new()))
            .await;

        assert_eq!(decision.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subprotocol_is_negotiated() {
        let negotiator = negotiator(
            Config::builder()
                .protocols(vec!["chat".to_owned()])
                .build(),
        );
        let mut headers = HeaderMap::new();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("xml, chat"));
        let request = UpgradeRequest::builder().headers(headers).build();

        let decision = negotiator.negotiate(&request).await;

        assert_eq!(decision.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "chat");
    }
}
