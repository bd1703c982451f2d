#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossws::error::{HookExecution, UpgradeRejected};
use crossws::hooks::BoxError;
use crossws::upgrade::Rfc6455Policy;
use crossws::{
    Adapter as _, CrossWs, HookEvent, Kind, Rejection, UpgradeRequest, UpgradeVerdict,
};
use http::header::{CONNECTION, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::common::MockAdapter;

fn handshake_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(
        SEC_WEBSOCKET_KEY,
        HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
    );
    headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    headers
}

#[tokio::test]
async fn missing_upgrade_headers_are_rejected_before_hooks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let ws = CrossWs::builder()
        .policy(Rfc6455Policy::new())
        .on_upgrade({
            let calls = Arc::clone(&calls);
            move |_request: UpgradeRequest| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(UpgradeVerdict::Continue) }
            }
        })
        .build();
    let mut headers = handshake_headers();
    headers.remove(UPGRADE);
    headers.remove(CONNECTION);
    let request = UpgradeRequest::builder().url("/ws").headers(headers).build();

    let decision = ws.upgrade(&request).await;

    assert!(!decision.accept());
    assert_eq!(decision.status(), StatusCode::BAD_REQUEST);
    assert!(decision.reason().unwrap().contains("Upgrade"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn valid_handshake_is_accepted() {
    let ws = CrossWs::builder().policy(Rfc6455Policy::new()).build();
    let request = UpgradeRequest::builder()
        .headers(handshake_headers())
        .build();

    assert!(ws.upgrade(&request).await.accept());
}

#[tokio::test]
async fn unauthorized_veto_skips_later_hooks() {
    let later = Arc::new(AtomicUsize::new(0));
    let ws = CrossWs::builder()
        .on_upgrade(|request: UpgradeRequest| async move {
            if request.header("authorization").is_none() {
                return Ok::<_, BoxError>(UpgradeVerdict::reject("unauthorized"));
            }
            Ok(UpgradeVerdict::Continue)
        })
        .on_upgrade({
            let later = Arc::clone(&later);
            move |_request: UpgradeRequest| {
                later.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(UpgradeVerdict::Continue) }
            }
        })
        .build();

    let decision = ws.upgrade(&UpgradeRequest::default()).await;

    assert!(!decision.accept());
    assert_eq!(decision.reason(), Some("unauthorized"));
    assert_eq!(decision.status(), StatusCode::FORBIDDEN);
    assert_eq!(later.load(Ordering::SeqCst), 0);

    let error = decision.into_result().unwrap_err();
    assert_eq!(error.kind(), Kind::UpgradeRejected);
    assert_eq!(
        error.downcast_ref::<UpgradeRejected>().unwrap().reason,
        "unauthorized"
    );
}

#[tokio::test]
async fn rejection_keeps_status_and_headers_chosen_by_hook() {
    let ws = CrossWs::builder()
        .on_upgrade(|_request: UpgradeRequest| async {
            Ok::<_, BoxError>(
                Rejection::unauthorized("token expired")
                    .with_header("www-authenticate", HeaderValue::from_static("Bearer")),
            )
        })
        .build();

    let decision = ws.upgrade(&UpgradeRequest::default()).await;

    assert_eq!(decision.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(decision.headers().get("www-authenticate").unwrap(), "Bearer");
}

#[tokio::test]
async fn hook_headers_are_merged_in_order() {
    let ws = CrossWs::builder()
        .on_upgrade(|_request: UpgradeRequest| async {
            let mut headers = HeaderMap::new();
            headers.insert("x-first", HeaderValue::from_static("1"));
            headers.insert("x-shared", HeaderValue::from_static("first"));
            Ok::<_, BoxError>(headers)
        })
        .on_upgrade(|_request: UpgradeRequest| async {
            let mut headers = HeaderMap::new();
            headers.insert("x-shared", HeaderValue::from_static("second"));
            Ok::<_, BoxError>(headers)
        })
        .build();

    let headers = ws
        .upgrade(&UpgradeRequest::default())
        .await
        .into_result()
        .unwrap();

    assert_eq!(headers.get("x-first").unwrap(), "1");
    assert_eq!(headers.get("x-shared").unwrap(), "second");
}

#[tokio::test]
async fn failing_upgrade_hook_rejects_and_reports() {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let ws = CrossWs::builder()
        .on_upgrade(|_request: UpgradeRequest| async {
            Err::<UpgradeVerdict, _>("session store offline")
        })
        .on_error({
            let reports = Arc::clone(&reports);
            move |event: HookEvent| {
                if let Some(detail) = event
                    .error()
                    .and_then(|e| e.downcast_ref::<HookExecution>())
                {
                    reports.lock().unwrap().push(detail.event.clone());
                }
                async { Ok::<_, BoxError>(()) }
            }
        })
        .build();

    let decision = ws.upgrade(&UpgradeRequest::default()).await;

    assert_eq!(decision.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(*reports.lock().unwrap(), vec!["upgrade"]);
}

#[tokio::test]
async fn shim_policy_runs_before_configured_policy_and_hooks() {
    let ws = CrossWs::builder()
        .on_upgrade(|_request: UpgradeRequest| async {
            Ok::<_, BoxError>(UpgradeVerdict::reject("hook"))
        })
        .build();

    let decision = ws
        .upgrade_with(&UpgradeRequest::default(), &Rfc6455Policy::new())
        .await;

    assert_eq!(decision.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn adapter_upgrade_returns_response_headers() {
    let ws = CrossWs::builder()
        .on_upgrade(|_request: UpgradeRequest| async {
            let mut headers = HeaderMap::new();
            headers.insert("set-cookie", HeaderValue::from_static("session=1"));
            Ok::<_, BoxError>(headers)
        })
        .build();
    let adapter = MockAdapter::new(ws);

    let headers = adapter
        .handle_upgrade(UpgradeRequest::default())
        .await
        .unwrap();

    assert_eq!(headers.get("set-cookie").unwrap(), "session=1");
}

#[tokio::test]
async fn rejected_adapter_upgrade_creates_no_peer() {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opens);
    let ws = CrossWs::builder()
        .on_upgrade(|_request: UpgradeRequest| async {
            Ok::<_, BoxError>(UpgradeVerdict::reject("closed for maintenance"))
        })
        .on_open(move |_event: HookEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(()) }
        })
        .build();
    let adapter = MockAdapter::new(ws);

    let error = adapter
        .handle_upgrade(UpgradeRequest::default())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), Kind::UpgradeRejected);
    assert_eq!(
        error.downcast_ref::<UpgradeRejected>().unwrap().status,
        StatusCode::FORBIDDEN
    );
    assert_eq!(adapter.tracked(), 0);
    assert_eq!(opens.load(Ordering::SeqCst), 0);
}
