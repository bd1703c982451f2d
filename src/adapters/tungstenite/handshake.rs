//! Conversions between hyper's HTTP types and the opening handshake.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, HOST, SEC_WEBSOCKET_ACCEPT, UPGRADE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use url::Url;

use crate::upgrade::{Rejection, UpgradeRequest};

/// Absolute URL from the `Host` header when there is one, otherwise the raw target.
fn request_url<B>(request: &Request<B>) -> String {
    let uri = request.uri();
    if uri.scheme().is_some() {
        return uri.to_string();
    }

    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    request
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .and_then(|host| Url::parse(&format!("http://{host}{target}")).ok())
        .map_or_else(|| target.to_owned(), String::from)
}

/// The normalized view of an upgrade request received by hyper.
pub(crate) fn upgrade_request<B>(
    request: &Request<B>,
    remote_addr: Option<SocketAddr>,
) -> UpgradeRequest {
    UpgradeRequest::builder()
        .method(request.method().clone())
        .url(request_url(request))
        .headers(request.headers().clone())
        .maybe_remote_addr(remote_addr.map(|addr| addr.to_string()))
        .build()
}

/// A plain-text response for a declined upgrade. The connection is closed after it.
pub(crate) fn rejection_response(rejection: &Rejection) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(rejection.reason.clone())));
    *response.status_mut() = rejection.status;

    let headers = response.headers_mut();
    headers.extend(rejection.headers.clone());
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// The `101 Switching Protocols` response completing the handshake.
///
/// `extra` cannot override the headers that define the handshake itself.
pub(crate) fn switching_protocols_response(
    accept: HeaderValue,
    extra: &HeaderMap,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.extend(extra.clone());
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http::header::SEC_WEBSOCKET_VERSION;
    use http_body_util::BodyExt as _;

    use super::*;

    fn handshake(uri: &str) -> Request<()> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(HOST, "example.com:8080")
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "Upgrade")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header(SEC_WEBSOCKET_VERSION, "13")
            .body(())
            .unwrap()
    }

    #[test]
    fn url_is_absolute_when_host_is_known() {
        let request = upgrade_request(
            &handshake("/chat?room=1"),
            Some("10.0.0.1:4000".parse().unwrap()),
        );

        assert_eq!(request.url, "http://example.com:8080/chat?room=1");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.remote_addr.as_deref(), Some("10.0.0.1:4000"));
        assert_eq!(request.header(UPGRADE), Some("websocket"));
    }

    #[test]
    fn url_without_host_is_the_target() {
        let request = Request::builder().uri("/ws?x=1").body(()).unwrap();
        assert_eq!(request_url(&request), "/ws?x=1");

        let absolute = Request::builder()
            .uri("http://other.test/ws")
            .body(())
            .unwrap();
        assert_eq!(request_url(&absolute), "http://other.test/ws");
    }

    #[tokio::test]
    async fn rejection_response_carries_reason_and_headers() {
        let mut rejection =
            Rejection::new(StatusCode::UPGRADE_REQUIRED, "Unsupported WebSocket version");
        rejection
            .headers
            .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));

        let response = rejection_response(&rejection);

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(response.headers()[SEC_WEBSOCKET_VERSION], "13");
        assert_eq!(response.headers()[CONNECTION], "close");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "Unsupported WebSocket version");
    }

    #[test]
    fn switching_protocols_keeps_reserved_headers() {
        let mut extra = HeaderMap::new();
        extra.insert("x-session", HeaderValue::from_static("abc"));
        extra.insert(UPGRADE, HeaderValue::from_static("h2c"));

        let response = switching_protocols_response(
            HeaderValue::from_static("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="),
            &extra,
        );

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            response.headers()[SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(response.headers()[UPGRADE], "websocket");
        assert_eq!(response.headers()["x-session"], "abc");
        assert_eq!(response.headers().get_all(UPGRADE).iter().count(), 1);
    }
}
