//! Reference adapter for `tokio` TCP servers using `tokio-tungstenite`.
//!
//! ```no_run
//! use crossws::CrossWs;
//! use crossws::adapters::tungstenite::TungsteniteAdapter;
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> crossws::Result<()> {
//! let ws = CrossWs::builder()
//!     .on_message(|event: crossws::HookEvent| async move {
//!         if let (Some(peer), Some(message)) = (event.peer(), event.message()) {
//!             peer.send(message.clone(), Default::default())?;
//!         }
//!         Ok::<_, crossws::Error>(())
//!     })
//!     .build();
//!
//! let listener = TcpListener::bind("127.0.0.1:3000").await?;
//! TungsteniteAdapter::new(ws).serve(listener).await
//! # }
//! ```

mod connection;
mod handshake;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use http::header::SEC_WEBSOCKET_KEY;
use http::{HeaderValue, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};

pub use connection::TungsteniteConnection;

use crate::Result;
use crate::adapter::Adapter;
use crate::error::Error;
use crate::hooks::CloseDetails;
use crate::hub::CrossWs;
use crate::message::Message;
use crate::peer::{Peer, PeerStore, ReadyState};
use crate::upgrade::{Rejection, Rfc6455Policy, UpgradeDecision};

/// HTTP request handed to the adapter by hyper.
pub type HttpRequest = hyper::Request<Incoming>;
/// HTTP response the adapter answers an upgrade request with.
pub type HttpResponse = hyper::Response<Full<Bytes>>;

/// Smallest read buffer hyper accepts.
const MIN_HANDSHAKE_BUFFER: usize = 8192;

/// Queued bytes past which sends report [`SendStatus::Backpressured`](crate::SendStatus).
pub const DEFAULT_SEND_WATERMARK: usize = 1 << 20;

type Stream = WebSocketStream<TokioIo<Upgraded>>;

struct Inner {
    core: CrossWs,
    peers: PeerStore<u64>,
    next_key: AtomicU64,
    watermark: usize,
}

/// Serves WebSocket connections from a [`TcpListener`].
///
/// Cheap to clone; every clone serves the same core instance.
#[derive(Clone)]
pub struct TungsteniteAdapter {
    inner: Arc<Inner>,
}

impl TungsteniteAdapter {
    #[must_use]
    pub fn new(core: CrossWs) -> Self {
        Self::with_send_watermark(core, DEFAULT_SEND_WATERMARK)
    }

    #[must_use]
    pub fn with_send_watermark(core: CrossWs, watermark: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                core,
                peers: PeerStore::new(),
                next_key: AtomicU64::new(1),
                watermark,
            }),
        }
    }

    /// Peers whose connection is currently tracked.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.peers.peers()
    }

    /// Accept connections until the listener fails.
    ///
    /// Every connection is served by hyper on its own task. Requests that are not valid
    /// HTTP get hyper's own `400`, and heads larger than
    /// [`Config::max_handshake_bytes`](crate::Config) a `431`.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        #[cfg(feature = "tracing")]
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Serving WebSocket connections");
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            tokio::spawn(self.clone().serve_connection(stream, addr));
        }
    }

    async fn serve_connection(self, stream: TcpStream, addr: SocketAddr) {
        let max_buf_size = self
            .inner
            .core
            .config()
            .max_handshake_bytes
            .max(MIN_HANDSHAKE_BUFFER);

        let service = service_fn(move |mut request: HttpRequest| {
            let adapter = self.clone();
            request.extensions_mut().insert(addr);
            async move { Ok::<_, Infallible>(adapter.respond(request).await) }
        });

        let served = http1::Builder::new()
            .max_buf_size(max_buf_size)
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await;
        if let Err(e) = served {
            #[cfg(feature = "tracing")]
            tracing::debug!(%addr, error = %e, "HTTP connection ended with an error");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    /// Answer one HTTP request, turning adapter failures into a `500`.
    async fn respond(&self, request: HttpRequest) -> HttpResponse {
        match self.handle_upgrade(request).await {
            Ok(response) => response,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Upgrade failed");

                handshake::rejection_response(&Rejection::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string(),
                ))
            }
        }
    }

    /// Wait for hyper to hand over the upgraded socket, then serve frames on it.
    async fn attach(
        self,
        on_upgrade: hyper::upgrade::OnUpgrade,
        conn: TungsteniteConnection,
        rx: mpsc::UnboundedReceiver<Frame>,
    ) {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    addr = %conn.socket_addr(),
                    error = %e,
                    "Upgrade did not complete"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        let config = self.inner.core.config();
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));
        let ws =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(ws_config))
                .await;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            addr = %conn.socket_addr(),
            url = %conn.request().url,
            "WebSocket upgraded"
        );

        self.run(conn, ws, rx).await;
    }

    /// Read frames until the connection ends, dispatching each in arrival order.
    async fn run(
        self,
        conn: TungsteniteConnection,
        ws: Stream,
        rx: mpsc::UnboundedReceiver<Frame>,
    ) {
        let (sink, mut stream) = ws.split();
        let writer = tokio::spawn(self.clone().write_loop(conn.clone(), rx, sink));

        conn.set_state(ReadyState::Open);
        self.on_open(&conn).await;

        let mut details = CloseDetails::default();
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Frame::Text(text)) => {
                    self.on_message(&conn, Message::text(text.as_str())).await;
                }
                Ok(Frame::Binary(data)) => {
                    self.on_message(&conn, Message::binary(data)).await;
                }
                Ok(Frame::Ping(data)) => {
                    self.on_ping(&conn, data).await;
                }
                Ok(Frame::Pong(data)) => {
                    self.on_pong(&conn, data).await;
                }
                Ok(Frame::Close(frame)) => {
                    conn.set_state(ReadyState::Closing);
                    if let Some(frame) = frame {
                        details = CloseDetails::new(
                            Some(u16::from(frame.code)),
                            Some(frame.reason.as_str()),
                        );
                    }
                }
                Ok(Frame::Frame(_)) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        addr = %conn.socket_addr(),
                        error = %e,
                        "WebSocket read failed"
                    );

                    let peer = self.peer(&conn);
                    self.inner.core.error(Some(&peer), e.into()).await;
                    break;
                }
            }
        }

        conn.set_state(ReadyState::Closed);
        writer.abort();
        self.on_close(&conn, details).await;
    }

    async fn write_loop(
        self,
        conn: TungsteniteConnection,
        mut rx: mpsc::UnboundedReceiver<Frame>,
        mut sink: SplitSink<Stream, Frame>,
    ) {
        while let Some(frame) = rx.recv().await {
            let len = frame.len();
            let closing = frame.is_close();

            if let Err(e) = sink.send(frame).await {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    addr = %conn.socket_addr(),
                    error = %e,
                    "WebSocket write failed"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                break;
            }

            if conn.release(len) {
                let adapter = self.clone();
                let conn = conn.clone();
                tokio::spawn(async move {
                    adapter.on_drain(&conn).await;
                });
            }
            if closing {
                break;
            }
        }
    }
}

#[async_trait]
impl Adapter for TungsteniteAdapter {
    type Request = HttpRequest;
    type Upgraded = HttpResponse;
    type Connection = TungsteniteConnection;

    fn name(&self) -> &str {
        "tungstenite"
    }

    fn core(&self) -> &CrossWs {
        &self.inner.core
    }

    fn peer(&self, connection: &TungsteniteConnection) -> Peer {
        self.inner.peers.get_or_create(connection.key(), || {
            self.inner
                .core
                .new_peer(connection.clone(), Some(Arc::clone(connection.request())))
        })
    }

    fn evict(&self, connection: &TungsteniteConnection) {
        self.inner.peers.remove(&connection.key());
    }

    /// Negotiate the opening handshake for a request received by [`serve`](Self::serve).
    ///
    /// Returns the response to send: `101 Switching Protocols` when accepted, in which
    /// case the connection is served on a spawned task once hyper releases the socket,
    /// or the plain-text rejection otherwise. Bytes the client sent right after the head
    /// stay buffered in the upgraded socket.
    async fn handle_upgrade(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        let remote_addr = request
            .extensions()
            .get::<SocketAddr>()
            .copied()
            .ok_or_else(|| Error::validation("request did not arrive through serve"))?;
        let upgrade_request = Arc::new(handshake::upgrade_request(&request, Some(remote_addr)));

        let headers = match self
            .inner
            .core
            .upgrade_with(&upgrade_request, &Rfc6455Policy::new())
            .await
        {
            UpgradeDecision::Accepted { headers } => headers,
            UpgradeDecision::Rejected(rejection) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    addr = %remote_addr,
                    status = %rejection.status,
                    reason = %rejection.reason,
                    "Upgrade rejected"
                );
                return Ok(handshake::rejection_response(&rejection));
            }
        };

        let key = upgrade_request
            .header(SEC_WEBSOCKET_KEY)
            .ok_or_else(|| Error::validation("missing Sec-WebSocket-Key"))?;
        let accept = HeaderValue::try_from(derive_accept_key(key.as_bytes()))
            .map_err(http::Error::from)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = TungsteniteConnection::new(
            self.inner.next_key.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            Arc::clone(&upgrade_request),
            tx,
            self.inner.watermark,
        );
        let on_upgrade = hyper::upgrade::on(&mut request);
        tokio::spawn(self.clone().attach(on_upgrade, conn, rx));

        Ok(handshake::switching_protocols_response(accept, &headers))
    }
}

impl std::fmt::Debug for TungsteniteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteAdapter")
            .field("core", &self.inner.core)
            .field("peers", &self.inner.peers.len())
            .field("watermark", &self.inner.watermark)
            .finish()
    }
}
