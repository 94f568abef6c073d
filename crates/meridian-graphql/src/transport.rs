//! Transport seams over the HTTP and message-socket primitives.
//!
//! These adapters supply raw I/O and cooperative cancellation only; all
//! validation and normalization happens above them.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Result, TransportError};

/// Type alias for a connected WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A handle to an in-flight request that can be cancelled.
///
/// Cancellation is advisory: aborting after completion is harmless, and
/// repeated aborts are no-ops.
#[derive(Clone)]
pub struct AbortHandle {
    cancel_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AbortHandle {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                cancel_tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Cancel the in-flight request.
    ///
    /// Returns `true` if the cancellation signal was delivered, `false` if
    /// the request already completed or was already cancelled.
    pub fn abort(&self) -> bool {
        if let Some(tx) = self.cancel_tx.lock().take() {
            tx.send(()).is_ok()
        } else {
            false
        }
    }

    /// Check if the request is still pending.
    pub fn is_pending(&self) -> bool {
        self.cancel_tx.lock().is_some()
    }

    /// Mark the request completed so later aborts become no-ops.
    pub(crate) fn complete(&self) {
        self.cancel_tx.lock().take();
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Raw parts of an HTTP response, before any validation.
#[derive(Debug, Clone)]
pub struct HttpPayload {
    /// The HTTP status code.
    pub status: u16,
    /// The canonical status text (e.g. `Internal Server Error`).
    pub status_text: String,
    /// The `Content-Type` header value, if present.
    pub content_type: Option<String>,
    /// The `Content-Length` header value, if present.
    pub content_length: Option<u64>,
    /// The response body.
    pub body: Bytes,
}

/// Thin seam over the HTTP request/response primitive.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a prepared request and collect the raw response parts.
    pub async fn send(&self, request: reqwest::Request) -> Result<HttpPayload> {
        let response = self.client.execute(request).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let content_length = response
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let status_text = status
            .canonical_reason()
            .unwrap_or("Unknown Status")
            .to_string();
        let body = response.bytes().await?;
        Ok(HttpPayload {
            status: status.as_u16(),
            status_text,
            content_type,
            content_length,
            body,
        })
    }
}

/// An event produced by a message socket.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// The socket closed, with the close code when one was supplied.
    Closed(Option<u16>),
    /// The socket failed mid-stream.
    Failed(String),
}

/// A persistent, bidirectional message socket.
///
/// Methods take `&self` so senders and receivers can operate concurrently;
/// implementations guard their halves internally.
#[async_trait]
pub trait MessageSocket: Send + Sync {
    /// Send a text frame.
    async fn send(&self, text: String) -> Result<()>;

    /// Receive the next event. After `Closed` or `Failed`, callers must not
    /// call `recv` again.
    async fn recv(&self) -> SocketEvent;

    /// Close the socket with the given code and reason. Safe to call on an
    /// already-closed socket.
    async fn close(&self, code: u16, reason: &str);
}

/// Opens message sockets for subscription sessions.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Connect to the given URL.
    async fn connect(&self, url: &str) -> Result<Arc<dyn MessageSocket>>;
}

/// The production connector: WebSocket with the `graphql-transport-ws`
/// subprotocol.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn MessageSocket>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            http::HeaderValue::from_static("graphql-transport-ws"),
        );

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let (write, read) = stream.split();

        Ok(Arc::new(WsSocket {
            write: tokio::sync::Mutex::new(write),
            read: tokio::sync::Mutex::new(read),
        }))
    }
}

/// WebSocket-backed message socket. The split halves are held behind async
/// mutexes so send and receive can run concurrently through `&self`.
struct WsSocket {
    write: tokio::sync::Mutex<futures_util::stream::SplitSink<WsStream, Message>>,
    read: tokio::sync::Mutex<futures_util::stream::SplitStream<WsStream>>,
}

#[async_trait]
impl MessageSocket for WsSocket {
    async fn send(&self, text: String) -> Result<()> {
        self.write
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&self) -> SocketEvent {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Text(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    return SocketEvent::Closed(frame.map(|f| f.code.into()));
                }
                // Transport-level pings are answered by tungstenite itself;
                // binary frames are not part of the protocol.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return SocketEvent::Failed(e.to_string()),
                None => return SocketEvent::Closed(None),
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        let _ = self.write.lock().await.send(Message::Close(Some(frame))).await;
    }
}
