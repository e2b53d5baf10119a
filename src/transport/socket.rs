//! Socket abstraction and the default WebSocket dialer.
//!
//! The rest of the crate only sees a [`BoxedSocket`]: anything that is both a
//! `Sink<Message>` and a `Stream<Item = Result<Message, _>>`. Production
//! sockets come from [`TungsteniteDialer`]; tests build them over
//! `tokio::io::duplex`.

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Uri};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{ConnectorError, Result};

/// A full-duplex WebSocket message stream.
pub trait FrameSocket:
    Sink<Message, Error = WsError> + Stream<Item = std::result::Result<Message, WsError>> + Send + Unpin
{
}

impl<T> FrameSocket for T where
    T: Sink<Message, Error = WsError>
        + Stream<Item = std::result::Result<Message, WsError>>
        + Send
        + Unpin
{
}

/// Type-erased socket owned by one connection.
pub type BoxedSocket = Box<dyn FrameSocket>;

/// Everything needed to open one socket.
#[derive(Clone)]
pub struct ConnectRequest {
    endpoint: Uri,
    bearer_token: String,
}

impl ConnectRequest {
    pub fn new(endpoint: Uri, bearer_token: impl Into<String>) -> Self {
        Self {
            endpoint,
            bearer_token: bearer_token.into(),
        }
    }

    #[inline]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    #[inline]
    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    /// `Authorization` header value carrying the token.
    pub fn authorization(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&format!("Bearer {}", self.bearer_token)).map_err(|_| {
            ConnectorError::Credentials("token is not a valid header value".to_string())
        })
    }
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("endpoint", &self.endpoint)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// Opens sockets. Swappable so the connection logic can run over any stream.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, request: ConnectRequest) -> Result<BoxedSocket>;
}

/// Dials `ws://` and `wss://` endpoints with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, request: ConnectRequest) -> Result<BoxedSocket> {
        let authorization = request.authorization()?;
        let mut handshake = request
            .endpoint()
            .clone()
            .into_client_request()
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;
        handshake.headers_mut().insert(AUTHORIZATION, authorization);

        let (stream, response) = tokio_tungstenite::connect_async(handshake)
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;

        tracing::debug!(
            endpoint = %request.endpoint(),
            status = %response.status(),
            "websocket handshake complete"
        );
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
pub(crate) async fn socket_pair() -> (
    BoxedSocket,
    tokio_tungstenite::WebSocketStream<tokio::io::DuplexStream>,
) {
    socket_pair_with_buffer(64 * 1024).await
}

/// Like [`socket_pair`], with `buffer` bytes of pipe capacity each way.
#[cfg(test)]
pub(crate) async fn socket_pair_with_buffer(
    buffer: usize,
) -> (
    BoxedSocket,
    tokio_tungstenite::WebSocketStream<tokio::io::DuplexStream>,
) {
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    let (client, server) = tokio::io::duplex(buffer);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (Box::new(client), server)
}

/// Dialer that hands out one pre-built socket.
#[cfg(test)]
pub(crate) struct OneShotDialer(std::sync::Mutex<Option<BoxedSocket>>);

#[cfg(test)]
impl OneShotDialer {
    pub(crate) fn new(socket: BoxedSocket) -> Self {
        Self(std::sync::Mutex::new(Some(socket)))
    }
}

#[cfg(test)]
#[async_trait]
impl Dialer for OneShotDialer {
    async fn dial(&self, _request: ConnectRequest) -> Result<BoxedSocket> {
        self.0
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConnectorError::Connect("already dialed".to_string()))
    }
}
