//! One live socket with its reader and writer tasks.
//!
//! ```text
//!              ┌──────────── Connection ────────────┐
//! send_frame ──► WriterHandle ─► writer task ─► sink │
//!              │                                     │ WebSocket
//! receive_frame ◄─ inbound mpsc ◄─ reader task ◄─ stream
//!              └─────────────────────────────────────┘
//! ```
//!
//! The reader forwards text frames as they arrive. A binary frame is reported
//! as a receive error but the connection stays up. Peer close or a read
//! failure moves the state to `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::socket::{BoxedSocket, ConnectRequest, Dialer};
use super::state::{ConnectionState, SharedState};
use crate::error::{ConnectorError, Result};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default number of inbound frames buffered ahead of the consumer.
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// Default bound on dialing plus the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time `close` waits for queued frames and the close message.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Outbound queue and backpressure settings.
    pub writer: WriterConfig,
    /// Inbound frames buffered before the reader waits for the consumer.
    pub inbound_capacity: usize,
    /// Timeout for dial and handshake.
    pub connect_timeout: Duration,
    /// How long `close` lets the writer drain before abandoning the socket.
    pub close_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// A live duplex connection.
///
/// Sends may run concurrently from any number of tasks. Receives are
/// serialized: one frame goes to exactly one caller.
pub struct Connection {
    state: SharedState,
    writer: WriterHandle,
    inbound: Mutex<mpsc::Receiver<Result<Bytes>>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
    close_timeout: Duration,
    closed_by_us: AtomicBool,
    close_once: OnceCell<()>,
}

impl Connection {
    /// Dial `request` and start the connection tasks.
    ///
    /// # Errors
    ///
    /// `Connect` when the dial fails or exceeds `config.connect_timeout`;
    /// whatever the dialer reports otherwise.
    pub async fn connect(
        dialer: &dyn Dialer,
        request: ConnectRequest,
        config: TransportConfig,
    ) -> Result<Self> {
        let state = SharedState::new();
        enter(&state, ConnectionState::Unconnected, ConnectionState::Connecting)?;

        let endpoint = request.endpoint().clone();
        tracing::debug!(%endpoint, "connecting");

        let socket = match tokio::time::timeout(config.connect_timeout, dialer.dial(request)).await
        {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                let _ = state.transition(ConnectionState::Connecting, ConnectionState::Closed);
                tracing::warn!(%endpoint, error = %e, "connect failed");
                return Err(e);
            }
            Err(_) => {
                let _ = state.transition(ConnectionState::Connecting, ConnectionState::Closed);
                tracing::warn!(%endpoint, "connect timed out");
                return Err(ConnectorError::Connect(format!(
                    "timed out after {:?}",
                    config.connect_timeout
                )));
            }
        };

        Self::open(socket, config, state)
    }

    /// Wrap an already established socket.
    pub fn from_socket(socket: BoxedSocket, config: TransportConfig) -> Result<Self> {
        let state = SharedState::new();
        enter(&state, ConnectionState::Unconnected, ConnectionState::Connecting)?;
        Self::open(socket, config, state)
    }

    fn open(socket: BoxedSocket, config: TransportConfig, state: SharedState) -> Result<Self> {
        let (sink, stream) = socket.split();
        let (writer, writer_task) = spawn_writer_task(sink, config.writer, state.clone());

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let reader_task = tokio::spawn(reader_loop(stream, inbound_tx, state.clone()));

        enter(&state, ConnectionState::Connecting, ConnectionState::Open)?;
        tracing::debug!("connection open");

        Ok(Self {
            state,
            writer,
            inbound: Mutex::new(inbound_rx),
            reader_task,
            writer_task,
            close_timeout: config.close_timeout,
            closed_by_us: AtomicBool::new(false),
            close_once: OnceCell::new(),
        })
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Frames accepted but not yet written.
    #[inline]
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// True while senders are waiting for queue space.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }

    /// Send one text frame and wait until it is flushed.
    pub async fn send_frame(&self, payload: Bytes) -> Result<()> {
        if !self.state.is_open() {
            return Err(ConnectorError::ConnectionClosed);
        }
        self.writer.send(payload).await
    }

    /// Wait for the next inbound text frame.
    ///
    /// Returns `ConnectionClosed` once the connection is closed and no frame
    /// is left, or immediately after a local [`close`](Self::close).
    pub async fn receive_frame(&self) -> Result<Bytes> {
        if self.closed_by_us.load(Ordering::Acquire) {
            return Err(ConnectorError::ConnectionClosed);
        }
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .unwrap_or(Err(ConnectorError::ConnectionClosed))
    }

    /// Close the connection. Safe to call any number of times.
    ///
    /// Frames already accepted are written before the close message. If the
    /// writer cannot finish within the close timeout it is aborted, and the
    /// frames it still held fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.close_once
            .get_or_init(|| async {
                self.closed_by_us.store(true, Ordering::Release);
                let _ = self
                    .state
                    .transition(ConnectionState::Open, ConnectionState::Closing);
                if tokio::time::timeout(self.close_timeout, self.writer.close())
                    .await
                    .is_err()
                {
                    tracing::warn!(timeout = ?self.close_timeout, "writer did not drain, aborting");
                    self.writer_task.abort();
                }
                self.reader_task.abort();
                self.state.mark_closed();
                tracing::debug!("connection closed");
            })
            .await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The writer stops on its own once the last handle is gone.
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state.get())
            .field("pending_frames", &self.writer.pending_count())
            .finish()
    }
}

fn enter(state: &SharedState, from: ConnectionState, to: ConnectionState) -> Result<()> {
    state
        .transition(from, to)
        .map_err(|actual| ConnectorError::Connect(format!("connection is {}", actual)))
}

async fn reader_loop(
    mut stream: SplitStream<BoxedSocket>,
    inbound: mpsc::Sender<Result<Bytes>>,
    state: SharedState,
) {
    while let Some(item) = stream.next().await {
        let forwarded = match item {
            Ok(Message::Text(text)) => {
                tracing::trace!(bytes = text.len(), "received text frame");
                Ok(Bytes::from(text))
            }
            Ok(Message::Binary(data)) => {
                tracing::warn!(bytes = data.len(), "ignoring binary frame");
                Err(ConnectorError::Receive(format!(
                    "unexpected binary frame ({} bytes)",
                    data.len()
                )))
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "peer closed connection");
                break;
            }
            // Ping/pong are answered by tungstenite itself.
            Ok(_) => continue,
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "read failed");
                let _ = inbound.send(Err(ConnectorError::Receive(e.to_string()))).await;
                break;
            }
        };

        if inbound.send(forwarded).await.is_err() {
            break;
        }
    }

    state.mark_closed();
}
