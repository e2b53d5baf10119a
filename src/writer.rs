//! Dedicated writer task for outbound frames.
//!
//! One task owns the sink half of the socket. Callers hand it frames over an
//! mpsc channel, so frames from concurrent operations are written whole and
//! in acceptance order; there is no lock around the sink.
//!
//! # Architecture
//!
//! ```text
//! reply_to_activity ─┐
//! reply_to_activity ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► WebSocket
//! close()           ─┘
//! ```
//!
//! Ready frames are fed as a batch and flushed once. Each frame reports its
//! own completion back to the caller after the flush. A frame whose caller
//! has gone away before the writer reached it is skipped. `Close` is a
//! command in the same queue, so it is ordered after every frame already
//! accepted and can never cut one in half.

use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::backpressure::{BackpressureController, BackpressureGuard};
use crate::error::{ConnectorError, Result};
use crate::transport::SharedState;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on one socket write, flush or close.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum frames to batch before one flush.
const MAX_BATCH_SIZE: usize = 64;

/// A text frame waiting for the writer task.
#[derive(Debug)]
pub struct OutboundFrame {
    text: String,
    done: oneshot::Sender<Result<()>>,
    _slot: BackpressureGuard,
}

impl OutboundFrame {
    /// Size of the frame payload in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// The caller stopped waiting, so nothing depends on this frame any more.
    #[inline]
    fn is_abandoned(&self) -> bool {
        self.done.is_closed()
    }
}

/// Messages understood by the writer task.
#[derive(Debug)]
pub enum WriterCommand {
    Frame(OutboundFrame),
    /// Send a WebSocket close and stop. Acknowledged once the sink is closed.
    Close(oneshot::Sender<()>),
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
    /// Bound on each socket write, flush and close. A write that exceeds it
    /// fails the frame and stops the writer.
    pub write_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable. When the last handle is dropped the writer closes the
/// socket and exits.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
    backpressure: BackpressureController,
}

impl WriterHandle {
    /// Write one text frame and wait until it has been flushed.
    ///
    /// # Errors
    ///
    /// - `Send` if the payload is not UTF-8 or the socket write failed
    /// - `BackpressureTimeout` if the queue stayed full
    /// - `ConnectionClosed` if the writer has stopped
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|_| ConnectorError::Send("frame payload is not valid UTF-8".to_string()))?;

        let slot = self.backpressure.reserve().await?;
        let (done, completed) = oneshot::channel();

        let frame = OutboundFrame {
            text,
            done,
            _slot: slot,
        };
        self.tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| ConnectorError::ConnectionClosed)?;

        // A dropped sender means the writer stopped before reaching this frame.
        completed
            .await
            .unwrap_or(Err(ConnectorError::ConnectionClosed))
    }

    /// Ask the writer to close the socket after everything already queued.
    ///
    /// Returns once the close has been sent, or at once if the writer is
    /// already gone.
    pub async fn close(&self) {
        let (ack, closed) = oneshot::channel();
        if self.tx.send(WriterCommand::Close(ack)).await.is_ok() {
            let _ = closed.await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.is_active()
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending_count()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// A write failure marks `state` closed; the task then returns the error.
/// Zero capacities and limits are raised to one.
pub fn spawn_writer_task<S>(
    sink: S,
    config: WriterConfig,
    state: SharedState,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let backpressure =
        BackpressureController::new(config.max_pending_frames.max(1), config.backpressure_timeout);

    let handle = WriterHandle { tx, backpressure };
    let task = tokio::spawn(writer_loop(rx, sink, state, config.write_timeout));

    (handle, task)
}

async fn writer_loop<S>(
    mut rx: mpsc::Receiver<WriterCommand>,
    mut sink: S,
    state: SharedState,
    write_timeout: Duration,
) -> Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(cmd) => cmd,
            None => {
                // Every handle dropped: the owner went away without close().
                tracing::debug!("writer channel closed, closing socket");
                let _ = bounded(write_timeout, sink.close()).await;
                state.mark_closed();
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(cmd) => batch.push(cmd),
                Err(_) => break,
            }
        }

        let mut written = Vec::with_capacity(batch.len());
        let mut close_ack = None;

        for cmd in batch {
            match cmd {
                WriterCommand::Frame(frame) => {
                    if frame.is_abandoned() {
                        tracing::trace!(bytes = frame.size(), "skipping abandoned frame");
                        continue;
                    }
                    let OutboundFrame { text, done, _slot: slot } = frame;
                    if let Err(reason) = bounded(write_timeout, sink.feed(Message::Text(text))).await
                    {
                        let _ = done.send(Err(ConnectorError::Send(reason.clone())));
                        return fail(written, reason, &state);
                    }
                    written.push((done, slot));
                }
                WriterCommand::Close(ack) => {
                    // Frames queued behind the close are dropped with the channel.
                    close_ack = Some(ack);
                    break;
                }
            }
        }

        if !written.is_empty() {
            if let Err(reason) = bounded(write_timeout, sink.flush()).await {
                return fail(written, reason, &state);
            }
            tracing::trace!(frames = written.len(), "flushed frame batch");
            for (done, _slot) in written {
                let _ = done.send(Ok(()));
            }
        }

        if let Some(ack) = close_ack {
            if let Err(reason) = bounded(write_timeout, sink.close()).await {
                tracing::debug!(error = %reason, "socket close handshake failed");
            }
            state.mark_closed();
            let _ = ack.send(());
            return Ok(());
        }
    }
}

/// Run one sink operation under the write timeout.
async fn bounded<F>(limit: Duration, op: F) -> std::result::Result<(), String>
where
    F: std::future::Future<Output = std::result::Result<(), tokio_tungstenite::tungstenite::Error>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("socket write timed out after {:?}", limit)),
    }
}

type Pending = Vec<(oneshot::Sender<Result<()>>, BackpressureGuard)>;

fn fail(written: Pending, reason: String, state: &SharedState) -> Result<()> {
    tracing::error!(error = %reason, "frame write failed, stopping writer");
    state.mark_closed();
    for (done, _slot) in written {
        let _ = done.send(Err(ConnectorError::Send(reason.clone())));
    }
    Err(ConnectorError::Send(reason))
}
