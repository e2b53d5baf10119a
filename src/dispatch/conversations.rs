//! The conversation operation set and its socket-backed implementation.
//!
//! Every operation follows the same shape: validate identifiers, encode,
//! send one frame, then produce a typed result. Only `reply_to_activity` has
//! a channel-side contract over the socket; the rest report `NotSupported`.
//!
//! # Inbound pump
//!
//! Once connected, one task reads every inbound frame:
//!
//! ```text
//! receive_frame ─► decode ─┬─► PendingAcks::complete ─► reply waiter
//!                          └─► inbound queue ─► next_activity()
//! ```
//!
//! Frames that fail to decode are logged and surfaced on the inbound queue;
//! they never stop the pump.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::correlation::PendingAcks;
use super::operation::{OperationResponse, OperationResult, RequestEcho};
use crate::codec::ActivityCodec;
use crate::error::{ConnectorError, Result};
use crate::schema::{
    Activity, AttachmentData, ChannelAccount, ConversationAccount, ConversationParameters,
    ConversationReference, ConversationResourceResponse, ConversationsResult, ResourceResponse,
};
use crate::transport::{Connection, Link};

/// Default number of unsolicited inbound activities buffered for the caller.
pub const DEFAULT_INBOUND_QUEUE: usize = 256;

/// How a reply decides it has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Success once the frame is flushed to the socket.
    ///
    /// The frame carries the activity exactly as given. The conversation and
    /// the activity being answered travel only in the request path.
    #[default]
    FireAndForget,
    /// Success once the channel echoes an activity replying to ours.
    ///
    /// The channel can only echo what it received, so `conversation.id` and
    /// `replyToId` are filled in from the call when the activity lacks them.
    /// The acknowledgement is matched against the values actually encoded.
    AwaitAcknowledgement {
        /// Upper bound on the wait.
        timeout: Duration,
    },
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub ack_mode: AckMode,
    /// Capacity of the unsolicited inbound queue. Overflow is dropped.
    pub inbound_queue: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::FireAndForget,
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

/// Logical conversation operations.
#[async_trait]
pub trait Conversations: Send + Sync {
    async fn create_conversation(
        &self,
        parameters: ConversationParameters,
    ) -> OperationResult<ConversationResourceResponse>;

    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse>;

    /// Post `activity` as a reply to `activity_id` in `conversation_id`.
    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse>;

    async fn update_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse>;

    async fn delete_activity(&self, conversation_id: &str, activity_id: &str)
        -> OperationResult<()>;

    async fn get_conversations(
        &self,
        continuation_token: Option<&str>,
    ) -> OperationResult<ConversationsResult>;

    async fn get_conversation_members(
        &self,
        conversation_id: &str,
    ) -> OperationResult<Vec<ChannelAccount>>;

    async fn get_activity_members(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> OperationResult<Vec<ChannelAccount>>;

    async fn delete_conversation_member(
        &self,
        conversation_id: &str,
        member_id: &str,
    ) -> OperationResult<()>;

    async fn upload_attachment(
        &self,
        conversation_id: &str,
        attachment: AttachmentData,
    ) -> OperationResult<ResourceResponse>;
}

/// [`Conversations`] over one WebSocket connection.
pub struct SocketConversations {
    link: Link,
    codec: ActivityCodec,
    config: DispatchConfig,
    pending: Arc<PendingAcks>,
    // Moved into the pump when it starts, so the queue ends with the pump.
    inbound_tx: std::sync::Mutex<Option<mpsc::Sender<Result<Activity>>>>,
    inbound_rx: Mutex<mpsc::Receiver<Result<Activity>>>,
    pump: OnceLock<JoinHandle<()>>,
}

impl SocketConversations {
    pub fn new(link: Link, codec: ActivityCodec, config: DispatchConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue.max(1));
        Self {
            link,
            codec,
            config,
            pending: PendingAcks::new(),
            inbound_tx: std::sync::Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(inbound_rx),
            pump: OnceLock::new(),
        }
    }

    #[inline]
    pub fn link(&self) -> &Link {
        &self.link
    }

    #[inline]
    pub fn codec(&self) -> &ActivityCodec {
        &self.codec
    }

    #[inline]
    pub fn ack_mode(&self) -> AckMode {
        self.config.ack_mode
    }

    /// Establish the connection now instead of on first use.
    pub async fn connect(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    /// Close the connection. Later operations fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.link.close().await;
        self.pending.fail_all();
    }

    /// Next inbound activity that did not answer one of our replies.
    ///
    /// Connects if needed. Returns `None` once the connection is gone and the
    /// queue is drained.
    pub async fn next_activity(&self) -> Option<Result<Activity>> {
        if self.pump.get().is_none() {
            if self.link.is_closed() {
                return None;
            }
            if let Err(e) = self.connection().await {
                return Some(Err(e));
            }
        }
        self.inbound_rx.lock().await.recv().await
    }

    async fn connection(&self) -> Result<&Arc<Connection>> {
        let conn = self.link.connection().await?;
        self.pump.get_or_init(|| {
            let inbound = self.inbound_tx.lock().ok().and_then(|mut tx| tx.take());
            tokio::spawn(pump(
                Arc::clone(conn),
                self.codec.clone(),
                Arc::clone(&self.pending),
                inbound,
            ))
        });
        Ok(conn)
    }
}

impl Drop for SocketConversations {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for SocketConversations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConversations")
            .field("link", &self.link)
            .field("ack_mode", &self.config.ack_mode)
            .field("pending_acks", &self.pending.len())
            .finish()
    }
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(ConnectorError::Validation { field })
    } else {
        Ok(())
    }
}

/// Fill in `conversation.id` and `replyToId` when absent or empty, and return
/// the key an acknowledgement echoing the encoded frame will carry.
fn stamp_reply_context(
    activity: &mut Activity,
    conversation_id: &str,
    activity_id: &str,
) -> ConversationReference {
    match activity.conversation.as_mut() {
        Some(conversation) if conversation.id.is_empty() => {
            conversation.id = conversation_id.to_string();
        }
        Some(_) => {}
        None => activity.conversation = Some(ConversationAccount::new(conversation_id)),
    }
    if activity.reply_to_id.as_deref().map_or(true, str::is_empty) {
        activity.reply_to_id = Some(activity_id.to_string());
    }

    ConversationReference::with_activity(
        activity.conversation_id().unwrap_or(conversation_id),
        activity.reply_to_id.as_deref().unwrap_or(activity_id),
    )
}

fn not_supported<T>(operation: &'static str) -> OperationResult<T> {
    tracing::debug!(operation, "operation not supported over socket");
    Err(ConnectorError::NotSupported { operation })
}

#[async_trait]
impl Conversations for SocketConversations {
    async fn create_conversation(
        &self,
        _parameters: ConversationParameters,
    ) -> OperationResult<ConversationResourceResponse> {
        not_supported("create_conversation")
    }

    async fn send_to_conversation(
        &self,
        _conversation_id: &str,
        _activity: Activity,
    ) -> OperationResult<ResourceResponse> {
        not_supported("send_to_conversation")
    }

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse> {
        require("conversation_id", conversation_id)?;
        require("activity_id", activity_id)?;
        if activity.kind.is_empty() {
            return Err(ConnectorError::Validation { field: "activity" });
        }
        let path = format!("v3/conversations/{}/activities/{}", conversation_id, activity_id);

        match self.config.ack_mode {
            AckMode::FireAndForget => {
                let body = self.codec.encode(&activity)?;
                let request = RequestEcho::post(path, body.clone());
                let conn = self.connection().await?;

                conn.send_frame(body).await?;
                tracing::debug!(conversation_id, activity_id, "reply sent");
                Ok(OperationResponse::ok(request, ResourceResponse::new(activity.id)))
            }
            AckMode::AwaitAcknowledgement { timeout } => {
                let mut activity = activity;
                let key = stamp_reply_context(&mut activity, conversation_id, activity_id);
                let body = self.codec.encode(&activity)?;
                let request = RequestEcho::post(path, body.clone());
                let conn = self.connection().await?;

                let waiter = self.pending.register(key);
                conn.send_frame(body).await?;
                tracing::debug!(conversation_id, activity_id, "reply sent, awaiting ack");

                let ack = waiter.wait(timeout).await.map_err(|e| {
                    tracing::warn!(conversation_id, activity_id, error = %e, "no reply ack");
                    e
                })?;
                Ok(OperationResponse::ok(request, ResourceResponse::new(ack.id)))
            }
        }
    }

    async fn update_activity(
        &self,
        _conversation_id: &str,
        _activity_id: &str,
        _activity: Activity,
    ) -> OperationResult<ResourceResponse> {
        not_supported("update_activity")
    }

    async fn delete_activity(
        &self,
        _conversation_id: &str,
        _activity_id: &str,
    ) -> OperationResult<()> {
        not_supported("delete_activity")
    }

    async fn get_conversations(
        &self,
        _continuation_token: Option<&str>,
    ) -> OperationResult<ConversationsResult> {
        not_supported("get_conversations")
    }

    async fn get_conversation_members(
        &self,
        _conversation_id: &str,
    ) -> OperationResult<Vec<ChannelAccount>> {
        not_supported("get_conversation_members")
    }

    async fn get_activity_members(
        &self,
        _conversation_id: &str,
        _activity_id: &str,
    ) -> OperationResult<Vec<ChannelAccount>> {
        not_supported("get_activity_members")
    }

    async fn delete_conversation_member(
        &self,
        _conversation_id: &str,
        _member_id: &str,
    ) -> OperationResult<()> {
        not_supported("delete_conversation_member")
    }

    async fn upload_attachment(
        &self,
        _conversation_id: &str,
        _attachment: AttachmentData,
    ) -> OperationResult<ResourceResponse> {
        not_supported("upload_attachment")
    }
}

async fn pump(
    conn: Arc<Connection>,
    codec: ActivityCodec,
    pending: Arc<PendingAcks>,
    inbound: Option<mpsc::Sender<Result<Activity>>>,
) {
    loop {
        let frame = match conn.receive_frame().await {
            Ok(frame) => frame,
            Err(ConnectorError::ConnectionClosed) => break,
            Err(e) => {
                forward(&inbound, Err(e));
                continue;
            }
        };

        match codec.decode(&frame) {
            Ok(activity) => {
                if let Some(unsolicited) = pending.complete(activity) {
                    forward(&inbound, Ok(unsolicited));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = frame.len(), "undecodable inbound frame");
                forward(&inbound, Err(e.into()));
            }
        }
    }

    pending.fail_all();
    tracing::debug!("inbound pump stopped");
}

fn forward(inbound: &Option<mpsc::Sender<Result<Activity>>>, item: Result<Activity>) {
    let Some(tx) = inbound else {
        return;
    };
    match tx.try_send(item) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!("inbound queue full, dropping activity");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::dispatch::StatusCode;
    use crate::transport::socket::{socket_pair, OneShotDialer};
    use crate::transport::TransportConfig;
    use futures::{SinkExt, StreamExt};
    use proptest::prelude::*;
    use serde_json::Value;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::http::Uri;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    type Peer = WebSocketStream<DuplexStream>;

    async fn setup(config: DispatchConfig) -> (SocketConversations, Peer) {
        let (client, server) = socket_pair().await;
        let link = Link::new(
            Uri::from_static("ws://channel.test/v3"),
            Arc::new(StaticCredentials::new("token")),
            Arc::new(OneShotDialer::new(client)),
            TransportConfig::default(),
        );
        (
            SocketConversations::new(link, ActivityCodec::default(), config),
            server,
        )
    }

    async fn next_json(peer: &mut Peer) -> Value {
        match peer.next().await.unwrap().unwrap() {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    fn inbound(id: &str, conversation: &str, reply_to: Option<&str>) -> Message {
        let mut activity = Activity::message("from channel");
        activity.id = Some(id.to_string());
        activity.conversation = Some(ConversationAccount::new(conversation));
        activity.reply_to_id = reply_to.map(str::to_string);
        let bytes = ActivityCodec::default().encode(&activity).unwrap();
        Message::Text(String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn awaiting(timeout: Duration) -> DispatchConfig {
        DispatchConfig {
            ack_mode: AckMode::AwaitAcknowledgement { timeout },
            ..DispatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reply_sends_activity_as_given() {
        let (ops, mut peer) = setup(DispatchConfig::default()).await;
        let original = Activity::message("hello");

        let response = ops
            .reply_to_activity("conv1", "act1", original.clone())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.request.path, "v3/conversations/conv1/activities/act1");
        assert!(response.body.id.is_none());

        let frame = next_json(&mut peer).await;
        assert_eq!(frame["text"], "hello");
        assert!(frame.get("conversation").is_none());
        assert!(frame.get("replyToId").is_none());

        let echoed: Activity = ops.codec().decode_value(&response.request.body).unwrap();
        assert_eq!(echoed, original);
    }

    #[tokio::test]
    async fn test_reply_echo_decodes_to_original() {
        let (ops, mut peer) = setup(DispatchConfig::default()).await;
        let mut original = Activity::message("hello");
        original.id = Some("x1".to_string());
        original.conversation = Some(ConversationAccount::new("elsewhere"));

        let response = ops
            .reply_to_activity("conv1", "act1", original.clone())
            .await
            .unwrap();
        assert_eq!(response.body.id.as_deref(), Some("x1"));

        let echoed = ops.codec().decode(&response.request.body).unwrap();
        assert_eq!(echoed, original);
        assert!(echoed.reply_to_id.is_none());

        let frame = next_json(&mut peer).await;
        assert_eq!(
            serde_json::from_slice::<Value>(&response.request.body).unwrap(),
            frame
        );
    }

    #[test]
    fn test_stamp_fills_only_missing_fields() {
        let mut bare = Activity::message("x");
        let key = stamp_reply_context(&mut bare, "conv1", "act1");
        assert_eq!(key, ConversationReference::with_activity("conv1", "act1"));
        assert_eq!(bare.conversation_id(), Some("conv1"));
        assert_eq!(bare.reply_to_id.as_deref(), Some("act1"));

        let mut threaded = Activity::message("x");
        threaded.conversation = Some(ConversationAccount::new(""));
        threaded.reply_to_id = Some("thread-root".to_string());
        let key = stamp_reply_context(&mut threaded, "conv1", "act1");
        assert_eq!(key, ConversationReference::with_activity("conv1", "thread-root"));
        assert_eq!(threaded.conversation_id(), Some("conv1"));
    }

    #[tokio::test]
    async fn test_validation_fails_before_connecting() {
        let (ops, _peer) = setup(DispatchConfig::default()).await;

        let cases = [
            ("", "a", Activity::message("x"), "conversation_id"),
            ("c", "", Activity::message("x"), "activity_id"),
            ("c", "a", Activity::default(), "activity"),
        ];
        for (conversation, activity_id, activity, expected) in cases {
            let result = ops.reply_to_activity(conversation, activity_id, activity).await;
            assert!(
                matches!(result, Err(ConnectorError::Validation { field }) if field == expected)
            );
        }
        assert!(ops.link().current().is_none());
    }

    fn maybe_empty_id() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[a-z0-9-]{1,16}"]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_empty_parameter_is_named_and_never_dials(
            conversation_id in maybe_empty_id(),
            activity_id in maybe_empty_id(),
            kind in prop_oneof![Just(String::new()), Just("message".to_string())],
        ) {
            prop_assume!(conversation_id.is_empty() || activity_id.is_empty() || kind.is_empty());
            let expected = if conversation_id.is_empty() {
                "conversation_id"
            } else if activity_id.is_empty() {
                "activity_id"
            } else {
                "activity"
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (result, dialed) = runtime.block_on(async {
                let (ops, _peer) = setup(DispatchConfig::default()).await;
                let result = ops
                    .reply_to_activity(&conversation_id, &activity_id, Activity::new(kind.clone()))
                    .await;
                (result, ops.link().current().is_some())
            });

            prop_assert!(
                matches!(result, Err(ConnectorError::Validation { field }) if field == expected),
                "expected Validation error for field {:?}, got {:?}",
                expected,
                result
            );
            prop_assert!(!dialed);
        }
    }

    #[tokio::test]
    async fn test_unimplemented_operations_report_not_supported() {
        let (ops, _peer) = setup(DispatchConfig::default()).await;
        let is_unsupported = |e: ConnectorError, name: &str| {
            matches!(e, ConnectorError::NotSupported { operation } if operation == name)
        };

        let e = ops
            .create_conversation(ConversationParameters::default())
            .await
            .unwrap_err();
        assert!(is_unsupported(e, "create_conversation"));
        let e = ops
            .send_to_conversation("c", Activity::message("x"))
            .await
            .unwrap_err();
        assert!(is_unsupported(e, "send_to_conversation"));
        let e = ops
            .update_activity("c", "a", Activity::message("x"))
            .await
            .unwrap_err();
        assert!(is_unsupported(e, "update_activity"));
        let e = ops.delete_activity("c", "a").await.unwrap_err();
        assert!(is_unsupported(e, "delete_activity"));
        let e = ops.get_conversations(None).await.unwrap_err();
        assert!(is_unsupported(e, "get_conversations"));
        let e = ops.get_conversation_members("c").await.unwrap_err();
        assert!(is_unsupported(e, "get_conversation_members"));
        let e = ops.get_activity_members("c", "a").await.unwrap_err();
        assert!(is_unsupported(e, "get_activity_members"));
        let e = ops.delete_conversation_member("c", "m").await.unwrap_err();
        assert!(is_unsupported(e, "delete_conversation_member"));
        let e = ops
            .upload_attachment("c", AttachmentData::default())
            .await
            .unwrap_err();
        assert!(is_unsupported(e, "upload_attachment"));

        assert!(ops.link().current().is_none());
    }

    #[tokio::test]
    async fn test_await_ack_uses_channel_id() {
        let (ops, mut peer) = setup(awaiting(Duration::from_secs(5))).await;

        let channel = tokio::spawn(async move {
            let frame = next_json(&mut peer).await;
            assert_eq!(frame["conversation"]["id"], "conv1");
            assert_eq!(frame["replyToId"], "act1");
            peer.send(inbound("unrelated", "conv9", None)).await.unwrap();
            peer.send(inbound("srv-42", "conv1", Some("act1"))).await.unwrap();
            peer
        });

        let response = ops
            .reply_to_activity("conv1", "act1", Activity::message("hello"))
            .await
            .unwrap();
        assert_eq!(response.body.id.as_deref(), Some("srv-42"));

        let unsolicited = ops.next_activity().await.unwrap().unwrap();
        assert_eq!(unsolicited.id.as_deref(), Some("unrelated"));

        let _peer = channel.await.unwrap();
    }

    #[tokio::test]
    async fn test_await_ack_matches_encoded_reply_to() {
        let (ops, mut peer) = setup(awaiting(Duration::from_secs(5))).await;

        let channel = tokio::spawn(async move {
            let frame = next_json(&mut peer).await;
            let conversation = frame["conversation"]["id"].as_str().unwrap().to_string();
            let reply_to = frame["replyToId"].as_str().unwrap().to_string();
            assert_eq!(reply_to, "thread-root");
            peer.send(inbound("srv-1", &conversation, Some(reply_to.as_str())))
                .await
                .unwrap();
            peer
        });

        let mut activity = Activity::message("hello");
        activity.reply_to_id = Some("thread-root".to_string());
        let response = ops.reply_to_activity("conv1", "act1", activity).await.unwrap();
        assert_eq!(response.body.id.as_deref(), Some("srv-1"));
        assert!(ops.pending.is_empty());

        let _peer = channel.await.unwrap();
    }

    #[tokio::test]
    async fn test_await_ack_timeout_keeps_connection() {
        let (ops, mut peer) = setup(awaiting(Duration::from_millis(50))).await;

        let result = ops
            .reply_to_activity("c", "a", Activity::message("hello"))
            .await;
        assert!(matches!(result, Err(ConnectorError::Timeout(_))));

        let conn = ops.link().current().unwrap();
        assert!(conn.state() == crate::transport::ConnectionState::Open);
        let _ = next_json(&mut peer).await;
    }

    #[tokio::test]
    async fn test_bad_inbound_frame_surfaces_and_pump_continues() {
        let (ops, mut peer) = setup(DispatchConfig::default()).await;
        ops.connect().await.unwrap();

        peer.send(Message::Text("{not json".to_string())).await.unwrap();
        peer.send(Message::Text(r#"{"type":"message"}"#.to_string()))
            .await
            .unwrap();
        peer.send(inbound("ok", "c", None)).await.unwrap();

        assert!(matches!(
            ops.next_activity().await,
            Some(Err(ConnectorError::Decode(_)))
        ));
        assert!(matches!(
            ops.next_activity().await,
            Some(Err(ConnectorError::Decode(_)))
        ));
        let good = ops.next_activity().await.unwrap().unwrap();
        assert_eq!(good.id.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_inbound_ends_after_peer_close() {
        let (ops, mut peer) = setup(DispatchConfig::default()).await;
        ops.connect().await.unwrap();

        peer.send(inbound("last", "c", None)).await.unwrap();
        peer.close(None).await.unwrap();

        let last = ops.next_activity().await.unwrap().unwrap();
        assert_eq!(last.id.as_deref(), Some("last"));
        assert!(ops.next_activity().await.is_none());
    }

    #[tokio::test]
    async fn test_close_then_reply_is_connection_closed() {
        let (ops, _peer) = setup(DispatchConfig::default()).await;
        ops.connect().await.unwrap();

        ops.close().await;
        ops.close().await;

        let result = ops
            .reply_to_activity("c", "a", Activity::message("late"))
            .await;
        assert!(matches!(result, Err(ConnectorError::ConnectionClosed)));
    }
}
