//! Client builder and facade.
//!
//! The [`ConnectorClientBuilder`] collects the endpoint, credentials and
//! tuning, and validates them once. The [`ConnectorClient`] it produces:
//! 1. Dials the channel on first use (or on [`ConnectorClient::connect`])
//! 2. Starts the inbound pump
//! 3. Runs the [`Conversations`] operations over the one socket
//! 4. Closes the socket exactly once, on [`ConnectorClient::close`] or drop
//!
//! # Example
//!
//! ```no_run
//! use activitywire::{Activity, ConnectorClient, Conversations};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ConnectorClient::builder()
//!         .endpoint("wss://channel.example/v3/socket")
//!         .bearer_token("token")
//!         .build()?;
//!
//!     let response = client
//!         .reply_to_activity("conv1", "act1", Activity::message("hello"))
//!         .await?;
//!     println!("status {}", response.status);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::http::Uri;

use crate::codec::{ActivityCodec, SerializationProfile};
use crate::credentials::{CredentialsProvider, StaticCredentials};
use crate::dispatch::{
    AckMode, Conversations, DispatchConfig, OperationResult, SocketConversations,
};
use crate::error::{ConnectorError, Result};
use crate::schema::{
    Activity, AttachmentData, ChannelAccount, ConversationParameters,
    ConversationResourceResponse, ConversationsResult, ResourceResponse,
};
use crate::transport::{ConnectionState, Dialer, Link, TransportConfig, TungsteniteDialer};

/// Builder for a [`ConnectorClient`].
pub struct ConnectorClientBuilder {
    endpoint: Option<String>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    profile: SerializationProfile,
    transport: TransportConfig,
    dispatch: DispatchConfig,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ConnectorClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            credentials: None,
            profile: SerializationProfile::default(),
            transport: TransportConfig::default(),
            dispatch: DispatchConfig::default(),
            dialer: None,
        }
    }

    /// WebSocket endpoint of the channel. Must be `ws://` or `wss://`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Credential source consulted before dialing.
    pub fn credentials(mut self, provider: impl CredentialsProvider + 'static) -> Self {
        self.credentials = Some(Arc::new(provider));
        self
    }

    /// Shorthand for [`credentials`](Self::credentials) with a fixed token.
    ///
    /// A blank token counts as no credentials.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        let creds = StaticCredentials::new(token);
        self.credentials = if creds.is_blank() {
            None
        } else {
            Some(Arc::new(creds) as Arc<dyn CredentialsProvider>)
        };
        self
    }

    /// Encoding rules for every frame this client writes.
    ///
    /// Default: compact, nulls omitted
    pub fn serialization_profile(mut self, profile: SerializationProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the maximum pending frames for backpressure. Zero is raised to one.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.transport.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity. Zero is raised to one.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.transport.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.transport.writer.backpressure_timeout = timeout;
        self
    }

    /// Inbound frames buffered ahead of the pump. Zero is raised to one.
    ///
    /// Default: 256
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.transport.inbound_capacity = capacity;
        self
    }

    /// Unsolicited activities buffered for [`ConnectorClient::next_activity`].
    /// Overflow is dropped with a warning.
    ///
    /// Default: 256
    pub fn inbound_queue(mut self, capacity: usize) -> Self {
        self.dispatch.inbound_queue = capacity;
        self
    }

    /// Bound on dial plus handshake.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport.connect_timeout = timeout;
        self
    }

    /// Bound on each socket write. A frame that cannot be written in time
    /// fails with `Send` and the connection is closed.
    ///
    /// Default: 10 seconds
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.transport.writer.write_timeout = timeout;
        self
    }

    /// How long [`ConnectorClient::close`] waits for queued frames before
    /// abandoning them.
    ///
    /// Default: 5 seconds
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.transport.close_timeout = timeout;
        self
    }

    /// Make replies wait for the channel's acknowledging activity.
    ///
    /// Without this, a reply succeeds once its frame is flushed.
    pub fn await_acknowledgements(mut self, timeout: Duration) -> Self {
        self.dispatch.ack_mode = AckMode::AwaitAcknowledgement { timeout };
        self
    }

    /// Replace the socket dialer.
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Validate the configuration and create the client. Does not connect.
    ///
    /// # Errors
    ///
    /// - `Argument("endpoint")` if the endpoint is missing, empty, unparsable
    ///   or not `ws`/`wss`
    /// - `Argument("credentials")` if no credentials were given
    pub fn build(self) -> Result<ConnectorClient> {
        let endpoint = parse_endpoint(self.endpoint.as_deref())?;
        let credentials = self
            .credentials
            .ok_or(ConnectorError::Argument("credentials"))?;
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(TungsteniteDialer) as Arc<dyn Dialer>);

        let profile = Arc::new(self.profile);
        let link = Link::new(endpoint, credentials, dialer, self.transport);
        let codec = ActivityCodec::shared(Arc::clone(&profile));
        let ops = SocketConversations::new(link, codec, self.dispatch);

        Ok(ConnectorClient { profile, ops })
    }
}

impl Default for ConnectorClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_endpoint(raw: Option<&str>) -> Result<Uri> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConnectorError::Argument("endpoint"))?;
    let uri: Uri = raw
        .parse()
        .map_err(|_| ConnectorError::Argument("endpoint"))?;

    match (uri.scheme_str(), uri.host()) {
        (Some("ws" | "wss"), Some(host)) if !host.is_empty() => Ok(uri),
        _ => Err(ConnectorError::Argument("endpoint")),
    }
}

/// Socket connector to one channel endpoint.
///
/// All operations share one connection. Dropping the client closes it.
pub struct ConnectorClient {
    profile: Arc<SerializationProfile>,
    ops: SocketConversations,
}

impl ConnectorClient {
    /// Create a new client builder.
    pub fn builder() -> ConnectorClientBuilder {
        ConnectorClientBuilder::new()
    }

    #[inline]
    pub fn endpoint(&self) -> &Uri {
        self.ops.link().endpoint()
    }

    #[inline]
    pub fn profile(&self) -> &SerializationProfile {
        &self.profile
    }

    #[inline]
    pub fn ack_mode(&self) -> AckMode {
        self.ops.ack_mode()
    }

    /// Lifecycle state of the connection; `Unconnected` before first use.
    pub fn state(&self) -> ConnectionState {
        match self.ops.link().current() {
            Some(conn) => conn.state(),
            None if self.ops.link().is_closed() => ConnectionState::Closed,
            None => ConnectionState::Unconnected,
        }
    }

    /// Frames accepted but not yet on the wire.
    pub fn pending_frames(&self) -> usize {
        self.ops
            .link()
            .current()
            .map_or(0, |conn| conn.pending_frames())
    }

    /// Connect now instead of on the first operation.
    pub async fn connect(&self) -> Result<()> {
        self.ops.connect().await
    }

    /// Next unsolicited inbound activity, or a per-frame decode error.
    ///
    /// `None` once the connection is closed and nothing is left.
    pub async fn next_activity(&self) -> Option<Result<Activity>> {
        self.ops.next_activity().await
    }

    /// Close the connection. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.ops.close().await;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorClient")
            .field("endpoint", self.endpoint())
            .field("state", &self.state())
            .field("ack_mode", &self.ack_mode())
            .finish()
    }
}

#[async_trait]
impl Conversations for ConnectorClient {
    async fn create_conversation(
        &self,
        parameters: ConversationParameters,
    ) -> OperationResult<ConversationResourceResponse> {
        self.ops.create_conversation(parameters).await
    }

    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse> {
        self.ops.send_to_conversation(conversation_id, activity).await
    }

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse> {
        self.ops
            .reply_to_activity(conversation_id, activity_id, activity)
            .await
    }

    async fn update_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> OperationResult<ResourceResponse> {
        self.ops
            .update_activity(conversation_id, activity_id, activity)
            .await
    }

    async fn delete_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> OperationResult<()> {
        self.ops.delete_activity(conversation_id, activity_id).await
    }

    async fn get_conversations(
        &self,
        continuation_token: Option<&str>,
    ) -> OperationResult<ConversationsResult> {
        self.ops.get_conversations(continuation_token).await
    }

    async fn get_conversation_members(
        &self,
        conversation_id: &str,
    ) -> OperationResult<Vec<ChannelAccount>> {
        self.ops.get_conversation_members(conversation_id).await
    }

    async fn get_activity_members(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> OperationResult<Vec<ChannelAccount>> {
        self.ops
            .get_activity_members(conversation_id, activity_id)
            .await
    }

    async fn delete_conversation_member(
        &self,
        conversation_id: &str,
        member_id: &str,
    ) -> OperationResult<()> {
        self.ops
            .delete_conversation_member(conversation_id, member_id)
            .await
    }

    async fn upload_attachment(
        &self,
        conversation_id: &str,
        attachment: AttachmentData,
    ) -> OperationResult<ResourceResponse> {
        self.ops.upload_attachment(conversation_id, attachment).await
    }
}
