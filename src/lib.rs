//! # activitywire
//!
//! Conversation-activity connector over a single WebSocket.
//!
//! A bot process exchanges structured activities with a messaging channel
//! over one persistent duplex connection instead of per-call REST requests.
//! The logical operation set (reply, send, update, delete, members,
//! attachments) is kept; each operation becomes one JSON text frame.
//!
//! ## Architecture
//!
//! - **Codec**: canonical JSON for activities (sorted keys, nulls omitted,
//!   ISO-8601 timestamps and durations)
//! - **Transport**: one socket, a writer task, a reader task, backpressure
//! - **Dispatch**: validation, framing and acknowledgement correlation
//! - **Client**: builder plus facade exposing [`Conversations`]
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use activitywire::{Activity, ConnectorClient, Conversations};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), activitywire::ConnectorError> {
//!     let client = ConnectorClient::builder()
//!         .endpoint("wss://channel.example/v3/socket")
//!         .bearer_token("token")
//!         .await_acknowledgements(Duration::from_secs(10))
//!         .build()?;
//!
//!     let reply = client
//!         .reply_to_activity("conv1", "act1", Activity::message("hello"))
//!         .await?;
//!     println!("channel assigned {:?}", reply.body.id);
//!
//!     client.close().await
//! }
//! ```

pub mod backpressure;
pub mod codec;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod schema;
pub mod transport;

mod client;
mod writer;

pub use client::{ConnectorClient, ConnectorClientBuilder};
pub use credentials::{CredentialsProvider, StaticCredentials};
pub use dispatch::{AckMode, Conversations, OperationResponse, OperationResult, StatusCode};
pub use error::{ConnectorError, DecodeError};
pub use schema::Activity;
pub use writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_FRAMES,
    DEFAULT_WRITE_TIMEOUT,
};
