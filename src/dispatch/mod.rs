//! Dispatch module - conversation operations over the socket.
//!
//! - [`Conversations`] - the operation set
//! - [`SocketConversations`] - socket-backed implementation
//! - [`OperationResponse`] / [`OperationResult`] - typed outcomes
//! - [`PendingAcks`] - reply acknowledgement correlation

mod conversations;
mod correlation;
mod operation;

pub use conversations::{
    AckMode, Conversations, DispatchConfig, SocketConversations, DEFAULT_INBOUND_QUEUE,
};
pub use correlation::{AckWaiter, PendingAcks};
pub use operation::{
    OperationResponse, OperationResult, RequestEcho, StatusCode, JSON_CONTENT_TYPE,
};
