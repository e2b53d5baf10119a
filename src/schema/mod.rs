//! Schema module - activity and conversation payload types.
//!
//! These are the values carried inside frames. They are plain serde types;
//! all wire-format policy (key order, null omission, time encoding) lives in
//! [`crate::codec`].

pub mod activity;
mod conversation;

pub use activity::{Activity, Attachment, ChannelAccount, ConversationAccount, Entity};
pub use conversation::{
    AttachmentData, ConversationMembers, ConversationParameters, ConversationReference,
    ConversationResourceResponse, ConversationsResult, ResourceResponse,
};
