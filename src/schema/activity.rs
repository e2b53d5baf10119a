//! Activity and the account types it references.
//!
//! Wire names are camelCase. Every optional field is skipped when absent so
//! the encoded form only carries what the sender actually set.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::iso8601;

/// Activity type for ordinary chat messages.
pub const MESSAGE: &str = "message";
/// Activity type for typing indicators.
pub const TYPING: &str = "typing";
/// Activity type for pauses between messages.
pub const DELAY: &str = "delay";
/// Activity type for membership changes.
pub const CONVERSATION_UPDATE: &str = "conversationUpdate";
/// Activity type for end-of-conversation notices.
pub const END_OF_CONVERSATION: &str = "endOfConversation";

/// A structured conversational message exchanged between bot and channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity type, e.g. `message`. Empty only on a malformed payload.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Channel-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Sender's wall-clock time. Keeps the sender's UTC offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
    /// Channel-specific payload, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
    /// Id of the activity this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// How long a typing or delay indicator lasts. Encoded as an ISO-8601
    /// duration such as `PT1M30S`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso8601::option"
    )]
    pub duration: Option<Duration>,
}

impl Activity {
    /// Create an activity of the given type with every other field empty.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Create a `message` activity carrying `text`.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(MESSAGE)
        }
    }

    /// Conversation id, if the activity carries one.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    /// Check if this is a `message` activity.
    #[inline]
    pub fn is_message(&self) -> bool {
        self.kind == MESSAGE
    }
}

/// A user or bot on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// The conversation an activity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
}

impl ConversationAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: None,
        }
    }
}

/// File or card attached to an activity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Metadata object attached to an activity (mentions, places, ...).
///
/// Only `type` is interpreted; everything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructor() {
        let activity = Activity::message("hello");
        assert!(activity.is_message());
        assert_eq!(activity.text.as_deref(), Some("hello"));
        assert!(activity.id.is_none());
    }

    #[test]
    fn test_conversation_id_accessor() {
        let mut activity = Activity::new(TYPING);
        assert_eq!(activity.conversation_id(), None);

        activity.conversation = Some(ConversationAccount::new("conv1"));
        assert_eq!(activity.conversation_id(), Some("conv1"));
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let mut activity = Activity::message("hi");
        activity.reply_to_id = Some("act1".to_string());
        activity.service_url = Some("https://channel.test".to_string());

        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["replyToId"], "act1");
        assert_eq!(value["serviceUrl"], "https://channel.test");
        assert!(value.get("reply_to_id").is_none());
    }

    #[test]
    fn test_local_timestamp_keeps_offset() {
        let json = r#"{"type":"message","localTimestamp":"2024-03-01T14:30:00+02:00"}"#;
        let activity: Activity = serde_json::from_str(json).unwrap();

        let local = activity.local_timestamp.unwrap();
        assert_eq!(local.offset().local_minus_utc(), 2 * 3600);

        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["localTimestamp"], "2024-03-01T14:30:00+02:00");
    }

    #[test]
    fn test_entity_keeps_extra_properties() {
        let json = r#"{"type":"mention","text":"@bot","mentioned":{"id":"b1"}}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();

        assert_eq!(entity.kind, "mention");
        assert_eq!(entity.properties["text"], "@bot");
        assert_eq!(entity.properties["mentioned"]["id"], "b1");
    }
}
