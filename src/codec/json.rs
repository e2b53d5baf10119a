//! JSON codec producing canonical frame payloads.
//!
//! Values are first lowered to a `serde_json::Value`, then canonicalized:
//! object keys are re-inserted in lexicographic order and, when the profile
//! asks for it, object members holding `null` are dropped. Array elements
//! are positional and are never removed. The canonical tree is then written
//! out, so one value under one profile always yields the same bytes.
//!
//! # Example
//!
//! ```
//! use activitywire::codec::{ActivityCodec, SerializationProfile};
//! use activitywire::schema::{Activity, ConversationAccount};
//!
//! let codec = ActivityCodec::new(SerializationProfile::default());
//!
//! let mut activity = Activity::message("hello");
//! activity.id = Some("act1".to_string());
//! activity.conversation = Some(ConversationAccount::new("conv1"));
//!
//! let bytes = codec.encode(&activity).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), activity);
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::profile::{Layout, SerializationProfile};
use crate::error::{DecodeError, Result};
use crate::schema::Activity;

/// Stateless JSON codec for arbitrary serde values.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to canonical UTF-8 JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn encode<T: Serialize>(value: &T, profile: &SerializationProfile) -> Result<Bytes> {
        let tree = canonicalize(serde_json::to_value(value)?, profile.omit_nulls());
        let bytes = match profile.layout() {
            Layout::Compact => serde_json::to_vec(&tree)?,
            Layout::Indented => serde_json::to_vec_pretty(&tree)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode UTF-8 JSON bytes to a value. Unknown fields are ignored.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text)?)
    }
}

/// Rebuild a JSON tree with sorted keys, optionally dropping null members.
fn canonicalize(value: Value, omit_nulls: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !(omit_nulls && v.is_null()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut out = Map::new();
            for (key, v) in entries {
                out.insert(key, canonicalize(v, omit_nulls));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| canonicalize(v, omit_nulls))
                .collect(),
        ),
        other => other,
    }
}

/// Activity codec bound to one [`SerializationProfile`].
///
/// Cheap to clone; clones share the profile.
#[derive(Debug, Clone)]
pub struct ActivityCodec {
    profile: Arc<SerializationProfile>,
}

impl ActivityCodec {
    pub fn new(profile: SerializationProfile) -> Self {
        Self {
            profile: Arc::new(profile),
        }
    }

    /// Create a codec sharing an existing profile.
    pub fn shared(profile: Arc<SerializationProfile>) -> Self {
        Self { profile }
    }

    #[inline]
    pub fn profile(&self) -> &SerializationProfile {
        &self.profile
    }

    /// Encode an activity into one frame payload.
    pub fn encode(&self, activity: &Activity) -> Result<Bytes> {
        JsonCodec::encode(activity, &self.profile)
    }

    /// Decode one frame payload into an activity.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not UTF-8 JSON, or when `type`, `id` or
    /// `conversation.id` is missing or empty.
    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<Activity, DecodeError> {
        let activity: Activity = JsonCodec::decode(bytes)?;

        if activity.kind.is_empty() {
            return Err(DecodeError::MissingField("type"));
        }
        if activity.id.as_deref().map_or(true, str::is_empty) {
            return Err(DecodeError::MissingField("id"));
        }
        if activity.conversation_id().map_or(true, str::is_empty) {
            return Err(DecodeError::MissingField("conversation.id"));
        }
        Ok(activity)
    }

    /// Encode any payload type under this codec's profile.
    pub fn encode_value<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        JsonCodec::encode(value, &self.profile)
    }

    /// Decode any payload type. No required-field checks beyond the type's own.
    pub fn decode_value<T: DeserializeOwned>(
        &self,
        bytes: &[u8],
    ) -> std::result::Result<T, DecodeError> {
        JsonCodec::decode(bytes)
    }
}

impl Default for ActivityCodec {
    fn default() -> Self {
        Self::new(SerializationProfile::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attachment, ChannelAccount, ConversationAccount};
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn sample() -> Activity {
        let mut activity = Activity::message("hello");
        activity.id = Some("act1".to_string());
        activity.conversation = Some(ConversationAccount::new("conv1"));
        activity.from = Some(ChannelAccount::new("user1"));
        activity.recipient = Some(ChannelAccount {
            id: "bot1".to_string(),
            name: Some("Bot".to_string()),
        });
        activity.timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        activity.attachments = Some(vec![Attachment {
            content_type: "image/png".to_string(),
            content_url: Some("https://cdn.test/a.png".to_string()),
            ..Attachment::default()
        }]);
        activity.duration = Some(Duration::from_secs(90));
        activity
    }

    #[test]
    fn test_encode_decode_activity() {
        let codec = ActivityCodec::default();
        let original = sample();

        let encoded = codec.encode(&original).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encoding_is_byte_identical() {
        let codec = ActivityCodec::default();
        let activity = sample();

        assert_eq!(codec.encode(&activity).unwrap(), codec.encode(&activity).unwrap());
    }

    #[test]
    fn test_keys_are_sorted() {
        let codec = ActivityCodec::default();
        let encoded = codec.encode(&sample()).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();

        let attachments = text.find("\"attachments\"").unwrap();
        let conversation = text.find("\"conversation\"").unwrap();
        let kind = text.find("\"type\"").unwrap();
        assert!(attachments < conversation);
        assert!(conversation < kind);
    }

    #[test]
    fn test_timestamp_is_utc_iso8601() {
        let codec = ActivityCodec::default();
        let encoded = codec.encode(&sample()).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["timestamp"], "2024-03-01T12:30:00Z");
    }

    #[test]
    fn test_offset_timestamp_decodes_to_utc() {
        let codec = ActivityCodec::default();
        let frame = br#"{"type":"message","id":"a","conversation":{"id":"c"},"timestamp":"2024-03-01T14:30:00+02:00"}"#;

        let activity = codec.decode(frame).unwrap();
        assert_eq!(
            activity.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_duration_is_iso8601() {
        let codec = ActivityCodec::default();
        let encoded = codec.encode(&sample()).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["duration"], "PT1M30S");
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let codec = ActivityCodec::default();
        let encoded = codec.encode(&Activity::message("x")).unwrap();

        assert_eq!(&encoded[..], br#"{"text":"x","type":"message"}"#);
    }

    #[test]
    fn test_nested_nulls_are_omitted() {
        let codec = ActivityCodec::default();
        let mut activity = sample();
        activity.channel_data = Some(json!({"keep": 1, "drop": null, "list": [null, 2]}));

        let encoded = codec.encode(&activity).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["channelData"], json!({"keep": 1, "list": [null, 2]}));
    }

    #[test]
    fn test_keep_nulls_profile() {
        let codec = ActivityCodec::new(SerializationProfile::new().keep_nulls());
        let mut activity = sample();
        activity.channel_data = Some(json!({"drop": null}));

        let encoded = codec.encode(&activity).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["channelData"], json!({"drop": null}));
    }

    #[test]
    fn test_indented_layout() {
        let codec = ActivityCodec::new(SerializationProfile::new().indented());
        let encoded = codec.encode(&Activity::message("x")).unwrap();

        assert!(encoded.contains(&b'\n'));
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["text"], "x");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let codec = ActivityCodec::default();
        let frame = br#"{"type":"message","id":"a","conversation":{"id":"c","tenant":"t"},"futureField":{"x":1}}"#;

        let activity = codec.decode(frame).unwrap();
        assert_eq!(activity.id.as_deref(), Some("a"));
        assert_eq!(activity.conversation_id(), Some("c"));
    }

    #[test]
    fn test_decode_defaults_missing_optionals() {
        let codec = ActivityCodec::default();
        let activity = codec
            .decode(br#"{"type":"typing","id":"a","conversation":{"id":"c"}}"#)
            .unwrap();

        assert!(activity.text.is_none());
        assert!(activity.attachments.is_none());
        assert!(activity.duration.is_none());
    }

    #[test]
    fn test_decode_requires_identity_fields() {
        let codec = ActivityCodec::default();

        let missing_type = codec.decode(br#"{"id":"a","conversation":{"id":"c"}}"#);
        assert!(matches!(missing_type, Err(DecodeError::MissingField("type"))));

        let missing_id = codec.decode(br#"{"type":"message","conversation":{"id":"c"}}"#);
        assert!(matches!(missing_id, Err(DecodeError::MissingField("id"))));

        let empty_id = codec.decode(br#"{"type":"message","id":"","conversation":{"id":"c"}}"#);
        assert!(matches!(empty_id, Err(DecodeError::MissingField("id"))));

        let missing_conv = codec.decode(br#"{"type":"message","id":"a"}"#);
        assert!(matches!(
            missing_conv,
            Err(DecodeError::MissingField("conversation.id"))
        ));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let codec = ActivityCodec::default();

        assert!(matches!(codec.decode(b"not json"), Err(DecodeError::Json(_))));
        assert!(matches!(codec.decode(&[0xff, 0xfe]), Err(DecodeError::Utf8(_))));
        assert!(matches!(
            codec.decode(br#"{"type":"message","id":"a","conversation":{"id":"c"},"duration":"soon"}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_encode_value_other_payloads() {
        use crate::schema::ResourceResponse;

        let codec = ActivityCodec::default();
        let encoded = codec
            .encode_value(&ResourceResponse::new(Some("r1".to_string())))
            .unwrap();
        assert_eq!(&encoded[..], br#"{"id":"r1"}"#);

        let decoded: ResourceResponse = codec.decode_value(&encoded).unwrap();
        assert_eq!(decoded.id.as_deref(), Some("r1"));
    }

    fn token() -> impl Strategy<Value = String> {
        "[A-Za-z0-9:_.-]{1,24}"
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<String>().prop_map(Value::from),
        ]
    }

    // Nulls are omitted on the wire, so generated payloads never hold one.
    fn channel_data() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,8}", leaf(), 0..5)
            .prop_map(|members| Value::Object(members.into_iter().collect()))
    }

    fn timestamps() -> impl Strategy<Value = (Option<DateTime<Utc>>, Option<DateTime<FixedOffset>>)> {
        let instant = (0i64..4_000_000_000, 0u32..1_000_000_000);
        (
            prop::option::of(instant.clone()),
            prop::option::of((instant, -720i32..=840)),
        )
            .prop_map(|(utc, local)| {
                let utc = utc.and_then(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).single());
                let local = local.and_then(|((secs, nanos), minutes)| {
                    FixedOffset::east_opt(minutes * 60)?
                        .timestamp_opt(secs, nanos)
                        .single()
                });
                (utc, local)
            })
    }

    fn activities() -> impl Strategy<Value = Activity> {
        (
            (
                prop_oneof![Just("message"), Just("typing"), Just("delay"), Just("event")],
                token(),
                token(),
                prop::option::of(any::<String>()),
                prop::option::of(token()),
            ),
            (
                prop::option::of(token()),
                timestamps(),
                prop::option::of(channel_data()),
                prop::option::of((0u64..1_000_000_000, 0u32..1_000_000_000)),
                prop::option::of("[a-z]{2}-[A-Z]{2}"),
            ),
        )
            .prop_map(
                |(
                    (kind, id, conversation, text, reply_to_id),
                    (from, (timestamp, local_timestamp), channel_data, duration, locale),
                )| Activity {
                    kind: kind.to_string(),
                    id: Some(id),
                    conversation: Some(ConversationAccount::new(conversation)),
                    text,
                    reply_to_id,
                    from: from.map(ChannelAccount::new),
                    timestamp,
                    local_timestamp,
                    channel_data,
                    duration: duration.map(|(secs, nanos)| Duration::new(secs, nanos)),
                    locale,
                    ..Activity::default()
                },
            )
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(activity in activities()) {
            let codec = ActivityCodec::default();
            let encoded = codec.encode(&activity).unwrap();
            prop_assert_eq!(codec.decode(&encoded).unwrap(), activity);
        }

        #[test]
        fn prop_encoding_is_byte_identical(activity in activities(), indented in any::<bool>()) {
            let profile = if indented {
                SerializationProfile::new().indented()
            } else {
                SerializationProfile::default()
            };
            let codec = ActivityCodec::new(profile);

            let first = codec.encode(&activity).unwrap();
            let second = codec.encode(&activity.clone()).unwrap();
            prop_assert_eq!(&first, &second);

            let reencoded = codec.encode(&codec.decode(&first).unwrap()).unwrap();
            prop_assert_eq!(first, reencoded);
        }
    }
}
