//! Serialization profile shared by every encode/decode pass.
//!
//! The time rules are fixed by the schema types: `timestamp` is
//! `DateTime<Utc>` (RFC 3339 with a `Z` suffix), `localTimestamp` keeps the
//! sender's offset, and durations go through [`iso8601`](super::iso8601). The profile carries the remaining choices.
//! It has no setters after construction; the facade shares it behind an
//! `Arc`.

/// Output layout for encoded payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Single line, no insignificant whitespace. Used on the wire.
    #[default]
    Compact,
    /// Two-space indentation, for logs and diagnostics.
    Indented,
}

/// Immutable encoding rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationProfile {
    omit_nulls: bool,
    layout: Layout,
}

impl SerializationProfile {
    /// Wire profile: compact, nulls omitted.
    pub fn new() -> Self {
        Self {
            omit_nulls: true,
            layout: Layout::Compact,
        }
    }

    /// Same rules with indented output.
    pub fn indented(self) -> Self {
        Self {
            layout: Layout::Indented,
            ..self
        }
    }

    /// Same rules but keep explicit nulls inside free-form JSON values.
    pub fn keep_nulls(self) -> Self {
        Self {
            omit_nulls: false,
            ..self
        }
    }

    #[inline]
    pub fn omit_nulls(&self) -> bool {
        self.omit_nulls
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl Default for SerializationProfile {
    fn default() -> Self {
        Self::new()
    }
}
