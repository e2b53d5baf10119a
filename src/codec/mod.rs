//! Codec module - activity payload encoding.
//!
//! - [`JsonCodec`] - canonical JSON for any serde value
//! - [`ActivityCodec`] - activity encode/decode bound to a profile, with
//!   required-field checks on decode
//! - [`SerializationProfile`] - immutable encoding rules
//! - [`iso8601`] - duration encoding (`PT1M30S`)
//!
//! # Design
//!
//! `JsonCodec` is a marker struct with static methods and no state.
//! `ActivityCodec` carries the profile so every encode/decode pass on one
//! client uses the same rules.

pub mod iso8601;
mod json;
mod profile;

pub use json::{ActivityCodec, JsonCodec};
pub use profile::{Layout, SerializationProfile};
