//! ISO-8601 duration encoding for `std::time::Duration`.
//!
//! Durations are written in their most compact designator form:
//! 90 seconds is `PT1M30S`, zero is `PT0S`, 25 hours is `P1DT1H`,
//! and sub-second parts are kept as a trimmed fraction (`PT0.25S`).
//!
//! Parsing accepts `W`, `D`, `H`, `M` and `S` designators. Years and months
//! have no fixed length and are rejected.
//!
//! Use with serde as `#[serde(with = "iso8601")]` or, for optional fields,
//! `#[serde(with = "iso8601::option")]`.

use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serializer};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;
const SECS_PER_WEEK: u64 = 7 * SECS_PER_DAY;

/// Render a duration as a compact ISO-8601 duration string.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let nanos = duration.subsec_nanos();

    let days = total / SECS_PER_DAY;
    let hours = (total % SECS_PER_DAY) / SECS_PER_HOUR;
    let minutes = (total % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let seconds = total % SECS_PER_MINUTE;

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }

    let has_time = hours > 0 || minutes > 0 || seconds > 0 || nanos > 0;
    if !has_time {
        if days == 0 {
            out.push_str("T0S");
        }
        return out;
    }

    out.push('T');
    if hours > 0 {
        out.push_str(&format!("{}H", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}M", minutes));
    }
    if seconds > 0 || nanos > 0 {
        out.push_str(&seconds.to_string());
        if nanos > 0 {
            let fraction = format!("{:09}", nanos);
            out.push('.');
            out.push_str(fraction.trim_end_matches('0'));
        }
        out.push('S');
    }
    out
}

/// Parse an ISO-8601 duration string.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let body = input
        .strip_prefix('P')
        .ok_or_else(|| format!("duration `{}` must start with 'P'", input))?;

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return Err(format!("duration `{}` has an empty time part", input));
            }
            (date, Some(time))
        }
        None => (body, None),
    };

    if date_part.is_empty() && time_part.is_none() {
        return Err(format!("duration `{}` has no components", input));
    }

    let mut secs: u64 = 0;
    let mut nanos: u32 = 0;

    for (value, designator) in components(date_part, input)? {
        let unit = match designator {
            'W' => SECS_PER_WEEK,
            'D' => SECS_PER_DAY,
            'Y' | 'M' => {
                return Err(format!(
                    "duration `{}` uses a calendar unit without a fixed length",
                    input
                ))
            }
            other => return Err(format!("unexpected designator '{}' in `{}`", other, input)),
        };
        secs = add_scaled(secs, &value, unit, input)?;
    }

    if let Some(time) = time_part {
        for (value, designator) in components(time, input)? {
            match designator {
                'H' => secs = add_scaled(secs, &value, SECS_PER_HOUR, input)?,
                'M' => secs = add_scaled(secs, &value, SECS_PER_MINUTE, input)?,
                'S' => {
                    let (whole, fraction) = match value.split_once('.') {
                        Some((whole, fraction)) => (whole, Some(fraction)),
                        None => (value.as_str(), None),
                    };
                    secs = add_scaled(secs, whole, 1, input)?;
                    if let Some(fraction) = fraction {
                        nanos = parse_fraction(fraction, input)?;
                    }
                }
                other => {
                    return Err(format!("unexpected designator '{}' in `{}`", other, input))
                }
            }
        }
    }

    Ok(Duration::new(secs, nanos))
}

/// Split `12H30M` style text into `("12", 'H'), ("30", 'M')`.
///
/// Each designator may appear once per part.
fn components(part: &str, input: &str) -> Result<Vec<(String, char)>, String> {
    let mut out = Vec::new();
    let mut number = String::new();

    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
        } else if ch.is_ascii_alphabetic() {
            if number.is_empty() {
                return Err(format!("designator '{}' without a value in `{}`", ch, input));
            }
            if out.iter().any(|(_, seen)| *seen == ch) {
                return Err(format!("designator '{}' repeated in `{}`", ch, input));
            }
            out.push((std::mem::take(&mut number), ch));
        } else {
            return Err(format!("unexpected character '{}' in `{}`", ch, input));
        }
    }

    if !number.is_empty() {
        return Err(format!("trailing value without designator in `{}`", input));
    }
    Ok(out)
}

fn add_scaled(acc: u64, value: &str, unit: u64, input: &str) -> Result<u64, String> {
    let n: u64 = value
        .parse()
        .map_err(|_| format!("invalid number `{}` in `{}`", value, input))?;
    n.checked_mul(unit)
        .and_then(|v| acc.checked_add(v))
        .ok_or_else(|| format!("duration `{}` overflows", input))
}

fn parse_fraction(fraction: &str, input: &str) -> Result<u32, String> {
    if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid fractional seconds in `{}`", input));
    }
    let padded = format!("{:0<9}", fraction);
    padded
        .parse()
        .map_err(|_| format!("invalid fractional seconds in `{}`", input))
}

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(de::Error::custom)
}

/// Same encoding for `Option<Duration>`; `null` and absence both map to `None`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| parse_duration(&t).map_err(de::Error::custom))
            .transpose()
    }
}
