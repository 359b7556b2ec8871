//! Wall-clock timestamps carried on chat messages.
//!
//! On the wire a timestamp is an RFC 3339 string with millisecond precision
//! in UTC (`2024-05-01T12:00:00.000Z`). Decoding also accepts a bare number
//! of milliseconds since the Unix epoch, which is what the relay produces
//! when a sender omitted the timestamp.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// UTC instant attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Builds a timestamp from milliseconds since the Unix epoch.
    ///
    /// Returns `None` when the value is outside the representable range.
    #[must_use]
    pub fn from_millis(ms: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(ms).map(Self)
    }

    /// Parses an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Returns the `chrono` parse error if `s` is not valid RFC 3339.
    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Whole seconds since the Unix epoch (the dedup resolution).
    #[must_use]
    pub fn as_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Returns the inner `chrono` datetime.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Formats the timestamp the way it travels on the wire.
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(f64),
}

impl<'de> Deserialize<'de> for Timestamp {
    #[allow(clippy::cast_possible_truncation)]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            RawTimestamp::Millis(ms) => Self::from_millis(ms as i64)
                .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}
