//! Presence status strings exchanged with the relay.

use serde::{Deserialize, Serialize};

/// Presence status of a participant as reported by the relay.
///
/// The relay speaks `"online"` and `"offline"`; any other string decodes
/// as [`PresenceStatus::Unknown`] rather than failing the whole event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PresenceStatus {
    /// Participant has a live connection.
    Online,
    /// Participant has disconnected.
    Offline,
    /// No usable status is known.
    Unknown,
}

impl PresenceStatus {
    /// Returns the wire string for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for PresenceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

impl From<PresenceStatus> for String {
    fn from(status: PresenceStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
