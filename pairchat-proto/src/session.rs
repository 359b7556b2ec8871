//! Session (room) identifiers for a pair of participants.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Addressable channel shared by exactly two identities.
///
/// Produced by [`SessionId::derive`] on both ends of the relay so the
/// client can recognise the confirmation for the pair it asked to join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Derives the session id for an unordered pair of identities.
    ///
    /// `derive(a, b) == derive(b, a)` for every pair. Self-chat (`a == b`)
    /// gets its own namespace. The length prefix on the lower identity
    /// keeps the mapping injective when identities contain `_`.
    #[must_use]
    pub fn derive(a: &Identity, b: &Identity) -> Self {
        if a == b {
            return Self(format!("self_chat_{a}"));
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Self(format!("private_{}:{lo}_{hi}", lo.as_str().len()))
    }

    /// Wraps a session id received from the relay.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the string form of this session id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
