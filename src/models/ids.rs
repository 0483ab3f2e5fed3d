//! Identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The upstream service's stable player identifier.
pub type ProfileId = i64;

/// The upstream match identifier. Globally unique across both sources.
pub type MatchId = i64;

/// Internal player identifier, assigned once when the player row is created.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wrap an existing identifier (e.g. one read back from the store).
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Allocate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.0)
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
