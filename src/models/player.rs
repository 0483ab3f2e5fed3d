//! Player model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PlayerId, ProfileId};

/// A player seen in any ingested match.
///
/// Opponents are stored as untracked stubs so they stay identifiable;
/// only players with `added_at` set drive ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Internal identifier
    pub player_id: PlayerId,

    /// Upstream profile id (unique)
    pub profile_id: ProfileId,

    /// Display name
    pub display_name: String,

    /// Two-letter country code, when the upstream exposes one
    pub country: Option<String>,

    /// Rating after the most recent 1v1 match
    pub rating_1v1: Option<i32>,

    /// Rating after the most recent team match
    pub rating_team: Option<i32>,

    /// Start time of the most recent match seen for this player
    pub last_match_at: Option<DateTime<Utc>>,

    /// When an operator started tracking this player (None = stub)
    pub added_at: Option<DateTime<Utc>>,
}

impl Player {
    /// Create an untracked stub for a first sighting.
    pub fn stub(profile_id: ProfileId, display_name: Option<&str>) -> Self {
        let display_name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| placeholder_name(profile_id));

        Self {
            player_id: PlayerId::generate(),
            profile_id,
            display_name,
            country: None,
            rating_1v1: None,
            rating_team: None,
            last_match_at: None,
            added_at: None,
        }
    }

    /// Whether this player drives ingestion.
    pub fn is_tracked(&self) -> bool {
        self.added_at.is_some()
    }
}

/// Name given to stubs until a real alias is known.
pub fn placeholder_name(profile_id: ProfileId) -> String {
    format!("PID {}", profile_id)
}

/// Whether a stored display name may be replaced by a resolved alias:
/// empty, a `PID <n>` placeholder, or purely numeric.
pub fn is_replaceable_name(name: &str) -> bool {
    let name = name.trim();
    name.is_empty() || name.starts_with("PID ") || name.chars().all(|c| c.is_ascii_digit())
}
