//! Canonical match and participant models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MatchId, ProfileId};

/// Outcome of a match for one participant.
///
/// Ternary on purpose: upstream frequently omits results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    Win,
    Loss,
    #[default]
    Unknown,
}

impl MatchResult {
    /// Convert an optional win flag.
    pub fn from_won(won: Option<bool>) -> Self {
        match won {
            Some(true) => MatchResult::Win,
            Some(false) => MatchResult::Loss,
            None => MatchResult::Unknown,
        }
    }

    /// The opposite outcome; unknown stays unknown.
    pub fn complement(self) -> Self {
        match self {
            MatchResult::Win => MatchResult::Loss,
            MatchResult::Loss => MatchResult::Win,
            MatchResult::Unknown => MatchResult::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != MatchResult::Unknown
    }

    /// Column value: `W`, `L` or NULL.
    pub fn as_code(self) -> Option<&'static str> {
        match self {
            MatchResult::Win => Some("W"),
            MatchResult::Loss => Some("L"),
            MatchResult::Unknown => None,
        }
    }

    /// Parse a column value back.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("W") => MatchResult::Win,
            Some("L") => MatchResult::Loss,
            _ => MatchResult::Unknown,
        }
    }
}

impl std::fmt::Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchResult::Win => write!(f, "win"),
            MatchResult::Loss => write!(f, "loss"),
            MatchResult::Unknown => write!(f, "unknown"),
        }
    }
}

/// A canonical match.
///
/// The three shape flags are derived from the participant set and rating
/// presence, never copied from upstream ladder labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,

    /// Cleaned map name
    pub map_name: Option<String>,

    /// Map dictionary id, attached by the reference resolver
    pub map_id: Option<i64>,

    /// Upstream queue label; informational
    pub ladder_label: Option<String>,

    pub player_count: u32,
    pub team_count: u32,
    pub is_1v1: bool,
    pub is_team_game: bool,
    pub is_ranked: bool,
}

/// One player's row in one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub match_id: MatchId,
    pub profile_id: ProfileId,
    pub team: Option<i64>,
    pub civ_id: Option<i64>,
    pub civ_name: Option<String>,
    pub result: MatchResult,
    pub rating_before: Option<i32>,
    pub rating_after: Option<i32>,
}

impl Participant {
    /// Create a participant with every optional field empty.
    pub fn new(match_id: MatchId, profile_id: ProfileId) -> Self {
        Self {
            match_id,
            profile_id,
            team: None,
            civ_id: None,
            civ_name: None,
            result: MatchResult::Unknown,
            rating_before: None,
            rating_after: None,
        }
    }
}

/// Normalizer output: one match plus its participants, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDraft {
    pub game: Match,
    pub participants: Vec<Participant>,

    /// Display names seen in the record, by profile id
    #[serde(default)]
    pub aliases: BTreeMap<ProfileId, String>,
}

impl MatchDraft {
    pub fn match_id(&self) -> MatchId {
        self.game.match_id
    }

    /// Find a participant by profile id.
    pub fn participant(&self, profile_id: ProfileId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.profile_id == profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_complement() {
        assert_eq!(MatchResult::Win.complement(), MatchResult::Loss);
        assert_eq!(MatchResult::Loss.complement(), MatchResult::Win);
        assert_eq!(MatchResult::Unknown.complement(), MatchResult::Unknown);
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(MatchResult::Win.as_code(), Some("W"));
        assert_eq!(MatchResult::Unknown.as_code(), None);
        assert_eq!(MatchResult::from_code(Some("L")), MatchResult::Loss);
        assert_eq!(MatchResult::from_code(None), MatchResult::Unknown);
        assert_eq!(MatchResult::from_code(Some("?")), MatchResult::Unknown);
    }

    #[test]
    fn test_result_from_won() {
        assert_eq!(MatchResult::from_won(Some(true)), MatchResult::Win);
        assert_eq!(MatchResult::from_won(Some(false)), MatchResult::Loss);
        assert_eq!(MatchResult::from_won(None), MatchResult::Unknown);
    }

    #[test]
    fn test_result_serialization() {
        let json = serde_json::to_string(&MatchResult::Unknown).unwrap();
        assert_eq!(json, "\"unknown\"");
    }
}
