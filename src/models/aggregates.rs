//! Derived statistics models.
//!
//! Every row here is rebuilt wholesale from participants and matches;
//! none of them is ever edited by hand.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::PlayerId;

/// Per-player, per-calendar-day activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStat {
    pub player_id: PlayerId,
    pub date: NaiveDate,
    pub games: u32,
    pub wins: u32,

    /// Post-match rating of the last rated match that day
    pub closing_rating: Option<i32>,
}

/// Per-player, per-civilization record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CivStat {
    pub player_id: PlayerId,
    pub civ_id: Option<i64>,
    pub civ_name: String,

    /// Every participation, including unknown results
    pub games: u32,

    /// Participations with a known result
    pub decided: u32,

    pub wins: u32,

    /// Integer percentage of decided games won
    pub win_rate: u32,
}

/// Per-player, per-map record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapStat {
    pub player_id: PlayerId,
    pub map_id: Option<i64>,
    pub map_name: String,
    pub games: u32,
    pub decided: u32,
    pub wins: u32,
    pub win_rate: u32,
}

/// How two players met in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatRelation {
    Teammate,
    Opponent,
}

impl CombatRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombatRelation::Teammate => "teammate",
            CombatRelation::Opponent => "opponent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "teammate" => Some(CombatRelation::Teammate),
            "opponent" => Some(CombatRelation::Opponent),
            _ => None,
        }
    }
}

impl std::fmt::Display for CombatRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered pair record: how `player_a` fared with or against `player_b`.
///
/// `(a, b)` and `(b, a)` are independent rows; they are not mirror images
/// when results are missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatStat {
    pub player_a: PlayerId,
    pub player_b: PlayerId,
    pub relation: CombatRelation,
    pub games: u32,
    pub decided: u32,

    /// Games `player_a` won
    pub wins: u32,

    pub win_rate: u32,
}

/// The four projections produced by one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSet {
    pub daily: Vec<DailyStat>,
    pub civs: Vec<CivStat>,
    pub maps: Vec<MapStat>,
    pub combat: Vec<CombatStat>,
}

impl AggregateSet {
    /// Find the combat row for an ordered pair.
    pub fn combat_between(
        &self,
        a: &PlayerId,
        b: &PlayerId,
        relation: CombatRelation,
    ) -> Option<&CombatStat> {
        self.combat
            .iter()
            .find(|c| &c.player_a == a && &c.player_b == b && c.relation == relation)
    }

    /// Find a player's row for a civilization by name (case insensitive).
    pub fn civ_for(&self, player: &PlayerId, civ_name: &str) -> Option<&CivStat> {
        self.civs
            .iter()
            .find(|c| &c.player_id == player && c.civ_name.eq_ignore_ascii_case(civ_name))
    }

    /// Find a player's row for a map by name.
    pub fn map_for(&self, player: &PlayerId, map_name: &str) -> Option<&MapStat> {
        self.maps
            .iter()
            .find(|m| &m.player_id == player && m.map_name == map_name)
    }

    /// Total number of rows across all four projections.
    pub fn row_count(&self) -> usize {
        self.daily.len() + self.civs.len() + self.maps.len() + self.combat.len()
    }
}
