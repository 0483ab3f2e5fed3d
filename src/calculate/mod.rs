//! Statistics calculation engine.
//!
//! Computes the four derived rollups from the full participant set:
//! - Per-player-per-day games, wins and closing rating
//! - Per-player civilization and map win rates
//! - Pairwise teammate/opponent records
//!
//! Pure over `ParticipantRow`s; persisting the result is the storage
//! layer's job.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::models::{
    AggregateSet, CivStat, CombatRelation, CombatStat, DailyStat, MapStat, MatchId, MatchResult,
    PlayerId,
};
use crate::reference::civ_display_name;
use crate::storage::ParticipantRow;

/// Bucket name for rows with no civilization or map.
pub const UNKNOWN_BUCKET: &str = "Unknown";

/// Integer win-rate percentage over decided games, rounded half up.
pub fn win_rate_percent(wins: u32, decided: u32) -> u32 {
    if decided == 0 {
        0
    } else {
        let (wins, decided) = (u64::from(wins), u64::from(decided));
        ((wins * 200 + decided) / (decided * 2)) as u32
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    games: u32,
    decided: u32,
    wins: u32,
}

impl Tally {
    fn add(&mut self, result: MatchResult) {
        self.games += 1;
        if result.is_known() {
            self.decided += 1;
        }
        if result == MatchResult::Win {
            self.wins += 1;
        }
    }

    fn win_rate(&self) -> u32 {
        win_rate_percent(self.wins, self.decided)
    }
}

fn civ_bucket(row: &ParticipantRow) -> String {
    row.civ_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| row.civ_id.map(civ_display_name))
        .unwrap_or_else(|| UNKNOWN_BUCKET.to_string())
}

fn map_bucket(row: &ParticipantRow) -> String {
    row.map_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_BUCKET.to_string())
}

/// Rebuild every aggregate from scratch.
///
/// Rows are processed oldest match first regardless of input order, so the
/// closing rating of a day is the last non-null post-match rating that day.
pub fn compute_aggregates(rows: &[ParticipantRow]) -> AggregateSet {
    let mut ordered: Vec<&ParticipantRow> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        (a.started_at.is_none(), a.started_at, a.match_id)
            .cmp(&(b.started_at.is_none(), b.started_at, b.match_id))
    });

    let mut daily: BTreeMap<(PlayerId, NaiveDate), (Tally, Option<i32>)> = BTreeMap::new();
    let mut civs: BTreeMap<(PlayerId, String), (Option<i64>, Tally)> = BTreeMap::new();
    let mut maps: BTreeMap<(PlayerId, String), (Option<i64>, Tally)> = BTreeMap::new();
    let mut by_match: HashMap<MatchId, Vec<&ParticipantRow>> = HashMap::new();

    for row in &ordered {
        if let Some(started) = row.started_at {
            let entry = daily
                .entry((row.player_id.clone(), started.date_naive()))
                .or_default();
            entry.0.add(row.result);
            if row.rating_after.is_some() {
                entry.1 = row.rating_after;
            }
        }

        let civ = civs
            .entry((row.player_id.clone(), civ_bucket(row)))
            .or_default();
        civ.0 = civ.0.or(row.civ_id);
        civ.1.add(row.result);

        let map = maps
            .entry((row.player_id.clone(), map_bucket(row)))
            .or_default();
        map.0 = map.0.or(row.map_id);
        map.1.add(row.result);

        by_match.entry(row.match_id).or_default().push(row);
    }

    let mut combat: BTreeMap<(PlayerId, PlayerId, CombatRelation), Tally> = BTreeMap::new();
    for players in by_match.values() {
        for a in players {
            let Some(team_a) = a.team else { continue };
            for b in players {
                if a.player_id == b.player_id {
                    continue;
                }
                let Some(team_b) = b.team else { continue };
                let relation = if team_a == team_b {
                    CombatRelation::Teammate
                } else {
                    CombatRelation::Opponent
                };
                combat
                    .entry((a.player_id.clone(), b.player_id.clone(), relation))
                    .or_default()
                    .add(a.result);
            }
        }
    }

    AggregateSet {
        daily: daily
            .into_iter()
            .map(|((player_id, date), (tally, closing_rating))| DailyStat {
                player_id,
                date,
                games: tally.games,
                wins: tally.wins,
                closing_rating,
            })
            .collect(),
        civs: civs
            .into_iter()
            .map(|((player_id, civ_name), (civ_id, tally))| CivStat {
                player_id,
                civ_id,
                civ_name,
                games: tally.games,
                decided: tally.decided,
                wins: tally.wins,
                win_rate: tally.win_rate(),
            })
            .collect(),
        maps: maps
            .into_iter()
            .map(|((player_id, map_name), (map_id, tally))| MapStat {
                player_id,
                map_id,
                map_name,
                games: tally.games,
                decided: tally.decided,
                wins: tally.wins,
                win_rate: tally.win_rate(),
            })
            .collect(),
        combat: combat
            .into_iter()
            .map(|((player_a, player_b, relation), tally)| CombatStat {
                player_a,
                player_b,
                relation,
                games: tally.games,
                decided: tally.decided,
                wins: tally.wins,
                win_rate: tally.win_rate(),
            })
            .collect(),
    }
}
