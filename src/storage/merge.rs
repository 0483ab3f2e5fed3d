//! Fill-forward merge policy.
//!
//! Each stored row is merged with an incoming draft field by field: a stored
//! value is kept, a stored null is filled. The few exceptions (match shape
//! flags, ladder label, per-mode ratings) are spelled out per function. All
//! functions here are pure over the models so they can be tested without a
//! database; the loaders at the bottom read rows back into those models.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{from_db_time, StorageError};
use crate::models::{
    is_replaceable_name, Match, MatchId, MatchResult, Participant, Player,
    PlayerId, ProfileId,
};

/// Keep the existing value, else take the incoming one.
pub fn fill<T>(existing: Option<T>, incoming: Option<T>) -> Option<T> {
    existing.or(incoming)
}

fn fill_in_place<T: Clone + PartialEq>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    if slot.is_none() && incoming.is_some() {
        *slot = incoming.clone();
        return true;
    }
    false
}

/// Merge an incoming match into the stored one. Returns whether anything
/// changed.
///
/// Times, duration and map are backfilled only. Counts and the derived flags
/// are refreshed whenever the incoming draft has participants; the ladder
/// label whenever the incoming one is present.
pub fn merge_match(existing: &mut Match, incoming: &Match) -> bool {
    let mut changed = false;
    changed |= fill_in_place(&mut existing.started_at, &incoming.started_at);
    changed |= fill_in_place(&mut existing.ended_at, &incoming.ended_at);
    changed |= fill_in_place(&mut existing.duration_secs, &incoming.duration_secs);
    if existing.map_id.is_none() && incoming.map_id.is_some() {
        existing.map_id = incoming.map_id;
        existing.map_name = incoming.map_name.clone();
        changed = true;
    }

    if incoming.ladder_label.is_some() && existing.ladder_label != incoming.ladder_label {
        existing.ladder_label = incoming.ladder_label.clone();
        changed = true;
    }

    if incoming.player_count > 0 {
        let before = (
            existing.player_count,
            existing.team_count,
            existing.is_1v1,
            existing.is_team_game,
            existing.is_ranked,
        );
        existing.player_count = incoming.player_count;
        existing.team_count = incoming.team_count;
        existing.is_1v1 = incoming.is_1v1;
        existing.is_team_game = incoming.is_team_game;
        existing.is_ranked = incoming.is_ranked;
        changed |= before
            != (
                existing.player_count,
                existing.team_count,
                existing.is_1v1,
                existing.is_team_game,
                existing.is_ranked,
            );
    }

    if changed {
        debug!("Match {} refreshed from incoming record", existing.match_id);
    }
    changed
}

/// Merge an incoming participant into the stored one. Only nulls are
/// filled; an unknown result counts as null.
pub fn merge_participant(existing: &mut Participant, incoming: &Participant) -> bool {
    let mut changed = false;
    changed |= fill_in_place(&mut existing.team, &incoming.team);
    changed |= fill_in_place(&mut existing.civ_id, &incoming.civ_id);
    changed |= fill_in_place(&mut existing.civ_name, &incoming.civ_name);
    changed |= fill_in_place(&mut existing.rating_before, &incoming.rating_before);
    changed |= fill_in_place(&mut existing.rating_after, &incoming.rating_after);
    if !existing.result.is_known() && incoming.result.is_known() {
        existing.result = incoming.result;
        changed = true;
    }

    if changed {
        debug!(
            "Participant ({}, {}) backfilled",
            existing.match_id, existing.profile_id
        );
    }
    changed
}

/// Apply a resolved alias under the placeholder rule.
pub fn merge_display_name(player: &mut Player, alias: &str) -> bool {
    let alias = alias.trim();
    if alias.is_empty() || alias == player.display_name {
        return false;
    }
    if is_replaceable_name(&player.display_name) {
        debug!(
            "Renaming profile {} from {:?} to {:?}",
            player.profile_id, player.display_name, alias
        );
        player.display_name = alias.to_string();
        return true;
    }
    false
}

/// Advance the player's last-seen snapshot if `game` is strictly newer.
///
/// The post-match rating lands in `rating_1v1` or `rating_team` according to
/// the match's derived shape. Matches without a start time never advance.
pub fn merge_player_snapshot(player: &mut Player, game: &Match, rating_after: Option<i32>) -> bool {
    let Some(started) = game.started_at else {
        return false;
    };
    if player.last_match_at.is_some_and(|last| started <= last) {
        return false;
    }

    player.last_match_at = Some(started);
    if let Some(rating) = rating_after {
        if game.is_1v1 {
            player.rating_1v1 = Some(rating);
        } else if game.is_team_game {
            player.rating_team = Some(rating);
        }
    }
    true
}

pub(crate) fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        player_id: PlayerId::new(row.get::<_, String>(0)?),
        profile_id: row.get(1)?,
        display_name: row.get(2)?,
        country: row.get(3)?,
        rating_1v1: row.get(4)?,
        rating_team: row.get(5)?,
        last_match_at: from_db_time(row.get(6)?),
        added_at: from_db_time(row.get(7)?),
    })
}

pub(crate) fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    Ok(Match {
        match_id: row.get(0)?,
        started_at: from_db_time(row.get(1)?),
        ended_at: from_db_time(row.get(2)?),
        duration_secs: row.get(3)?,
        map_id: row.get(4)?,
        map_name: row.get(5)?,
        ladder_label: row.get(6)?,
        player_count: row.get(7)?,
        team_count: row.get(8)?,
        is_1v1: row.get(9)?,
        is_team_game: row.get(10)?,
        is_ranked: row.get(11)?,
    })
}

pub(crate) fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    let result: Option<String> = row.get(5)?;
    Ok(Participant {
        match_id: row.get(0)?,
        profile_id: row.get(1)?,
        team: row.get(2)?,
        civ_id: row.get(3)?,
        civ_name: row.get(4)?,
        result: MatchResult::from_code(result.as_deref()),
        rating_before: row.get(6)?,
        rating_after: row.get(7)?,
    })
}

pub(crate) fn load_player(
    conn: &Connection,
    profile_id: ProfileId,
) -> Result<Option<Player>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT player_id, profile_id, display_name, country, rating_1v1, rating_team,
                    last_match_at, added_at
             FROM players WHERE profile_id = ?1",
            params![profile_id],
            player_from_row,
        )
        .optional()?)
}

pub(crate) fn load_match(conn: &Connection, match_id: MatchId) -> Result<Option<Match>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT m.match_id, m.started_at, m.ended_at, m.duration_secs, m.map_id, mp.map_name,
                    m.ladder_label, m.player_count, m.team_count, m.is_1v1, m.is_team_game,
                    m.is_ranked
             FROM matches m LEFT JOIN maps mp ON mp.map_id = m.map_id
             WHERE m.match_id = ?1",
            params![match_id],
            match_from_row,
        )
        .optional()?)
}

pub(crate) fn load_participant(
    conn: &Connection,
    match_id: MatchId,
    profile_id: ProfileId,
) -> Result<Option<Participant>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT match_id, profile_id, team, civ_id, civ_name, result, rating_before, rating_after
             FROM participants WHERE match_id = ?1 AND profile_id = ?2",
            params![match_id, profile_id],
            participant_from_row,
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn game(id: MatchId) -> Match {
        Match {
            match_id: id,
            started_at: None,
            ended_at: None,
            duration_secs: None,
            map_name: None,
            map_id: None,
            ladder_label: None,
            player_count: 0,
            team_count: 0,
            is_1v1: false,
            is_team_game: false,
            is_ranked: false,
        }
    }

    #[test]
    fn test_fill() {
        assert_eq!(fill(Some(1), Some(2)), Some(1));
        assert_eq!(fill(None, Some(2)), Some(2));
        assert_eq!(fill::<i32>(Some(1), None), Some(1));
        assert_eq!(fill::<i32>(None, None), None);
    }

    #[test]
    fn test_merge_participant_keeps_known_civ() {
        let mut existing = Participant::new(1, 100);
        existing.civ_id = Some(1);
        existing.civ_name = Some("Britons".to_string());

        let mut incoming = Participant::new(1, 100);
        incoming.rating_after = Some(1216);

        assert!(merge_participant(&mut existing, &incoming));
        assert_eq!(existing.civ_id, Some(1));
        assert_eq!(existing.civ_name.as_deref(), Some("Britons"));
        assert_eq!(existing.rating_after, Some(1216));
    }

    #[test]
    fn test_merge_participant_never_overwrites() {
        let mut existing = Participant::new(1, 100);
        existing.result = MatchResult::Win;
        existing.rating_after = Some(1200);

        let mut incoming = Participant::new(1, 100);
        incoming.result = MatchResult::Loss;
        incoming.rating_after = Some(900);

        assert!(!merge_participant(&mut existing, &incoming));
        assert_eq!(existing.result, MatchResult::Win);
        assert_eq!(existing.rating_after, Some(1200));
    }

    #[test]
    fn test_merge_participant_fills_unknown_result() {
        let mut existing = Participant::new(1, 100);
        let mut incoming = Participant::new(1, 100);
        incoming.result = MatchResult::Loss;

        assert!(merge_participant(&mut existing, &incoming));
        assert_eq!(existing.result, MatchResult::Loss);
    }

    #[test]
    fn test_merge_match_backfills_and_refreshes_flags() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut existing = game(5);
        existing.duration_secs = Some(600);
        existing.player_count = 4;
        existing.team_count = 2;
        existing.is_team_game = true;

        let mut incoming = game(5);
        incoming.started_at = Some(t);
        incoming.duration_secs = Some(999);
        incoming.map_id = Some(3);
        incoming.map_name = Some("Arabia".to_string());
        incoming.player_count = 2;
        incoming.team_count = 2;
        incoming.is_1v1 = true;
        incoming.ladder_label = Some("Ranked 1v1".to_string());

        assert!(merge_match(&mut existing, &incoming));
        assert_eq!(existing.started_at, Some(t));
        assert_eq!(existing.duration_secs, Some(600));
        assert_eq!(existing.map_id, Some(3));
        assert_eq!(existing.player_count, 2);
        assert!(existing.is_1v1);
        assert!(!existing.is_team_game);
        assert_eq!(existing.ladder_label.as_deref(), Some("Ranked 1v1"));
    }

    #[test]
    fn test_merge_match_empty_incoming_keeps_counts() {
        let mut existing = game(5);
        existing.player_count = 2;
        existing.team_count = 2;
        existing.is_1v1 = true;
        existing.ladder_label = Some("Lobby 1v1".to_string());

        assert!(!merge_match(&mut existing, &game(5)));
        assert_eq!(existing.player_count, 2);
        assert!(existing.is_1v1);
        assert_eq!(existing.ladder_label.as_deref(), Some("Lobby 1v1"));
    }

    #[test]
    fn test_merge_display_name_rules() {
        let mut player = Player::stub(4242, None);
        assert!(merge_display_name(&mut player, "Hera"));
        assert_eq!(player.display_name, "Hera");

        assert!(!merge_display_name(&mut player, "Someone"));
        assert_eq!(player.display_name, "Hera");

        let mut numeric = Player::stub(1, Some("123456"));
        assert!(merge_display_name(&mut numeric, "Liereyy"));
        assert!(!merge_display_name(&mut numeric, "  "));
    }

    #[test]
    fn test_merge_player_snapshot_is_monotonic() {
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut player = Player::stub(1, None);

        let mut one = game(1);
        one.started_at = Some(newer);
        one.is_1v1 = true;
        assert!(merge_player_snapshot(&mut player, &one, Some(1300)));
        assert_eq!(player.rating_1v1, Some(1300));

        let mut team = game(2);
        team.started_at = Some(older);
        team.is_team_game = true;
        assert!(!merge_player_snapshot(&mut player, &team, Some(1500)));
        assert_eq!(player.rating_team, None);
        assert_eq!(player.last_match_at, Some(newer));

        let mut same = game(3);
        same.started_at = Some(newer);
        same.is_1v1 = true;
        assert!(!merge_player_snapshot(&mut player, &same, Some(1)));
        assert_eq!(player.rating_1v1, Some(1300));
    }

    #[test]
    fn test_merge_player_snapshot_without_time() {
        let mut player = Player::stub(1, None);
        let mut g = game(1);
        g.is_1v1 = true;
        assert!(!merge_player_snapshot(&mut player, &g, Some(1000)));
        assert_eq!(player.rating_1v1, None);
    }
}
