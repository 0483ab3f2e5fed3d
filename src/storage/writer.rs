//! Batch writer.
//!
//! Deduplicates a batch of drafts by match id, then persists everything in
//! one transaction: dictionary rows, player stubs, matches, participants and
//! last-seen snapshots. Any error rolls the whole batch back.

use std::collections::{BTreeMap, HashMap};

use rusqlite::{params, Transaction};
use tracing::{debug, info};

use super::merge::{
    load_match, load_participant, load_player, merge_display_name, merge_match,
    merge_participant, merge_player_snapshot,
};
use super::{to_db_time, Store, StorageError};
use crate::inference::infer_results;
use crate::models::{Match, MatchDraft, MatchId, Participant, Player, ProfileId};
use crate::normalize::apply_shape;
use crate::reference::resolve_references;
use crate::sources::PlayerAlias;

/// Counts from one batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub matches_unique: usize,
    pub matches_inserted: usize,
    pub matches_backfilled: usize,
    pub participants_inserted: usize,
    pub participants_updated: usize,
    pub players_created: usize,
    pub players_updated: usize,
    pub civilizations_written: usize,
    pub maps_created: usize,
}

/// Collapse drafts sharing a match id into one, in first-seen order.
///
/// The first copy wins field by field; later copies only fill gaps and add
/// participants the first one lacked. Merged drafts get their shape and
/// inferred results recomputed.
pub fn dedup_drafts(drafts: Vec<MatchDraft>) -> Vec<MatchDraft> {
    let mut order: Vec<MatchId> = Vec::new();
    let mut by_id: HashMap<MatchId, (MatchDraft, bool)> = HashMap::new();

    for draft in drafts {
        let id = draft.match_id();
        match by_id.get_mut(&id) {
            None => {
                order.push(id);
                by_id.insert(id, (draft, false));
            }
            Some((kept, merged)) => {
                debug!("Match {} seen more than once in batch", id);
                merge_match_fields(&mut kept.game, &draft.game);
                for incoming in draft.participants {
                    match kept
                        .participants
                        .iter_mut()
                        .find(|p| p.profile_id == incoming.profile_id)
                    {
                        Some(existing) => {
                            merge_participant(existing, &incoming);
                        }
                        None => kept.participants.push(incoming),
                    }
                }
                for (pid, alias) in draft.aliases {
                    kept.aliases.entry(pid).or_insert(alias);
                }
                *merged = true;
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .map(|(mut draft, merged)| {
            if merged {
                let participants = draft.participants.clone();
                apply_shape(&mut draft.game, &participants);
                infer_results(&mut draft);
            }
            draft
        })
        .collect()
}

/// Fill-only merge between two in-batch copies of a match.
fn merge_match_fields(kept: &mut Match, other: &Match) {
    kept.started_at = kept.started_at.or(other.started_at);
    kept.ended_at = kept.ended_at.or(other.ended_at);
    kept.duration_secs = kept.duration_secs.or(other.duration_secs);
    if kept.map_name.is_none() {
        kept.map_name = other.map_name.clone();
    }
    if kept.ladder_label.is_none() {
        kept.ladder_label = other.ladder_label.clone();
    }
}

/// Name to offer a player seen in `draft`: the resolved alias, else the
/// name embedded in the record.
fn preferred_name<'a>(
    profile_id: ProfileId,
    draft: &'a MatchDraft,
    aliases: &'a HashMap<ProfileId, PlayerAlias>,
) -> Option<&'a str> {
    aliases
        .get(&profile_id)
        .and_then(|a| a.alias.as_deref())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .or_else(|| draft.aliases.get(&profile_id).map(String::as_str))
}

/// Persist a batch. Drafts are deduplicated first.
pub fn write_batch(
    store: &mut Store,
    drafts: Vec<MatchDraft>,
    aliases: &HashMap<ProfileId, PlayerAlias>,
) -> Result<WriteSummary, StorageError> {
    let mut drafts = dedup_drafts(drafts);
    let mut summary = WriteSummary {
        matches_unique: drafts.len(),
        ..Default::default()
    };

    let tx = store.conn_mut().transaction()?;

    let refs = resolve_references(&tx, &mut drafts)?;
    summary.civilizations_written = refs.civilizations_written;
    summary.maps_created = refs.maps_created;

    let mut players: BTreeMap<ProfileId, (Player, bool)> = BTreeMap::new();

    for draft in &drafts {
        for participant in &draft.participants {
            let entry = match players.entry(participant.profile_id) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(e) => {
                    let player = match load_player(&tx, participant.profile_id)? {
                        Some(player) => player,
                        None => {
                            let name = preferred_name(participant.profile_id, draft, aliases);
                            let player = Player::stub(participant.profile_id, name);
                            insert_player(&tx, &player)?;
                            summary.players_created += 1;
                            player
                        }
                    };
                    e.insert((player, false))
                }
            };

            let (player, dirty) = entry;
            if let Some(name) = preferred_name(participant.profile_id, draft, aliases) {
                *dirty |= merge_display_name(player, name);
            }
        }

        write_match(&tx, &draft.game, &mut summary)?;
        for participant in &draft.participants {
            write_participant(&tx, participant, &mut summary)?;
        }

        for participant in &draft.participants {
            if let Some((player, dirty)) = players.get_mut(&participant.profile_id) {
                *dirty |= merge_player_snapshot(player, &draft.game, participant.rating_after);
            }
        }
    }

    for (profile_id, alias) in aliases {
        if let Some((player, dirty)) = players.get_mut(profile_id) {
            if player.country.is_none() && alias.country.is_some() {
                player.country = alias.country.clone();
                *dirty = true;
            }
        }
    }

    for (player, dirty) in players.values() {
        if *dirty {
            update_player(&tx, player)?;
            summary.players_updated += 1;
        }
    }

    tx.commit()?;

    info!(
        "Wrote batch: {} unique matches ({} new, {} backfilled), {} participants new, {} updated, {} players created",
        summary.matches_unique,
        summary.matches_inserted,
        summary.matches_backfilled,
        summary.participants_inserted,
        summary.participants_updated,
        summary.players_created
    );
    Ok(summary)
}

fn write_match(
    tx: &Transaction<'_>,
    game: &Match,
    summary: &mut WriteSummary,
) -> Result<(), StorageError> {
    match load_match(tx, game.match_id)? {
        None => {
            tx.execute(
                "INSERT INTO matches (match_id, started_at, ended_at, duration_secs, map_id,
                    ladder_label, player_count, team_count, is_1v1, is_team_game, is_ranked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    game.match_id,
                    game.started_at.as_ref().map(to_db_time),
                    game.ended_at.as_ref().map(to_db_time),
                    game.duration_secs,
                    game.map_id,
                    game.ladder_label,
                    game.player_count,
                    game.team_count,
                    game.is_1v1,
                    game.is_team_game,
                    game.is_ranked
                ],
            )?;
            summary.matches_inserted += 1;
        }
        Some(mut existing) => {
            if merge_match(&mut existing, game) {
                tx.execute(
                    "UPDATE matches SET started_at = ?2, ended_at = ?3, duration_secs = ?4,
                        map_id = ?5, ladder_label = ?6, player_count = ?7, team_count = ?8,
                        is_1v1 = ?9, is_team_game = ?10, is_ranked = ?11
                     WHERE match_id = ?1",
                    params![
                        existing.match_id,
                        existing.started_at.as_ref().map(to_db_time),
                        existing.ended_at.as_ref().map(to_db_time),
                        existing.duration_secs,
                        existing.map_id,
                        existing.ladder_label,
                        existing.player_count,
                        existing.team_count,
                        existing.is_1v1,
                        existing.is_team_game,
                        existing.is_ranked
                    ],
                )?;
                summary.matches_backfilled += 1;
            }
        }
    }
    Ok(())
}

fn write_participant(
    tx: &Transaction<'_>,
    participant: &Participant,
    summary: &mut WriteSummary,
) -> Result<(), StorageError> {
    match load_participant(tx, participant.match_id, participant.profile_id)? {
        None => {
            tx.execute(
                "INSERT INTO participants (match_id, profile_id, team, civ_id, civ_name, result,
                    rating_before, rating_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    participant.match_id,
                    participant.profile_id,
                    participant.team,
                    participant.civ_id,
                    participant.civ_name,
                    participant.result.as_code(),
                    participant.rating_before,
                    participant.rating_after
                ],
            )?;
            summary.participants_inserted += 1;
        }
        Some(mut existing) => {
            if merge_participant(&mut existing, participant) {
                tx.execute(
                    "UPDATE participants SET team = ?3, civ_id = ?4, civ_name = ?5, result = ?6,
                        rating_before = ?7, rating_after = ?8
                     WHERE match_id = ?1 AND profile_id = ?2",
                    params![
                        existing.match_id,
                        existing.profile_id,
                        existing.team,
                        existing.civ_id,
                        existing.civ_name,
                        existing.result.as_code(),
                        existing.rating_before,
                        existing.rating_after
                    ],
                )?;
                summary.participants_updated += 1;
            }
        }
    }
    Ok(())
}

fn insert_player(tx: &Transaction<'_>, player: &Player) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO players (player_id, profile_id, display_name, country, rating_1v1,
            rating_team, last_match_at, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            player.player_id.as_str(),
            player.profile_id,
            player.display_name,
            player.country,
            player.rating_1v1,
            player.rating_team,
            player.last_match_at.as_ref().map(to_db_time),
            player.added_at.as_ref().map(to_db_time)
        ],
    )?;
    debug!("Created player stub for profile {}", player.profile_id);
    Ok(())
}

fn update_player(tx: &Transaction<'_>, player: &Player) -> Result<(), StorageError> {
    tx.execute(
        "UPDATE players SET display_name = ?2, country = ?3, rating_1v1 = ?4, rating_team = ?5,
            last_match_at = ?6
         WHERE profile_id = ?1",
        params![
            player.profile_id,
            player.display_name,
            player.country,
            player.rating_1v1,
            player.rating_team,
            player.last_match_at.as_ref().map(to_db_time)
        ],
    )?;
    Ok(())
}
