//! Match normalizer.
//!
//! Turns one `RawMatch` into a canonical `Match` plus participants. Field
//! names are resolved through the candidate tables in [`fields`]; anything
//! that cannot be resolved becomes `None` or a sentinel rather than an error.
//! A record with no usable id or no participants yields `None` and the
//! caller skips it.

pub mod fields;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{
    unknown_civ_name, Match, MatchDraft, MatchResult, Participant, ProfileId, RawMatch, RawMember,
    RawReport,
};
use crate::reference::{civ_id_for_name, civ_name_for_id, clean_map_name};
use fields::{
    civ_value, first_field, first_i64, result_from_code, result_from_value, value_as_i64,
    value_as_text, ALIAS_FIELDS, RATING_AFTER_FIELDS, RATING_BEFORE_FIELDS, RESULT_ALT_FIELDS,
    RESULT_CODE_FIELDS, TEAM_FIELDS,
};

/// Resolve a civilization value to (id, name).
///
/// Numeric ids map through the seed table, falling back to the sentinel
/// name. Names map back to a seed id case-insensitively; unknown names keep
/// the name with no id.
pub fn resolve_civ(value: &Value) -> (Option<i64>, Option<String>) {
    if let Some(civ_id) = value_as_i64(value) {
        let name = civ_name_for_id(civ_id)
            .map(str::to_string)
            .unwrap_or_else(|| unknown_civ_name(civ_id));
        return (Some(civ_id), Some(name));
    }

    match value_as_text(value) {
        Some(name) => match civ_id_for_name(&name) {
            Some(civ_id) => (
                Some(civ_id),
                civ_name_for_id(civ_id).map(str::to_string).or(Some(name)),
            ),
            None => (None, Some(name)),
        },
        None => (None, None),
    }
}

/// Resolve a report's result: coded field first, then the free-form one.
pub fn resolve_result(report: &RawReport) -> MatchResult {
    let coded = RESULT_CODE_FIELDS
        .iter()
        .filter_map(|name| report.get(name))
        .find_map(value_as_i64)
        .map(result_from_code)
        .unwrap_or_default();
    if coded.is_known() {
        return coded;
    }

    first_field(report, RESULT_ALT_FIELDS)
        .map(result_from_value)
        .unwrap_or_default()
}

fn report_rating(report: &RawReport, candidates: &[&str]) -> Option<i32> {
    first_i64(report, candidates).and_then(|r| i32::try_from(r).ok())
}

/// Completeness score used to pick among duplicate reports.
fn report_score(report: &RawReport) -> u32 {
    let mut score = 0;
    if resolve_result(report).is_known() {
        score += 10;
    }
    if report_rating(report, RATING_AFTER_FIELDS).is_some()
        || report_rating(report, RATING_BEFORE_FIELDS).is_some()
    {
        score += 5;
    }
    score
}

fn member_score(member: &RawMember) -> u32 {
    u32::from(member.new_rating.is_some()) + u32::from(member.old_rating.is_some())
}

/// Normalize one raw record.
pub fn normalize_match(raw: &RawMatch) -> Option<MatchDraft> {
    if raw.match_id <= 0 {
        warn!("Skipping record with invalid match id {}", raw.match_id);
        return None;
    }

    let mut order: Vec<ProfileId> = Vec::new();
    let mut seen: HashSet<ProfileId> = HashSet::new();

    let mut reports: HashMap<ProfileId, &RawReport> = HashMap::new();
    for report in &raw.reports {
        if seen.insert(report.profile_id) {
            order.push(report.profile_id);
        }
        match reports.get(&report.profile_id) {
            Some(current) if report_score(current) >= report_score(report) => {}
            _ => {
                reports.insert(report.profile_id, report);
            }
        }
    }

    let mut members: HashMap<ProfileId, &RawMember> = HashMap::new();
    for member in &raw.members {
        if seen.insert(member.profile_id) {
            order.push(member.profile_id);
        }
        match members.get(&member.profile_id) {
            Some(current) if member_score(current) >= member_score(member) => {}
            _ => {
                members.insert(member.profile_id, member);
            }
        }
    }

    order.retain(|pid| *pid > 0);
    if order.is_empty() {
        warn!("Skipping match {}: no participants", raw.match_id);
        return None;
    }

    let mut participants = Vec::with_capacity(order.len());
    let mut aliases = BTreeMap::new();
    for profile_id in order {
        let report = reports.get(&profile_id).copied();
        let member = members.get(&profile_id).copied();
        let mut participant = Participant::new(raw.match_id, profile_id);

        if let Some(report) = report {
            participant.team = first_i64(report, TEAM_FIELDS);
            let (civ_id, civ_name) = civ_value(report).map(resolve_civ).unwrap_or_default();
            participant.civ_id = civ_id;
            participant.civ_name = civ_name;
            participant.result = resolve_result(report);
            participant.rating_after = report_rating(report, RATING_AFTER_FIELDS);
            participant.rating_before = report_rating(report, RATING_BEFORE_FIELDS);
        }

        if let Some(member) = member {
            if member.new_rating.is_some() {
                participant.rating_after = member.new_rating;
            }
            if member.old_rating.is_some() {
                participant.rating_before = member.old_rating;
            }
        }

        let alias = member
            .and_then(|m| m.alias.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .or_else(|| report.and_then(|r| first_field(r, ALIAS_FIELDS)).and_then(value_as_text));
        if let Some(alias) = alias {
            aliases.insert(profile_id, alias);
        }

        participants.push(participant);
    }

    renumber_teams(&mut participants);

    let duration_secs = raw
        .duration_secs
        .or_else(|| match (raw.started_at, raw.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        })
        .map(|secs| secs.max(0));

    let mut game = Match {
        match_id: raw.match_id,
        started_at: raw.started_at,
        ended_at: raw.completed_at,
        duration_secs,
        map_name: raw.map_name.as_deref().and_then(clean_map_name),
        map_id: None,
        ladder_label: raw
            .ladder_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string),
        player_count: 0,
        team_count: 0,
        is_1v1: false,
        is_team_game: false,
        is_ranked: false,
    };
    apply_shape(&mut game, &participants);

    debug!(
        "Normalized match {}: {} players, {} teams",
        game.match_id, game.player_count, game.team_count
    );

    Some(MatchDraft {
        game,
        participants,
        aliases,
    })
}

/// Renumber teams densely from 0 in ascending order of the upstream value,
/// so 0/1 and 1/2 numberings of the same match agree.
fn renumber_teams(participants: &mut [Participant]) {
    let teams: BTreeSet<i64> = participants.iter().filter_map(|p| p.team).collect();
    for p in participants.iter_mut() {
        if let Some(team) = p.team {
            p.team = teams.iter().position(|t| *t == team).map(|i| i as i64);
        }
    }
}

/// Derive counts and the three shape flags from the participant set.
pub fn apply_shape(game: &mut Match, participants: &[Participant]) {
    let mut team_sizes: BTreeMap<i64, u32> = BTreeMap::new();
    for team in participants.iter().filter_map(|p| p.team) {
        *team_sizes.entry(team).or_default() += 1;
    }
    let max_team_size = team_sizes.values().copied().max().unwrap_or(0);

    game.player_count = participants.len() as u32;
    game.team_count = team_sizes.len() as u32;
    game.is_1v1 = game.player_count == 2 && game.team_count == 2;
    game.is_team_game = game.player_count > 2 && game.team_count == 2 && max_team_size > 1;
    game.is_ranked = participants
        .iter()
        .any(|p| p.rating_before.is_some() || p.rating_after.is_some());
}
