//! Team-complement result inference.
//!
//! Applies only to matches with exactly two teams. Each team starts
//! `Unknown`, becomes `Won` on any explicit win among its members, else
//! `Lost` on any explicit loss. If exactly one team is determined, the other
//! takes the complement. Participants with an unknown result then inherit
//! their team's state. Explicit results are never changed, and matches with
//! any other team topology are left alone.

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::{MatchDraft, MatchResult};

/// Per-team state during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamState {
    Unknown,
    Won,
    Lost,
}

impl TeamState {
    fn from_results(results: impl IntoIterator<Item = MatchResult>) -> Self {
        let mut state = TeamState::Unknown;
        for result in results {
            match result {
                MatchResult::Win => return TeamState::Won,
                MatchResult::Loss => state = TeamState::Lost,
                MatchResult::Unknown => {}
            }
        }
        state
    }

    fn complement(self) -> Self {
        match self {
            TeamState::Won => TeamState::Lost,
            TeamState::Lost => TeamState::Won,
            TeamState::Unknown => TeamState::Unknown,
        }
    }

    fn as_result(self) -> MatchResult {
        match self {
            TeamState::Won => MatchResult::Win,
            TeamState::Lost => MatchResult::Loss,
            TeamState::Unknown => MatchResult::Unknown,
        }
    }
}

/// Team states of a two-team match after the complement step, or `None` for
/// any other topology.
pub fn team_states(draft: &MatchDraft) -> Option<BTreeMap<i64, TeamState>> {
    let mut teams: BTreeMap<i64, Vec<MatchResult>> = BTreeMap::new();
    for p in &draft.participants {
        if let Some(team) = p.team {
            teams.entry(team).or_default().push(p.result);
        }
    }
    if teams.len() != 2 {
        return None;
    }

    let mut states: BTreeMap<i64, TeamState> = teams
        .into_iter()
        .map(|(team, results)| (team, TeamState::from_results(results)))
        .collect();

    let values: Vec<TeamState> = states.values().copied().collect();
    let (a, b) = (values[0], values[1]);
    let resolved = match (a, b) {
        (TeamState::Unknown, known) if known != TeamState::Unknown => [known.complement(), known],
        (known, TeamState::Unknown) if known != TeamState::Unknown => [known, known.complement()],
        _ => [a, b],
    };
    for (state, value) in states.values_mut().zip(resolved) {
        *state = value;
    }
    Some(states)
}

/// Fill unknown results from team states. Returns how many participants
/// changed.
pub fn infer_results(draft: &mut MatchDraft) -> usize {
    let Some(states) = team_states(draft) else {
        return 0;
    };

    let mut inferred = 0;
    for p in draft.participants.iter_mut() {
        if p.result.is_known() {
            continue;
        }
        let Some(state) = p.team.and_then(|team| states.get(&team)) else {
            continue;
        };
        let result = state.as_result();
        if result.is_known() {
            p.result = result;
            inferred += 1;
        }
    }

    if inferred > 0 {
        debug!(
            "Inferred {} results for match {}",
            inferred,
            draft.match_id()
        );
    }
    inferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Match, Participant};
    use pretty_assertions::assert_eq;

    fn draft(players: &[(i64, Option<i64>, MatchResult)]) -> MatchDraft {
        MatchDraft {
            game: Match {
                match_id: 1,
                started_at: None,
                ended_at: None,
                duration_secs: None,
                map_name: None,
                map_id: None,
                ladder_label: None,
                player_count: players.len() as u32,
                team_count: 0,
                is_1v1: false,
                is_team_game: false,
                is_ranked: false,
            },
            participants: players
                .iter()
                .map(|(pid, team, result)| {
                    let mut p = Participant::new(1, *pid);
                    p.team = *team;
                    p.result = *result;
                    p
                })
                .collect(),
            aliases: Default::default(),
        }
    }

    fn results(d: &MatchDraft) -> Vec<MatchResult> {
        d.participants.iter().map(|p| p.result).collect()
    }

    use MatchResult::{Loss, Unknown, Win};

    #[test]
    fn test_explicit_win_makes_other_team_lose() {
        let mut d = draft(&[
            (1, Some(1), Win),
            (2, Some(1), Unknown),
            (3, Some(2), Unknown),
            (4, Some(2), Unknown),
        ]);

        assert_eq!(infer_results(&mut d), 3);
        assert_eq!(results(&d), vec![Win, Win, Loss, Loss]);
    }

    #[test]
    fn test_explicit_loss_makes_other_team_win() {
        let mut d = draft(&[(1, Some(0), Unknown), (2, Some(1), Loss)]);

        infer_results(&mut d);
        assert_eq!(results(&d), vec![Win, Loss]);
    }

    #[test]
    fn test_no_signal_stays_unknown() {
        let mut d = draft(&[(1, Some(1), Unknown), (2, Some(2), Unknown)]);

        assert_eq!(infer_results(&mut d), 0);
        assert_eq!(results(&d), vec![Unknown, Unknown]);
    }

    #[test]
    fn test_win_signal_beats_loss_signal_on_same_team() {
        let mut d = draft(&[
            (1, Some(1), Loss),
            (2, Some(1), Win),
            (3, Some(2), Unknown),
        ]);

        let states = team_states(&d).unwrap();
        assert_eq!(states[&1], TeamState::Won);
        assert_eq!(states[&2], TeamState::Lost);

        infer_results(&mut d);
        assert_eq!(results(&d), vec![Loss, Win, Loss]);
    }

    #[test]
    fn test_both_teams_determined_untouched() {
        let mut d = draft(&[(1, Some(1), Win), (2, Some(2), Win)]);
        assert_eq!(infer_results(&mut d), 0);
        assert_eq!(results(&d), vec![Win, Win]);
    }

    #[test]
    fn test_three_teams_not_inferred() {
        let mut d = draft(&[
            (1, Some(1), Win),
            (2, Some(2), Unknown),
            (3, Some(3), Unknown),
        ]);

        assert!(team_states(&d).is_none());
        assert_eq!(infer_results(&mut d), 0);
        assert_eq!(results(&d), vec![Win, Unknown, Unknown]);
    }

    #[test]
    fn test_teamless_participant_ignored() {
        let mut d = draft(&[
            (1, Some(1), Win),
            (2, Some(2), Unknown),
            (3, None, Unknown),
        ]);

        infer_results(&mut d);
        assert_eq!(results(&d), vec![Win, Loss, Unknown]);
    }

    #[test]
    fn test_single_team_not_inferred() {
        let mut d = draft(&[(1, Some(1), Win), (2, Some(1), Unknown)]);
        assert_eq!(infer_results(&mut d), 0);
    }
}
