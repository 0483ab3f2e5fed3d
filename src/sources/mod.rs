//! Match history sources.
//!
//! Every upstream is wrapped in a `MatchSource`: given a profile id, produce
//! raw match records newest-first. Sources never fail as a whole; transport
//! and parse problems are logged, recorded in `SourceFetch::errors`, and the
//! records gathered so far are returned.

pub mod insights;
pub mod worldsedge;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{MatchId, ProfileId, RawMatch};

/// Caller-supplied limits for one fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Ids already persisted; reaching one stops the fetch
    pub known_match_ids: HashSet<MatchId>,

    /// Upper bound on pages requested for one profile
    pub max_pages: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            known_match_ids: HashSet::new(),
            max_pages: 100,
        }
    }
}

/// What one source returned for one profile.
#[derive(Debug, Clone, Default)]
pub struct SourceFetch {
    /// Records in newest-first order
    pub records: Vec<RawMatch>,

    pub pages_fetched: u32,

    /// Stopped because a known match id was reached
    pub stopped_early: bool,

    /// Records dropped because they could not be parsed
    pub records_skipped: u32,

    pub errors: Vec<String>,
}

impl SourceFetch {
    /// Append newest-first records until one with a known id appears.
    ///
    /// Returns `false` when a known id was reached; everything past it is
    /// assumed to be known as well.
    pub fn extend_until_known(
        &mut self,
        batch: impl IntoIterator<Item = RawMatch>,
        known: &HashSet<MatchId>,
    ) -> bool {
        for record in batch {
            if known.contains(&record.match_id) {
                info!(
                    "Match {} already stored, stopping fetch early",
                    record.match_id
                );
                self.stopped_early = true;
                return false;
            }
            self.records.push(record);
        }
        true
    }
}

/// Display data for a profile, from an alias lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAlias {
    pub alias: Option<String>,
    pub country: Option<String>,
}

/// A producer of raw match records for a profile.
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// Source identifier for logging and reports.
    fn name(&self) -> &'static str;

    /// Fetch match history for one profile, newest first.
    async fn fetch_matches(&self, profile_id: ProfileId, options: &FetchOptions) -> SourceFetch;

    /// Resolve display names for profiles. Sources without a lookup return
    /// an empty map.
    async fn resolve_aliases(&self, _profile_ids: &[ProfileId]) -> HashMap<ProfileId, PlayerAlias> {
        HashMap::new()
    }
}
