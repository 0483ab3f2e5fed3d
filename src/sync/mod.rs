//! Sync orchestrator.
//!
//! Coordinates one ingestion run:
//! 1. Fetch raw history for every tracked player from every enabled source
//! 2. Resolve display names for every profile seen
//! 3. Normalize records and infer missing results
//! 4. Write the batch in one transaction
//! 5. Optionally rebuild the aggregates
//!
//! Players and sources are walked sequentially; the fetcher's politeness
//! delay spaces out requests.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::fetch::{Fetcher, FetcherConfig};
use crate::inference::infer_results;
use crate::models::{MatchDraft, ProfileId, RawMatch};
use crate::normalize::normalize_match;
use crate::sources::insights::InsightsSource;
use crate::sources::worldsedge::WorldsEdgeSource;
use crate::sources::{FetchOptions, MatchSource, PlayerAlias};
use crate::storage::aggregates::rebuild_aggregates;
use crate::storage::writer::{dedup_drafts, write_batch};
use crate::storage::Store;

/// Errors that can occur during sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::fetch::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("No sources configured")]
    NoSources,

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

/// Source to sync from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// WorldsEdge community API (structured JSON)
    WorldsEdge,

    /// aoe2insights match pages (scraped HTML)
    Insights,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::WorldsEdge => "worldsedge",
            SourceKind::Insights => "insights",
        }
    }
}

impl FromStr for SourceKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worldsedge" | "api" => Ok(SourceKind::WorldsEdge),
            "insights" | "aoe2insights" | "scrape" => Ok(SourceKind::Insights),
            other => Err(SyncError::UnknownSource(other.to_string())),
        }
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Profiles to ingest (None = every tracked player)
    pub profile_ids: Option<Vec<ProfileId>>,

    /// Page cap per player per source
    pub max_pages: u32,

    /// Rebuild aggregates after a successful write
    pub rebuild_aggregates: bool,

    /// Dry run mode (fetch and normalize but don't store)
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            profile_ids: None,
            max_pages: 100,
            rebuild_aggregates: true,
            dry_run: false,
        }
    }
}

/// Structured outcome of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub players_tracked: usize,
    pub records_fetched: usize,
    pub matches_unique: usize,
    pub matches_inserted: usize,
    pub matches_backfilled: usize,
    pub participants_inserted: usize,
    pub participants_updated: usize,
    pub players_created: usize,
    pub records_skipped: usize,
    pub aggregates_rebuilt: bool,
    pub errors: Vec<String>,
}

/// Sync orchestrator.
pub struct SyncOrchestrator {
    config: SyncConfig,
    sources: Vec<Box<dyn MatchSource>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator over explicit sources.
    pub fn new(config: SyncConfig, sources: Vec<Box<dyn MatchSource>>) -> Self {
        Self { config, sources }
    }

    /// Build the enabled sources from application config.
    ///
    /// `only` restricts to the named kinds; an empty slice means every
    /// source enabled in config.
    pub fn from_app_config(
        app: &AppConfig,
        config: SyncConfig,
        only: &[SourceKind],
    ) -> Result<Self, SyncError> {
        let fetcher = Fetcher::new(FetcherConfig::from(&app.fetch))?;
        let wanted = |kind: SourceKind, enabled: bool| {
            if only.is_empty() {
                enabled
            } else {
                only.contains(&kind)
            }
        };

        let mut sources: Vec<Box<dyn MatchSource>> = Vec::new();
        if wanted(SourceKind::WorldsEdge, app.worldsedge.enabled) {
            sources.push(Box::new(WorldsEdgeSource::new(
                fetcher.clone(),
                &app.worldsedge,
            )));
        }
        if wanted(SourceKind::Insights, app.insights.enabled) {
            sources.push(Box::new(InsightsSource::new(fetcher, &app.insights)));
        }

        if sources.is_empty() {
            return Err(SyncError::NoSources);
        }
        Ok(Self::new(config, sources))
    }

    /// Names of the configured sources.
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Run a single ingestion pass against `store`.
    pub async fn run(&self, store: &mut Store) -> Result<IngestReport, SyncError> {
        if self.sources.is_empty() {
            return Err(SyncError::NoSources);
        }

        let started = Utc::now();
        let clock = std::time::Instant::now();
        let mut report = IngestReport {
            started_at: Some(started),
            ..Default::default()
        };

        let profile_ids = match &self.config.profile_ids {
            Some(ids) => ids.clone(),
            None => store.tracked_profile_ids()?,
        };
        report.players_tracked = profile_ids.len();
        if profile_ids.is_empty() {
            warn!("No players to ingest");
        }

        let options = FetchOptions {
            known_match_ids: store.known_match_ids()?,
            max_pages: self.config.max_pages,
        };
        info!(
            "Starting ingestion for {} players from {:?} ({} matches already stored)",
            profile_ids.len(),
            self.source_names(),
            options.known_match_ids.len()
        );

        let raw = self.fetch_all(&profile_ids, &options, &mut report).await;
        report.records_fetched = raw.len();

        let aliases = self.resolve_aliases(&raw).await;

        let mut drafts: Vec<MatchDraft> = Vec::with_capacity(raw.len());
        for record in &raw {
            match normalize_match(record) {
                Some(mut draft) => {
                    infer_results(&mut draft);
                    drafts.push(draft);
                }
                None => {
                    report.records_skipped += 1;
                    report
                        .errors
                        .push(format!("match {}: unparseable record", record.match_id));
                }
            }
        }

        if self.config.dry_run {
            report.matches_unique = dedup_drafts(drafts).len();
            info!(
                "Dry run: {} unique matches normalized, nothing written",
                report.matches_unique
            );
        } else {
            let summary = write_batch(store, drafts, &aliases)?;
            report.matches_unique = summary.matches_unique;
            report.matches_inserted = summary.matches_inserted;
            report.matches_backfilled = summary.matches_backfilled;
            report.participants_inserted = summary.participants_inserted;
            report.participants_updated = summary.participants_updated;
            report.players_created = summary.players_created;

            if self.config.rebuild_aggregates {
                match rebuild_aggregates(store) {
                    Ok(_) => report.aggregates_rebuilt = true,
                    Err(e) => {
                        error!("Aggregate rebuild failed, previous snapshot kept: {}", e);
                        report.errors.push(format!("aggregate rebuild: {}", e));
                    }
                }
            }
        }

        report.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            "Ingestion completed: {} records, {} new matches, {} errors in {:?}",
            report.records_fetched,
            report.matches_inserted,
            report.errors.len(),
            Duration::from_millis(report.duration_ms)
        );
        Ok(report)
    }

    async fn fetch_all(
        &self,
        profile_ids: &[ProfileId],
        options: &FetchOptions,
        report: &mut IngestReport,
    ) -> Vec<RawMatch> {
        let mut raw = Vec::new();
        for profile_id in profile_ids {
            for source in &self.sources {
                let fetch = source.fetch_matches(*profile_id, options).await;
                if !fetch.errors.is_empty() {
                    error!(
                        "{}: {} errors for profile {}",
                        source.name(),
                        fetch.errors.len(),
                        profile_id
                    );
                }
                info!(
                    "{}: profile {}: {} records, {} pages{}",
                    source.name(),
                    profile_id,
                    fetch.records.len(),
                    fetch.pages_fetched,
                    if fetch.stopped_early { " (stopped at known match)" } else { "" }
                );
                report.records_skipped += fetch.records_skipped as usize;
                report.errors.extend(fetch.errors);
                raw.extend(fetch.records);
            }
        }
        raw
    }

    /// Ask every source for aliases of every profile seen; earlier sources
    /// win on conflicts.
    async fn resolve_aliases(&self, raw: &[RawMatch]) -> HashMap<ProfileId, PlayerAlias> {
        let ids: BTreeSet<ProfileId> = raw
            .iter()
            .flat_map(|r| {
                r.members
                    .iter()
                    .map(|m| m.profile_id)
                    .chain(r.reports.iter().map(|p| p.profile_id))
            })
            .filter(|pid| *pid > 0)
            .collect();
        if ids.is_empty() {
            return HashMap::new();
        }
        let ids: Vec<ProfileId> = ids.into_iter().collect();

        let mut resolved = HashMap::new();
        for source in &self.sources {
            for (pid, alias) in source.resolve_aliases(&ids).await {
                resolved.entry(pid).or_insert(alias);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CombatRelation, MatchResult, RawMember, RawReport};
    use crate::sources::SourceFetch;
    use crate::storage::aggregates::load_aggregates;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    /// In-memory source serving canned newest-first histories.
    #[derive(Default)]
    struct FakeSource {
        histories: HashMap<ProfileId, Vec<RawMatch>>,
        failing: HashSet<ProfileId>,
        aliases: HashMap<ProfileId, PlayerAlias>,
    }

    #[async_trait]
    impl MatchSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_matches(&self, profile_id: ProfileId, options: &FetchOptions) -> SourceFetch {
            let mut out = SourceFetch::default();
            if self.failing.contains(&profile_id) {
                out.errors.push(format!("fake: profile {}: connection refused", profile_id));
                return out;
            }
            out.pages_fetched = 1;
            let records = self.histories.get(&profile_id).cloned().unwrap_or_default();
            out.extend_until_known(records, &options.known_match_ids);
            out
        }

        async fn resolve_aliases(&self, profile_ids: &[ProfileId]) -> HashMap<ProfileId, PlayerAlias> {
            self.aliases
                .iter()
                .filter(|(pid, _)| profile_ids.contains(pid))
                .map(|(pid, a)| (*pid, a.clone()))
                .collect()
        }
    }

    fn one_v_one(match_id: i64, winner_code: Option<i64>) -> RawMatch {
        let mut raw = RawMatch::new(match_id);
        raw.started_at = Some(Utc.with_ymd_and_hms(2024, 7, 1, 20, 0, 0).unwrap() + chrono::Duration::hours(match_id));
        raw.completed_at = raw.started_at.map(|t| t + chrono::Duration::minutes(25));
        raw.map_name = Some("Arena.rms".to_string());
        raw.members = vec![
            RawMember {
                profile_id: 100,
                old_rating: Some(1500),
                new_rating: Some(1512),
                alias: None,
            },
            RawMember {
                profile_id: 200,
                old_rating: Some(1490),
                new_rating: Some(1478),
                alias: None,
            },
        ];
        let mut first = RawReport::new(100)
            .with("teamid", 0)
            .with("civilization_id", 1);
        if let Some(code) = winner_code {
            first = first.with("resulttype", code);
        }
        raw.reports = vec![
            first,
            RawReport::new(200).with("teamid", 1).with("civ", "Franks"),
        ];
        raw
    }

    fn orchestrator(source: FakeSource) -> SyncOrchestrator {
        SyncOrchestrator::new(SyncConfig::default(), vec![Box::new(source)])
    }

    fn tracked_store(ids: &[ProfileId]) -> Store {
        let mut store = Store::in_memory().unwrap();
        for id in ids {
            store.track_player(*id, None).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_one_v_one_scenario() {
        let mut store = tracked_store(&[100]);
        let mut source = FakeSource::default();
        source.histories.insert(100, vec![one_v_one(1, Some(1))]);

        let report = orchestrator(source).run(&mut store).await.unwrap();

        assert_eq!(report.matches_inserted, 1);
        assert_eq!(report.participants_inserted, 2);
        assert!(report.aggregates_rebuilt);
        assert!(report.errors.is_empty());

        let game = store.load_match(1).unwrap().unwrap();
        assert!(game.is_1v1);
        assert!(!game.is_team_game);
        assert!(game.is_ranked);
        assert_eq!(game.map_name.as_deref(), Some("Arena"));

        let rows = store.load_participants(1).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].result, MatchResult::Win);
        assert_eq!(rows[1].result, MatchResult::Loss);
        assert_eq!(rows[1].civ_name.as_deref(), Some("Franks"));

        let p100 = store.player(100).unwrap().unwrap().player_id;
        let p200 = store.player(200).unwrap().unwrap().player_id;
        let aggs = load_aggregates(store.conn()).unwrap();
        let civ = aggs.civ_for(&p100, "Britons").unwrap();
        assert_eq!((civ.games, civ.wins, civ.win_rate), (1, 1, 100));

        let xy = aggs.combat_between(&p100, &p200, CombatRelation::Opponent).unwrap();
        assert_eq!((xy.games, xy.wins), (1, 1));
        let yx = aggs.combat_between(&p200, &p100, CombatRelation::Opponent).unwrap();
        assert_eq!((yx.games, yx.wins), (1, 0));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let mut store = tracked_store(&[100]);
        let mut source = FakeSource::default();
        source
            .histories
            .insert(100, vec![one_v_one(2, Some(1)), one_v_one(1, None)]);
        let orchestrator = orchestrator(source);

        orchestrator.run(&mut store).await.unwrap();
        let counts = store.counts().unwrap();
        let rows = (store.load_participants(1).unwrap(), store.load_participants(2).unwrap());
        let aggs = load_aggregates(store.conn()).unwrap();

        let second = orchestrator.run(&mut store).await.unwrap();

        assert_eq!(second.records_fetched, 0);
        assert_eq!(store.counts().unwrap(), counts);
        assert_eq!(
            (store.load_participants(1).unwrap(), store.load_participants(2).unwrap()),
            rows
        );
        assert_eq!(load_aggregates(store.conn()).unwrap(), aggs);
    }

    #[tokio::test]
    async fn test_known_ids_passed_and_early_exit() {
        let mut store = tracked_store(&[100]);
        let mut first = FakeSource::default();
        first.histories.insert(100, vec![one_v_one(1, Some(1))]);
        orchestrator(first).run(&mut store).await.unwrap();

        let mut second = FakeSource::default();
        second
            .histories
            .insert(100, vec![one_v_one(3, Some(1)), one_v_one(1, Some(1)), one_v_one(0, None)]);
        let orchestrator = orchestrator(second);
        let report = orchestrator.run(&mut store).await.unwrap();

        assert_eq!(report.records_fetched, 1);
        assert_eq!(report.matches_inserted, 1);
        assert_eq!(store.counts().unwrap().matches, 2);
    }

    #[tokio::test]
    async fn test_same_match_for_two_tracked_players_is_deduplicated() {
        let mut store = tracked_store(&[100, 200]);
        let mut source = FakeSource::default();
        source.histories.insert(100, vec![one_v_one(5, Some(1))]);
        source.histories.insert(200, vec![one_v_one(5, None)]);

        let report = orchestrator(source).run(&mut store).await.unwrap();

        assert_eq!(report.records_fetched, 2);
        assert_eq!(report.matches_unique, 1);
        let counts = store.counts().unwrap();
        assert_eq!(counts.matches, 1);
        assert_eq!(counts.participants, 2);
    }

    #[tokio::test]
    async fn test_failing_player_does_not_stop_others() {
        let mut store = tracked_store(&[100, 300]);
        let mut source = FakeSource::default();
        source.failing.insert(100);
        let mut other = one_v_one(8, Some(1));
        for m in other.members.iter_mut() {
            m.profile_id += 200;
        }
        for r in other.reports.iter_mut() {
            r.profile_id += 200;
        }
        source.histories.insert(300, vec![other]);

        let report = orchestrator(source).run(&mut store).await.unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("profile 100"));
        assert_eq!(report.matches_inserted, 1);
    }

    #[tokio::test]
    async fn test_unparseable_records_are_skipped() {
        let mut store = tracked_store(&[100]);
        let mut source = FakeSource::default();
        source
            .histories
            .insert(100, vec![RawMatch::new(77), one_v_one(6, Some(1))]);

        let report = orchestrator(source).run(&mut store).await.unwrap();

        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.matches_inserted, 1);
    }

    #[tokio::test]
    async fn test_aliases_name_new_stubs() {
        let mut store = tracked_store(&[100]);
        let mut source = FakeSource::default();
        source.histories.insert(100, vec![one_v_one(1, Some(1))]);
        source.aliases.insert(
            200,
            PlayerAlias {
                alias: Some("Hera".to_string()),
                country: Some("ca".to_string()),
            },
        );

        orchestrator(source).run(&mut store).await.unwrap();

        let hera = store.player(200).unwrap().unwrap();
        assert_eq!(hera.display_name, "Hera");
        assert_eq!(hera.country.as_deref(), Some("ca"));
        assert!(!hera.is_tracked());
        assert_eq!(store.player(100).unwrap().unwrap().display_name, "PID 100");
    }

    #[tokio::test]
    async fn test_failed_rebuild_still_reports_committed_batch() {
        let mut store = tracked_store(&[100]);
        store
            .conn()
            .execute_batch("CREATE VIEW shadow_civ_stats AS SELECT 1 AS x;")
            .unwrap();
        let mut source = FakeSource::default();
        source.histories.insert(100, vec![one_v_one(1, Some(1))]);

        let report = orchestrator(source).run(&mut store).await.unwrap();

        assert_eq!(report.matches_inserted, 1);
        assert!(!report.aggregates_rebuilt);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("aggregate rebuild"));
        assert_eq!(store.counts().unwrap().matches, 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let mut store = tracked_store(&[100]);
        let mut source = FakeSource::default();
        source.histories.insert(100, vec![one_v_one(1, Some(1))]);
        let orchestrator = SyncOrchestrator::new(
            SyncConfig {
                dry_run: true,
                ..Default::default()
            },
            vec![Box::new(source)],
        );

        let report = orchestrator.run(&mut store).await.unwrap();

        assert_eq!(report.matches_unique, 1);
        assert_eq!(store.counts().unwrap().matches, 0);
        assert!(!report.aggregates_rebuilt);
    }

    #[tokio::test]
    async fn test_no_sources() {
        let mut store = Store::in_memory().unwrap();
        let orchestrator = SyncOrchestrator::new(SyncConfig::default(), vec![]);
        assert!(matches!(
            orchestrator.run(&mut store).await,
            Err(SyncError::NoSources)
        ));
    }

    #[test]
    fn test_from_app_config_respects_enabled_flags() {
        let app = AppConfig::default();
        let orchestrator =
            SyncOrchestrator::from_app_config(&app, SyncConfig::default(), &[]).unwrap();
        assert_eq!(orchestrator.source_names(), vec!["worldsedge"]);

        let both = SyncOrchestrator::from_app_config(
            &app,
            SyncConfig::default(),
            &[SourceKind::WorldsEdge, SourceKind::Insights],
        )
        .unwrap();
        assert_eq!(both.source_names(), vec!["worldsedge", "insights"]);

        let mut none = AppConfig::default();
        none.worldsedge.enabled = false;
        assert!(matches!(
            SyncOrchestrator::from_app_config(&none, SyncConfig::default(), &[]),
            Err(SyncError::NoSources)
        ));
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!("WorldsEdge".parse::<SourceKind>().unwrap(), SourceKind::WorldsEdge);
        assert_eq!("scrape".parse::<SourceKind>().unwrap(), SourceKind::Insights);
        assert!("bcp".parse::<SourceKind>().is_err());
        assert_eq!(
            serde_json::to_string(&SourceKind::Insights).unwrap(),
            "\"insights\""
        );
    }

    #[test]
    fn test_ingest_report_serializes() {
        let report = IngestReport {
            players_tracked: 2,
            errors: vec!["x".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["players_tracked"], 2);
        assert_eq!(json["errors"][0], "x");
    }
}
