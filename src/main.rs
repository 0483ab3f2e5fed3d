use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aoe_group_tracker::config::AppConfig;
use aoe_group_tracker::inference::infer_results;
use aoe_group_tracker::models::{MatchDraft, ProfileId, RawMatch};
use aoe_group_tracker::normalize::normalize_match;
use aoe_group_tracker::sources::insights::parse_tile_page;
use aoe_group_tracker::sources::worldsedge::{parse_history_response, MatchHistoryResponse};
use aoe_group_tracker::storage::aggregates::rebuild_aggregates;
use aoe_group_tracker::storage::Store;
use aoe_group_tracker::sync::{SourceKind, SyncConfig, SyncOrchestrator};

#[derive(Parser)]
#[command(name = "aoe-group-tracker")]
#[command(about = "Match history ingestion and group statistics for tracked AoE2 players")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: String,

    /// Database path (overrides config)
    #[arg(long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new matches for every tracked player and store them
    Ingest {
        /// Only ingest from this source (worldsedge, insights); repeatable
        #[arg(long)]
        source: Vec<String>,

        /// Only ingest this profile (repeatable); default is every tracked player
        #[arg(long)]
        profile: Vec<ProfileId>,

        /// Page cap per player per source
        #[arg(long)]
        max_pages: Option<u32>,

        /// Skip the aggregate rebuild after writing
        #[arg(long)]
        no_rebuild: bool,

        /// Fetch and normalize but don't store
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute all aggregates from stored participants
    Rebuild,

    /// Start tracking a player
    Track {
        /// Upstream profile id
        profile_id: ProfileId,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Create the database and seed reference data
    InitDb,

    /// Debug utilities
    Debug {
        #[command(subcommand)]
        action: DebugAction,
    },
}

#[derive(Subcommand)]
enum DebugAction {
    /// Parse a saved match list (HTML page or JSON history response)
    ParseFixture {
        path: String,

        /// Print normalized matches instead of raw records
        #[arg(long)]
        normalize: bool,
    },

    /// Show table row counts
    Counts,
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("opening database {}", path.display()))
}

/// Parse a saved fixture: `.json` as a structured history response,
/// anything else as a scraped HTML page.
fn parse_fixture(path: &Path) -> Result<(Vec<RawMatch>, Vec<String>)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        let response: MatchHistoryResponse =
            serde_json::from_str(&contents).context("decoding history response")?;
        Ok(parse_history_response(&response))
    } else {
        let page = parse_tile_page(&contents);
        tracing::info!("{} tiles found", page.tiles_seen);
        Ok((page.records, page.errors))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(Path::new(&cli.config))
        .with_context(|| format!("loading config {}", cli.config))?;
    if let Some(database) = &cli.database {
        config.database_path = PathBuf::from(database);
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    init_logging(&config.log_level, cli.json_logs);
    tracing::info!("Starting aoe-group-tracker v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Ingest {
            source,
            profile,
            max_pages,
            no_rebuild,
            dry_run,
            json,
        } => {
            let kinds = source
                .iter()
                .map(|s| s.parse::<SourceKind>())
                .collect::<Result<Vec<_>, _>>()?;

            let sync_config = SyncConfig {
                profile_ids: if profile.is_empty() { None } else { Some(profile) },
                max_pages: max_pages.unwrap_or(config.insights.max_pages),
                rebuild_aggregates: !no_rebuild,
                dry_run,
            };
            let orchestrator = SyncOrchestrator::from_app_config(&config, sync_config, &kinds)?;

            let mut store = open_store(&config.database_path)?;
            let report = orchestrator.run(&mut store).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("=== Ingestion Report ===");
                println!("Players:               {}", report.players_tracked);
                println!("Records fetched:       {}", report.records_fetched);
                println!("Records skipped:       {}", report.records_skipped);
                println!("Unique matches:        {}", report.matches_unique);
                println!("Matches inserted:      {}", report.matches_inserted);
                println!("Matches backfilled:    {}", report.matches_backfilled);
                println!("Participants inserted: {}", report.participants_inserted);
                println!("Participants updated:  {}", report.participants_updated);
                println!("Players created:       {}", report.players_created);
                println!("Aggregates rebuilt:    {}", report.aggregates_rebuilt);
                println!("Duration:              {}ms", report.duration_ms);
                if !report.errors.is_empty() {
                    println!("\nErrors ({}):", report.errors.len());
                    for error in &report.errors {
                        println!("  - {}", error);
                    }
                }
            }
        }

        Commands::Rebuild => {
            let mut store = open_store(&config.database_path)?;
            let summary = rebuild_aggregates(&mut store)?;
            println!(
                "Rebuilt from {} participant rows: {} daily, {} civ, {} map, {} combat",
                summary.participants_scanned,
                summary.daily,
                summary.civs,
                summary.maps,
                summary.combat
            );
        }

        Commands::Track { profile_id, name } => {
            if profile_id <= 0 {
                bail!("profile id must be positive, got {}", profile_id);
            }
            let mut store = open_store(&config.database_path)?;
            let player_id = store.track_player(profile_id, name.as_deref())?;
            println!("Tracking profile {} ({})", profile_id, player_id);
        }

        Commands::InitDb => {
            let store = open_store(&config.database_path)?;
            let counts = store.counts()?;
            println!(
                "Database ready at {} ({} civilizations seeded)",
                config.database_path.display(),
                counts.civilizations
            );
        }

        Commands::Debug { action } => match action {
            DebugAction::ParseFixture { path, normalize } => {
                tracing::info!("Parsing fixture: {}", path);
                let (records, errors) = parse_fixture(Path::new(&path))?;

                if normalize {
                    let drafts: Vec<MatchDraft> = records
                        .iter()
                        .filter_map(normalize_match)
                        .map(|mut draft| {
                            infer_results(&mut draft);
                            draft
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&drafts)?);
                } else {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }

                if !errors.is_empty() {
                    eprintln!("{} records failed to parse:", errors.len());
                    for error in &errors {
                        eprintln!("  - {}", error);
                    }
                }
            }
            DebugAction::Counts => {
                let store = open_store(&config.database_path)?;
                let counts = store.counts()?;
                println!("players:       {}", counts.players);
                println!("matches:       {}", counts.matches);
                println!("participants:  {}", counts.participants);
                println!("civilizations: {}", counts.civilizations);
                println!("maps:          {}", counts.maps);
            }
        },
    }

    Ok(())
}
