//! SQLite store.
//!
//! Holds the canonical tables (players, matches, participants), the
//! civilization and map dictionaries, and the four aggregate projections.
//! Writers that must be atomic take a `rusqlite::Transaction`; everything
//! else goes through `Store`.

pub mod aggregates;
pub mod merge;
pub mod schema;
pub mod writer;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::info;

use crate::models::{MatchId, MatchResult, Player, PlayerId, ProfileId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid stored value in {table}.{column}: {value}")]
    InvalidValue {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

/// Render a timestamp the way it is stored: RFC 3339, UTC, whole seconds.
pub fn to_db_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp. Unreadable values are treated as absent.
pub fn from_db_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// One participant row joined to its match and player, as read by the
/// aggregation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRow {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub started_at: Option<DateTime<Utc>>,
    pub team: Option<i64>,
    pub civ_id: Option<i64>,
    pub civ_name: Option<String>,
    pub map_id: Option<i64>,
    pub map_name: Option<String>,
    pub result: MatchResult,
    pub rating_after: Option<i32>,
}

/// Table row counts, for reports and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub players: u64,
    pub matches: u64,
    pub participants: u64,
    pub civilizations: u64,
    pub maps: u64,
}

/// Database handle.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the database at `path` and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mut store = Store { conn };
        store.init_schema()?;
        info!("Opened database {}", path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create tables and seed the civilization dictionary. Idempotent.
    pub fn init_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(schema::CORE_TABLES)?;
        self.conn.execute_batch(&schema::aggregate_tables(""))?;

        let tx = self.conn.transaction()?;
        crate::reference::seed_civilizations(&tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Create a tracked player, or promote an existing stub to tracked.
    ///
    /// A supplied name replaces the stored one only under the placeholder
    /// rule. Returns the player's internal id.
    pub fn track_player(
        &mut self,
        profile_id: ProfileId,
        name: Option<&str>,
    ) -> Result<PlayerId, StorageError> {
        let now = to_db_time(&Utc::now());
        let tx = self.conn.transaction()?;

        let existing = merge::load_player(&tx, profile_id)?;
        let player_id = match existing {
            Some(mut player) => {
                if player.added_at.is_none() {
                    tx.execute(
                        "UPDATE players SET added_at = ?1 WHERE profile_id = ?2",
                        params![now, profile_id],
                    )?;
                }
                if let Some(name) = name {
                    if merge::merge_display_name(&mut player, name) {
                        tx.execute(
                            "UPDATE players SET display_name = ?1 WHERE profile_id = ?2",
                            params![player.display_name, profile_id],
                        )?;
                    }
                }
                player.player_id
            }
            None => {
                let player = Player::stub(profile_id, name);
                tx.execute(
                    "INSERT INTO players (player_id, profile_id, display_name, added_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![player.player_id.as_str(), profile_id, player.display_name, now],
                )?;
                player.player_id
            }
        };

        tx.commit()?;
        info!("Tracking profile {} as {}", profile_id, player_id);
        Ok(player_id)
    }

    /// Profile ids of tracked players, ascending.
    pub fn tracked_profile_ids(&self) -> Result<Vec<ProfileId>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT profile_id FROM players WHERE added_at IS NOT NULL ORDER BY profile_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<ProfileId>, _>>()?;
        Ok(ids)
    }

    /// Every match id already persisted.
    pub fn known_match_ids(&self) -> Result<HashSet<MatchId>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT match_id FROM matches")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<MatchId>, _>>()?;
        Ok(ids)
    }

    /// Look up a player by profile id.
    pub fn player(&self, profile_id: ProfileId) -> Result<Option<Player>, StorageError> {
        merge::load_player(&self.conn, profile_id)
    }

    /// Look up a stored match with its map name.
    pub fn load_match(
        &self,
        match_id: MatchId,
    ) -> Result<Option<crate::models::Match>, StorageError> {
        merge::load_match(&self.conn, match_id)
    }

    /// Participants of one match, ordered by profile id.
    pub fn load_participants(
        &self,
        match_id: MatchId,
    ) -> Result<Vec<crate::models::Participant>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT match_id, profile_id, team, civ_id, civ_name, result, rating_before, rating_after
             FROM participants WHERE match_id = ?1 ORDER BY profile_id",
        )?;
        let rows = stmt
            .query_map(params![match_id], merge::participant_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every participant joined to its match and player, oldest match first.
    ///
    /// Rows with no start time sort last; ties break on match id so the
    /// order is stable across runs.
    pub fn participant_rows(&self) -> Result<Vec<ParticipantRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.match_id, pl.player_id, m.started_at, p.team, p.civ_id, p.civ_name,
                    m.map_id, mp.map_name, p.result, p.rating_after
             FROM participants p
             JOIN matches m ON m.match_id = p.match_id
             JOIN players pl ON pl.profile_id = p.profile_id
             LEFT JOIN maps mp ON mp.map_id = m.map_id
             ORDER BY m.started_at IS NULL, m.started_at, p.match_id, p.profile_id",
        )?;
        let rows = stmt
            .query_map([], participant_row_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row counts of the canonical and dictionary tables.
    pub fn counts(&self) -> Result<TableCounts, StorageError> {
        let count = |table: &str| -> Result<u64, StorageError> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as u64)
        };
        Ok(TableCounts {
            players: count("players")?,
            matches: count("matches")?,
            participants: count("participants")?,
            civilizations: count("civilizations")?,
            maps: count("maps")?,
        })
    }

    /// Civilization name stored for an id.
    pub fn civ_name(&self, civ_id: i64) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT civ_name FROM civilizations WHERE civ_id = ?1",
                params![civ_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn participant_row_from_row(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    let result: Option<String> = row.get(8)?;
    Ok(ParticipantRow {
        match_id: row.get(0)?,
        player_id: PlayerId::new(row.get::<_, String>(1)?),
        started_at: from_db_time(row.get(2)?),
        team: row.get(3)?,
        civ_id: row.get(4)?,
        civ_name: row.get(5)?,
        map_id: row.get(6)?,
        map_name: row.get(7)?,
        result: MatchResult::from_code(result.as_deref()),
        rating_after: row.get(9)?,
    })
}
