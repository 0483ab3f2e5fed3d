//! Aggregate persistence.
//!
//! A rebuild computes every rollup in memory, writes it into `shadow_`
//! tables and renames them over the live ones, all inside one transaction.
//! Readers see either the previous snapshot or the new one.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use tracing::info;

use super::schema::{aggregate_tables, AGGREGATE_TABLES};
use super::{Store, StorageError};
use crate::calculate::compute_aggregates;
use crate::models::{
    AggregateSet, CivStat, CombatRelation, CombatStat, DailyStat, MapStat, PlayerId,
};

const SHADOW_PREFIX: &str = "shadow_";

/// Row counts written by a rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub participants_scanned: usize,
    pub daily: usize,
    pub civs: usize,
    pub maps: usize,
    pub combat: usize,
}

/// Recompute all aggregates from the stored participants.
pub fn rebuild_aggregates(store: &mut Store) -> Result<RebuildSummary, StorageError> {
    let rows = store.participant_rows()?;
    let set = compute_aggregates(&rows);
    replace_aggregates(store.conn_mut(), &set)?;

    let summary = RebuildSummary {
        participants_scanned: rows.len(),
        daily: set.daily.len(),
        civs: set.civs.len(),
        maps: set.maps.len(),
        combat: set.combat.len(),
    };
    info!(
        "Rebuilt aggregates from {} participant rows: {} daily, {} civ, {} map, {} combat",
        summary.participants_scanned, summary.daily, summary.civs, summary.maps, summary.combat
    );
    Ok(summary)
}

/// Atomically replace the live aggregate tables with `set`.
pub fn replace_aggregates(conn: &mut Connection, set: &AggregateSet) -> Result<(), StorageError> {
    let tx = conn.transaction()?;

    for table in AGGREGATE_TABLES {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}{};", SHADOW_PREFIX, table))?;
    }
    tx.execute_batch(&aggregate_tables(SHADOW_PREFIX))?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO shadow_daily_stats (player_id, date, games, wins, closing_rating)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for d in &set.daily {
            stmt.execute(params![
                d.player_id.as_str(),
                d.date.format("%Y-%m-%d").to_string(),
                d.games,
                d.wins,
                d.closing_rating
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO shadow_civ_stats (player_id, civ_id, civ_name, games, decided, wins, win_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for c in &set.civs {
            stmt.execute(params![
                c.player_id.as_str(),
                c.civ_id,
                c.civ_name,
                c.games,
                c.decided,
                c.wins,
                c.win_rate
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO shadow_map_stats (player_id, map_id, map_name, games, decided, wins, win_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for m in &set.maps {
            stmt.execute(params![
                m.player_id.as_str(),
                m.map_id,
                m.map_name,
                m.games,
                m.decided,
                m.wins,
                m.win_rate
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO shadow_combat_stats (player_a, player_b, relation, games, decided, wins, win_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for c in &set.combat {
            stmt.execute(params![
                c.player_a.as_str(),
                c.player_b.as_str(),
                c.relation.as_str(),
                c.games,
                c.decided,
                c.wins,
                c.win_rate
            ])?;
        }
    }

    for table in AGGREGATE_TABLES {
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             ALTER TABLE {prefix}{table} RENAME TO {table};",
            table = table,
            prefix = SHADOW_PREFIX
        ))?;
    }

    tx.commit()?;
    Ok(())
}

/// Read the live aggregate tables back.
pub fn load_aggregates(conn: &Connection) -> Result<AggregateSet, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT player_id, date, games, wins, closing_rating FROM daily_stats
         ORDER BY player_id, date",
    )?;
    let daily = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<i32>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(player_id, date, games, wins, closing_rating)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
                StorageError::InvalidValue {
                    table: "daily_stats",
                    column: "date",
                    value: date.clone(),
                }
            })?;
            Ok(DailyStat {
                player_id: PlayerId::new(player_id),
                date,
                games,
                wins,
                closing_rating,
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

    let mut stmt = conn.prepare(
        "SELECT player_id, civ_id, civ_name, games, decided, wins, win_rate FROM civ_stats
         ORDER BY player_id, civ_name",
    )?;
    let civs = stmt
        .query_map([], |row| {
            Ok(CivStat {
                player_id: PlayerId::new(row.get::<_, String>(0)?),
                civ_id: row.get(1)?,
                civ_name: row.get(2)?,
                games: row.get(3)?,
                decided: row.get(4)?,
                wins: row.get(5)?,
                win_rate: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT player_id, map_id, map_name, games, decided, wins, win_rate FROM map_stats
         ORDER BY player_id, map_name",
    )?;
    let maps = stmt
        .query_map([], |row| {
            Ok(MapStat {
                player_id: PlayerId::new(row.get::<_, String>(0)?),
                map_id: row.get(1)?,
                map_name: row.get(2)?,
                games: row.get(3)?,
                decided: row.get(4)?,
                wins: row.get(5)?,
                win_rate: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT player_a, player_b, relation, games, decided, wins, win_rate FROM combat_stats
         ORDER BY player_a, player_b, relation",
    )?;
    let combat = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, u32>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(a, b, relation, games, decided, wins, win_rate)| {
            let relation =
                CombatRelation::parse(&relation).ok_or_else(|| StorageError::InvalidValue {
                    table: "combat_stats",
                    column: "relation",
                    value: relation.clone(),
                })?;
            Ok(CombatStat {
                player_a: PlayerId::new(a),
                player_b: PlayerId::new(b),
                relation,
                games,
                decided,
                wins,
                win_rate,
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

    Ok(AggregateSet {
        daily,
        civs,
        maps,
        combat,
    })
}
