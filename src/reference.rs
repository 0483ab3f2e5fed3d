//! Civilization and map dictionaries.
//!
//! Civilizations are keyed by the game's fixed numeric id and seeded from a
//! static table. Maps are keyed by cleaned name and get a store-assigned id
//! on first sighting. Resolution runs once per batch, inside the write
//! transaction, so the ids attached to drafts are part of the same commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::models::{merge_civ_name, unknown_civ_name, MatchDraft};

/// Static civilization table: id → name.
pub const CIVILIZATIONS: &[(i64, &str)] = &[
    (0, "Random"),
    (1, "Britons"),
    (2, "Franks"),
    (3, "Goths"),
    (4, "Teutons"),
    (5, "Japanese"),
    (6, "Chinese"),
    (7, "Byzantines"),
    (8, "Persians"),
    (9, "Saracens"),
    (10, "Turks"),
    (11, "Vikings"),
    (12, "Mongols"),
    (13, "Celts"),
    (14, "Spanish"),
    (15, "Aztecs"),
    (16, "Mayans"),
    (17, "Huns"),
    (18, "Koreans"),
    (19, "Italians"),
    (20, "Hindustanis"),
    (21, "Incas"),
    (22, "Magyars"),
    (23, "Slavs"),
    (24, "Portuguese"),
    (25, "Ethiopians"),
    (26, "Malians"),
    (27, "Berbers"),
    (28, "Khmer"),
    (29, "Malay"),
    (30, "Burmese"),
    (31, "Vietnamese"),
    (32, "Bulgarians"),
    (33, "Tatars"),
    (34, "Cumans"),
    (35, "Lithuanians"),
    (36, "Burgundians"),
    (37, "Sicilians"),
    (38, "Poles"),
    (39, "Bohemians"),
    (40, "Dravidians"),
    (41, "Bengalis"),
    (42, "Gurjaras"),
    (43, "Romans"),
    (44, "Armenians"),
    (45, "Georgians"),
];

/// Seed name for a civilization id.
pub fn civ_name_for_id(civ_id: i64) -> Option<&'static str> {
    CIVILIZATIONS
        .iter()
        .find(|(id, _)| *id == civ_id)
        .map(|(_, name)| *name)
}

/// Seed id for a civilization name, case-insensitive.
pub fn civ_id_for_name(name: &str) -> Option<i64> {
    let name = name.trim();
    CIVILIZATIONS
        .iter()
        .find(|(_, seed)| seed.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

/// Dictionary name for an id: the seed name, else the sentinel.
pub fn civ_display_name(civ_id: i64) -> String {
    civ_name_for_id(civ_id)
        .map(str::to_string)
        .unwrap_or_else(|| unknown_civ_name(civ_id))
}

/// Strip whitespace and the `.rms` script extension. Empty names are absent.
pub fn clean_map_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stem = match trimmed.len().checked_sub(4) {
        Some(cut) if trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".rms") => {
            &trimmed[..cut]
        }
        _ => trimmed,
    };
    let stem = stem.trim();
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Insert every seed civilization, upgrading sentinel names in place.
pub fn seed_civilizations(tx: &Transaction<'_>) -> rusqlite::Result<usize> {
    let mut written = 0;
    for (civ_id, name) in CIVILIZATIONS {
        if ensure_civilization(tx, *civ_id, name)? {
            written += 1;
        }
    }
    if written > 0 {
        info!("Seeded {} civilizations", written);
    }
    Ok(written)
}

/// Make sure a civilization row exists. Returns whether a row was written.
fn ensure_civilization(tx: &Transaction<'_>, civ_id: i64, name: &str) -> rusqlite::Result<bool> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT civ_name FROM civilizations WHERE civ_id = ?1",
            params![civ_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => {
            tx.execute(
                "INSERT INTO civilizations (civ_id, civ_name) VALUES (?1, ?2)",
                params![civ_id, name],
            )?;
            debug!("Added civilization {} ({})", civ_id, name);
            Ok(true)
        }
        Some(current) => match merge_civ_name(&current, name) {
            Some(upgraded) => {
                tx.execute(
                    "UPDATE civilizations SET civ_name = ?1 WHERE civ_id = ?2",
                    params![upgraded, civ_id],
                )?;
                debug!("Renamed civilization {}: {} -> {}", civ_id, current, upgraded);
                Ok(true)
            }
            None => Ok(false),
        },
    }
}

/// What one batch added to the dictionaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSummary {
    pub civilizations_written: usize,
    pub maps_created: usize,

    /// Map name → id for every map seen in the batch
    pub maps: HashMap<String, i64>,
}

/// Resolve every civilization and map in the batch, extending the
/// dictionaries as needed, and attach map ids to the drafts.
pub fn resolve_references(
    tx: &Transaction<'_>,
    drafts: &mut [MatchDraft],
) -> rusqlite::Result<ReferenceSummary> {
    let mut summary = ReferenceSummary::default();

    let mut civs: BTreeMap<i64, String> = BTreeMap::new();
    let mut map_names: BTreeSet<String> = BTreeSet::new();
    for draft in drafts.iter() {
        for participant in &draft.participants {
            if let Some(civ_id) = participant.civ_id {
                let name = participant
                    .civ_name
                    .clone()
                    .unwrap_or_else(|| civ_display_name(civ_id));
                civs.entry(civ_id).or_insert(name);
            }
        }
        if let Some(name) = &draft.game.map_name {
            map_names.insert(name.clone());
        }
    }

    for (civ_id, name) in &civs {
        if ensure_civilization(tx, *civ_id, name)? {
            summary.civilizations_written += 1;
        }
    }

    for name in map_names {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT map_id FROM maps WHERE map_name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let map_id = match existing {
            Some(id) => id,
            None => {
                tx.execute("INSERT INTO maps (map_name) VALUES (?1)", params![name])?;
                summary.maps_created += 1;
                debug!("Added map {:?}", name);
                tx.last_insert_rowid()
            }
        };
        summary.maps.insert(name, map_id);
    }

    for draft in drafts.iter_mut() {
        if let Some(name) = &draft.game.map_name {
            draft.game.map_id = summary.maps.get(name).copied();
        }
    }

    if summary.civilizations_written > 0 || summary.maps_created > 0 {
        info!(
            "Reference dictionaries extended: {} civilizations, {} maps",
            summary.civilizations_written, summary.maps_created
        );
    }
    Ok(summary)
}
