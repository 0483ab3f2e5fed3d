//! Table definitions.

/// Canonical and dictionary tables.
///
/// Timestamps are RFC 3339 UTC text. `players.added_at` doubles as the
/// tracked flag. `participants.result` is `W`, `L` or NULL.
pub const CORE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS players (
    player_id TEXT PRIMARY KEY,
    profile_id INTEGER NOT NULL UNIQUE,
    display_name TEXT NOT NULL DEFAULT '',
    country TEXT,
    rating_1v1 INTEGER,
    rating_team INTEGER,
    last_match_at TEXT,
    added_at TEXT
);

CREATE TABLE IF NOT EXISTS civilizations (
    civ_id INTEGER PRIMARY KEY,
    civ_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS maps (
    map_id INTEGER PRIMARY KEY AUTOINCREMENT,
    map_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS matches (
    match_id INTEGER PRIMARY KEY,
    started_at TEXT,
    ended_at TEXT,
    duration_secs INTEGER,
    map_id INTEGER REFERENCES maps(map_id),
    ladder_label TEXT,
    player_count INTEGER NOT NULL DEFAULT 0,
    team_count INTEGER NOT NULL DEFAULT 0,
    is_1v1 INTEGER NOT NULL DEFAULT 0,
    is_team_game INTEGER NOT NULL DEFAULT 0,
    is_ranked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS participants (
    match_id INTEGER NOT NULL REFERENCES matches(match_id),
    profile_id INTEGER NOT NULL REFERENCES players(profile_id),
    team INTEGER,
    civ_id INTEGER REFERENCES civilizations(civ_id),
    civ_name TEXT,
    result TEXT CHECK (result IN ('W', 'L')),
    rating_before INTEGER,
    rating_after INTEGER,
    PRIMARY KEY (match_id, profile_id)
);

CREATE INDEX IF NOT EXISTS idx_participants_profile ON participants(profile_id);
CREATE INDEX IF NOT EXISTS idx_matches_started ON matches(started_at);
"#;

/// The four aggregate tables.
pub const AGGREGATE_TABLES: [&str; 4] = ["daily_stats", "civ_stats", "map_stats", "combat_stats"];

/// Aggregate table DDL with every table name prefixed by `prefix`.
///
/// The rebuild writes into `shadow_`-prefixed copies and renames them over
/// the live tables.
pub fn aggregate_tables(prefix: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {p}daily_stats (
    player_id TEXT NOT NULL,
    date TEXT NOT NULL,
    games INTEGER NOT NULL,
    wins INTEGER NOT NULL,
    closing_rating INTEGER,
    PRIMARY KEY (player_id, date)
);

CREATE TABLE IF NOT EXISTS {p}civ_stats (
    player_id TEXT NOT NULL,
    civ_id INTEGER,
    civ_name TEXT NOT NULL,
    games INTEGER NOT NULL,
    decided INTEGER NOT NULL,
    wins INTEGER NOT NULL,
    win_rate INTEGER NOT NULL,
    PRIMARY KEY (player_id, civ_name)
);

CREATE TABLE IF NOT EXISTS {p}map_stats (
    player_id TEXT NOT NULL,
    map_id INTEGER,
    map_name TEXT NOT NULL,
    games INTEGER NOT NULL,
    decided INTEGER NOT NULL,
    wins INTEGER NOT NULL,
    win_rate INTEGER NOT NULL,
    PRIMARY KEY (player_id, map_name)
);

CREATE TABLE IF NOT EXISTS {p}combat_stats (
    player_a TEXT NOT NULL,
    player_b TEXT NOT NULL,
    relation TEXT NOT NULL CHECK (relation IN ('teammate', 'opponent')),
    games INTEGER NOT NULL,
    decided INTEGER NOT NULL,
    wins INTEGER NOT NULL,
    win_rate INTEGER NOT NULL,
    PRIMARY KEY (player_a, player_b, relation)
);
"#,
        p = prefix
    )
}
