//! # AoE Group Tracker
//!
//! Match ingestion and statistics for a closed group of Age of Empires II
//! players.
//!
//! ## Architecture
//!
//! - **sources**: upstream adapters (structured API, scraped match pages)
//! - **normalize**: raw record → canonical match and participants
//! - **inference**: team-complement result inference
//! - **reference**: civilization and map dictionaries
//! - **storage**: SQLite store, merge policy, batch writer
//! - **calculate**: aggregate rollups (daily, civ, map, combat)
//! - **sync**: one ingestion run end to end
//! - **config**: configuration loading and validation

pub mod calculate;
pub mod config;
pub mod fetch;
pub mod inference;
pub mod models;
pub mod normalize;
pub mod reference;
pub mod sources;
pub mod storage;
pub mod sync;

pub use models::*;

use std::time::Duration;

/// Parse a human-friendly duration string (e.g., "1h 23m", "92m 56s", "90s").
///
/// Units are summed; a bare number is seconds. Anything else is `None`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_unit = false;

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }

        let multiplier = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let num: u64 = digits.parse().ok()?;
        total = total.checked_add(num.checked_mul(multiplier)?)?;
        digits.clear();
        saw_unit = true;
    }

    if !digits.is_empty() {
        // Default to seconds
        if saw_unit {
            return None;
        }
        total = digits.parse().ok()?;
    }

    Some(Duration::from_secs(total))
}
