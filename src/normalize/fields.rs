//! Ordered candidate field names per logical attribute.
//!
//! Upstream sources and API versions disagree on key names. Each attribute
//! gets one list, tried in order; the first present value wins. When nothing
//! matches, the caller applies its documented fallback.

use serde_json::Value;

use crate::models::{MatchResult, RawReport};

/// Civilization id or name. A numeric `0` only wins when no other
/// candidate carries a value (some versions send `race_id: 0` next to a
/// real `civilization_id`).
pub const CIV_FIELDS: &[&str] = &[
    "race_id",
    "civilization_id",
    "civilization",
    "civilizationID",
    "civilizationId",
    "civId",
    "raceId",
    "civ",
    "civName",
];

/// Coded result type, looked up in `result_from_code`.
pub const RESULT_CODE_FIELDS: &[&str] = &["resulttype", "resultType", "result_type"];

/// Free-form result: `W`/`L`, `1`/`0`, booleans.
pub const RESULT_ALT_FIELDS: &[&str] = &["result", "outcome", "won"];

pub const TEAM_FIELDS: &[&str] = &["teamid", "teamId", "team_id", "team"];

pub const RATING_AFTER_FIELDS: &[&str] = &["new_rating", "newrating", "newRating", "rating"];

pub const RATING_BEFORE_FIELDS: &[&str] = &["old_rating", "oldrating", "oldRating"];

pub const ALIAS_FIELDS: &[&str] = &["alias", "name"];

/// Map a coded result type: 1 win, 2 loss, 3 dropped, 4 desync.
pub fn result_from_code(code: i64) -> MatchResult {
    match code {
        1 => MatchResult::Win,
        2..=4 => MatchResult::Loss,
        _ => MatchResult::Unknown,
    }
}

/// Interpret a free-form result value.
pub fn result_from_value(value: &Value) -> MatchResult {
    match value {
        Value::Bool(b) => MatchResult::from_won(Some(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(1) => MatchResult::Win,
            Some(0) | Some(2) => MatchResult::Loss,
            _ => MatchResult::Unknown,
        },
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "W" | "1" | "WIN" | "WON" | "TRUE" => MatchResult::Win,
            "L" | "0" | "LOSS" | "LOST" | "FALSE" => MatchResult::Loss,
            _ => MatchResult::Unknown,
        },
        _ => MatchResult::Unknown,
    }
}

/// Read an integer from a number or a numeric string.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a non-empty trimmed string (numbers are rendered).
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First candidate present on the report.
pub fn first_field<'a>(report: &'a RawReport, candidates: &[&str]) -> Option<&'a Value> {
    candidates.iter().find_map(|name| report.get(name))
}

/// First candidate that reads as an integer.
pub fn first_i64(report: &RawReport, candidates: &[&str]) -> Option<i64> {
    candidates
        .iter()
        .filter_map(|name| report.get(name))
        .find_map(value_as_i64)
}

/// Civilization candidate, honouring the zero-is-weak rule.
pub fn civ_value(report: &RawReport) -> Option<&Value> {
    let mut zero_hit = None;
    for name in CIV_FIELDS {
        let Some(value) = report.get(name) else {
            continue;
        };
        if value_as_i64(value) == Some(0) {
            if zero_hit.is_none() {
                zero_hit = Some(value);
            }
            continue;
        }
        if value_as_text(value).is_some() {
            return Some(value);
        }
    }
    zero_hit
}
