//! Source-neutral raw match records.
//!
//! Both adapters (structured API and HTML scrape) emit `RawMatch`. The
//! per-participant report keeps the upstream field map untouched so the
//! normalizer can resolve attributes from ordered candidate field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{MatchId, ProfileId};

/// One raw match as produced by a source adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMatch {
    /// Upstream match id
    pub match_id: MatchId,

    /// Match start, when the source exposes it
    pub started_at: Option<DateTime<Utc>>,

    /// Match completion, when the source exposes it
    pub completed_at: Option<DateTime<Utc>>,

    /// Duration in seconds, when the source states it directly
    pub duration_secs: Option<i64>,

    /// Map name as given upstream (may carry suffix noise like `.rms`)
    pub map_name: Option<String>,

    /// Upstream queue label; informational only
    pub ladder_label: Option<String>,

    /// Rating-bearing "member" entries
    #[serde(default)]
    pub members: Vec<RawMember>,

    /// Result/civ/team-bearing "report" entries (may repeat a profile)
    #[serde(default)]
    pub reports: Vec<RawReport>,
}

impl RawMatch {
    /// Create an empty record for the given match id.
    pub fn new(match_id: MatchId) -> Self {
        Self {
            match_id,
            started_at: None,
            completed_at: None,
            duration_secs: None,
            map_name: None,
            ladder_label: None,
            members: Vec::new(),
            reports: Vec::new(),
        }
    }
}

/// A "member" entry: the richer rating source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMember {
    pub profile_id: ProfileId,
    pub old_rating: Option<i32>,
    pub new_rating: Option<i32>,
    pub alias: Option<String>,
}

/// A "report" entry: one participant's outcome as reported upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReport {
    pub profile_id: ProfileId,

    /// Upstream fields, keyed by whatever names that source/version used
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawReport {
    /// Create a report with no fields.
    pub fn new(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            fields: Map::new(),
        }
    }

    /// Builder-style field insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Look up a field, treating JSON null as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_get_skips_null() {
        let report = RawReport::new(1)
            .with("race_id", Value::Null)
            .with("civilization_id", 3);

        assert!(report.get("race_id").is_none());
        assert_eq!(report.get("civilization_id"), Some(&json!(3)));
        assert!(report.get("missing").is_none());
    }

    #[test]
    fn test_raw_match_new_is_empty() {
        let raw = RawMatch::new(99);
        assert_eq!(raw.match_id, 99);
        assert!(raw.members.is_empty());
        assert!(raw.reports.is_empty());
        assert!(raw.started_at.is_none());
    }
}
