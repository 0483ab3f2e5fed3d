//! WorldsEdge community API client (structured JSON source).
//!
//! Queries recent match history by profile id. Each match record carries two
//! nested lists that may disagree in completeness: `matchhistorymember`
//! (ratings) and `matchhistoryreportresults` (result, civ, team). Both are
//! passed through to the normalizer untouched; only transport-level decoding
//! happens here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{FetchOptions, MatchSource, PlayerAlias, SourceFetch};
use crate::config::WorldsEdgeConfig;
use crate::fetch::{join_url, Fetcher};
use crate::models::{ProfileId, RawMatch, RawMember, RawReport};
use crate::normalize::fields::{value_as_i64, value_as_text};

const MATCH_HISTORY_PATH: &str = "community/leaderboard/getRecentMatchHistory";
const PERSONAL_STAT_PATH: &str = "community/leaderboard/getPersonalStat";

/// Profiles per alias lookup request.
const ALIAS_BATCH_SIZE: usize = 100;

/// Deserialize a profile id that may be a number or a numeric string.
fn deserialize_profile_id<'de, D>(deserializer: D) -> Result<Option<ProfileId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val: Option<Value> = Option::deserialize(deserializer)?;
    Ok(val.as_ref().and_then(value_as_i64))
}

/// Decode a list of profile entries one at a time, dropping entries that do
/// not fit. Anything other than an array decodes as empty.
fn deserialize_profile_entries<'de, D>(deserializer: D) -> Result<Vec<ProfileEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ProfileEntry>(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping malformed profile entry: {}", e);
                None
            }
        })
        .collect())
}

/// Response of `getRecentMatchHistory`.
#[derive(Debug, Deserialize)]
pub struct MatchHistoryResponse {
    /// Raw match records, decoded one at a time so a bad record can be skipped
    #[serde(default, rename = "matchHistoryStats")]
    pub match_history_stats: Vec<Value>,

    /// Profiles referenced by the records
    #[serde(default, deserialize_with = "deserialize_profile_entries")]
    pub profiles: Vec<ProfileEntry>,
}

/// A profile entry (shared by match history and personal stat responses).
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    #[serde(default, deserialize_with = "deserialize_profile_id")]
    pub profile_id: Option<ProfileId>,
    pub alias: Option<String>,
    pub country: Option<String>,
}

/// Response of `getPersonalStat`.
#[derive(Debug, Deserialize)]
pub struct PersonalStatResponse {
    #[serde(default, rename = "statGroups")]
    pub stat_groups: Vec<StatGroup>,
}

#[derive(Debug, Deserialize)]
pub struct StatGroup {
    #[serde(default, deserialize_with = "deserialize_profile_entries")]
    pub members: Vec<ProfileEntry>,
}

/// Human label for the upstream match-type code. Informational only.
pub fn ladder_label(code: i64) -> String {
    match code {
        0 => "Unranked".to_string(),
        1 => "Deathmatch 1v1".to_string(),
        2 => "Deathmatch Team".to_string(),
        3 => "Ranked 1v1".to_string(),
        4 => "Ranked Team".to_string(),
        5 => "Random Map".to_string(),
        6 => "Lobby 1v1".to_string(),
        7 => "Lobby 2v2".to_string(),
        8 => "Lobby 3v3".to_string(),
        9 => "Lobby 4v4".to_string(),
        13 => "Empire Wars 1v1".to_string(),
        14 => "Empire Wars Team".to_string(),
        other => format!("Type {}", other),
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(value_as_i64)
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn rating(value: Option<&Value>) -> Option<i32> {
    value
        .and_then(value_as_i64)
        .and_then(|r| i32::try_from(r).ok())
}

/// Decode one match record.
pub fn parse_match_stat(
    stat: &Value,
    aliases: &HashMap<ProfileId, String>,
) -> Result<RawMatch, String> {
    let obj = stat
        .as_object()
        .ok_or_else(|| "match record is not an object".to_string())?;

    let match_id = obj
        .get("id")
        .and_then(value_as_i64)
        .ok_or_else(|| "match record has no usable id".to_string())?;

    let mut raw = RawMatch::new(match_id);
    raw.started_at = timestamp(obj.get("startgametime"));
    raw.completed_at = timestamp(obj.get("completiontime"));
    raw.map_name = obj.get("mapname").and_then(value_as_text);
    raw.ladder_label = obj
        .get("matchtype_id")
        .and_then(value_as_i64)
        .map(ladder_label);

    let members = obj
        .get("matchhistorymember")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for member in members {
        let Some(profile_id) = member.get("profile_id").and_then(value_as_i64) else {
            continue;
        };
        raw.members.push(RawMember {
            profile_id,
            old_rating: rating(member.get("oldrating")),
            new_rating: rating(member.get("newrating")),
            alias: aliases.get(&profile_id).cloned(),
        });
    }

    let reports = obj
        .get("matchhistoryreportresults")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for report in reports {
        let Some(fields) = report.as_object() else {
            continue;
        };
        let Some(profile_id) = fields.get("profile_id").and_then(value_as_i64) else {
            continue;
        };
        raw.reports.push(RawReport {
            profile_id,
            fields: fields.clone(),
        });
    }

    Ok(raw)
}

/// Decode a whole response into newest-first records plus per-record errors.
pub fn parse_history_response(response: &MatchHistoryResponse) -> (Vec<RawMatch>, Vec<String>) {
    let aliases: HashMap<ProfileId, String> = response
        .profiles
        .iter()
        .filter_map(|p| {
            let alias = p.alias.as_deref().map(str::trim).filter(|a| !a.is_empty())?;
            Some((p.profile_id?, alias.to_string()))
        })
        .collect();

    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (index, stat) in response.match_history_stats.iter().enumerate() {
        match parse_match_stat(stat, &aliases) {
            Ok(raw) => records.push(raw),
            Err(e) => {
                warn!("Skipping match record #{}: {}", index, e);
                errors.push(format!("record #{}: {}", index, e));
            }
        }
    }

    records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    (records, errors)
}

/// Structured JSON source.
pub struct WorldsEdgeSource {
    fetcher: Fetcher,
    base_url: String,
    title: String,
    resolve_aliases: bool,
}

impl WorldsEdgeSource {
    pub fn new(fetcher: Fetcher, config: &WorldsEdgeConfig) -> Self {
        Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            title: config.title.clone(),
            resolve_aliases: config.resolve_aliases,
        }
    }

    fn profile_ids_param(profile_ids: &[ProfileId]) -> String {
        serde_json::to_string(profile_ids).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl MatchSource for WorldsEdgeSource {
    fn name(&self) -> &'static str {
        "worldsedge"
    }

    async fn fetch_matches(&self, profile_id: ProfileId, options: &FetchOptions) -> SourceFetch {
        let mut out = SourceFetch::default();
        if options.max_pages == 0 {
            return out;
        }

        let url = match join_url(&self.base_url, MATCH_HISTORY_PATH) {
            Ok(url) => url,
            Err(e) => {
                error!("{}: {}", self.name(), e);
                out.errors.push(format!("{}: {}", self.name(), e));
                return out;
            }
        };

        let form = [
            ("title", self.title.clone()),
            ("profile_ids", Self::profile_ids_param(&[profile_id])),
        ];

        match self
            .fetcher
            .post_form_json::<MatchHistoryResponse>(&url, &form)
            .await
        {
            Ok(response) => {
                out.pages_fetched = 1;
                let (records, errors) = parse_history_response(&response);
                out.records_skipped += errors.len() as u32;
                out.errors.extend(
                    errors
                        .into_iter()
                        .map(|e| format!("{}: profile {}: {}", self.name(), profile_id, e)),
                );
                out.extend_until_known(records, &options.known_match_ids);
                info!(
                    "{}: profile {} returned {} new records",
                    self.name(),
                    profile_id,
                    out.records.len()
                );
            }
            Err(e) => {
                error!("{}: fetch failed for profile {}: {}", self.name(), profile_id, e);
                out.errors
                    .push(format!("{}: profile {}: {}", self.name(), profile_id, e));
            }
        }

        self.fetcher.pause().await;
        out
    }

    async fn resolve_aliases(&self, profile_ids: &[ProfileId]) -> HashMap<ProfileId, PlayerAlias> {
        let mut resolved = HashMap::new();
        if !self.resolve_aliases || profile_ids.is_empty() {
            return resolved;
        }

        let url = match join_url(&self.base_url, PERSONAL_STAT_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!("{}: alias lookup disabled: {}", self.name(), e);
                return resolved;
            }
        };

        for chunk in profile_ids.chunks(ALIAS_BATCH_SIZE) {
            let form = [
                ("title", self.title.clone()),
                ("profile_ids", Self::profile_ids_param(chunk)),
            ];

            match self
                .fetcher
                .post_form_json::<PersonalStatResponse>(&url, &form)
                .await
            {
                Ok(response) => {
                    for member in response.stat_groups.iter().flat_map(|g| &g.members) {
                        let Some(pid) = member.profile_id else {
                            continue;
                        };
                        resolved.insert(
                            pid,
                            PlayerAlias {
                                alias: member
                                    .alias
                                    .as_deref()
                                    .map(str::trim)
                                    .filter(|a| !a.is_empty())
                                    .map(str::to_string),
                                country: member.country.clone().filter(|c| !c.is_empty()),
                            },
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        "{}: alias lookup failed for {} profiles: {}",
                        self.name(),
                        chunk.len(),
                        e
                    );
                }
            }

            self.fetcher.pause().await;
        }

        info!("{}: resolved {} aliases", self.name(), resolved.len());
        resolved
    }
}
