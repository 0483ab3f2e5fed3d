//! aoe2insights match list scraper (HTML source).
//!
//! Walks `/user/{id}/matches/?page=N` newest-first. Each page holds match
//! tiles; every tile is parsed on its own and a broken tile is skipped.
//! Text extraction is best-effort: unreadable dates, durations and ratings
//! become `None`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{error, info, warn};

use super::{FetchOptions, MatchSource, SourceFetch};
use crate::config::InsightsConfig;
use crate::fetch::{join_url, Fetcher};
use crate::models::{ProfileId, RawMatch, RawMember, RawReport};
use crate::parse_duration;

/// Result of parsing one list page.
#[derive(Debug, Clone, Default)]
pub struct TilePage {
    /// Records in page order (newest first)
    pub records: Vec<RawMatch>,

    /// Tiles found, including ones that failed to parse
    pub tiles_seen: usize,

    pub errors: Vec<String>,
}

fn month_number(token: &str) -> Option<u32> {
    let month = match token.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parse a tile timestamp, read as UTC.
///
/// Handles the site's locale layouts: "Dec. 28, 2025, 11:08 p.m.",
/// "Jan 6, 2023, 8 PM", "March 3, 2024, noon", plus RFC 3339 and
/// "2024-03-01 20:15".
pub fn parse_tile_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }

    let cleaned = raw
        .to_lowercase()
        .replace("p.m.", "pm")
        .replace("a.m.", "am")
        .replace('.', "");
    let parts: Vec<&str> = cleaned
        .split(|c: char| c == ' ' || c == ',' || c == ':')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 4 {
        return None;
    }

    let month = month_number(parts[0])?;
    let day: u32 = parts[1].parse().ok()?;
    let year: i32 = parts[2].parse().ok()?;

    let (hour, minute) = match &parts[3..] {
        ["noon"] => (12, 0),
        ["midnight"] => (0, 0),
        [h, m, ampm] => (to_24h(h.parse().ok()?, ampm)?, m.parse().ok()?),
        [h, ampm] => (to_24h(h.parse().ok()?, ampm)?, 0),
        [h, m] if m.chars().all(|c| c.is_ascii_digit()) => (h.parse().ok()?, m.parse().ok()?),
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
}

fn to_24h(hour: u32, ampm: &str) -> Option<u32> {
    if hour == 0 || hour > 12 {
        return None;
    }
    match ampm {
        "pm" if hour != 12 => Some(hour + 12),
        "pm" => Some(12),
        "am" if hour == 12 => Some(0),
        "am" => Some(hour),
        _ => None,
    }
}

/// Longest duration a tile may state; anything longer is a parse artifact.
const MAX_TILE_DURATION_SECS: i64 = 24 * 3600;

/// Duration text next to the clock icon, in seconds.
pub fn parse_tile_duration(text: &str) -> Option<i64> {
    parse_duration(text)
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .filter(|secs| *secs <= MAX_TILE_DURATION_SECS)
}

/// Rating text: "#1606", " 1606 ". Non-numeric text is `None`.
pub fn parse_rating_text(text: &str) -> Option<i32> {
    text.trim().replace('#', "").trim().parse().ok()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse one list page.
pub fn parse_tile_page(html: &str) -> TilePage {
    let document = Html::parse_document(html);
    let tile_sel = Selector::parse("div.match-summary-card, div.match-tile").unwrap();

    let mut page = TilePage::default();
    for (index, tile) in document.select(&tile_sel).enumerate() {
        page.tiles_seen += 1;
        match parse_tile(tile) {
            Ok(record) => page.records.push(record),
            Err(e) => {
                warn!("Skipping match tile #{}: {}", index, e);
                page.errors.push(format!("tile #{}: {}", index, e));
            }
        }
    }
    page
}

/// Parse one match tile.
pub fn parse_tile(tile: ElementRef<'_>) -> Result<RawMatch, String> {
    let link_sel = Selector::parse("a.stretched-link").unwrap();
    let ladder_sel = Selector::parse("div.ladder-type").unwrap();
    let map_col_sel = Selector::parse("div.col-md-3 div.d-flex.flex-column").unwrap();
    let clock_sel = Selector::parse("i.fa-clock").unwrap();
    let date_sel = Selector::parse("span[title]").unwrap();
    let team_sel = Selector::parse("div.teams ul.team").unwrap();
    let li_sel = Selector::parse("li").unwrap();
    let player_sel = Selector::parse("div.team-player").unwrap();
    let player_link_sel = Selector::parse("a").unwrap();
    let civ_sel = Selector::parse("i.image-icon[title]").unwrap();
    let rating_sel = Selector::parse("small.rating").unwrap();
    let span_sel = Selector::parse("span").unwrap();

    let re_match = Regex::new(r"/match/(\d+)").unwrap();
    let re_user = Regex::new(r"/user/(\d+)").unwrap();

    let link = tile
        .select(&link_sel)
        .next()
        .ok_or_else(|| "no match link".to_string())?;
    let href = link.value().attr("href").unwrap_or_default();
    let match_id: i64 = re_match
        .captures(href)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| format!("no match id in link {:?}", href))?;

    let mut raw = RawMatch::new(match_id);

    raw.ladder_label = tile
        .select(&ladder_sel)
        .next()
        .map(element_text)
        .or_else(|| Some(element_text(link)))
        .filter(|l| !l.is_empty());

    raw.map_name = tile.select(&map_col_sel).next().and_then(|col| {
        col.children()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "div")
            .nth(1)
            .map(element_text)
            .filter(|m| !m.is_empty())
    });

    raw.duration_secs = tile
        .select(&clock_sel)
        .next()
        .and_then(|icon| icon.parent())
        .and_then(ElementRef::wrap)
        .and_then(|parent| parse_tile_duration(&element_text(parent)));

    raw.started_at = tile
        .select(&date_sel)
        .next()
        .and_then(|span| span.value().attr("title"))
        .and_then(parse_tile_date);
    raw.completed_at = match (raw.started_at, raw.duration_secs) {
        (Some(start), Some(secs)) => chrono::Duration::try_seconds(secs)
            .and_then(|d| start.checked_add_signed(d)),
        _ => None,
    };

    let teams: Vec<ElementRef<'_>> = tile.select(&team_sel).collect();
    let any_won = teams
        .iter()
        .any(|ul| ul.value().classes().any(|c| c == "won"));

    for (index, ul) in teams.iter().enumerate() {
        let team_number = index as i64 + 1;
        let won = ul.value().classes().any(|c| c == "won");

        for li in ul.select(&li_sel) {
            let Some(player) = li.select(&player_sel).next() else {
                continue;
            };
            let Some(player_link) = player.select(&player_link_sel).next() else {
                continue;
            };
            let player_href = player_link.value().attr("href").unwrap_or_default();
            let Some(profile_id) = re_user
                .captures(player_href)
                .and_then(|c| c[1].parse::<ProfileId>().ok())
            else {
                continue;
            };
            let name = element_text(player_link);

            let mut report = RawReport::new(profile_id).with("team", team_number);
            if let Some(civ) = player
                .select(&civ_sel)
                .next()
                .and_then(|icon| icon.value().attr("title"))
                .map(str::trim)
                .filter(|c| !c.is_empty())
            {
                report = report.with("civ", civ);
            }
            if any_won {
                report = report.with("result", if won { "W" } else { "L" });
            }
            if !name.is_empty() {
                report = report.with("name", name.as_str());
            }

            let rating = player.select(&rating_sel).next().and_then(|small| {
                let text = match small.select(&span_sel).next() {
                    Some(span) => element_text(span),
                    None => element_text(small),
                };
                parse_rating_text(&text)
            });

            raw.reports.push(report);
            raw.members.push(RawMember {
                profile_id,
                old_rating: None,
                new_rating: rating,
                alias: (!name.is_empty()).then_some(name),
            });
        }
    }

    if raw.reports.is_empty() {
        return Err(format!("match {} has no readable players", match_id));
    }
    Ok(raw)
}

/// Scraped HTML source.
pub struct InsightsSource {
    fetcher: Fetcher,
    base_url: String,
    max_pages: u32,
}

impl InsightsSource {
    pub fn new(fetcher: Fetcher, config: &InsightsConfig) -> Self {
        Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_pages: config.max_pages,
        }
    }
}

#[async_trait]
impl MatchSource for InsightsSource {
    fn name(&self) -> &'static str {
        "insights"
    }

    async fn fetch_matches(&self, profile_id: ProfileId, options: &FetchOptions) -> SourceFetch {
        let mut out = SourceFetch::default();
        let max_pages = self.max_pages.min(options.max_pages);

        for page_number in 1..=max_pages {
            let url = match join_url(
                &self.base_url,
                &format!("user/{}/matches/?page={}", profile_id, page_number),
            ) {
                Ok(url) => url,
                Err(e) => {
                    error!("{}: {}", self.name(), e);
                    out.errors.push(format!("{}: {}", self.name(), e));
                    break;
                }
            };

            let result = self.fetcher.get_text(&url).await;
            self.fetcher.pause().await;

            let body = match result {
                Ok(body) => body,
                Err(e) if e.is_not_found() => {
                    info!(
                        "{}: page {} not found for profile {}, stopping",
                        self.name(),
                        page_number,
                        profile_id
                    );
                    break;
                }
                Err(e) => {
                    error!(
                        "{}: page {} failed for profile {}: {}",
                        self.name(),
                        page_number,
                        profile_id,
                        e
                    );
                    out.errors.push(format!(
                        "{}: profile {} page {}: {}",
                        self.name(),
                        profile_id,
                        page_number,
                        e
                    ));
                    break;
                }
            };
            out.pages_fetched += 1;

            let page = parse_tile_page(&body);
            info!(
                "{}: profile {} page {}: {} tiles",
                self.name(),
                profile_id,
                page_number,
                page.tiles_seen
            );
            if page.tiles_seen == 0 {
                break;
            }

            out.records_skipped += page.errors.len() as u32;
            out.errors.extend(page.errors.into_iter().map(|e| {
                format!(
                    "{}: profile {} page {}: {}",
                    self.name(),
                    profile_id,
                    page_number,
                    e
                )
            }));

            if !out.extend_until_known(page.records, &options.known_match_ids) {
                break;
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::fetch::FetcherConfig;

    fn tile(match_id: i64, won_first: bool) -> String {
        let won = if won_first { " won" } else { "" };
        format!(
            r##"
<div class="match-tile">
  <a class="stretched-link" href="/match/{id}/">RM 1v1</a>
  <div class="col-md-3">
    <div class="d-flex flex-column">
      <div><span title="Dec. 28, 2025, 11:08 p.m.">2 days ago</span></div>
      <div>Arena</div>
    </div>
  </div>
  <div><i class="fa fa-clock"></i> 32m 10s</div>
  <div class="teams">
    <ul class="team{won}">
      <li><div class="team-player">
        <i class="image-icon" title="Britons"></i>
        <a href="/user/100/">Alpha</a>
        <small class="rating"><span>#1216</span><span>+16</span></small>
      </div></li>
    </ul>
    <ul class="team">
      <li><div class="team-player">
        <i class="image-icon" title="Franks"></i>
        <a href="/user/200/">Beta</a>
        <small class="rating">1164</small>
      </div></li>
    </ul>
  </div>
</div>"##,
            id = match_id,
            won = won
        )
    }

    fn page(tiles: &[String]) -> String {
        format!("<html><body>{}</body></html>", tiles.join("\n"))
    }

    #[test]
    fn test_parse_tile_date_layouts() {
        assert_eq!(
            parse_tile_date("Dec. 28, 2025, 11:08 p.m."),
            Some(Utc.with_ymd_and_hms(2025, 12, 28, 23, 8, 0).unwrap())
        );
        assert_eq!(
            parse_tile_date("Jan 6, 2023, 8 PM"),
            Some(Utc.with_ymd_and_hms(2023, 1, 6, 20, 0, 0).unwrap())
        );
        assert_eq!(
            parse_tile_date("Sept. 3, 2024, 12:15 a.m."),
            Some(Utc.with_ymd_and_hms(2024, 9, 3, 0, 15, 0).unwrap())
        );
        assert_eq!(
            parse_tile_date("March 3, 2024, noon"),
            Some(Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_tile_date("2024-03-01 20:15"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 20, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_tile_date_garbage() {
        assert_eq!(parse_tile_date(""), None);
        assert_eq!(parse_tile_date("2 days ago"), None);
        assert_eq!(parse_tile_date("Foo 28, 2025, 11:08 p.m."), None);
        assert_eq!(parse_tile_date("Feb. 30, 2025, 1:00 p.m."), None);
        assert_eq!(parse_tile_date("Dec. 28, 2025, 13:08 p.m."), None);
    }

    #[test]
    fn test_parse_tile_duration_and_rating() {
        assert_eq!(parse_tile_duration("92m 56s"), Some(5576));
        assert_eq!(parse_tile_duration("1h 23m"), Some(4980));
        assert_eq!(parse_tile_duration("unknown"), None);
        assert_eq!(parse_tile_duration("24h"), Some(86400));
        assert_eq!(parse_tile_duration("2300000000h"), None);
        assert_eq!(parse_rating_text(" #1606 "), Some(1606));
        assert_eq!(parse_rating_text("N/A"), None);
    }

    #[test]
    fn test_parse_tile_page_extracts_match() {
        let parsed = parse_tile_page(&page(&[tile(555, true)]));

        assert_eq!(parsed.tiles_seen, 1);
        assert!(parsed.errors.is_empty());
        let raw = &parsed.records[0];
        assert_eq!(raw.match_id, 555);
        assert_eq!(raw.map_name.as_deref(), Some("Arena"));
        assert_eq!(raw.ladder_label.as_deref(), Some("RM 1v1"));
        assert_eq!(raw.duration_secs, Some(1930));
        assert_eq!(
            raw.started_at,
            Some(Utc.with_ymd_and_hms(2025, 12, 28, 23, 8, 0).unwrap())
        );
        assert_eq!(
            raw.completed_at,
            Some(Utc.with_ymd_and_hms(2025, 12, 28, 23, 40, 10).unwrap())
        );

        assert_eq!(raw.members.len(), 2);
        assert_eq!(raw.members[0].new_rating, Some(1216));
        assert_eq!(raw.members[1].new_rating, Some(1164));
        assert_eq!(raw.members[0].alias.as_deref(), Some("Alpha"));

        let alpha = &raw.reports[0];
        assert_eq!(alpha.get("civ"), Some(&serde_json::json!("Britons")));
        assert_eq!(alpha.get("team"), Some(&serde_json::json!(1)));
        assert_eq!(alpha.get("result"), Some(&serde_json::json!("W")));
        assert_eq!(raw.reports[1].get("result"), Some(&serde_json::json!("L")));
    }

    #[test]
    fn test_parse_tile_without_winner_leaves_results_absent() {
        let parsed = parse_tile_page(&page(&[tile(556, false)]));
        let raw = &parsed.records[0];
        assert!(raw.reports.iter().all(|r| r.get("result").is_none()));
    }

    #[test]
    fn test_parse_tile_page_skips_broken_tiles() {
        let broken = r#"<div class="match-tile"><a class="stretched-link" href="/nope">x</a></div>"#;
        let parsed = parse_tile_page(&page(&[broken.to_string(), tile(557, true)]));

        assert_eq!(parsed.tiles_seen, 2);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_oversized_duration_keeps_tile() {
        let html = page(&[tile(558, true).replace("32m 10s", "2300000000h")]);
        let parsed = parse_tile_page(&html);

        assert!(parsed.errors.is_empty());
        let raw = &parsed.records[0];
        assert_eq!(raw.match_id, 558);
        assert!(raw.started_at.is_some());
        assert_eq!(raw.duration_secs, None);
        assert_eq!(raw.completed_at, None);
        assert_eq!(raw.reports.len(), 2);
    }

    #[test]
    fn test_parse_tile_page_empty() {
        let parsed = parse_tile_page("<html><body><p>No matches</p></body></html>");
        assert_eq!(parsed.tiles_seen, 0);
        assert!(parsed.records.is_empty());
    }

    /// Serve canned pages keyed by request path; unknown paths get 404.
    async fn serve(pages: HashMap<String, String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let seen = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let path = request
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                seen.lock().unwrap().push(path.clone());

                let response = match pages.get(&path) {
                    Some(body) => format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    ),
                    None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string(),
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn source(base_url: String, max_pages: u32) -> InsightsSource {
        let fetcher = Fetcher::new(FetcherConfig {
            timeout: Duration::from_secs(5),
            request_delay: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();
        InsightsSource::new(
            fetcher,
            &InsightsConfig {
                enabled: true,
                base_url,
                max_pages,
            },
        )
    }

    #[tokio::test]
    async fn test_fetch_walks_pages_until_not_found() {
        let mut pages = HashMap::new();
        pages.insert(
            "/user/100/matches/?page=1".to_string(),
            page(&[tile(30, true), tile(29, true)]),
        );
        pages.insert("/user/100/matches/?page=2".to_string(), page(&[tile(28, false)]));
        let (base, hits) = serve(pages).await;

        let fetch = source(base, 10)
            .fetch_matches(100, &FetchOptions::default())
            .await;

        let ids: Vec<_> = fetch.records.iter().map(|r| r.match_id).collect();
        assert_eq!(ids, vec![30, 29, 28]);
        assert_eq!(fetch.pages_fetched, 2);
        assert!(fetch.errors.is_empty());
        assert_eq!(hits.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_stops_at_known_match() {
        let mut pages = HashMap::new();
        pages.insert(
            "/user/100/matches/?page=1".to_string(),
            page(&[tile(30, true), tile(29, true)]),
        );
        pages.insert("/user/100/matches/?page=2".to_string(), page(&[tile(28, true)]));
        let (base, hits) = serve(pages).await;

        let options = FetchOptions {
            known_match_ids: [29].into_iter().collect(),
            max_pages: 100,
        };
        let fetch = source(base, 10).fetch_matches(100, &options).await;

        let ids: Vec<_> = fetch.records.iter().map(|r| r.match_id).collect();
        assert_eq!(ids, vec![30]);
        assert!(fetch.stopped_early);
        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_respects_page_cap() {
        let mut pages = HashMap::new();
        for n in 1..=5 {
            pages.insert(
                format!("/user/7/matches/?page={}", n),
                page(&[tile(100 - n, true)]),
            );
        }
        let (base, _) = serve(pages).await;

        let fetch = source(base, 2).fetch_matches(7, &FetchOptions::default()).await;
        assert_eq!(fetch.pages_fetched, 2);
        assert_eq!(fetch.records.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_network_failure_is_contained() {
        let fetch = source("http://127.0.0.1:1".to_string(), 3)
            .fetch_matches(100, &FetchOptions::default())
            .await;

        assert!(fetch.records.is_empty());
        assert_eq!(fetch.errors.len(), 1);
    }
}
