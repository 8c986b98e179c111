//! Macro/news awareness for the scan cycle.
//!
//! In `auto` mode a handful of public RSS feeds are polled best-effort
//! (5 s timeout, failures ignored) and recent headlines are scored against
//! keyword lists. An impactful headline forces relaxed mode and caps both
//! risk and leverage; `force` applies the high-impact caps unconditionally.

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const HIGH_IMPACT_KEYWORDS: &[&str] = &[
    "sec", "etf", "spot etf", "approval", "reject", "listing", "delist",
    "hack", "exploit", "breach", "outage", "halt", "suspend",
    "cpi", "inflation", "fomc", "rate hike", "rate cut", "fed",
    "binance", "coinbase", "kraken", "blackrock", "cme",
];

const MEDIUM_IMPACT_KEYWORDS: &[&str] = &[
    "upgrade", "downgrade", "airdrop", "partnership", "acquisition", "merger",
    "regulation", "law", "lawsuit", "fine", "sanction",
];

const FEEDS: &[&str] = &["https://www.coindesk.com/arc/outboundfeeds/rss/"];

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const LOOKBACK_MIN: i64 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsMode {
    Off,
    Auto,
    Force,
}

impl FromStr for NewsMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            "force" => Ok(Self::Force),
            other => anyhow::bail!("unknown news mode {other:?} (expected off, auto, or force)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NewsImpact {
    Low,
    Medium,
    High,
}

/// Risk adjustments derived from the news scan. Inactive context changes
/// nothing about the cycle.
#[derive(Debug, Clone, Default)]
pub struct NewsContext {
    pub active: bool,
    pub force_relaxed: bool,
    /// Per-trade risk fraction ceiling while the context is active.
    pub r_cap: Option<f64>,
    /// Notional leverage ceiling while the context is active.
    pub leverage_cap: Option<f64>,
    pub headline: Option<String>,
}

impl NewsContext {
    fn from_impact(impact: NewsImpact, headline: Option<String>) -> Self {
        match impact {
            NewsImpact::High => Self {
                active: true,
                force_relaxed: true,
                r_cap: Some(0.0030),
                leverage_cap: Some(3.0),
                headline,
            },
            NewsImpact::Medium => Self {
                active: true,
                force_relaxed: true,
                r_cap: Some(0.0025),
                leverage_cap: Some(3.0),
                headline,
            },
            NewsImpact::Low => Self::default(),
        }
    }
}

/// Keyword hit with word boundaries on both sides, so "sec" does not fire
/// on "secure".
fn contains_keyword(text: &str, keyword: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(keyword) {
        let at = start + pos;
        let end = at + keyword.len();
        let left_ok = at == 0
            || !text[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let right_ok = end == text.len()
            || !text[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

#[must_use]
pub fn score_impact(text: &str) -> NewsImpact {
    let t = text.to_lowercase();
    if HIGH_IMPACT_KEYWORDS.iter().any(|k| contains_keyword(&t, k)) {
        return NewsImpact::High;
    }
    if MEDIUM_IMPACT_KEYWORDS.iter().any(|k| contains_keyword(&t, k)) {
        return NewsImpact::Medium;
    }
    NewsImpact::Low
}

#[derive(Debug, Clone)]
struct FeedItem {
    title: String,
    summary: String,
    published: Option<DateTime<Utc>>,
}

impl FeedItem {
    /// Items without a parsable timestamp count as recent, erring on the
    /// cautious side.
    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        self.published
            .is_none_or(|dt| (now - dt).num_minutes() <= LOOKBACK_MIN)
    }
}

fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = block.find(&open)?;
    let body_start = block[start..].find('>')? + start + 1;
    let body_end = block[body_start..].find(&close)? + body_start;
    let raw = block[body_start..body_end].trim();
    let text = raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(raw);
    Some(text.trim().to_string())
}

/// Shallow RSS parse: `<item>` blocks with title, description, and an
/// RFC 2822 `pubDate`. Anything malformed is simply skipped.
fn parse_feed(xml: &str) -> Vec<FeedItem> {
    let mut items = Vec::new();
    for block in xml.split("<item>").skip(1) {
        let block = block.split("</item>").next().unwrap_or(block);
        let Some(title) = tag_text(block, "title") else {
            continue;
        };
        let summary = tag_text(block, "description").unwrap_or_default();
        let published = tag_text(block, "pubDate")
            .and_then(|raw| DateTime::parse_from_rfc2822(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        items.push(FeedItem {
            title,
            summary,
            published,
        });
    }
    items
}

async fn fetch_feed(client: &reqwest::Client, url: &str) -> Vec<FeedItem> {
    match client.get(url).send().await {
        Ok(resp) => match resp.text().await {
            Ok(body) => parse_feed(&body),
            Err(e) => {
                debug!(url, error = %e, "news feed body unreadable");
                Vec::new()
            }
        },
        Err(e) => {
            debug!(url, error = %e, "news feed fetch failed");
            Vec::new()
        }
    }
}

/// Resolves the news context for one cycle. Never fails: feed problems in
/// auto mode degrade to an inactive context.
pub async fn resolve_news_context(mode: NewsMode) -> NewsContext {
    match mode {
        NewsMode::Off => NewsContext::default(),
        NewsMode::Force => NewsContext::from_impact(NewsImpact::High, None),
        NewsMode::Auto => {
            let client = match reqwest::Client::builder().timeout(FETCH_TIMEOUT).build() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "news client unavailable, skipping news scan");
                    return NewsContext::default();
                }
            };
            let now = Utc::now();
            let mut best = NewsImpact::Low;
            let mut headline = None;
            for url in FEEDS {
                for item in fetch_feed(&client, url).await {
                    if !item.is_recent(now) {
                        continue;
                    }
                    let impact = score_impact(&format!("{} {}", item.title, item.summary));
                    if impact > best {
                        best = impact;
                        headline = Some(item.title.clone());
                    }
                    if best == NewsImpact::High {
                        break;
                    }
                }
                if best == NewsImpact::High {
                    break;
                }
            }
            if best > NewsImpact::Low {
                warn!(impact = ?best, headline = headline.as_deref().unwrap_or(""), "impactful news detected");
            }
            NewsContext::from_impact(best, headline)
        }
    }
}
