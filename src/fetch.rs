use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use feed_rs::parser;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tracing::warn;

use crate::db::Feed;

/// Summaries are clipped to this many characters after HTML stripping
pub const SUMMARY_MAX_CHARS: usize = 500;

/// Entry tags that earn the metadata bonus downstream
const FLAG_TERMS: [&str; 4] = ["featured", "breaking", "top-news", "editors-pick"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed feed document: {0}")]
    Malformed(#[from] parser::ParseFeedError),
}

/// One parsed feed entry, normalized for the rest of the pipeline.
/// Lives only within a single run.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
    /// Entry carried a featured/breaking style tag
    pub flagged: bool,
}

impl RawCandidate {
    /// Published timestamp with the run's fetch time as the stand-in,
    /// so undated entries rank as fully recent
    pub fn published_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.published.unwrap_or(now)
    }
}

pub fn build_client(timeout_secs: u64) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("RSSKing/1.0 (RSS Aggregator)")
        .build()?;
    Ok(client)
}

/// Retrieve one feed and normalize its entries. Errors here are per-feed
/// and non-fatal to the run; the orchestrator logs and moves on.
pub async fn fetch_feed(
    client: &Client,
    feed: &Feed,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> Result<Vec<RawCandidate>, FetchError> {
    let response = client.get(&feed.url).send().await?;
    let bytes = response.bytes().await?;
    let parsed = parser::parse(&bytes[..])?;

    Ok(candidates_from_entries(feed, parsed.entries, max_age_days, now))
}

/// Turn parsed entries into candidates, dropping the unusable ones.
/// A missing title or link drops the entry, never the feed.
pub fn candidates_from_entries(
    feed: &Feed,
    entries: Vec<feed_rs::model::Entry>,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> Vec<RawCandidate> {
    let cutoff = now - ChronoDuration::days(max_age_days);
    let mut candidates = Vec::new();

    for entry in entries {
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();
        if title.is_empty() {
            warn!("Skipping untitled entry in feed '{}'", feed.name);
            continue;
        }

        let url = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default();
        if url.is_empty() {
            warn!("Skipping entry with no link: {}", title);
            continue;
        }

        let published: Option<DateTime<Utc>> =
            entry.published.or(entry.updated).map(|dt| dt.into());
        if let Some(p) = published {
            if p < cutoff {
                continue;
            }
        }

        let flagged = entry.categories.iter().any(|c| {
            let term = c.term.to_lowercase();
            FLAG_TERMS.contains(&term.as_str())
        });

        let raw_summary = entry
            .summary
            .as_ref()
            .map(|t| t.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default();

        candidates.push(RawCandidate {
            feed_id: feed.id,
            title,
            url,
            summary: strip_html(&raw_summary, SUMMARY_MAX_CHARS),
            published,
            flagged,
        });
    }

    candidates
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip HTML tags, collapse whitespace and clip to `max_chars`
pub fn strip_html(text: &str, max_chars: usize) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    let collapsed = WS_RE.replace_all(&without_tags, " ");
    collapsed.trim().chars().take(max_chars).collect()
}
