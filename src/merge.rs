use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::Tier;
use crate::correlate::CorrelationGroup;
use crate::db::{Feed, NewItem};
use crate::fetch::RawCandidate;

/// Collapse each correlation group into one item. The canonical member
/// supplies the identity (URL, title, published date, owning feed); the
/// source set spans all members and the score is the group maximum, so a
/// story validated by several feeds keeps its best-ranked version.
pub fn merge_groups(
    candidates: &[RawCandidate],
    scores: &[f64],
    groups: &[CorrelationGroup],
    feeds: &HashMap<i64, Feed>,
    now: DateTime<Utc>,
) -> Vec<NewItem> {
    let mut merged = Vec::with_capacity(groups.len());

    for group in groups {
        let Some(&primary_idx) = group
            .members
            .iter()
            .min_by(|&&a, &&b| canonical_order(&candidates[a], &candidates[b], feeds, now))
        else {
            continue;
        };
        let primary = &candidates[primary_idx];
        let Some(feed) = feeds.get(&primary.feed_id) else {
            continue;
        };

        let score = group
            .members
            .iter()
            .map(|&i| scores[i])
            .fold(f64::MIN, f64::max);

        // Distinct source names, canonical feed first
        let mut sources: Vec<String> = Vec::new();
        sources.push(feed.name.clone());
        for &i in &group.members {
            if let Some(f) = feeds.get(&candidates[i].feed_id) {
                if !sources.contains(&f.name) {
                    sources.push(f.name.clone());
                }
            }
        }

        let summary = if primary.summary.is_empty() {
            group
                .members
                .iter()
                .map(|&i| candidates[i].summary.as_str())
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string()
        } else {
            primary.summary.clone()
        };

        merged.push(NewItem {
            feed_id: primary.feed_id,
            title: primary.title.clone(),
            url: primary.url.clone(),
            summary,
            published_at: primary.published,
            score,
            category: feed.category.clone(),
            source_name: feed.name.clone(),
            sources,
        });
    }

    merged
}

/// One URL, one item. A feed can repeat the same link across entries,
/// and same-feed candidates never correlate, so merging alone can leave
/// two items sharing a URL in one run. Keep the higher-scored sighting
/// (first seen on ties) so a duplicate never consumes cap space or
/// overwrites a better-scored row at persist time.
pub fn dedupe_by_url(items: Vec<NewItem>) -> Vec<NewItem> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<NewItem> = Vec::new();

    for item in items {
        match seen.get(&item.url) {
            Some(&at) => {
                if item.score > deduped[at].score {
                    deduped[at] = item;
                }
            }
            None => {
                seen.insert(item.url.clone(), deduped.len());
                deduped.push(item);
            }
        }
    }

    deduped
}

/// Earliest published first (undated counts as fetch time), then higher
/// tier weight, then feed configuration order.
fn canonical_order(
    a: &RawCandidate,
    b: &RawCandidate,
    feeds: &HashMap<i64, Feed>,
    now: DateTime<Utc>,
) -> Ordering {
    a.published_or(now)
        .cmp(&b.published_or(now))
        .then_with(|| tier_rank(a.feed_id, feeds).cmp(&tier_rank(b.feed_id, feeds)))
        .then_with(|| a.feed_id.cmp(&b.feed_id))
}

fn tier_rank(feed_id: i64, feeds: &HashMap<i64, Feed>) -> u8 {
    match feeds.get(&feed_id).map(|f| f.tier()) {
        Some(Tier::Curated) => 0,
        _ => 1,
    }
}
