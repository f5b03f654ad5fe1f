use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::{Keywords, ScoringConfig};
use crate::correlate::CorrelationGroup;
use crate::db::Feed;
use crate::fetch::RawCandidate;

pub const TIME_DECAY_MAX: f64 = 50.0;
/// Decay reaches zero at this age; older items score no recency at all
pub const DECAY_SPAN_DAYS: f64 = 30.0;
pub const MULTI_SOURCE_BONUS: f64 = 40.0;
pub const METADATA_BONUS: f64 = 30.0;
pub const TITLE_PATTERN_BONUS: f64 = 20.0;
pub const KEYWORD_BOOST: f64 = 20.0;
/// The interest term never contributes more than this
pub const KEYWORD_BOOST_CAP: f64 = 40.0;
pub const KEYWORD_PENALTY: f64 = 30.0;

/// Relevance scorer. Holds only the compiled urgency pattern; everything
/// else arrives as explicit arguments so the same inputs always produce
/// the same score.
pub struct Scorer {
    urgency: Option<Regex>,
}

impl Scorer {
    pub fn new(config: &ScoringConfig) -> anyhow::Result<Self> {
        let urgency = if config.urgency_patterns.is_empty() {
            None
        } else {
            let alternation = config
                .urgency_patterns
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?)
        };
        Ok(Self { urgency })
    }

    /// Sum of independent terms. Not clamped; ranking is purely relative
    /// and a noisy item may score below zero.
    pub fn score(
        &self,
        candidate: &RawCandidate,
        feed: &Feed,
        group: &CorrelationGroup,
        keywords: &Keywords,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut score = feed.tier().weight();

        score += time_decay(candidate, now);

        if group.is_multi_source() {
            score += MULTI_SOURCE_BONUS;
        }

        if candidate.flagged {
            score += METADATA_BONUS;
        }

        if self
            .urgency
            .as_ref()
            .is_some_and(|re| re.is_match(&candidate.title))
        {
            score += TITLE_PATTERN_BONUS;
        }

        score += keyword_adjustment(candidate, keywords);

        (score * 100.0).round() / 100.0
    }
}

/// Linear decay from TIME_DECAY_MAX at age zero down to 0 at
/// DECAY_SPAN_DAYS. An undated candidate counts as fully recent.
fn time_decay(candidate: &RawCandidate, now: DateTime<Utc>) -> f64 {
    let age_days =
        (now - candidate.published_or(now)).num_seconds() as f64 / 3600.0 / 24.0;
    let freshness = (1.0 - age_days / DECAY_SPAN_DAYS).clamp(0.0, 1.0);
    freshness * TIME_DECAY_MAX
}

/// +20 per interest match (capped at +40 total), -30 per noise match,
/// both over the lowercased title + summary. Empty lists contribute 0.
fn keyword_adjustment(candidate: &RawCandidate, keywords: &Keywords) -> f64 {
    let haystack = format!("{} {}", candidate.title, candidate.summary).to_lowercase();

    let interest_hits = keywords
        .interests
        .iter()
        .filter(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
        .count() as f64;
    let noise_hits = keywords
        .noise
        .iter()
        .filter(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
        .count() as f64;

    (interest_hits * KEYWORD_BOOST).min(KEYWORD_BOOST_CAP) - noise_hits * KEYWORD_PENALTY
}
