use std::collections::HashSet;

use chrono::{DateTime, Utc};
use strsim::normalized_levenshtein;

use crate::config::CorrelationConfig;
use crate::fetch::RawCandidate;

/// Same-story judgment between two candidates. Implementations must be
/// symmetric; the threshold/algorithm can be swapped without touching
/// the pipeline.
pub trait Correlator {
    fn correlates(&self, a: &RawCandidate, b: &RawCandidate) -> bool;
}

/// Default strategy: normalized-Levenshtein title similarity plus a
/// bounded published-time window. Candidates from the same feed never
/// correlate (a feed cannot multi-source itself).
pub struct TitleCorrelator {
    similarity_threshold: f64,
    window_hours: i64,
    now: DateTime<Utc>,
}

impl TitleCorrelator {
    pub fn new(config: &CorrelationConfig, now: DateTime<Utc>) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            window_hours: config.window_hours,
            now,
        }
    }
}

impl Correlator for TitleCorrelator {
    fn correlates(&self, a: &RawCandidate, b: &RawCandidate) -> bool {
        if a.feed_id == b.feed_id {
            return false;
        }

        // Compare in minutes: whole-hour truncation would let a gap of
        // 48h59m slip inside a 48-hour window
        let gap = a.published_or(self.now) - b.published_or(self.now);
        if gap.num_minutes().abs() > self.window_hours * 60 {
            return false;
        }

        let similarity =
            normalized_levenshtein(&normalize_title(&a.title), &normalize_title(&b.title));
        similarity >= self.similarity_threshold
    }
}

/// Lowercase and collapse whitespace before comparing titles
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Candidates judged to report the same story, as indices into the
/// run's candidate slice. Rebuilt every run.
#[derive(Debug, Clone)]
pub struct CorrelationGroup {
    pub members: Vec<usize>,
    pub distinct_feeds: usize,
}

impl CorrelationGroup {
    /// The multi-source bonus applies from three distinct feeds up
    pub fn is_multi_source(&self) -> bool {
        self.distinct_feeds >= 3
    }
}

/// Partition the run's candidates into correlation groups. Union-find
/// over correlated pairs, so membership is symmetric and transitive
/// regardless of pair order.
pub fn build_groups(
    candidates: &[RawCandidate],
    correlator: &dyn Correlator,
) -> Vec<CorrelationGroup> {
    let n = candidates.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        let p = parent[i];
        if p != i {
            let root = find(parent, p);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if correlator.correlates(&candidates[i], &candidates[j]) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut groups: Vec<CorrelationGroup> = Vec::new();
    let mut root_to_group: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        match root_to_group[root] {
            Some(g) => groups[g].members.push(i),
            None => {
                root_to_group[root] = Some(groups.len());
                groups.push(CorrelationGroup {
                    members: vec![i],
                    distinct_feeds: 0,
                });
            }
        }
    }

    for group in &mut groups {
        let feeds: HashSet<i64> = group.members.iter().map(|&i| candidates[i].feed_id).collect();
        group.distinct_feeds = feeds.len();
    }

    groups
}

/// Map each candidate index to the index of its group
pub fn group_index(groups: &[CorrelationGroup], candidate_count: usize) -> Vec<usize> {
    let mut index = vec![0; candidate_count];
    for (g, group) in groups.iter().enumerate() {
        for &member in &group.members {
            index[member] = g;
        }
    }
    index
}
