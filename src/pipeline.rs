use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::Config;
use crate::correlate::{self, TitleCorrelator};
use crate::db::{Database, Feed, NewItem};
use crate::fetch::{self, FetchError, RawCandidate};
use crate::merge;
use crate::score::Scorer;

/// One scheduled run: fetch all active feeds, correlate, score, merge,
/// cap, persist. Feeds live in the shared store; everything between
/// fetch and persist is in-memory and rebuilt per run.
pub struct Pipeline {
    client: Client,
    db: Arc<Database>,
    config: Config,
    scorer: Scorer,
    running: Arc<RwLock<bool>>,
}

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub candidates: usize,
    pub merged: usize,
    pub persisted: usize,
    pub batches_failed: usize,
}

impl Pipeline {
    pub fn new(db: Arc<Database>, config: Config) -> anyhow::Result<Self> {
        let client = fetch::build_client(config.fetch.timeout_secs)?;
        let scorer = Scorer::new(&config.scoring)?;

        Ok(Self {
            client,
            db,
            config,
            scorer,
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run once. A run already in progress is skipped; overlapping runs
    /// would be harmless anyway since the persist is an upsert keyed on
    /// URL, but there is no point doing the work twice.
    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        {
            let mut running = self.running.write().await;
            if *running {
                info!("Pipeline run already in progress, skipping");
                return Ok(RunSummary::default());
            }
            *running = true;
        }

        let result = self.run_inner().await;

        {
            let mut running = self.running.write().await;
            *running = false;
        }

        result
    }

    async fn run_inner(&self) -> anyhow::Result<RunSummary> {
        let now = Utc::now();
        let feeds = self.db.get_active_feeds().await?;
        info!("Pipeline run over {} active feeds", feeds.len());

        let mut summary = RunSummary::default();

        // Fetches are independent; one slow or broken feed must not hold
        // up or cancel its siblings
        let mut tasks = JoinSet::new();
        for feed in feeds.clone() {
            let client = self.client.clone();
            let max_age_days = self.config.fetch.max_age_days;
            tasks.spawn(async move {
                let result = fetch::fetch_feed(&client, &feed, max_age_days, now).await;
                (feed, result)
            });
        }

        let (fetched, dead_workers) = drain_fetch_tasks(tasks).await;
        summary.feeds_failed += dead_workers;

        let mut candidates: Vec<RawCandidate> = Vec::new();
        for (feed, result) in fetched {
            match result {
                Ok(entries) => {
                    info!("Fetched {} entries from '{}'", entries.len(), feed.name);
                    summary.feeds_ok += 1;
                    let _ = self.db.update_feed_fetched(feed.id, None).await;
                    candidates.extend(entries);
                }
                Err(e) => {
                    error!("Failed to fetch feed '{}': {}", feed.name, e);
                    summary.feeds_failed += 1;
                    let _ = self
                        .db
                        .update_feed_fetched(feed.id, Some(&e.to_string()))
                        .await;
                }
            }
        }
        summary.candidates = candidates.len();

        let feed_map: HashMap<i64, Feed> = feeds.into_iter().map(|f| (f.id, f)).collect();

        // These stages need the complete cross-feed candidate set, so
        // they run sequentially after every fetch has resolved
        let correlator = TitleCorrelator::new(&self.config.correlation, now);
        let groups = correlate::build_groups(&candidates, &correlator);
        let group_index = correlate::group_index(&groups, candidates.len());

        let scores: Vec<f64> = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let Some(feed) = feed_map.get(&candidate.feed_id) else {
                    return 0.0;
                };
                let keywords = self.config.keywords_for(feed.user.as_deref());
                self.scorer
                    .score(candidate, feed, &groups[group_index[i]], &keywords, now)
            })
            .collect();

        let merged = merge::dedupe_by_url(merge::merge_groups(
            &candidates,
            &scores,
            &groups,
            &feed_map,
            now,
        ));
        summary.merged = merged.len();

        let capped = enforce_caps(merged, &feed_map, now);

        let (persisted, batches_failed) = persist_batches(&self.db, capped, now).await;
        summary.persisted = persisted;
        summary.batches_failed = batches_failed;

        info!(
            "Run complete: {} feeds ok, {} failed, {} candidates, {} merged, {} persisted",
            summary.feeds_ok,
            summary.feeds_failed,
            summary.candidates,
            summary.merged,
            summary.persisted
        );
        Ok(summary)
    }
}

/// Drain the fetch tasks. A worker that dies loses only its own feed;
/// sibling results are still returned alongside the count of dead
/// workers.
async fn drain_fetch_tasks(
    mut tasks: JoinSet<(Feed, Result<Vec<RawCandidate>, FetchError>)>,
) -> (Vec<(Feed, Result<Vec<RawCandidate>, FetchError>)>, usize) {
    let mut results = Vec::new();
    let mut dead_workers = 0;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => results.push(outcome),
            Err(e) => {
                error!("Fetch worker did not complete: {}", e);
                dead_workers += 1;
            }
        }
    }

    (results, dead_workers)
}

/// Per-feed batches: a persistence failure on one feed leaves the
/// others committed, and a retry next cycle is safe because the write
/// is an upsert
async fn persist_batches(
    db: &Database,
    batches: HashMap<i64, Vec<NewItem>>,
    now: DateTime<Utc>,
) -> (usize, usize) {
    let mut persisted = 0;
    let mut failed = 0;

    for (feed_id, batch) in batches {
        match db.upsert_items(&batch, now).await {
            Ok(()) => persisted += batch.len(),
            Err(e) => {
                error!("Failed to persist batch for feed {}: {}", feed_id, e);
                failed += 1;
            }
        }
    }

    (persisted, failed)
}

/// Truncate each feed's contribution to its configured cap: sort by
/// score descending (more recent published first on ties), keep the top
/// `max_items`. Items already persisted in earlier runs are not touched.
pub fn enforce_caps(
    items: Vec<NewItem>,
    feeds: &HashMap<i64, Feed>,
    now: DateTime<Utc>,
) -> HashMap<i64, Vec<NewItem>> {
    let mut by_feed: HashMap<i64, Vec<NewItem>> = HashMap::new();
    for item in items {
        by_feed.entry(item.feed_id).or_default().push(item);
    }

    for (feed_id, batch) in by_feed.iter_mut() {
        batch.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.published_at
                        .unwrap_or(now)
                        .cmp(&a.published_at.unwrap_or(now))
                })
        });
        if let Some(feed) = feeds.get(feed_id) {
            batch.truncate(feed.max_items.max(0) as usize);
        }
    }

    by_feed
}

/// Scheduled loop: one run immediately, then one per interval. The
/// scheduler never overlaps runs; the `running` guard covers the odd
/// case where a run outlives the interval.
pub async fn start_scheduled_runs(pipeline: Arc<Pipeline>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial pipeline run");
    if let Err(e) = pipeline.run().await {
        error!("Initial pipeline run failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled pipeline run");
        if let Err(e) = pipeline.run().await {
            error!("Scheduled pipeline run failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;
    use chrono::Duration as ChronoDuration;

    fn feed(id: i64, max_items: i64) -> Feed {
        Feed {
            id,
            user: None,
            name: format!("Feed {id}"),
            url: format!("https://feed{id}.example/rss"),
            category: "News".to_string(),
            max_items,
            tier: Tier::Standard.as_str().to_string(),
            active: true,
            last_fetched: None,
            last_error: None,
        }
    }

    fn item(feed_id: i64, url: &str, score: f64, age_hours: i64, now: DateTime<Utc>) -> NewItem {
        NewItem {
            feed_id,
            title: url.to_string(),
            url: url.to_string(),
            summary: String::new(),
            published_at: Some(now - ChronoDuration::hours(age_hours)),
            score,
            category: "News".to_string(),
            source_name: format!("Feed {feed_id}"),
            sources: vec![format!("Feed {feed_id}")],
        }
    }

    #[test]
    fn test_cap_keeps_top_scores() {
        let now = Utc::now();
        let feeds: HashMap<i64, Feed> = [(1, feed(1, 2))].into();
        let items = vec![
            item(1, "https://a/1", 10.0, 1, now),
            item(1, "https://a/2", 90.0, 1, now),
            item(1, "https://a/3", 50.0, 1, now),
        ];

        let capped = enforce_caps(items, &feeds, now);
        let batch = &capped[&1];

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].score, 90.0);
        assert_eq!(batch[1].score, 50.0);
    }

    #[test]
    fn test_cap_is_per_feed() {
        let now = Utc::now();
        let feeds: HashMap<i64, Feed> = [(1, feed(1, 1)), (2, feed(2, 2))].into();
        let items = vec![
            item(1, "https://a/1", 10.0, 1, now),
            item(1, "https://a/2", 20.0, 1, now),
            item(2, "https://b/1", 10.0, 1, now),
            item(2, "https://b/2", 20.0, 1, now),
        ];

        let capped = enforce_caps(items, &feeds, now);

        assert_eq!(capped[&1].len(), 1);
        assert_eq!(capped[&2].len(), 2);
    }

    #[test]
    fn test_score_tie_broken_by_recency() {
        let now = Utc::now();
        let feeds: HashMap<i64, Feed> = [(1, feed(1, 1))].into();
        let items = vec![
            item(1, "https://a/old", 50.0, 10, now),
            item(1, "https://a/new", 50.0, 1, now),
        ];

        let capped = enforce_caps(items, &feeds, now);
        let batch = &capped[&1];

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].url, "https://a/new");
    }

    #[test]
    fn test_undated_item_ties_as_most_recent() {
        let now = Utc::now();
        let feeds: HashMap<i64, Feed> = [(1, feed(1, 1))].into();
        let mut undated = item(1, "https://a/undated", 50.0, 0, now);
        undated.published_at = None;
        let items = vec![item(1, "https://a/dated", 50.0, 3, now), undated];

        let capped = enforce_caps(items, &feeds, now);
        assert_eq!(capped[&1][0].url, "https://a/undated");
    }

    #[test]
    fn test_under_cap_batch_unchanged() {
        let now = Utc::now();
        let feeds: HashMap<i64, Feed> = [(1, feed(1, 10))].into();
        let items = vec![
            item(1, "https://a/1", 10.0, 1, now),
            item(1, "https://a/2", 20.0, 1, now),
        ];

        let capped = enforce_caps(items, &feeds, now);
        assert_eq!(capped[&1].len(), 2);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let now = Utc::now();
        let feeds: HashMap<i64, Feed> = [(1, feed(1, 10))].into();
        let capped = enforce_caps(Vec::new(), &feeds, now);
        assert!(capped.is_empty());
    }

    #[tokio::test]
    async fn test_dead_fetch_worker_does_not_drop_sibling_results() {
        let mut tasks = JoinSet::new();
        let healthy = feed(1, 10);
        tasks.spawn(async move { (healthy, Ok(Vec::new())) });
        tasks.spawn(async { panic!("fetch worker died") });

        let (results, dead_workers) = drain_fetch_tasks(tasks).await;

        assert_eq!(dead_workers, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, 1);
        assert!(results[0].1.is_ok());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_block_sibling_batches() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db.sync_feeds(&[crate::config::FeedConfig {
            name: "Good Feed".to_string(),
            url: "https://good.example/rss".to_string(),
            category: "News".to_string(),
            max_items: 10,
            tier: Tier::Standard,
            active: true,
            user: None,
        }])
        .await
        .unwrap();
        let good_id = db.get_active_feeds().await.unwrap()[0].id;

        let now = Utc::now();
        let mut batches: HashMap<i64, Vec<NewItem>> = HashMap::new();
        batches.insert(good_id, vec![item(good_id, "https://a/ok", 10.0, 1, now)]);
        // This feed id does not exist, so its batch violates the
        // items.feed_id foreign key and fails
        batches.insert(9999, vec![item(9999, "https://b/bad", 10.0, 1, now)]);

        let (persisted, failed) = persist_batches(&db, batches, now).await;

        assert_eq!(persisted, 1);
        assert_eq!(failed, 1);
        assert!(db.get_item_by_url("https://a/ok").await.unwrap().is_some());
        assert!(db.get_item_by_url("https://b/bad").await.unwrap().is_none());
    }
}
