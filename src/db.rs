use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::config::{FeedConfig, Tier};

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub user: Option<String>,
    pub name: String,
    pub url: String,
    pub category: String,
    pub max_items: i64,
    pub tier: String,
    pub active: bool,
    pub last_fetched: Option<String>,
    pub last_error: Option<String>,
}

impl Feed {
    pub fn tier(&self) -> Tier {
        Tier::from_str_or_default(&self.tier)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: Option<String>,
    pub score: f64,
    pub category: String,
    pub source_name: String,
    pub sources: String,
    pub fetched_at: String,
}

impl Item {
    /// Contributing source names, decoded from the JSON column
    pub fn source_names(&self) -> Vec<String> {
        serde_json::from_str(&self.sources).unwrap_or_default()
    }
}

/// One ranked item ready for the upsert batch
#[derive(Debug, Clone)]
pub struct NewItem {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub category: String,
    pub source_name: String,
    pub sources: Vec<String>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user TEXT,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL DEFAULT 'Uncategorized',
                max_items INTEGER NOT NULL DEFAULT 10,
                tier TEXT NOT NULL DEFAULT 'standard',
                active INTEGER NOT NULL DEFAULT 1,
                last_fetched TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                summary TEXT NOT NULL DEFAULT '',
                published_at TEXT,
                score REAL NOT NULL DEFAULT 0,
                category TEXT NOT NULL,
                source_name TEXT NOT NULL,
                sources TEXT NOT NULL DEFAULT '[]',
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_items_feed_score
            ON items(feed_id, score DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mirror the config's feed list into the feeds table, keyed by URL
    pub async fn sync_feeds(&self, configs: &[FeedConfig]) -> anyhow::Result<()> {
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO feeds (user, name, url, category, max_items, tier, active)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    user = excluded.user,
                    name = excluded.name,
                    category = excluded.category,
                    max_items = excluded.max_items,
                    tier = excluded.tier,
                    active = excluded.active
                "#,
            )
            .bind(&config.user)
            .bind(&config.name)
            .bind(&config.url)
            .bind(&config.category)
            .bind(config.max_items)
            .bind(config.tier.as_str())
            .bind(config.active)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_active_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let feeds =
            sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE active = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Persist one feed's ranked batch inside a transaction. The upsert is
    /// keyed on the URL: a URL seen in an earlier run keeps its id, feed
    /// ownership and published date; only score, summary, source set and
    /// fetch time are refreshed.
    pub async fn upsert_items(
        &self,
        items: &[NewItem],
        fetched_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let fetched_str = fetched_at.to_rfc3339();

        for item in items {
            let published_str = item.published_at.map(|p| p.to_rfc3339());
            let sources_json = serde_json::to_string(&item.sources)?;

            sqlx::query(
                r#"
                INSERT INTO items
                    (feed_id, title, url, summary, published_at, score,
                     category, source_name, sources, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    summary = excluded.summary,
                    score = excluded.score,
                    sources = excluded.sources,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(item.feed_id)
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.summary)
            .bind(published_str)
            .bind(item.score)
            .bind(&item.category)
            .bind(&item.source_name)
            .bind(sources_json)
            .bind(&fetched_str)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_item_by_url(&self, url: &str) -> anyhow::Result<Option<Item>> {
        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    pub async fn get_items_for_feed(&self, feed_id: i64) -> anyhow::Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT * FROM items
            WHERE feed_id = ?
            ORDER BY score DESC, published_at DESC NULLS LAST, id
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn get_item_count(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get_item_count_for_feed(&self, feed_id: i64) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn update_feed_fetched(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(error)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
