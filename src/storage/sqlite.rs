use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::analytics::beacon::UNKNOWN_DOMAIN;
use crate::analytics::models::{
    AggregateDelta, AggregateRow, BucketKey, EventBucket, MetricsOutcome, MetricsRecord,
    MetricsSample, MetricsWrite, PageviewOutcome, PageviewRecord, StoredEvent,
};
use crate::storage::trait_def::{BucketStats, Storage};

const EVENT_COLUMNS: &str = "id, view_id, date, domain, url, referrer, ip, user_agent, language, timezone, \
     viewport_width, viewport_height, is_internal, pageview_at, metrics_at, \
     ttfb_ms, ttfb_at, dcl_ms, dcl_at, load_ms, load_at";

const AGGREGATE_COLUMNS: &str = "id, date, domain, is_internal, category, pageviews, pageviews_with_metrics, \
     bot_ua_googlebot, bot_ua_bingbot, bot_ip_googlebot, bot_ip_google, \
     bot_ip_bingbot, bot_ip_microsoft, \
     avg_ttfb, median_ttfb, p95_ttfb, avg_dcl, median_dcl, p95_dcl, \
     avg_load, median_load, p95_load, processed, status";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                view_id TEXT NOT NULL UNIQUE,
                date TEXT NOT NULL,
                domain TEXT NOT NULL,
                url TEXT,
                referrer TEXT,
                ip TEXT,
                user_agent TEXT,
                language TEXT,
                timezone TEXT,
                viewport_width INTEGER,
                viewport_height INTEGER,
                is_internal INTEGER NOT NULL DEFAULT 0,
                pageview_at INTEGER,
                metrics_at INTEGER,
                ttfb_ms INTEGER,
                ttfb_at INTEGER,
                dcl_ms INTEGER,
                dcl_at INTEGER,
                load_ms INTEGER,
                load_at INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_date_domain ON events(date, domain)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                domain TEXT NOT NULL,
                is_internal INTEGER NOT NULL DEFAULT 0,
                category TEXT NOT NULL DEFAULT 'default',
                pageviews INTEGER NOT NULL DEFAULT 0,
                pageviews_with_metrics INTEGER NOT NULL DEFAULT 0,
                bot_ua_googlebot INTEGER NOT NULL DEFAULT 0,
                bot_ua_bingbot INTEGER NOT NULL DEFAULT 0,
                bot_ip_googlebot INTEGER NOT NULL DEFAULT 0,
                bot_ip_google INTEGER NOT NULL DEFAULT 0,
                bot_ip_bingbot INTEGER NOT NULL DEFAULT 0,
                bot_ip_microsoft INTEGER NOT NULL DEFAULT 0,
                avg_ttfb REAL,
                median_ttfb REAL,
                p95_ttfb REAL,
                avg_dcl REAL,
                median_dcl REAL,
                p95_dcl REAL,
                avg_load REAL,
                median_load REAL,
                p95_load REAL,
                processed INTEGER NOT NULL DEFAULT 0,
                status TEXT,
                UNIQUE(date, domain, is_internal, category)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aggregates_pending \
             ON daily_aggregates(processed, pageviews_with_metrics)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record_pageview(&self, record: &PageviewRecord) -> Result<PageviewOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (view_id, date, domain, url, referrer, ip, user_agent, language, timezone,
                                viewport_width, viewport_height, is_internal, pageview_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(view_id) DO NOTHING
            "#,
        )
        .bind(&record.view_id)
        .bind(&record.date)
        .bind(&record.domain)
        .bind(&record.url)
        .bind(&record.referrer)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(&record.language)
        .bind(&record.timezone)
        .bind(record.viewport_width)
        .bind(record.viewport_height)
        .bind(record.is_internal as i64)
        .bind(record.pageview_at)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(PageviewOutcome::Inserted);
        }

        // Metrics-first row: backfill the pageview-specific fields, guarded
        // so a racing duplicate cannot clobber an earlier write.
        let result = sqlx::query(
            r#"
            UPDATE events
            SET date = ?, domain = ?, url = ?, referrer = ?, language = ?, timezone = ?,
                viewport_width = ?, viewport_height = ?, is_internal = ?, pageview_at = ?
            WHERE view_id = ? AND pageview_at IS NULL
            "#,
        )
        .bind(&record.date)
        .bind(&record.domain)
        .bind(&record.url)
        .bind(&record.referrer)
        .bind(&record.language)
        .bind(&record.timezone)
        .bind(record.viewport_width)
        .bind(record.viewport_height)
        .bind(record.is_internal as i64)
        .bind(record.pageview_at)
        .bind(&record.view_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(if result.rows_affected() == 1 {
            PageviewOutcome::Backfilled
        } else {
            PageviewOutcome::Duplicate
        })
    }

    async fn record_metrics(&self, record: &MetricsRecord) -> Result<MetricsWrite> {
        // Unseen identity: create the row immediately so the pageview beacon
        // can backfill it later. The pageview half is unknown, so the row
        // lands in the placeholder bucket.
        let result = sqlx::query(
            r#"
            INSERT INTO events (view_id, date, domain, is_internal, ip, user_agent, metrics_at,
                                ttfb_ms, ttfb_at, dcl_ms, dcl_at, load_ms, load_at)
            VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(view_id) DO NOTHING
            "#,
        )
        .bind(&record.view_id)
        .bind(&record.date)
        .bind(UNKNOWN_DOMAIN)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(record.metrics_at)
        .bind(record.ttfb_ms)
        .bind(record.ttfb_at())
        .bind(record.dcl_ms)
        .bind(record.dcl_at())
        .bind(record.load_ms)
        .bind(record.load_at())
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(MetricsWrite {
                outcome: MetricsOutcome::InsertedFirst,
                bucket: Some(EventBucket {
                    date: record.date.clone(),
                    domain: UNKNOWN_DOMAIN.to_string(),
                    is_internal: false,
                }),
            });
        }

        let row = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            UPDATE events
            SET metrics_at = ?, ttfb_ms = ?, ttfb_at = ?, dcl_ms = ?, dcl_at = ?,
                load_ms = ?, load_at = ?
            WHERE view_id = ? AND metrics_at IS NULL
            RETURNING date, domain, is_internal
            "#,
        )
        .bind(record.metrics_at)
        .bind(record.ttfb_ms)
        .bind(record.ttfb_at())
        .bind(record.dcl_ms)
        .bind(record.dcl_at())
        .bind(record.load_ms)
        .bind(record.load_at())
        .bind(&record.view_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(match row {
            Some((date, domain, is_internal)) => MetricsWrite {
                outcome: MetricsOutcome::Filled,
                bucket: Some(EventBucket {
                    date,
                    domain,
                    is_internal: is_internal != 0,
                }),
            },
            None => MetricsWrite {
                outcome: MetricsOutcome::Duplicate,
                bucket: None,
            },
        })
    }

    async fn get_event(&self, view_id: &str) -> Result<Option<StoredEvent>> {
        let event = sqlx::query_as::<_, StoredEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE view_id = ?"
        ))
        .bind(view_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(event)
    }

    async fn bump_aggregate(&self, key: &BucketKey, delta: &AggregateDelta) -> Result<()> {
        let mut query = sqlx::query(
            r#"
            INSERT INTO daily_aggregates (
                date, domain, is_internal, category,
                pageviews, pageviews_with_metrics,
                bot_ua_googlebot, bot_ua_bingbot, bot_ip_googlebot,
                bot_ip_google, bot_ip_bingbot, bot_ip_microsoft
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date, domain, is_internal, category) DO UPDATE SET
                pageviews = pageviews + excluded.pageviews,
                pageviews_with_metrics = pageviews_with_metrics + excluded.pageviews_with_metrics,
                bot_ua_googlebot = bot_ua_googlebot + excluded.bot_ua_googlebot,
                bot_ua_bingbot = bot_ua_bingbot + excluded.bot_ua_bingbot,
                bot_ip_googlebot = bot_ip_googlebot + excluded.bot_ip_googlebot,
                bot_ip_google = bot_ip_google + excluded.bot_ip_google,
                bot_ip_bingbot = bot_ip_bingbot + excluded.bot_ip_bingbot,
                bot_ip_microsoft = bot_ip_microsoft + excluded.bot_ip_microsoft
            "#,
        )
        .bind(&key.date)
        .bind(&key.domain)
        .bind(key.is_internal as i64)
        .bind(&key.category)
        .bind(delta.pageviews)
        .bind(delta.pageviews_with_metrics);

        for bot_delta in delta.bots.as_deltas() {
            query = query.bind(bot_delta);
        }

        query.execute(self.pool.as_ref()).await?;
        Ok(())
    }

    async fn get_aggregate(&self, key: &BucketKey) -> Result<Option<AggregateRow>> {
        let row = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM daily_aggregates \
             WHERE date = ? AND domain = ? AND is_internal = ? AND category = ?"
        ))
        .bind(&key.date)
        .bind(&key.domain)
        .bind(key.is_internal as i64)
        .bind(&key.category)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    async fn pending_buckets(&self) -> Result<Vec<AggregateRow>> {
        let rows = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM daily_aggregates \
             WHERE pageviews_with_metrics > 0 AND processed = 0 \
             ORDER BY date, domain, is_internal"
        ))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn metrics_samples(&self, date: &str, domain: &str) -> Result<Vec<MetricsSample>> {
        let rows = sqlx::query_as::<_, MetricsSample>(
            r#"
            SELECT is_internal, ttfb_ms, dcl_ms, load_ms
            FROM events
            WHERE date = ? AND domain = ? AND metrics_at IS NOT NULL
            "#,
        )
        .bind(date)
        .bind(domain)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn write_bucket_stats(
        &self,
        bucket_id: i64,
        stats: &BucketStats,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE daily_aggregates
            SET avg_ttfb = ?, median_ttfb = ?, p95_ttfb = ?,
                avg_dcl = ?, median_dcl = ?, p95_dcl = ?,
                avg_load = ?, median_load = ?, p95_load = ?,
                processed = 1, status = ?
            WHERE id = ?
            "#,
        )
        .bind(stats.ttfb.avg)
        .bind(stats.ttfb.median)
        .bind(stats.ttfb.p95)
        .bind(stats.dcl.avg)
        .bind(stats.dcl.median)
        .bind(stats.dcl.p95)
        .bind(stats.load.avg)
        .bind(stats.load.median)
        .bind(stats.load.p95)
        .bind(status)
        .bind(bucket_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn clear_processed(&self, date: &str, domain: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE daily_aggregates
            SET processed = 0, status = NULL
            WHERE date = ? AND domain = ?
            "#,
        )
        .bind(date)
        .bind(domain)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}
