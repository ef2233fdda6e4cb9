use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
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

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                view_id TEXT NOT NULL UNIQUE,
                date TEXT NOT NULL,
                domain TEXT NOT NULL,
                url TEXT,
                referrer TEXT,
                ip TEXT,
                user_agent TEXT,
                language TEXT,
                timezone TEXT,
                viewport_width BIGINT,
                viewport_height BIGINT,
                is_internal BIGINT NOT NULL DEFAULT 0,
                pageview_at BIGINT,
                metrics_at BIGINT,
                ttfb_ms BIGINT,
                ttfb_at BIGINT,
                dcl_ms BIGINT,
                dcl_at BIGINT,
                load_ms BIGINT,
                load_at BIGINT
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
                id BIGSERIAL PRIMARY KEY,
                date TEXT NOT NULL,
                domain TEXT NOT NULL,
                is_internal BIGINT NOT NULL DEFAULT 0,
                category TEXT NOT NULL DEFAULT 'default',
                pageviews BIGINT NOT NULL DEFAULT 0,
                pageviews_with_metrics BIGINT NOT NULL DEFAULT 0,
                bot_ua_googlebot BIGINT NOT NULL DEFAULT 0,
                bot_ua_bingbot BIGINT NOT NULL DEFAULT 0,
                bot_ip_googlebot BIGINT NOT NULL DEFAULT 0,
                bot_ip_google BIGINT NOT NULL DEFAULT 0,
                bot_ip_bingbot BIGINT NOT NULL DEFAULT 0,
                bot_ip_microsoft BIGINT NOT NULL DEFAULT 0,
                avg_ttfb DOUBLE PRECISION,
                median_ttfb DOUBLE PRECISION,
                p95_ttfb DOUBLE PRECISION,
                avg_dcl DOUBLE PRECISION,
                median_dcl DOUBLE PRECISION,
                p95_dcl DOUBLE PRECISION,
                avg_load DOUBLE PRECISION,
                median_load DOUBLE PRECISION,
                p95_load DOUBLE PRECISION,
                processed BIGINT NOT NULL DEFAULT 0,
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (view_id) DO NOTHING
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

        let result = sqlx::query(
            r#"
            UPDATE events
            SET date = $1, domain = $2, url = $3, referrer = $4, language = $5, timezone = $6,
                viewport_width = $7, viewport_height = $8, is_internal = $9, pageview_at = $10
            WHERE view_id = $11 AND pageview_at IS NULL
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
        let result = sqlx::query(
            r#"
            INSERT INTO events (view_id, date, domain, is_internal, ip, user_agent, metrics_at,
                                ttfb_ms, ttfb_at, dcl_ms, dcl_at, load_ms, load_at)
            VALUES ($1, $2, $3, 0, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (view_id) DO NOTHING
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
            SET metrics_at = $1, ttfb_ms = $2, ttfb_at = $3, dcl_ms = $4, dcl_at = $5,
                load_ms = $6, load_at = $7
            WHERE view_id = $8 AND metrics_at IS NULL
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
            "SELECT {EVENT_COLUMNS} FROM events WHERE view_id = $1"
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (date, domain, is_internal, category) DO UPDATE SET
                pageviews = daily_aggregates.pageviews + EXCLUDED.pageviews,
                pageviews_with_metrics =
                    daily_aggregates.pageviews_with_metrics + EXCLUDED.pageviews_with_metrics,
                bot_ua_googlebot = daily_aggregates.bot_ua_googlebot + EXCLUDED.bot_ua_googlebot,
                bot_ua_bingbot = daily_aggregates.bot_ua_bingbot + EXCLUDED.bot_ua_bingbot,
                bot_ip_googlebot = daily_aggregates.bot_ip_googlebot + EXCLUDED.bot_ip_googlebot,
                bot_ip_google = daily_aggregates.bot_ip_google + EXCLUDED.bot_ip_google,
                bot_ip_bingbot = daily_aggregates.bot_ip_bingbot + EXCLUDED.bot_ip_bingbot,
                bot_ip_microsoft = daily_aggregates.bot_ip_microsoft + EXCLUDED.bot_ip_microsoft
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
             WHERE date = $1 AND domain = $2 AND is_internal = $3 AND category = $4"
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
            WHERE date = $1 AND domain = $2 AND metrics_at IS NOT NULL
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
            SET avg_ttfb = $1, median_ttfb = $2, p95_ttfb = $3,
                avg_dcl = $4, median_dcl = $5, p95_dcl = $6,
                avg_load = $7, median_load = $8, p95_load = $9,
                processed = 1, status = $10
            WHERE id = $11
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
            WHERE date = $1 AND domain = $2
            "#,
        )
        .bind(date)
        .bind(domain)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}
