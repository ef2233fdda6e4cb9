use anyhow::Result;
use async_trait::async_trait;

use crate::analytics::models::{
    AggregateDelta, AggregateRow, BucketKey, MetricsRecord, MetricsSample, MetricsWrite,
    PageviewOutcome, PageviewRecord, StoredEvent,
};
use crate::analytics::stats::MetricSummary;

/// Nine statistics written back to a bucket by the batch job.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStats {
    pub ttfb: MetricSummary,
    pub dcl: MetricSummary,
    pub load: MetricSummary,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes).
    async fn init(&self) -> Result<()>;

    /// Apply a pageview beacon to the row for its identity: insert when
    /// unseen, backfill a metrics-first row, no-op on duplicates. Each
    /// mutation is a single atomic statement; the pageview fields are
    /// write-once (guarded by the pageview timestamp still being null).
    async fn record_pageview(&self, record: &PageviewRecord) -> Result<PageviewOutcome>;

    /// Apply a metrics beacon to the row for its identity: insert a
    /// metrics-only row when unseen, fill a pageview-only row, no-op on
    /// duplicates. Returns the bucket the counter increments belong to.
    async fn record_metrics(&self, record: &MetricsRecord) -> Result<MetricsWrite>;

    /// Fetch one event row by view identity.
    async fn get_event(&self, view_id: &str) -> Result<Option<StoredEvent>>;

    /// Single round-trip insert-or-increment of a bucket's counters.
    async fn bump_aggregate(&self, key: &BucketKey, delta: &AggregateDelta) -> Result<()>;

    /// Fetch one aggregate row by bucket key.
    async fn get_aggregate(&self, key: &BucketKey) -> Result<Option<AggregateRow>>;

    /// Buckets awaiting statistics: metrics counted but not yet processed.
    async fn pending_buckets(&self) -> Result<Vec<AggregateRow>>;

    /// Timing samples for a (date, domain) pair: every event with a non-null
    /// metrics capture timestamp.
    async fn metrics_samples(&self, date: &str, domain: &str) -> Result<Vec<MetricsSample>>;

    /// Write the nine statistics and the status payload, marking the bucket
    /// processed.
    async fn write_bucket_stats(
        &self,
        bucket_id: i64,
        stats: &BucketStats,
        status: &str,
    ) -> Result<()>;

    /// Clear the processed marker for every bucket of a (date, domain) pair
    /// so the next batch pass recomputes them. Returns affected rows.
    async fn clear_processed(&self, date: &str, domain: &str) -> Result<u64>;
}
