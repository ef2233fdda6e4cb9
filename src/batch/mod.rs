//! Offline percentile recomputation over daily aggregate buckets
//!
//! Runs single-threaded and out-of-band from ingestion. Each pass scans
//! buckets that have counted metrics but are not yet processed, recomputes
//! the nine statistics from the raw event rows, and writes them back with a
//! status payload. One bucket failing never aborts the pass. Ingestion may
//! race the scan, so a mismatch between the live counter and the recomputed
//! count is a warning only.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::analytics::models::{AggregateRow, MetricsSample};
use crate::analytics::stats::summarize;
use crate::storage::trait_def::BucketStats;
use crate::storage::Storage;

pub struct StatsJob {
    storage: Arc<dyn Storage>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobReport {
    pub processed: usize,
    pub failed: usize,
}

impl StatsJob {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// One full pass over all pending buckets.
    pub async fn run_once(&self) -> Result<JobReport> {
        let buckets = self.storage.pending_buckets().await?;
        if buckets.is_empty() {
            return Ok(JobReport::default());
        }
        info!(buckets = buckets.len(), "recomputing bucket statistics");

        let mut report = JobReport::default();
        for bucket in &buckets {
            match self.process_bucket(bucket).await {
                Ok(()) => report.processed += 1,
                Err(err) => {
                    error!(
                        date = %bucket.date,
                        domain = %bucket.domain,
                        error = %err,
                        "bucket recompute failed, continuing with next bucket"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process_bucket(&self, bucket: &AggregateRow) -> Result<()> {
        let samples = self
            .storage
            .metrics_samples(&bucket.date, &bucket.domain)
            .await?;

        // Keep only events in this bucket's internal/external class. The
        // classification was stored on the event at ingestion, so a later
        // rule change cannot silently re-bucket old traffic.
        let matching: Vec<&MetricsSample> = samples
            .iter()
            .filter(|s| s.is_internal == bucket.is_internal)
            .collect();

        let recomputed = matching.len() as i64;
        if recomputed != bucket.pageviews_with_metrics {
            warn!(
                date = %bucket.date,
                domain = %bucket.domain,
                is_internal = bucket.is_internal,
                live = bucket.pageviews_with_metrics,
                recomputed,
                "recomputed metrics count differs from live counter"
            );
        }

        let ttfb: Vec<i64> = matching.iter().filter_map(|s| s.ttfb_ms).collect();
        let dcl: Vec<i64> = matching.iter().filter_map(|s| s.dcl_ms).collect();
        let load: Vec<i64> = matching.iter().filter_map(|s| s.load_ms).collect();

        let stats = BucketStats {
            ttfb: summarize(&ttfb),
            dcl: summarize(&dcl),
            load: summarize(&load),
        };

        let status = serde_json::json!({
            "recomputed": recomputed,
            "expected": bucket.pageviews_with_metrics,
            "computed_at": Utc::now().timestamp(),
        })
        .to_string();

        self.storage
            .write_bucket_stats(bucket.id, &stats, &status)
            .await
    }
}
