//! Beacon ingestion engine
//!
//! One call per inbound beacon: blacklist gate, bot classification,
//! idempotent event write, then a single atomic counter upsert for whatever
//! the event transition contributed. Bot counters are charged exactly once
//! per view identity, on the transition that first contributes the pageview
//! increment, so duplicates and backfills never inflate them.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::analytics::beacon::{Beacon, MetricsBeacon, PageviewBeacon};
use crate::analytics::blacklist::Blacklist;
use crate::analytics::bot::{classify, BotFlags};
use crate::analytics::models::{
    AggregateDelta, BucketKey, MetricsOutcome, PageviewOutcome,
};
use crate::analytics::ranges::IpRangeIndex;
use crate::storage::Storage;

/// Immutable per-process context consumed by the filter and classifier.
/// Constructed once at startup and shared read-only across requests.
pub struct AnalyticsContext {
    pub ranges: IpRangeIndex,
    pub blacklist: Blacklist,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Blacklisted,
    Pageview(PageviewOutcome),
    Metrics(MetricsOutcome),
}

pub struct Ingestor {
    storage: Arc<dyn Storage>,
    ctx: Arc<AnalyticsContext>,
}

impl Ingestor {
    pub fn new(storage: Arc<dyn Storage>, ctx: Arc<AnalyticsContext>) -> Self {
        Self { storage, ctx }
    }

    /// Process one beacon. Storage failures bubble up to the caller, which
    /// logs and drops the beacon (fire-and-forget, no retry queue).
    pub async fn ingest(
        &self,
        beacon: Beacon,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<IngestOutcome> {
        let ip_str = ip.unwrap_or("");
        let ua_str = user_agent.unwrap_or("");

        if self.ctx.blacklist.is_blacklisted(ip_str, ua_str) {
            debug!(view_id = beacon.view_id(), "dropping blacklisted beacon");
            return Ok(IngestOutcome::Blacklisted);
        }

        let flags = classify(&self.ctx.ranges, ua_str, ip_str);

        match beacon {
            Beacon::Pageview(b) => self.ingest_pageview(b, ip, user_agent, flags).await,
            Beacon::Metrics(b) => self.ingest_metrics(b, ip, user_agent, flags).await,
        }
    }

    async fn ingest_pageview(
        &self,
        beacon: PageviewBeacon,
        ip: Option<&str>,
        user_agent: Option<&str>,
        flags: BotFlags,
    ) -> Result<IngestOutcome> {
        let record = beacon.normalize(ip, user_agent);
        let outcome = self.storage.record_pageview(&record).await?;

        let delta = match outcome {
            PageviewOutcome::Inserted => AggregateDelta {
                pageviews: 1,
                pageviews_with_metrics: 0,
                bots: flags,
            },
            // The metrics-first path already charged this view's pageview
            // and bot counters; a duplicate charged them earlier.
            PageviewOutcome::Backfilled | PageviewOutcome::Duplicate => AggregateDelta::default(),
        };

        if !delta.is_zero() {
            let key = BucketKey {
                date: record.date.clone(),
                domain: record.domain.clone(),
                is_internal: record.is_internal,
                category: self.ctx.category.clone(),
            };
            self.storage.bump_aggregate(&key, &delta).await?;
        }

        Ok(IngestOutcome::Pageview(outcome))
    }

    async fn ingest_metrics(
        &self,
        beacon: MetricsBeacon,
        ip: Option<&str>,
        user_agent: Option<&str>,
        flags: BotFlags,
    ) -> Result<IngestOutcome> {
        let record = beacon.normalize(ip, user_agent);
        let write = self.storage.record_metrics(&record).await?;

        let delta = match write.outcome {
            // Metrics-first: this view has not contributed to `pageviews`
            // through any other path yet, so both counters move.
            MetricsOutcome::InsertedFirst => AggregateDelta {
                pageviews: 1,
                pageviews_with_metrics: 1,
                bots: flags,
            },
            MetricsOutcome::Filled => AggregateDelta {
                pageviews: 0,
                pageviews_with_metrics: 1,
                bots: BotFlags::default(),
            },
            MetricsOutcome::Duplicate => AggregateDelta::default(),
        };

        if !delta.is_zero() {
            // Counters are charged to the bucket the stored row belongs to,
            // not to anything derived from the metrics payload.
            if let Some(bucket) = &write.bucket {
                let key = BucketKey {
                    date: bucket.date.clone(),
                    domain: bucket.domain.clone(),
                    is_internal: bucket.is_internal,
                    category: self.ctx.category.clone(),
                };
                self.storage.bump_aggregate(&key, &delta).await?;
            }
        }

        Ok(IngestOutcome::Metrics(write.outcome))
    }
}
