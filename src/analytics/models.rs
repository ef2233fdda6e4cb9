//! Data models for events and daily aggregates

use crate::analytics::bot::BotFlags;

/// Logical lifecycle state of the row behind one view identity.
///
/// A row is created by whichever beacon arrives first and promoted to
/// `Complete` by the other one; it is never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Absent,
    PageviewOnly,
    MetricsOnly,
    Complete,
}

/// What a pageview beacon did to the row for its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageviewOutcome {
    /// Identity unseen; a new pageview-only row was inserted.
    Inserted,
    /// A metrics-only row existed; the pageview fields were backfilled.
    Backfilled,
    /// The pageview half was already populated.
    Duplicate,
}

/// What a metrics beacon did to the row for its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsOutcome {
    /// Identity unseen; a metrics-only row was inserted ahead of its
    /// pageview beacon.
    InsertedFirst,
    /// A pageview-only row existed; the metric fields were filled in.
    Filled,
    /// The metrics half was already populated.
    Duplicate,
}

impl EventState {
    pub fn from_markers(pageview_at: Option<i64>, metrics_at: Option<i64>) -> Self {
        match (pageview_at, metrics_at) {
            (None, None) => EventState::Absent,
            (Some(_), None) => EventState::PageviewOnly,
            (None, Some(_)) => EventState::MetricsOnly,
            (Some(_), Some(_)) => EventState::Complete,
        }
    }

    /// Transition for an arriving pageview beacon. The store realizes this
    /// with an insert-or-conflict plus a guarded update; this function is the
    /// canonical definition the SQL must agree with.
    pub fn on_pageview(self) -> (EventState, PageviewOutcome) {
        match self {
            EventState::Absent => (EventState::PageviewOnly, PageviewOutcome::Inserted),
            EventState::MetricsOnly => (EventState::Complete, PageviewOutcome::Backfilled),
            EventState::PageviewOnly | EventState::Complete => (self, PageviewOutcome::Duplicate),
        }
    }

    /// Transition for an arriving metrics beacon.
    pub fn on_metrics(self) -> (EventState, MetricsOutcome) {
        match self {
            EventState::Absent => (EventState::MetricsOnly, MetricsOutcome::InsertedFirst),
            EventState::PageviewOnly => (EventState::Complete, MetricsOutcome::Filled),
            EventState::MetricsOnly | EventState::Complete => (self, MetricsOutcome::Duplicate),
        }
    }
}

/// Normalized pageview beacon, ready to persist. All sanitization has
/// already happened; invalid optional fields are null here.
#[derive(Debug, Clone)]
pub struct PageviewRecord {
    pub view_id: String,
    pub date: String,
    pub domain: String,
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub viewport_width: Option<i64>,
    pub viewport_height: Option<i64>,
    pub is_internal: bool,
    /// Write-once marker for the pageview half; always set.
    pub pageview_at: i64,
}

/// Normalized metrics beacon, ready to persist.
#[derive(Debug, Clone)]
pub struct MetricsRecord {
    pub view_id: String,
    /// Date bucket derived from the capture timestamp; only used when this
    /// beacon creates the row (metrics-first race).
    pub date: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Write-once marker for the metrics half; always set.
    pub metrics_at: i64,
    pub ttfb_ms: Option<i64>,
    pub dcl_ms: Option<i64>,
    pub load_ms: Option<i64>,
}

impl MetricsRecord {
    /// Per-metric capture timestamps: set only when the metric itself
    /// survived validation.
    pub fn ttfb_at(&self) -> Option<i64> {
        self.ttfb_ms.map(|_| self.metrics_at)
    }

    pub fn dcl_at(&self) -> Option<i64> {
        self.dcl_ms.map(|_| self.metrics_at)
    }

    pub fn load_at(&self) -> Option<i64> {
        self.load_ms.map(|_| self.metrics_at)
    }
}

/// Bucket coordinates of the row a metrics write landed on. For a fill this
/// is the row's pageview-derived bucket; for a metrics-first insert it is
/// the placeholder bucket the row was created under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBucket {
    pub date: String,
    pub domain: String,
    pub is_internal: bool,
}

/// Result of a metrics write: the transition taken plus the bucket to charge
/// the counter increments to (absent for duplicates, which charge nothing).
#[derive(Debug, Clone)]
pub struct MetricsWrite {
    pub outcome: MetricsOutcome,
    pub bucket: Option<EventBucket>,
}

/// One event row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredEvent {
    pub id: i64,
    pub view_id: String,
    pub date: String,
    pub domain: String,
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub viewport_width: Option<i64>,
    pub viewport_height: Option<i64>,
    pub is_internal: i64,
    pub pageview_at: Option<i64>,
    pub metrics_at: Option<i64>,
    pub ttfb_ms: Option<i64>,
    pub ttfb_at: Option<i64>,
    pub dcl_ms: Option<i64>,
    pub dcl_at: Option<i64>,
    pub load_ms: Option<i64>,
    pub load_at: Option<i64>,
}

impl StoredEvent {
    pub fn state(&self) -> EventState {
        EventState::from_markers(self.pageview_at, self.metrics_at)
    }
}

/// Identity of a daily aggregate bucket.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct BucketKey {
    pub date: String,
    pub domain: String,
    pub is_internal: bool,
    pub category: String,
}

/// Counter increments applied by one processed event. All increments for an
/// event travel in a single atomic upsert.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateDelta {
    pub pageviews: i64,
    pub pageviews_with_metrics: i64,
    pub bots: BotFlags,
}

impl AggregateDelta {
    pub fn is_zero(&self) -> bool {
        self.pageviews == 0 && self.pageviews_with_metrics == 0 && !self.bots.any()
    }
}

/// One daily aggregate row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AggregateRow {
    pub id: i64,
    pub date: String,
    pub domain: String,
    pub is_internal: i64,
    pub category: String,
    pub pageviews: i64,
    pub pageviews_with_metrics: i64,
    pub bot_ua_googlebot: i64,
    pub bot_ua_bingbot: i64,
    pub bot_ip_googlebot: i64,
    pub bot_ip_google: i64,
    pub bot_ip_bingbot: i64,
    pub bot_ip_microsoft: i64,
    pub avg_ttfb: Option<f64>,
    pub median_ttfb: Option<f64>,
    pub p95_ttfb: Option<f64>,
    pub avg_dcl: Option<f64>,
    pub median_dcl: Option<f64>,
    pub p95_dcl: Option<f64>,
    pub avg_load: Option<f64>,
    pub median_load: Option<f64>,
    pub p95_load: Option<f64>,
    pub processed: i64,
    pub status: Option<String>,
}

/// Slice of an event row the batch job needs to recompute statistics.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricsSample {
    pub is_internal: i64,
    pub ttfb_ms: Option<i64>,
    pub dcl_ms: Option<i64>,
    pub load_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pageview_transitions() {
        assert_eq!(
            EventState::Absent.on_pageview(),
            (EventState::PageviewOnly, PageviewOutcome::Inserted)
        );
        assert_eq!(
            EventState::MetricsOnly.on_pageview(),
            (EventState::Complete, PageviewOutcome::Backfilled)
        );
        assert_eq!(
            EventState::PageviewOnly.on_pageview(),
            (EventState::PageviewOnly, PageviewOutcome::Duplicate)
        );
        assert_eq!(
            EventState::Complete.on_pageview(),
            (EventState::Complete, PageviewOutcome::Duplicate)
        );
    }

    #[test]
    fn test_metrics_transitions() {
        assert_eq!(
            EventState::Absent.on_metrics(),
            (EventState::MetricsOnly, MetricsOutcome::InsertedFirst)
        );
        assert_eq!(
            EventState::PageviewOnly.on_metrics(),
            (EventState::Complete, MetricsOutcome::Filled)
        );
        assert_eq!(
            EventState::MetricsOnly.on_metrics(),
            (EventState::MetricsOnly, MetricsOutcome::Duplicate)
        );
        assert_eq!(
            EventState::Complete.on_metrics(),
            (EventState::Complete, MetricsOutcome::Duplicate)
        );
    }

    #[test]
    fn test_state_from_markers() {
        assert_eq!(EventState::from_markers(None, None), EventState::Absent);
        assert_eq!(
            EventState::from_markers(Some(1), None),
            EventState::PageviewOnly
        );
        assert_eq!(
            EventState::from_markers(None, Some(1)),
            EventState::MetricsOnly
        );
        assert_eq!(
            EventState::from_markers(Some(1), Some(2)),
            EventState::Complete
        );
    }

    #[test]
    fn test_per_metric_capture_follows_value() {
        let record = MetricsRecord {
            view_id: "v1".to_string(),
            date: "2026-08-06".to_string(),
            ip: None,
            user_agent: None,
            metrics_at: 1_700_000_000,
            ttfb_ms: Some(120),
            dcl_ms: None,
            load_ms: Some(900),
        };
        assert_eq!(record.ttfb_at(), Some(1_700_000_000));
        assert_eq!(record.dcl_at(), None);
        assert_eq!(record.load_at(), Some(1_700_000_000));
    }
}
