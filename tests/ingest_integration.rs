//! Integration tests for beacon ingestion and aggregate counting
//!
//! These exercise the full path: blacklist gate, bot classification,
//! idempotent event writes, and the atomic counter upserts, end-to-end
//! against an in-memory SQLite store.

use std::sync::Arc;

use glimpse::analytics::beacon::{bucket_date, Beacon, MetricsBeacon, PageviewBeacon};
use glimpse::analytics::models::{BucketKey, EventState, MetricsOutcome, PageviewOutcome};
use glimpse::analytics::ranges::{IpRangeIndex, RangeDocument, RangeSource};
use glimpse::analytics::{AnalyticsContext, Blacklist, IngestOutcome, Ingestor};
use glimpse::config::BlacklistConfig;
use glimpse::storage::{SqliteStorage, Storage};

const TS: i64 = 1_754_000_000;
const BROWSER_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";
const GOOGLEBOT_UA: &str =
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

async fn setup() -> (Arc<dyn Storage>, Ingestor) {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let ranges = IpRangeIndex::build(&[
        RangeDocument {
            tag: RangeSource::Googlebot,
            prefixes: vec!["66.249.64.0/27".to_string()],
        },
        RangeDocument {
            tag: RangeSource::Google,
            prefixes: vec!["66.249.64.0/27".to_string(), "8.8.8.0/24".to_string()],
        },
        RangeDocument {
            tag: RangeSource::Bingbot,
            prefixes: vec!["157.55.39.0/24".to_string()],
        },
        RangeDocument {
            tag: RangeSource::Microsoft,
            prefixes: vec!["13.64.0.0/11".to_string()],
        },
    ])
    .unwrap();

    let blacklist = Blacklist::from_config(&BlacklistConfig {
        ips: vec!["203.0.113.99".to_string()],
        cidrs: vec!["198.51.100.0/24".to_string()],
        user_agents: vec![],
        ua_substrings: vec!["denylisted".to_string()],
    });

    let ctx = Arc::new(AnalyticsContext {
        ranges,
        blacklist,
        category: "default".to_string(),
    });
    let ingestor = Ingestor::new(Arc::clone(&storage), ctx);
    (storage, ingestor)
}

fn pageview(view_id: &str) -> Beacon {
    Beacon::Pageview(PageviewBeacon {
        view_id: view_id.to_string(),
        url: Some("https://example.com/pricing".to_string()),
        referrer: Some("https://duckduckgo.com/".to_string()),
        language: Some("en-US".to_string()),
        timezone: Some("Europe/Berlin".to_string()),
        viewport_width: Some(1280),
        viewport_height: Some(720),
        timestamp: Some(TS),
    })
}

fn metrics(view_id: &str) -> Beacon {
    Beacon::Metrics(MetricsBeacon {
        view_id: view_id.to_string(),
        timestamp: Some(TS + 2),
        ttfb_ms: Some(45),
        dcl_ms: Some(310),
        load_ms: Some(890),
    })
}

fn site_bucket() -> BucketKey {
    BucketKey {
        date: bucket_date(TS),
        domain: "example.com".to_string(),
        is_internal: true,
        category: "default".to_string(),
    }
}

fn placeholder_bucket() -> BucketKey {
    BucketKey {
        date: bucket_date(TS + 2),
        domain: "unknown".to_string(),
        is_internal: false,
        category: "default".to_string(),
    }
}

#[tokio::test]
async fn test_duplicate_pageview_counted_once() {
    let (storage, ingestor) = setup().await;

    let first = ingestor
        .ingest(pageview("view-1"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    assert_eq!(first, IngestOutcome::Pageview(PageviewOutcome::Inserted));

    let second = ingestor
        .ingest(pageview("view-1"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    assert_eq!(second, IngestOutcome::Pageview(PageviewOutcome::Duplicate));

    let bucket = storage.get_aggregate(&site_bucket()).await.unwrap().unwrap();
    assert_eq!(bucket.pageviews, 1);
    assert_eq!(bucket.pageviews_with_metrics, 0);
}

#[tokio::test]
async fn test_pageview_then_metrics() {
    let (storage, ingestor) = setup().await;

    ingestor
        .ingest(pageview("view-2"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    let outcome = ingestor
        .ingest(metrics("view-2"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Metrics(MetricsOutcome::Filled));

    let bucket = storage.get_aggregate(&site_bucket()).await.unwrap().unwrap();
    assert_eq!(bucket.pageviews, 1);
    assert_eq!(bucket.pageviews_with_metrics, 1);

    let event = storage.get_event("view-2").await.unwrap().unwrap();
    assert_eq!(event.state(), EventState::Complete);
    assert_eq!(event.ttfb_ms, Some(45));
    assert_eq!(event.dcl_ms, Some(310));
    assert_eq!(event.load_ms, Some(890));
}

#[tokio::test]
async fn test_metrics_first_then_pageview_counts_once() {
    let (storage, ingestor) = setup().await;

    // Metrics beacon wins the race: the view has not contributed to
    // `pageviews` through any other path, so both counters move now.
    let first = ingestor
        .ingest(metrics("view-3"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    assert_eq!(
        first,
        IngestOutcome::Metrics(MetricsOutcome::InsertedFirst)
    );

    let second = ingestor
        .ingest(pageview("view-3"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    assert_eq!(second, IngestOutcome::Pageview(PageviewOutcome::Backfilled));

    // Exactly one pageview and one with-metrics increment in total. The
    // metrics-first row had no URL yet, so its counters live in the
    // placeholder bucket.
    let placeholder = storage
        .get_aggregate(&placeholder_bucket())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(placeholder.pageviews, 1);
    assert_eq!(placeholder.pageviews_with_metrics, 1);
    assert!(storage.get_aggregate(&site_bucket()).await.unwrap().is_none());

    // The stored event ends up complete, with both halves populated.
    let event = storage.get_event("view-3").await.unwrap().unwrap();
    assert_eq!(event.state(), EventState::Complete);
    assert_eq!(event.domain, "example.com");
    assert_eq!(event.url.as_deref(), Some("https://example.com/pricing"));
    assert_eq!(event.ttfb_ms, Some(45));
}

#[tokio::test]
async fn test_duplicate_metrics_counted_once() {
    let (storage, ingestor) = setup().await;

    ingestor
        .ingest(pageview("view-4"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    ingestor
        .ingest(metrics("view-4"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    let dup = ingestor
        .ingest(metrics("view-4"), Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();
    assert_eq!(dup, IngestOutcome::Metrics(MetricsOutcome::Duplicate));

    let bucket = storage.get_aggregate(&site_bucket()).await.unwrap().unwrap();
    assert_eq!(bucket.pageviews, 1);
    assert_eq!(bucket.pageviews_with_metrics, 1);

    // The first metrics write is never overwritten.
    let event = storage.get_event("view-4").await.unwrap().unwrap();
    assert_eq!(event.ttfb_ms, Some(45));
}

#[tokio::test]
async fn test_blacklisted_request_leaves_no_trace() {
    let (storage, ingestor) = setup().await;

    // Inside the blacklisted CIDR, in both textual representations.
    for ip in ["198.51.100.7", "::ffff:198.51.100.7"] {
        let outcome = ingestor
            .ingest(pageview("view-5"), Some(ip), Some(BROWSER_UA))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Blacklisted);
    }

    // Substring UA rule, case-insensitive.
    let outcome = ingestor
        .ingest(
            metrics("view-5"),
            Some("1.2.3.4"),
            Some("DenyListed Agent/1.0"),
        )
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Blacklisted);

    assert!(storage.get_event("view-5").await.unwrap().is_none());
    assert!(storage.get_aggregate(&site_bucket()).await.unwrap().is_none());
    assert!(storage
        .get_aggregate(&placeholder_bucket())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_bot_counters_sparse_update() {
    let (storage, ingestor) = setup().await;

    // Googlebot UA from inside the published crawler range: UA flag plus
    // both Google IP flags.
    ingestor
        .ingest(pageview("bot-1"), Some("66.249.64.5"), Some(GOOGLEBOT_UA))
        .await
        .unwrap();
    // A plain browser adds nothing to the bot counters.
    ingestor
        .ingest(pageview("human-1"), Some("203.0.113.5"), Some(BROWSER_UA))
        .await
        .unwrap();

    let bucket = storage.get_aggregate(&site_bucket()).await.unwrap().unwrap();
    assert_eq!(bucket.pageviews, 2);
    assert_eq!(bucket.bot_ua_googlebot, 1);
    assert_eq!(bucket.bot_ip_googlebot, 1);
    assert_eq!(bucket.bot_ip_google, 1);
    assert_eq!(bucket.bot_ua_bingbot, 0);
    assert_eq!(bucket.bot_ip_bingbot, 0);
    assert_eq!(bucket.bot_ip_microsoft, 0);
}

#[tokio::test]
async fn test_ua_bot_outside_ranges_sets_only_ua_flag() {
    let (storage, ingestor) = setup().await;

    ingestor
        .ingest(pageview("bot-2"), Some("203.0.113.77"), Some(GOOGLEBOT_UA))
        .await
        .unwrap();

    let bucket = storage.get_aggregate(&site_bucket()).await.unwrap().unwrap();
    assert_eq!(bucket.bot_ua_googlebot, 1);
    assert_eq!(bucket.bot_ip_googlebot, 0);
    assert_eq!(bucket.bot_ip_google, 0);
}

#[tokio::test]
async fn test_bot_counters_not_double_counted_across_beacons() {
    let (storage, ingestor) = setup().await;

    ingestor
        .ingest(pageview("bot-3"), Some("66.249.64.5"), Some(GOOGLEBOT_UA))
        .await
        .unwrap();
    ingestor
        .ingest(metrics("bot-3"), Some("66.249.64.5"), Some(GOOGLEBOT_UA))
        .await
        .unwrap();

    let bucket = storage.get_aggregate(&site_bucket()).await.unwrap().unwrap();
    assert_eq!(bucket.pageviews, 1);
    assert_eq!(bucket.pageviews_with_metrics, 1);
    assert_eq!(bucket.bot_ua_googlebot, 1);
    assert_eq!(bucket.bot_ip_googlebot, 1);
}

#[tokio::test]
async fn test_invalid_fields_stored_null_event_kept() {
    let (storage, ingestor) = setup().await;

    let beacon = Beacon::Pageview(PageviewBeacon {
        view_id: "view-6".to_string(),
        url: Some("not a parseable url".to_string()),
        referrer: None,
        language: None,
        timezone: None,
        viewport_width: Some(0),
        viewport_height: Some(500_000),
        timestamp: Some(TS),
    });
    ingestor
        .ingest(beacon, Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();

    let event = storage.get_event("view-6").await.unwrap().unwrap();
    assert_eq!(event.domain, "unknown");
    assert_eq!(event.viewport_width, None);
    assert_eq!(event.viewport_height, None);
    assert_eq!(event.is_internal, 0);

    // Out-of-bounds timing values degrade to null, the in-range one stays.
    let bad_metrics = Beacon::Metrics(MetricsBeacon {
        view_id: "view-6".to_string(),
        timestamp: Some(TS + 1),
        ttfb_ms: Some(0),
        dcl_ms: Some(310),
        load_ms: Some(4_000_000),
    });
    ingestor
        .ingest(bad_metrics, Some("1.2.3.4"), Some(BROWSER_UA))
        .await
        .unwrap();

    let event = storage.get_event("view-6").await.unwrap().unwrap();
    assert_eq!(event.state(), EventState::Complete);
    assert_eq!(event.ttfb_ms, None);
    assert_eq!(event.ttfb_at, None);
    assert_eq!(event.dcl_ms, Some(310));
    assert!(event.dcl_at.is_some());
    assert_eq!(event.load_ms, None);
}
