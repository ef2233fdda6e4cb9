//! Beacon payload shapes and permissive field normalization
//!
//! Validation never rejects a beacon: out-of-bounds values are stored as
//! null, and a missing or unparseable host falls back to a best-effort
//! domain instead of dropping the event.

use chrono::{Local, TimeZone, Utc};
use serde::Deserialize;
use url::Url;

use crate::analytics::models::{MetricsRecord, PageviewRecord};

pub const VIEWPORT_MIN: i64 = 1;
pub const VIEWPORT_MAX: i64 = 100_000;
/// 2010-01-01T00:00:00Z.
pub const TIMESTAMP_MIN: i64 = 1_262_304_000;
/// 2100-01-01T00:00:00Z.
pub const TIMESTAMP_MAX: i64 = 4_102_444_800;
pub const METRIC_MIN_MS: i64 = 1;
/// One hour.
pub const METRIC_MAX_MS: i64 = 3_600_000;

/// Domain recorded when the URL is missing or has no parseable host.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Wire payload of the ingestion endpoint, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Beacon {
    Pageview(PageviewBeacon),
    Metrics(MetricsBeacon),
}

impl Beacon {
    pub fn view_id(&self) -> &str {
        match self {
            Beacon::Pageview(b) => &b.view_id,
            Beacon::Metrics(b) => &b.view_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageviewBeacon {
    pub view_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub viewport_width: Option<i64>,
    #[serde(default)]
    pub viewport_height: Option<i64>,
    /// Client-side pageview timestamp (Unix seconds).
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsBeacon {
    pub view_id: String,
    /// Client-side capture timestamp (Unix seconds).
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub ttfb_ms: Option<i64>,
    #[serde(default)]
    pub dcl_ms: Option<i64>,
    #[serde(default)]
    pub load_ms: Option<i64>,
}

impl PageviewBeacon {
    pub fn normalize(&self, ip: Option<&str>, user_agent: Option<&str>) -> PageviewRecord {
        // The pageview timestamp is the write-once marker for this half of
        // the row, so an implausible client value falls back to server time
        // instead of null.
        let pageview_at =
            sanitize_timestamp(self.timestamp).unwrap_or_else(|| Utc::now().timestamp());
        PageviewRecord {
            view_id: self.view_id.clone(),
            date: bucket_date(pageview_at),
            domain: domain_of(self.url.as_deref()),
            url: self.url.clone(),
            referrer: self.referrer.clone(),
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            language: self.language.clone(),
            timezone: self.timezone.clone(),
            viewport_width: sanitize_viewport(self.viewport_width),
            viewport_height: sanitize_viewport(self.viewport_height),
            is_internal: is_internal(self.url.as_deref()),
            pageview_at,
        }
    }
}

impl MetricsBeacon {
    pub fn normalize(&self, ip: Option<&str>, user_agent: Option<&str>) -> MetricsRecord {
        let metrics_at =
            sanitize_timestamp(self.timestamp).unwrap_or_else(|| Utc::now().timestamp());
        MetricsRecord {
            view_id: self.view_id.clone(),
            date: bucket_date(metrics_at),
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            metrics_at,
            ttfb_ms: sanitize_metric(self.ttfb_ms),
            dcl_ms: sanitize_metric(self.dcl_ms),
            load_ms: sanitize_metric(self.load_ms),
        }
    }
}

pub fn sanitize_viewport(value: Option<i64>) -> Option<i64> {
    value.filter(|v| (VIEWPORT_MIN..=VIEWPORT_MAX).contains(v))
}

pub fn sanitize_timestamp(value: Option<i64>) -> Option<i64> {
    value.filter(|v| (TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(v))
}

pub fn sanitize_metric(value: Option<i64>) -> Option<i64> {
    value.filter(|v| (METRIC_MIN_MS..=METRIC_MAX_MS).contains(v))
}

/// Host component of the URL, lowercased; `UNKNOWN_DOMAIN` when absent.
pub fn domain_of(url: Option<&str>) -> String {
    url.and_then(|raw| Url::parse(raw.trim()).ok())
        .and_then(|parsed| parsed.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}

/// A view is internal when the URL's path component is non-empty and not
/// exactly `/`. Unparseable URLs classify as external.
pub fn is_internal(url: Option<&str>) -> bool {
    url.and_then(|raw| Url::parse(raw.trim()).ok())
        .map(|parsed| {
            let path = parsed.path();
            !path.is_empty() && path != "/"
        })
        .unwrap_or(false)
}

/// Calendar day of the timestamp in the server time zone.
pub fn bucket_date(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .earliest()
        .unwrap_or_else(|| Local::now())
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_bounds() {
        assert_eq!(sanitize_viewport(Some(0)), None);
        assert_eq!(sanitize_viewport(Some(1)), Some(1));
        assert_eq!(sanitize_viewport(Some(1920)), Some(1920));
        assert_eq!(sanitize_viewport(Some(100_000)), Some(100_000));
        assert_eq!(sanitize_viewport(Some(100_001)), None);
        assert_eq!(sanitize_viewport(Some(-5)), None);
        assert_eq!(sanitize_viewport(None), None);
    }

    #[test]
    fn test_timestamp_window() {
        assert_eq!(sanitize_timestamp(Some(0)), None);
        assert_eq!(sanitize_timestamp(Some(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(sanitize_timestamp(Some(TIMESTAMP_MAX + 1)), None);
    }

    #[test]
    fn test_metric_bounds() {
        assert_eq!(sanitize_metric(Some(0)), None);
        assert_eq!(sanitize_metric(Some(1)), Some(1));
        assert_eq!(sanitize_metric(Some(250)), Some(250));
        assert_eq!(sanitize_metric(Some(METRIC_MAX_MS)), Some(METRIC_MAX_MS));
        assert_eq!(sanitize_metric(Some(METRIC_MAX_MS + 1)), None);
        assert_eq!(sanitize_metric(Some(-1)), None);
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(domain_of(Some("https://Example.COM/about")), "example.com");
        assert_eq!(domain_of(Some("https://example.com")), "example.com");
        assert_eq!(domain_of(Some("not a url")), UNKNOWN_DOMAIN);
        assert_eq!(domain_of(None), UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_internal_classification() {
        assert!(!is_internal(Some("https://example.com")));
        assert!(!is_internal(Some("https://example.com/")));
        assert!(is_internal(Some("https://example.com/pricing")));
        assert!(is_internal(Some("https://example.com/a/b?q=1")));
        assert!(!is_internal(Some("garbage")));
        assert!(!is_internal(None));
    }

    #[test]
    fn test_invalid_fields_become_null_not_rejection() {
        let beacon = PageviewBeacon {
            view_id: "v1".to_string(),
            url: Some("https://example.com/page".to_string()),
            referrer: None,
            language: Some("en-US".to_string()),
            timezone: Some("America/New_York".to_string()),
            viewport_width: Some(0),
            viewport_height: Some(200_000),
            timestamp: Some(1_700_000_000),
        };
        let record = beacon.normalize(Some("1.2.3.4"), Some("Mozilla/5.0"));

        assert_eq!(record.viewport_width, None);
        assert_eq!(record.viewport_height, None);
        assert_eq!(record.domain, "example.com");
        assert!(record.is_internal);
        assert_eq!(record.pageview_at, 1_700_000_000);
    }

    #[test]
    fn test_implausible_timestamp_falls_back_to_server_time() {
        let beacon = MetricsBeacon {
            view_id: "v1".to_string(),
            timestamp: Some(12),
            ttfb_ms: Some(80),
            dcl_ms: Some(300),
            load_ms: Some(1_200),
        };
        let before = Utc::now().timestamp();
        let record = beacon.normalize(None, None);
        assert!(record.metrics_at >= before);
    }

    #[test]
    fn test_beacon_payload_shapes() {
        let pageview: Beacon = serde_json::from_str(
            r#"{"type":"pageview","view_id":"abc","url":"https://example.com/x",
                "viewport_width":1280,"viewport_height":720,"timestamp":1700000000}"#,
        )
        .unwrap();
        assert_eq!(pageview.view_id(), "abc");
        assert!(matches!(pageview, Beacon::Pageview(_)));

        let metrics: Beacon = serde_json::from_str(
            r#"{"type":"metrics","view_id":"abc","timestamp":1700000001,
                "ttfb_ms":45,"dcl_ms":310,"load_ms":890}"#,
        )
        .unwrap();
        assert!(matches!(metrics, Beacon::Metrics(_)));
    }
}
