//! Data models for view analytics

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// A view candidate as received from a client, before the ingestor stamps it.
#[derive(Debug, Clone, Default)]
pub struct NewViewEvent {
    /// Logical resource identifier (path or content id)
    pub page: String,

    /// Opaque client identifier; synthesized from `ip` and `user_agent` when absent
    pub visitor_id: Option<String>,

    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub session_id: Option<String>,
}

/// One persisted page view. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewEvent {
    pub page: String,
    pub visitor_id: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub session_id: Option<String>,

    /// Server-assigned ingest time (Unix timestamp, seconds)
    pub viewed_at: i64,
}

/// Aggregated view counts over a filter scope.
///
/// Invariants: `today <= week <= month <= total` and `unique <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub total: i64,
    pub today: i64,
    pub week: i64,
    pub month: i64,
    pub unique: i64,
}

/// Filter scope for aggregate queries. Absent components match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsFilter {
    pub page: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub country: Option<String>,
}

impl StatsFilter {
    /// Scope covering a single page (or every page when `None`)
    pub fn page(page: Option<&str>) -> Self {
        Self {
            page: page.filter(|p| !p.is_empty()).map(str::to_string),
            ..Self::default()
        }
    }

    /// Whether any component beyond `page` narrows the scope
    pub fn is_filtered(&self) -> bool {
        self.start.is_some() || self.end.is_some() || self.country.is_some()
    }
}

/// Cutoff instants (Unix seconds) for the today/week/month windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub today_start: i64,
    pub week_start: i64,
    pub month_start: i64,
}

/// Series bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    Day,
}

impl Interval {
    /// Parse an interval name; anything other than `hour` is a day
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" => Interval::Hour,
            _ => Interval::Day,
        }
    }

    pub const fn seconds(self) -> i64 {
        match self {
            Interval::Hour => 3_600,
            Interval::Day => 86_400,
        }
    }
}

/// A series request against the event store. Instants are Unix seconds.
#[derive(Debug, Clone)]
pub struct BucketQuery {
    pub page: Option<String>,
    pub start: i64,
    pub end: i64,
    pub interval: Interval,
    /// Server zone offset from UTC, used to align bucket boundaries
    pub offset_secs: i64,
}

/// One non-empty series bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub bucket_start: DateTime<FixedOffset>,
    pub count: i64,
}

/// Kind of content a content view refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Article,
    Project,
    Page,
}

impl ContentType {
    /// Parse a content type name; unknown values map to `Page`
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "article" => ContentType::Article,
            "project" => ContentType::Project,
            _ => ContentType::Page,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ContentType::Article => "article",
            ContentType::Project => "project",
            ContentType::Page => "page",
        }
    }
}

/// A content view candidate
#[derive(Debug, Clone)]
pub struct NewContentView {
    pub content_id: String,
    pub content_type: ContentType,
    pub visitor_id: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
}

/// One persisted content view
#[derive(Debug, Clone)]
pub struct ContentView {
    pub content_id: String,
    pub content_type: ContentType,
    pub visitor_id: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
    pub viewed_at: i64,
}

/// Grouping period for content view history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// Parse a period name; unknown values fall back to `Day`
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "week" => Period::Week,
            "month" => Period::Month,
            _ => Period::Day,
        }
    }
}

/// Content view count for one period bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentBucket {
    /// Bucket start as `YYYY-MM-DD` in the server zone
    pub date: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_falls_back_to_day() {
        assert_eq!(Interval::parse_lossy("hour"), Interval::Hour);
        assert_eq!(Interval::parse_lossy("HOUR"), Interval::Hour);
        assert_eq!(Interval::parse_lossy("day"), Interval::Day);
        assert_eq!(Interval::parse_lossy("fortnight"), Interval::Day);
        assert_eq!(Interval::parse_lossy(""), Interval::Day);
    }

    #[test]
    fn test_content_type_unknown_is_page() {
        assert_eq!(ContentType::parse_lossy("article"), ContentType::Article);
        assert_eq!(ContentType::parse_lossy("Project"), ContentType::Project);
        assert_eq!(ContentType::parse_lossy("video"), ContentType::Page);
    }

    #[test]
    fn test_stats_filter_page_ignores_empty() {
        assert_eq!(StatsFilter::page(Some("")).page, None);
        assert_eq!(StatsFilter::page(Some("/a")).page.as_deref(), Some("/a"));
        assert!(!StatsFilter::page(Some("/a")).is_filtered());
    }

    #[test]
    fn test_aggregate_serializes_field_names() {
        let json = serde_json::to_value(Aggregate {
            total: 3,
            today: 1,
            week: 2,
            month: 3,
            unique: 2,
        })
        .unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["unique"], 2);
    }
}
