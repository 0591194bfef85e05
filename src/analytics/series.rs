//! Time-bucketed view series
//!
//! Page series are bucketed by hour or day in the server zone by the store
//! itself; content history is fetched per local day and folded into days,
//! Monday-start weeks or calendar months here.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analytics::clock::ServerZone;
use crate::analytics::models::{
    BucketQuery, ContentBucket, ContentType, Interval, Period, SeriesPoint,
};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::storage::ViewStore;

pub const DEFAULT_CONTENT_LIMIT: i64 = 30;
pub const MAX_CONTENT_LIMIT: i64 = 365;

/// Parse an RFC3339 query parameter, naming the field on failure
pub fn parse_instant(field: &str, value: &str) -> AnalyticsResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AnalyticsError::Invalid(format!("{field} must be RFC3339: {e}")))
}

pub struct SeriesEngine {
    store: Arc<dyn ViewStore>,
    zone: ServerZone,
}

impl SeriesEngine {
    pub fn new(store: Arc<dyn ViewStore>, zone: ServerZone) -> Self {
        Self { store, zone }
    }

    /// Series for raw query values. Empty `start` or `end` yields an empty
    /// series; unparseable instants are `Invalid`.
    pub async fn series(
        &self,
        page: Option<&str>,
        start: &str,
        end: &str,
        interval: &str,
    ) -> AnalyticsResult<Vec<SeriesPoint>> {
        if start.trim().is_empty() || end.trim().is_empty() {
            return Ok(Vec::new());
        }

        let start = parse_instant("startDate", start)?;
        let end = parse_instant("endDate", end)?;
        self.series_between(page, start, end, Interval::parse_lossy(interval))
            .await
    }

    pub async fn series_between(
        &self,
        page: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> AnalyticsResult<Vec<SeriesPoint>> {
        let query = BucketQuery {
            page: page.filter(|p| !p.is_empty()).map(str::to_string),
            start: start.timestamp(),
            end: end.timestamp(),
            interval,
            offset_secs: self.zone.offset_secs(),
        };

        let slots = self.store.bucket(&query).await?;
        let width = interval.seconds();

        Ok(slots
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .filter_map(|(slot, count)| {
                self.zone
                    .localize(slot * width - query.offset_secs)
                    .map(|bucket_start| SeriesPoint {
                        bucket_start,
                        count,
                    })
            })
            .collect())
    }

    pub async fn content_count(
        &self,
        content_type: ContentType,
        content_id: &str,
    ) -> AnalyticsResult<i64> {
        require_content_id(content_id)?;
        Ok(self.store.content_count(content_type, content_id).await?)
    }

    /// The most recent `limit` period buckets for a content item, oldest first
    pub async fn content_series(
        &self,
        content_type: ContentType,
        content_id: &str,
        period: Period,
        limit: Option<i64>,
    ) -> AnalyticsResult<Vec<ContentBucket>> {
        require_content_id(content_id)?;
        let limit = limit
            .unwrap_or(DEFAULT_CONTENT_LIMIT)
            .clamp(1, MAX_CONTENT_LIMIT) as usize;

        let days = self
            .store
            .content_daily(content_type, content_id, self.zone.offset_secs())
            .await?;

        let mut buckets: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for (slot, count) in days {
            if let Some(start) = local_day(slot).and_then(|day| period_start(day, period)) {
                *buckets.entry(start).or_default() += count;
            }
        }

        let skip = buckets.len().saturating_sub(limit);
        Ok(buckets
            .into_iter()
            .skip(skip)
            .map(|(date, count)| ContentBucket {
                date: date.format("%Y-%m-%d").to_string(),
                count,
            })
            .collect())
    }
}

fn require_content_id(content_id: &str) -> AnalyticsResult<()> {
    if content_id.trim().is_empty() {
        return Err(AnalyticsError::Invalid("contentId is required".to_string()));
    }
    Ok(())
}

/// Local calendar date for a day slot (days since the epoch, zone-shifted)
fn local_day(slot: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(slot.checked_mul(86_400)?, 0).map(|dt| dt.date_naive())
}

fn period_start(day: NaiveDate, period: Period) -> Option<NaiveDate> {
    match period {
        Period::Day => Some(day),
        Period::Week => {
            day.checked_sub_days(Days::new(u64::from(day.weekday().num_days_from_monday())))
        }
        Period::Month => day.with_day(1),
    }
}
