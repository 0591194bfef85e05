//! Process-local TTL cache of computed aggregates
//!
//! Two moka tiers share the key space: unfiltered keys (`page` or `"all"`)
//! live for the long TTL, filtered keys (`"filter:..."`) for the short one.
//! Ingest invalidates by page; filtered keys are matched on the
//! `"p:" + page + ":"` token so unrelated filters that merely share a
//! substring of the page are left alone.
//!
//! Every invalidation bumps a generation counter. A reader that computed
//! its aggregate under an older generation evicts what it just inserted,
//! so a read racing an ingest cannot leave a pre-append value behind.

use chrono::{DateTime, SecondsFormat, Utc};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::analytics::models::{Aggregate, StatsFilter};

const ALL_KEY: &str = "all";
const FILTER_PREFIX: &str = "filter:";

/// Cache sizing and expiry
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: u64,
    pub ttl: Duration,
    pub filtered_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(300),
            filtered_ttl: Duration::from_secs(120),
        }
    }
}

/// Canonical cache key for an aggregate query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Unfiltered(String),
    Filtered(String),
}

impl CacheKey {
    pub fn for_filter(filter: &StatsFilter) -> Self {
        if !filter.is_filtered() {
            return CacheKey::Unfiltered(
                filter.page.clone().unwrap_or_else(|| ALL_KEY.to_string()),
            );
        }

        let mut key = String::from(FILTER_PREFIX);
        if let Some(page) = &filter.page {
            key.push_str(&page_token(page));
        }
        if let Some(start) = filter.start {
            key.push_str("s:");
            key.push_str(&rfc3339(start));
            key.push(':');
        }
        if let Some(end) = filter.end {
            key.push_str("e:");
            key.push_str(&rfc3339(end));
            key.push(':');
        }
        if let Some(country) = &filter.country {
            key.push_str("c:");
            key.push_str(country);
        }
        CacheKey::Filtered(key)
    }

    pub fn as_str(&self) -> &str {
        match self {
            CacheKey::Unfiltered(key) | CacheKey::Filtered(key) => key,
        }
    }
}

fn page_token(page: &str) -> String {
    format!("p:{page}:")
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct AggregateCache {
    unfiltered: Cache<String, Aggregate>,
    filtered: Cache<String, Aggregate>,
    generation: AtomicU64,
}

impl AggregateCache {
    pub fn new(settings: &CacheSettings) -> Self {
        let unfiltered = Cache::builder()
            .max_capacity(settings.max_entries)
            .time_to_live(settings.ttl)
            .build();

        let filtered = Cache::builder()
            .max_capacity(settings.max_entries)
            .time_to_live(settings.filtered_ttl)
            .support_invalidation_closures()
            .build();

        Self {
            unfiltered,
            filtered,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Aggregate> {
        match key {
            CacheKey::Unfiltered(k) => self.unfiltered.get(k).await,
            CacheKey::Filtered(k) => self.filtered.get(k).await,
        }
    }

    pub async fn insert(&self, key: &CacheKey, aggregate: Aggregate) {
        match key {
            CacheKey::Unfiltered(k) => self.unfiltered.insert(k.clone(), aggregate).await,
            CacheKey::Filtered(k) => self.filtered.insert(k.clone(), aggregate).await,
        }
    }

    /// Generation to read before computing an aggregate for [`AggregateCache::insert_computed`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Insert an aggregate computed under `generation`. If an invalidation
    /// happened since, the entry is evicted again; the next read recomputes.
    pub async fn insert_computed(&self, key: &CacheKey, aggregate: Aggregate, generation: u64) {
        self.insert(key, aggregate).await;
        if self.generation() != generation {
            debug!(key = key.as_str(), "dropping aggregate computed before an invalidation");
            self.invalidate(key).await;
        }
    }

    async fn invalidate(&self, key: &CacheKey) {
        match key {
            CacheKey::Unfiltered(k) => self.unfiltered.invalidate(k).await,
            CacheKey::Filtered(k) => self.filtered.invalidate(k).await,
        }
    }

    /// Evict `"all"`, the unfiltered key for `page`, and every filtered key
    /// scoped to `page`. Failures are logged and swallowed.
    pub async fn invalidate_page(&self, page: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.unfiltered.invalidate(ALL_KEY).await;
        self.unfiltered.invalidate(page).await;

        let token = page_token(page);
        let result = self
            .filtered
            .invalidate_entries_if(move |key, _| key.starts_with(FILTER_PREFIX) && key.contains(&token));
        match result {
            Ok(_) => debug!(page = %page, "invalidated cached aggregates"),
            Err(e) => warn!(page = %page, error = %e, "failed to invalidate filtered aggregates"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn aggregate(total: i64) -> Aggregate {
        Aggregate {
            total,
            today: total,
            week: total,
            month: total,
            unique: total,
        }
    }

    fn filtered(page: Option<&str>, country: Option<&str>) -> StatsFilter {
        StatsFilter {
            page: page.map(str::to_string),
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: None,
            country: country.map(str::to_string),
        }
    }

    #[test]
    fn test_unfiltered_keys() {
        assert_eq!(CacheKey::for_filter(&StatsFilter::default()).as_str(), "all");
        assert_eq!(
            CacheKey::for_filter(&StatsFilter::page(Some("/blog"))).as_str(),
            "/blog"
        );
    }

    #[test]
    fn test_filtered_key_shape() {
        let filter = StatsFilter {
            page: Some("/blog".to_string()),
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap()),
            country: Some("US".to_string()),
        };
        assert_eq!(
            CacheKey::for_filter(&filter),
            CacheKey::Filtered(
                "filter:p:/blog:s:2024-01-01T00:00:00Z:e:2024-02-01T12:30:00Z:c:US".to_string()
            )
        );

        let country_only = StatsFilter {
            country: Some("GB".to_string()),
            ..StatsFilter::default()
        };
        assert_eq!(CacheKey::for_filter(&country_only).as_str(), "filter:c:GB");
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = AggregateCache::new(&CacheSettings::default());
        let key = CacheKey::for_filter(&StatsFilter::page(Some("/")));

        assert!(cache.get(&key).await.is_none());
        cache.insert(&key, aggregate(3)).await;
        assert_eq!(cache.get(&key).await, Some(aggregate(3)));
    }

    #[tokio::test]
    async fn test_insert_computed_drops_value_from_older_generation() {
        let cache = AggregateCache::new(&CacheSettings::default());
        let key = CacheKey::for_filter(&StatsFilter::page(Some("/")));

        let before = cache.generation();
        cache.invalidate_page("/").await;
        cache.insert_computed(&key, aggregate(0), before).await;
        assert!(cache.get(&key).await.is_none());

        let current = cache.generation();
        cache.insert_computed(&key, aggregate(1), current).await;
        assert_eq!(cache.get(&key).await, Some(aggregate(1)));
    }

    #[tokio::test]
    async fn test_invalidate_page_uses_token_match() {
        let cache = AggregateCache::new(&CacheSettings::default());

        let all = CacheKey::for_filter(&StatsFilter::default());
        let blog = CacheKey::for_filter(&StatsFilter::page(Some("/blog")));
        let other = CacheKey::for_filter(&StatsFilter::page(Some("/about")));
        let blog_filtered = CacheKey::for_filter(&filtered(Some("/blog"), Some("US")));
        let blog_post_filtered = CacheKey::for_filter(&filtered(Some("/blog/post"), None));
        let unscoped_filtered = CacheKey::for_filter(&filtered(None, Some("US")));

        for key in [&all, &blog, &other, &blog_filtered, &blog_post_filtered, &unscoped_filtered] {
            cache.insert(key, aggregate(1)).await;
        }

        cache.invalidate_page("/blog").await;

        assert!(cache.get(&all).await.is_none());
        assert!(cache.get(&blog).await.is_none());
        assert!(cache.get(&blog_filtered).await.is_none());
        assert!(cache.get(&other).await.is_some());
        assert!(cache.get(&blog_post_filtered).await.is_some());
        assert!(cache.get(&unscoped_filtered).await.is_some());
    }

    #[tokio::test]
    async fn test_entries_inserted_after_invalidation_survive() {
        let cache = AggregateCache::new(&CacheSettings::default());
        let key = CacheKey::for_filter(&filtered(Some("/"), None));

        cache.insert(&key, aggregate(1)).await;
        cache.invalidate_page("/").await;
        assert!(cache.get(&key).await.is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert(&key, aggregate(2)).await;
        assert_eq!(cache.get(&key).await, Some(aggregate(2)));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = AggregateCache::new(&CacheSettings {
            max_entries: 100,
            ttl: Duration::from_millis(200),
            filtered_ttl: Duration::from_millis(100),
        });
        let unfiltered = CacheKey::for_filter(&StatsFilter::page(Some("/")));
        let filtered_key = CacheKey::for_filter(&filtered(Some("/"), None));

        cache.insert(&unfiltered, aggregate(1)).await;
        cache.insert(&filtered_key, aggregate(1)).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get(&filtered_key).await.is_none());
        assert!(cache.get(&unfiltered).await.is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get(&unfiltered).await.is_none());
    }
}
