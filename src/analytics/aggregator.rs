//! Aggregate view statistics with a read-through cache
//!
//! Answers total/today/week/month/unique for a filter scope. Hits are served
//! from the process-local [`AggregateCache`]; misses run a single
//! `count_predicate` pass against the store and repopulate the cache unless
//! an ingest invalidated the page meanwhile.

use std::sync::Arc;
use tracing::debug;

use crate::analytics::cache::{AggregateCache, CacheKey};
use crate::analytics::clock::{Clock, ServerZone};
use crate::analytics::models::{Aggregate, StatsFilter};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::storage::ViewStore;

/// Whether an aggregate came from the cache
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupMetadata {
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsLookup {
    pub aggregate: Aggregate,
    pub metadata: LookupMetadata,
}

pub struct Aggregator {
    store: Arc<dyn ViewStore>,
    cache: Arc<AggregateCache>,
    clock: Arc<dyn Clock>,
    zone: ServerZone,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn ViewStore>,
        cache: Arc<AggregateCache>,
        clock: Arc<dyn Clock>,
        zone: ServerZone,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            zone,
        }
    }

    /// Unfiltered statistics for one page, or every page when `page` is `None`
    pub async fn get_stats(&self, page: Option<&str>) -> AnalyticsResult<Aggregate> {
        self.get_stats_filtered(&StatsFilter::page(page)).await
    }

    /// Statistics over an arbitrary filter scope
    pub async fn get_stats_filtered(&self, filter: &StatsFilter) -> AnalyticsResult<Aggregate> {
        Ok(self.lookup(filter).await?.aggregate)
    }

    /// Same as [`Aggregator::get_stats_filtered`] but reports whether the cache answered
    pub async fn lookup(&self, filter: &StatsFilter) -> AnalyticsResult<StatsLookup> {
        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if end < start {
                return Err(AnalyticsError::Invalid(
                    "endDate must not be before startDate".to_string(),
                ));
            }
        }

        let key = CacheKey::for_filter(filter);
        if let Some(aggregate) = self.cache.get(&key).await {
            return Ok(StatsLookup {
                aggregate,
                metadata: LookupMetadata { cache_hit: true },
            });
        }

        let generation = self.cache.generation();
        let aggregate = self.compute(filter, &key).await?;
        self.cache.insert_computed(&key, aggregate, generation).await;

        Ok(StatsLookup {
            aggregate,
            metadata: LookupMetadata { cache_hit: false },
        })
    }

    /// Recompute from the store regardless of the cache, then overwrite the entry
    pub async fn refresh(&self, filter: &StatsFilter) -> AnalyticsResult<Aggregate> {
        let key = CacheKey::for_filter(filter);
        let aggregate = self.compute(filter, &key).await?;
        self.cache.insert(&key, aggregate).await;
        Ok(aggregate)
    }

    /// Cache used by the ingestor for invalidation
    pub fn cache(&self) -> &AggregateCache {
        &self.cache
    }

    async fn compute(&self, filter: &StatsFilter, key: &CacheKey) -> AnalyticsResult<Aggregate> {
        let windows = self.zone.windows(self.clock.now());
        let aggregate = self.store.count_predicate(filter, &windows).await?;
        debug!(key = key.as_str(), total = aggregate.total, "computed aggregate");
        Ok(aggregate)
    }
}
