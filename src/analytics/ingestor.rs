//! View ingest pipeline
//!
//! append -> invalidate -> recompute -> publish, in that order, for every
//! view that is neither a bot nor a repeat inside the dedup window. Ingests
//! for the same page are serialized with an async lock per page so the
//! dedup probe and the append cannot interleave; distinct pages run in
//! parallel.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::analytics::aggregator::Aggregator;
use crate::analytics::bot::{is_bot, resolve_visitor_id};
use crate::analytics::broadcast::Broadcaster;
use crate::analytics::clock::Clock;
use crate::analytics::models::{
    Aggregate, ContentView, NewContentView, NewViewEvent, StatsFilter, ViewEvent,
};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::storage::ViewStore;

/// What happened to an ingested view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded,
    Bot,
    Duplicate,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestResult {
    /// Aggregate for the event's page after the ingest
    pub aggregate: Aggregate,
    pub outcome: IngestOutcome,
}

pub struct Ingestor {
    store: Arc<dyn ViewStore>,
    aggregator: Arc<Aggregator>,
    broadcaster: Broadcaster,
    clock: Arc<dyn Clock>,
    dedup_window_secs: i64,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ViewStore>,
        aggregator: Arc<Aggregator>,
        broadcaster: Broadcaster,
        clock: Arc<dyn Clock>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            store,
            aggregator,
            broadcaster,
            clock,
            dedup_window_secs: i64::try_from(dedup_window.as_secs()).unwrap_or(i64::MAX),
            locks: DashMap::new(),
        }
    }

    /// Ingest one page view. Bot and duplicate views are successful no-ops
    /// that return the current aggregate for the page.
    pub async fn ingest(&self, candidate: NewViewEvent) -> AnalyticsResult<IngestResult> {
        if candidate.page.is_empty() {
            return Err(AnalyticsError::Invalid("page is required".to_string()));
        }

        if is_bot(candidate.user_agent.as_deref()) {
            debug!(page = %candidate.page, "skipping bot view");
            let aggregate = self.aggregator.get_stats(Some(&candidate.page)).await?;
            return Ok(IngestResult {
                aggregate,
                outcome: IngestOutcome::Bot,
            });
        }

        let page = candidate.page.clone();
        let lock = self.lock_for(&page);
        let result = {
            let _guard = lock.lock().await;
            self.ingest_locked(candidate).await
        };
        drop(lock);
        self.release_lock(&page);

        result
    }

    async fn ingest_locked(&self, candidate: NewViewEvent) -> AnalyticsResult<IngestResult> {
        let visitor_id = resolve_visitor_id(
            candidate.visitor_id.as_deref(),
            candidate.ip.as_deref(),
            candidate.user_agent.as_deref(),
        );
        let now = self.clock.now().timestamp();

        if self
            .store
            .recent_match(&candidate.page, &visitor_id, now - self.dedup_window_secs)
            .await?
        {
            debug!(page = %candidate.page, visitor = %visitor_id, "duplicate view inside dedup window");
            let aggregate = self.aggregator.get_stats(Some(&candidate.page)).await?;
            return Ok(IngestResult {
                aggregate,
                outcome: IngestOutcome::Duplicate,
            });
        }

        let event = ViewEvent {
            page: candidate.page,
            visitor_id,
            user_agent: candidate.user_agent,
            referrer: candidate.referrer,
            ip: candidate.ip,
            country: candidate.country,
            city: candidate.city,
            session_id: candidate.session_id,
            viewed_at: now,
        };
        self.store.append(&event).await?;

        self.aggregator.cache().invalidate_page(&event.page).await;
        let aggregate = self
            .aggregator
            .refresh(&StatsFilter::page(Some(&event.page)))
            .await?;

        self.broadcaster.publish(aggregate, &event.page).await;

        info!(page = %event.page, total = aggregate.total, "view recorded");
        Ok(IngestResult {
            aggregate,
            outcome: IngestOutcome::Recorded,
        })
    }

    /// Record a content view under the same bot and dedup rules as page views
    pub async fn track_content(&self, candidate: NewContentView) -> AnalyticsResult<IngestOutcome> {
        if candidate.content_id.trim().is_empty() {
            return Err(AnalyticsError::Invalid("contentId is required".to_string()));
        }

        if is_bot(candidate.user_agent.as_deref()) {
            debug!(content_id = %candidate.content_id, "skipping bot content view");
            return Ok(IngestOutcome::Bot);
        }

        let key = format!(
            "content:{}:{}",
            candidate.content_type.as_str(),
            candidate.content_id
        );
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.track_content_locked(candidate).await
        };
        drop(lock);
        self.release_lock(&key);

        result
    }

    async fn track_content_locked(&self, candidate: NewContentView) -> AnalyticsResult<IngestOutcome> {
        let visitor_id = resolve_visitor_id(
            candidate.visitor_id.as_deref(),
            candidate.ip.as_deref(),
            candidate.user_agent.as_deref(),
        );
        let now = self.clock.now().timestamp();

        if self
            .store
            .recent_content_match(
                candidate.content_type,
                &candidate.content_id,
                &visitor_id,
                now - self.dedup_window_secs,
            )
            .await?
        {
            debug!(content_id = %candidate.content_id, visitor = %visitor_id, "duplicate content view");
            return Ok(IngestOutcome::Duplicate);
        }

        let view = ContentView {
            content_id: candidate.content_id,
            content_type: candidate.content_type,
            visitor_id,
            user_agent: candidate.user_agent,
            referrer: candidate.referrer,
            ip: candidate.ip,
            viewed_at: now,
        };
        self.store.append_content(&view).await?;

        debug!(
            content_type = view.content_type.as_str(),
            content_id = %view.content_id,
            "content view recorded"
        );
        Ok(IngestOutcome::Recorded)
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the lock entry once no other ingest holds a handle to it
    fn release_lock(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
