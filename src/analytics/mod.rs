//! View analytics core
//!
//! Ingest with bot filtering and a per-visitor dedup window, cached
//! aggregates, time-bucketed series and live fan-out of updated aggregates.

pub mod aggregator;
pub mod bot;
pub mod broadcast;
pub mod cache;
pub mod clock;
pub mod ingestor;
pub mod models;
pub mod series;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use aggregator::Aggregator;
pub use broadcast::{Broadcaster, ChannelSet, SubscriberHandle};
pub use cache::{AggregateCache, CacheSettings};
pub use clock::{Clock, ManualClock, ServerZone, SystemClock};
pub use ingestor::{IngestOutcome, IngestResult, Ingestor};
pub use models::{Aggregate, NewContentView, NewViewEvent, SeriesPoint, StatsFilter};
pub use series::SeriesEngine;

use crate::storage::ViewStore;

/// Tunables for the analytics core
#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub zone: ServerZone,
    pub dedup_window: Duration,
    pub cache: CacheSettings,
    /// Per-subscriber outbound queue capacity
    pub queue_capacity: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            zone: ServerZone::utc(),
            dedup_window: Duration::from_secs(30),
            cache: CacheSettings::default(),
            queue_capacity: 256,
        }
    }
}

/// The wired-up analytics components sharing one store, cache and clock
#[derive(Clone)]
pub struct Analytics {
    pub ingestor: Arc<Ingestor>,
    pub aggregator: Arc<Aggregator>,
    pub series: Arc<SeriesEngine>,
    pub broadcaster: Broadcaster,
}

impl Analytics {
    /// Build the components and spawn the broadcast coordinator. The
    /// coordinator stops once every clone of the returned handles is dropped.
    pub fn new(
        store: Arc<dyn ViewStore>,
        settings: &AnalyticsSettings,
        clock: Arc<dyn Clock>,
    ) -> (Self, JoinHandle<()>) {
        let cache = Arc::new(AggregateCache::new(&settings.cache));
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&store),
            cache,
            Arc::clone(&clock),
            settings.zone,
        ));
        let series = Arc::new(SeriesEngine::new(Arc::clone(&store), settings.zone));
        let (broadcaster, coordinator) = Broadcaster::spawn(settings.queue_capacity);
        let ingestor = Arc::new(Ingestor::new(
            store,
            Arc::clone(&aggregator),
            broadcaster.clone(),
            clock,
            settings.dedup_window,
        ));

        (
            Self {
                ingestor,
                aggregator,
                series,
                broadcaster,
            },
            coordinator,
        )
    }
}
