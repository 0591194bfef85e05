use crate::analytics::models::{
    Aggregate, BucketQuery, ContentType, ContentView, StatsFilter, ViewEvent, Windows,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Count of views in one bucket: the bucket index is `(viewed_at + offset) / width`
pub type SlotCount = (i64, i64);

/// Append-only store of page views and content views.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Append a page view; visible to every query issued after this returns
    async fn append(&self, event: &ViewEvent) -> StorageResult<()>;

    /// Compute total, today, week, month and distinct visitors in a single pass
    async fn count_predicate(
        &self,
        filter: &StatsFilter,
        windows: &Windows,
    ) -> StorageResult<Aggregate>;

    /// Group page views into hour or day buckets aligned to the query offset,
    /// ascending by bucket, empty buckets omitted
    async fn bucket(&self, query: &BucketQuery) -> StorageResult<Vec<SlotCount>>;

    /// Whether `(page, visitor_id)` has a view at or after `since`
    async fn recent_match(&self, page: &str, visitor_id: &str, since: i64) -> StorageResult<bool>;

    /// Append a content view
    async fn append_content(&self, view: &ContentView) -> StorageResult<()>;

    /// Whether `(content_type, content_id, visitor_id)` has a view at or after `since`
    async fn recent_content_match(
        &self,
        content_type: ContentType,
        content_id: &str,
        visitor_id: &str,
        since: i64,
    ) -> StorageResult<bool>;

    /// Total views of one piece of content
    async fn content_count(&self, content_type: ContentType, content_id: &str)
        -> StorageResult<i64>;

    /// Content views grouped by server-local day (slot = local days since epoch)
    async fn content_daily(
        &self,
        content_type: ContentType,
        content_id: &str,
        offset_secs: i64,
    ) -> StorageResult<Vec<SlotCount>>;
}
