use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the analytics core.
///
/// Bot and duplicate skips are not errors; cache, broadcast and WebSocket
/// failures are logged where they happen and never reach this type.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
