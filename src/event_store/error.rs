//! Event Store Errors

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict
    #[error("Concurrency conflict for aggregate {aggregate_id}: expected version {expected:?}, found {actual:?}")]
    Conflict {
        aggregate_id: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    /// Aggregate not found
    #[error("Aggregate not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::Conflict { .. })
    }

    /// Check if a retry with refreshed state may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::Conflict { .. } | EventStoreError::Database(_)
        )
    }
}
