//! Event Store Repository
//!
//! Conditional event append with optimistic concurrency control. The append
//! and the snapshot rewrite share the caller's transaction; concurrent
//! appends for the same aggregate are serialized by a row lock on the
//! snapshot row (genesis races fall through to the unique index on
//! `(aggregate_id, version)`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::PendingEvent;

use super::EventStoreError;

/// A committed event read back from the log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Global commit order across aggregates
    pub sequence: i64,
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub event_name: String,
    /// The aggregate version at which this event was produced
    pub version: i64,
    pub correlation_id: Uuid,
    /// `{ priorState, newState }`
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Latest-state snapshot row for an aggregate
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Number of events applied; the version the next event will receive
    pub version: i64,
    pub payload: Value,
    pub correlation_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// One aggregate's contribution to a Unit of Work commit
#[derive(Debug)]
pub struct AggregateCommit {
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Stored snapshot version required for the append to be legal;
    /// `None` means the aggregate must not exist yet
    pub expected_version: Option<i64>,
    /// Full state after the pending events
    pub snapshot: Value,
    pub events: Vec<PendingEvent>,
}

/// Event Store for persisting and retrieving events
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    /// Create a new EventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one aggregate's events and rewrite its snapshot inside the
    /// caller's transaction. Returns the new snapshot version and the stored
    /// events (with their assigned commit sequences) for outbox enqueue.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        commit: &AggregateCommit,
        correlation_id: Uuid,
    ) -> Result<(i64, Vec<StoredEvent>), EventStoreError> {
        // The Unit of Work never registers an aggregate without events
        if commit.events.is_empty() {
            return Ok((commit.expected_version.unwrap_or(0), Vec::new()));
        }

        // Serialize concurrent writers on the snapshot row
        let current: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT version FROM snapshots WHERE aggregate_id = $1 FOR UPDATE
            "#,
        )
        .bind(&commit.aggregate_id)
        .fetch_optional(&mut **tx)
        .await?;

        if current != commit.expected_version {
            return Err(EventStoreError::Conflict {
                aggregate_id: commit.aggregate_id.clone(),
                expected: commit.expected_version,
                actual: current,
            });
        }

        let mut stored = Vec::with_capacity(commit.events.len());
        for event in &commit.events {
            let row: Result<(i64, DateTime<Utc>), sqlx::Error> = sqlx::query_as(
                r#"
                INSERT INTO events (
                    event_id, aggregate_id, event_name, version, correlation_id, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING sequence, occurred_at
                "#,
            )
            .bind(event.event_id)
            .bind(&commit.aggregate_id)
            .bind(&event.event_name)
            .bind(event.version)
            .bind(correlation_id)
            .bind(event.payload())
            .fetch_one(&mut **tx)
            .await;

            let (sequence, occurred_at) = match row {
                Ok(row) => row,
                // Two writers creating the same aggregate race past the
                // (absent) snapshot row; the unique index breaks the tie.
                Err(e) if is_unique_violation(&e) => {
                    return Err(EventStoreError::Conflict {
                        aggregate_id: commit.aggregate_id.clone(),
                        expected: commit.expected_version,
                        actual: None,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            stored.push(StoredEvent {
                sequence,
                event_id: event.event_id,
                aggregate_id: commit.aggregate_id.clone(),
                event_name: event.event_name.clone(),
                version: event.version,
                correlation_id,
                payload: event.payload(),
                occurred_at,
            });
        }

        let new_version = commit
            .events
            .last()
            .map(|e| e.version + 1)
            .unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, payload, correlation_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (aggregate_id)
            DO UPDATE SET version = $3, payload = $4, correlation_id = $5, updated_at = NOW()
            "#,
        )
        .bind(&commit.aggregate_id)
        .bind(&commit.aggregate_type)
        .bind(new_version)
        .bind(&commit.snapshot)
        .bind(correlation_id)
        .execute(&mut **tx)
        .await?;

        Ok((new_version, stored))
    }

    /// Load the latest snapshot for an aggregate
    pub async fn load_snapshot(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<SnapshotRow>, EventStoreError> {
        let row: Option<(String, String, i64, Value, Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT aggregate_id, aggregate_type, version, payload, correlation_id, updated_at
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(aggregate_id, aggregate_type, version, payload, correlation_id, updated_at)| {
                SnapshotRow {
                    aggregate_id,
                    aggregate_type,
                    version,
                    payload,
                    correlation_id,
                    updated_at,
                }
            },
        ))
    }

    /// Load a snapshot inside an open transaction
    pub async fn load_snapshot_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<Option<SnapshotRow>, EventStoreError> {
        let row: Option<(String, String, i64, Value, Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT aggregate_id, aggregate_type, version, payload, correlation_id, updated_at
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(
            |(aggregate_id, aggregate_type, version, payload, correlation_id, updated_at)| {
                SnapshotRow {
                    aggregate_id,
                    aggregate_type,
                    version,
                    payload,
                    correlation_id,
                    updated_at,
                }
            },
        ))
    }

    /// Events with commit sequence greater than `after`, in commit order.
    /// Drives the projection runner's cursor.
    pub async fn list_events_since(
        &self,
        after: i64,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<(i64, Uuid, String, String, i64, Uuid, Value, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT sequence, event_id, aggregate_id, event_name, version, correlation_id, payload, occurred_at
                FROM events
                WHERE sequence > $1
                ORDER BY sequence ASC
                LIMIT $2
                "#,
            )
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(stored_event_from_row).collect())
    }

    /// All events for one aggregate, ordered by version.
    pub async fn events_for_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<(i64, Uuid, String, String, i64, Uuid, Value, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT sequence, event_id, aggregate_id, event_name, version, correlation_id, payload, occurred_at
                FROM events
                WHERE aggregate_id = $1
                ORDER BY version ASC
                "#,
            )
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(stored_event_from_row).collect())
    }
}

fn stored_event_from_row(
    (sequence, event_id, aggregate_id, event_name, version, correlation_id, payload, occurred_at): (
        i64,
        Uuid,
        String,
        String,
        i64,
        Uuid,
        Value,
        DateTime<Utc>,
    ),
) -> StoredEvent {
    StoredEvent {
        sequence,
        event_id,
        aggregate_id,
        event_name,
        version,
        correlation_id,
        payload,
        occurred_at,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
