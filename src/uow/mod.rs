//! Unit of Work
//!
//! Transactional boundary for command services. Aggregates are loaded
//! through the open transaction, registered with `save`, and persisted by
//! `commit` in one atomic step: conditional event append, snapshot rewrite
//! and outbox enqueue per aggregate. Any single-aggregate version conflict
//! aborts the whole commit.
//!
//! Dropping an uncommitted `UnitOfWork` rolls the transaction back, so a
//! handler bailing out with `?` abandons all in-flight changes.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateState};
use crate::domain::OperationContext;
use crate::error::{AppError, AppResult};
use crate::event_store::{AggregateCommit, EventStore};
use crate::outbox::Outbox;

/// Advisory lock key serializing the commit phase. Sequence values must
/// reflect commit order and keep one transaction's events adjacent, which a
/// bare BIGSERIAL cannot guarantee under concurrent inserts.
const COMMIT_ORDER_LOCK: i64 = 0x636f6d6d_6974;

/// Result of a committed Unit of Work
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub aggregates: Vec<CommittedAggregate>,
    pub event_ids: Vec<Uuid>,
}

/// Post-commit version of one aggregate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedAggregate {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
    pub event_count: usize,
}

impl CommitSummary {
    /// Committed version of an aggregate, if it took part in this commit
    pub fn version_of(&self, aggregate_id: &str) -> Option<i64> {
        self.aggregates
            .iter()
            .find(|a| a.aggregate_id == aggregate_id)
            .map(|a| a.version)
    }
}

/// One transaction's worth of aggregate loading and persistence
pub struct UnitOfWork {
    store: EventStore,
    outbox: Outbox,
    tx: Option<Transaction<'static, Postgres>>,
    correlation_id: Uuid,
    pending: Vec<AggregateCommit>,
}

impl UnitOfWork {
    /// Open a transaction bound to the operation's correlation id.
    pub async fn begin(pool: &PgPool, context: &OperationContext) -> AppResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            store: EventStore::new(pool.clone()),
            outbox: Outbox::new(pool.clone()),
            tx: Some(tx),
            correlation_id: context.correlation_id.unwrap_or_else(Uuid::new_v4),
            pending: Vec::new(),
        })
    }

    /// Correlation id stamped on every event this unit of work commits
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Load an aggregate's latest snapshot through the open transaction.
    pub async fn find<S: AggregateState>(&mut self, id: &str) -> AppResult<Option<Aggregate<S>>> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| AppError::Internal("unit of work already closed".to_string()))?;

        match self.store.load_snapshot_in_tx(tx, id).await? {
            Some(row) => {
                let aggregate = Aggregate::from_snapshot(row.aggregate_id, row.version, row.payload)?;
                Ok(Some(aggregate))
            }
            None => Ok(None),
        }
    }

    /// Like [`find`](Self::find), but fails with `not_found` when absent.
    pub async fn get<S: AggregateState>(&mut self, id: &str) -> AppResult<Aggregate<S>> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Register an aggregate's uncommitted events for the commit. No-op for
    /// aggregates without pending events.
    pub fn save<S: AggregateState>(&mut self, aggregate: &mut Aggregate<S>) -> AppResult<()> {
        if !aggregate.has_uncommitted() {
            return Ok(());
        }

        let expected_version = aggregate.expected_version();
        let snapshot = aggregate.to_snapshot()?;
        let events = aggregate.take_uncommitted();

        self.pending.push(AggregateCommit {
            aggregate_id: aggregate.id().to_string(),
            aggregate_type: aggregate.aggregate_type().to_string(),
            expected_version,
            snapshot,
            events,
        });
        Ok(())
    }

    /// Write all registered aggregates atomically: events, snapshots and
    /// outbox rows share the transaction. Conflicts abort everything.
    pub async fn commit(mut self) -> AppResult<CommitSummary> {
        let mut tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("unit of work already closed".to_string()))?;

        if !self.pending.is_empty() {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(COMMIT_ORDER_LOCK)
                .execute(&mut *tx)
                .await?;
        }

        let mut summary = CommitSummary::default();

        for commit in &self.pending {
            let (version, stored) = self.store.append(&mut tx, commit, self.correlation_id).await?;
            self.outbox
                .enqueue(&mut tx, &stored)
                .await
                .map_err(|e| AppError::Internal(format!("outbox enqueue: {}", e)))?;

            summary.aggregates.push(CommittedAggregate {
                aggregate_id: commit.aggregate_id.clone(),
                aggregate_type: commit.aggregate_type.clone(),
                version,
                event_count: stored.len(),
            });
            summary.event_ids.extend(stored.iter().map(|e| e.event_id));
        }

        tx.commit().await?;

        tracing::debug!(
            correlation_id = %self.correlation_id,
            aggregates = summary.aggregates.len(),
            events = summary.event_ids.len(),
            "Unit of work committed"
        );

        Ok(summary)
    }

    /// Abandon the transaction and all registered changes.
    pub async fn rollback(mut self) -> AppResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        self.pending.clear();
        Ok(())
    }
}
