//! Outbox
//!
//! At-least-once publication queue. Rows are enqueued in the same
//! transaction as the events they carry; a background publisher drains the
//! queue and hands events to registered subscribers. Consumers must be
//! idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::event_store::StoredEvent;

/// One queued delivery
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outbox errors
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbox repository
#[derive(Debug, Clone)]
pub struct Outbox {
    pool: PgPool,
}

impl Outbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue events inside the commit transaction.
    pub async fn enqueue(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: &[StoredEvent],
    ) -> Result<(), OutboxError> {
        for event in events {
            let payload = serde_json::to_value(event)?;
            sqlx::query(
                r#"
                INSERT INTO outbox (id, event_id, payload, status, attempts, next_attempt_at)
                VALUES ($1, $2, $3, 'pending', 0, NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(event.event_id)
            .bind(payload)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Claim up to `n` due entries. The claim takes a short lease by pushing
    /// `next_attempt_at` forward, so a crashed publisher's entries become
    /// claimable again after the lease expires.
    pub async fn claim_batch(&self, n: i64, lease: Duration) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows: Vec<(Uuid, Uuid, Value, String, i32, DateTime<Utc>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                UPDATE outbox
                SET next_attempt_at = NOW() + ($2 * INTERVAL '1 millisecond')
                WHERE id IN (
                    SELECT id FROM outbox
                    WHERE status = 'pending' AND next_attempt_at <= NOW()
                    ORDER BY created_at ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, event_id, payload, status, attempts, next_attempt_at, created_at
                "#,
            )
            .bind(n)
            .bind(lease.as_millis() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, event_id, payload, status, attempts, next_attempt_at, created_at)| {
                    OutboxEntry {
                        id,
                        event_id,
                        payload,
                        status,
                        attempts,
                        next_attempt_at,
                        created_at,
                    }
                },
            )
            .collect())
    }

    /// Acknowledge a delivery, removing the entry from the pending set.
    pub async fn ack(&self, id: Uuid) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox SET status = 'delivered', next_attempt_at = NOW() WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed delivery. Entries past the attempt budget move to
    /// `failed`; others are retried after exponential backoff.
    pub async fn nack(
        &self,
        entry: &OutboxEntry,
        error: &str,
        base: Duration,
        max: Duration,
        max_attempts: i32,
    ) -> Result<(), OutboxError> {
        let attempts = entry.attempts + 1;

        if attempts >= max_attempts {
            tracing::error!(
                outbox_id = %entry.id,
                event_id = %entry.event_id,
                attempts,
                error,
                "Outbox delivery failed permanently"
            );
            sqlx::query(
                r#"
                UPDATE outbox SET status = 'failed', attempts = $2 WHERE id = $1
                "#,
            )
            .bind(entry.id)
            .bind(attempts)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let delay = backoff(attempts, base, max);
        tracing::warn!(
            outbox_id = %entry.id,
            event_id = %entry.event_id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error,
            "Outbox delivery failed, scheduling retry"
        );
        sqlx::query(
            r#"
            UPDATE outbox
            SET attempts = $2, next_attempt_at = NOW() + ($3 * INTERVAL '1 millisecond')
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(attempts)
        .bind(delay.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of entries still waiting for delivery
    pub async fn pending_count(&self) -> Result<i64, OutboxError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Exponential backoff: `base * 2^(attempts - 1)`, capped at `max`.
pub fn backoff(attempts: i32, base: Duration, max: Duration) -> Duration {
    let shift = attempts.saturating_sub(1).clamp(0, 31) as u32;
    let delay = base.saturating_mul(1u32 << shift.min(16));
    delay.min(max)
}

// =========================================================================
// Publisher
// =========================================================================

/// A consumer of committed events
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &StoredEvent) -> anyhow::Result<()>;
}

/// Configuration for the outbox publisher
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub lease: Duration,
    pub retry_base: Duration,
    pub retry_max_delay: Duration,
    pub max_attempts: i32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            lease: Duration::from_secs(30),
            retry_base: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Background worker draining the outbox to subscribers
pub struct OutboxPublisher {
    outbox: Outbox,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    config: PublisherConfig,
}

impl OutboxPublisher {
    pub fn new(pool: PgPool, subscribers: Vec<Arc<dyn EventSubscriber>>) -> Self {
        Self {
            outbox: Outbox::new(pool),
            subscribers,
            config: PublisherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the publisher loop in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Outbox publisher started");
        let mut tick = tokio::time::interval(self.config.poll_interval);
        loop {
            tick.tick().await;
            loop {
                match self.drain_once().await {
                    Ok(0) => break,
                    Ok(n) => {
                        tracing::debug!(delivered = n, "Outbox batch drained");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Outbox drain failed");
                        break;
                    }
                }
            }
        }
    }

    /// Deliver one claimed batch. Returns the number of entries processed.
    pub async fn drain_once(&self) -> Result<usize, OutboxError> {
        let entries = self
            .outbox
            .claim_batch(self.config.batch_size, self.config.lease)
            .await?;
        let claimed = entries.len();

        for entry in &entries {
            match serde_json::from_value::<StoredEvent>(entry.payload.clone()) {
                Ok(event) => match self.deliver(&event).await {
                    Ok(()) => self.outbox.ack(entry.id).await?,
                    Err(e) => {
                        self.outbox
                            .nack(
                                entry,
                                &e.to_string(),
                                self.config.retry_base,
                                self.config.retry_max_delay,
                                self.config.max_attempts,
                            )
                            .await?;
                    }
                },
                Err(e) => {
                    // Undeliverable payload; park it as failed immediately
                    self.outbox
                        .nack(
                            entry,
                            &format!("payload decode: {}", e),
                            self.config.retry_base,
                            self.config.retry_max_delay,
                            entry.attempts + 1,
                        )
                        .await?;
                }
            }
        }

        Ok(claimed)
    }

    async fn deliver(&self, event: &StoredEvent) -> anyhow::Result<()> {
        for subscriber in &self.subscribers {
            subscriber.handle(event).await.map_err(|e| {
                anyhow::anyhow!("subscriber {}: {}", subscriber.name(), e)
            })?;
        }
        Ok(())
    }
}

/// Subscriber that wakes the projection runner as soon as events land,
/// instead of waiting for its poll interval.
pub struct ProjectionTrigger {
    notify: Arc<tokio::sync::Notify>,
}

impl ProjectionTrigger {
    pub fn new(notify: Arc<tokio::sync::Notify>) -> Self {
        Self { notify }
    }
}

#[async_trait]
impl EventSubscriber for ProjectionTrigger {
    fn name(&self) -> &'static str {
        "projection-trigger"
    }

    async fn handle(&self, _event: &StoredEvent) -> anyhow::Result<()> {
        self.notify.notify_one();
        Ok(())
    }
}
