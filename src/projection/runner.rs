//! Projection Runner
//!
//! Maintains a cursor over the event log's commit sequence and dispatches
//! each event by name to idempotent view upserts. Views carry no
//! authoritative data; wiping the view tables and the cursor rebuilds
//! everything from the log.
//!
//! Non-genesis events are deltas, so view updates are JSONB patches
//! (`payload || newState`) with the filter columns re-extracted from the
//! patch. The cursor advances in the same transaction as the batch's view
//! writes, and every handler tolerates replay.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use crate::event_store::{EventStore, StoredEvent};

/// Cursor name for the admin view projection
const PROJECTION_NAME: &str = "admin_views";

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event store error: {0}")]
    Store(#[from] crate::event_store::EventStoreError),

    #[error("Malformed event {event_name}: {detail}")]
    MalformedEvent { event_name: String, detail: String },
}

/// Background worker building the denormalized views
pub struct ProjectionRunner {
    store: EventStore,
    pool: PgPool,
    batch_size: i64,
    poll_interval: Duration,
    notify: Arc<tokio::sync::Notify>,
}

impl ProjectionRunner {
    pub fn new(pool: PgPool, notify: Arc<tokio::sync::Notify>) -> Self {
        Self {
            store: EventStore::new(pool.clone()),
            pool,
            batch_size: 200,
            poll_interval: Duration::from_secs(2),
            notify,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Start the runner loop in the background. It wakes on outbox delivery
    /// notifications and falls back to polling.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Projection runner started");
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            loop {
                match self.run_once().await {
                    Ok(0) => break,
                    Ok(n) => {
                        tracing::debug!(events = n, "Projection batch applied");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Projection batch failed");
                        break;
                    }
                }
            }
        }
    }

    /// Apply one batch of events past the cursor. Returns how many were
    /// processed.
    pub async fn run_once(&self) -> Result<usize, ProjectionError> {
        let cursor = self.load_cursor().await?;
        let events = self.store.list_events_since(cursor, self.batch_size).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for event in &events {
            if let Err(e) = self.apply(&mut tx, event).await {
                // A malformed event must not wedge the pipeline forever; it
                // is logged and skipped, everything else aborts the batch.
                match e {
                    ProjectionError::MalformedEvent { .. } => {
                        tracing::error!(
                            sequence = event.sequence,
                            event_name = %event.event_name,
                            error = %e,
                            "Skipping malformed event"
                        );
                    }
                    other => return Err(other),
                }
            }
        }

        let last = events
            .last()
            .map(|e| e.sequence)
            .unwrap_or(cursor);
        sqlx::query(
            r#"
            INSERT INTO projection_cursors (projection, position)
            VALUES ($1, $2)
            ON CONFLICT (projection) DO UPDATE SET position = $2, updated_at = NOW()
            "#,
        )
        .bind(PROJECTION_NAME)
        .bind(last)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(events.len())
    }

    async fn load_cursor(&self) -> Result<i64, ProjectionError> {
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM projection_cursors WHERE projection = $1")
                .bind(PROJECTION_NAME)
                .fetch_optional(&self.pool)
                .await?;
        Ok(position.unwrap_or(0))
    }

    /// Dispatch one event to its view handler.
    async fn apply(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
    ) -> Result<(), ProjectionError> {
        let (aggregate, verb) = split_event_name(event)?;
        let new_state = event
            .payload
            .get("newState")
            .cloned()
            .unwrap_or(Value::Null);
        let prior_state = event
            .payload
            .get("priorState")
            .cloned()
            .unwrap_or(Value::Null);
        // Views expose the post-event snapshot version for optimistic checks
        let version = event.version + 1;

        match (aggregate, verb) {
            ("product" | "dropshipProduct", "created") => {
                self.insert_product(tx, event, &new_state, version).await?;
            }
            ("product" | "dropshipProduct", "published") => {
                self.patch_product(tx, event, &new_state, version).await?;
                self.upsert_published(tx, &event.aggregate_id).await?;
            }
            ("product" | "dropshipProduct", "archived") => {
                self.patch_product(tx, event, &new_state, version).await?;
                sqlx::query("DELETE FROM published_products WHERE product_id = $1")
                    .bind(&event.aggregate_id)
                    .execute(&mut **tx)
                    .await?;
            }
            ("product" | "dropshipProduct", "slug_changed") => {
                self.patch_product(tx, event, &new_state, version).await?;
                if let Some(slug) = new_state.get("slug").and_then(Value::as_str) {
                    sqlx::query("UPDATE published_products SET slug = $2 WHERE product_id = $1")
                        .bind(&event.aggregate_id)
                        .bind(slug)
                        .execute(&mut **tx)
                        .await?;
                }
            }
            ("product" | "dropshipProduct", _) => {
                self.patch_product(tx, event, &new_state, version).await?;
            }

            ("variant", "created") => {
                self.insert_variant(tx, event, &new_state, version).await?;
            }
            ("variant", _) => {
                sqlx::query(
                    r#"
                    UPDATE variant_list
                    SET payload = payload || $2,
                        sku = COALESCE($2->>'sku', sku),
                        status = COALESCE($2->>'status', status),
                        version = $3,
                        updated_at = NOW()
                    WHERE aggregate_id = $1
                    "#,
                )
                .bind(&event.aggregate_id)
                .bind(&new_state)
                .bind(version)
                .execute(&mut **tx)
                .await?;
            }

            ("variantPositionsWithinProduct", "created") => {
                self.register_position_owner(tx, event, &new_state, "productId")
                    .await?;
            }
            ("variantPositionsWithinProduct", _) => {
                self.apply_variant_positions(tx, &prior_state, &new_state)
                    .await?;
            }

            ("collection", "created") => {
                self.insert_collection(tx, event, &new_state, version).await?;
            }
            ("collection", _) => {
                sqlx::query(
                    r#"
                    UPDATE collection_list
                    SET payload = payload || $2,
                        slug = COALESCE($2->>'slug', slug),
                        status = COALESCE($2->>'status', status),
                        version = $3,
                        updated_at = NOW()
                    WHERE aggregate_id = $1
                    "#,
                )
                .bind(&event.aggregate_id)
                .bind(&new_state)
                .bind(version)
                .execute(&mut **tx)
                .await?;
            }

            ("collectionProductPositions", "created") => {
                self.register_position_owner(tx, event, &new_state, "collectionId")
                    .await?;
            }
            ("collectionProductPositions", _) => {
                self.apply_collection_positions(tx, event, &new_state).await?;
            }

            ("slugReservation", _) => {
                self.upsert_slug_redirect(tx, event, &new_state).await?;
            }

            ("schedule", "created") => {
                self.insert_schedule(tx, event, &new_state, version).await?;
            }
            ("schedule", _) => {
                sqlx::query(
                    r#"
                    UPDATE schedule_list
                    SET payload = payload || $2,
                        status = COALESCE($2->>'status', status),
                        retry_count = COALESCE(($2->>'retryCount')::int, retry_count),
                        next_retry_at = COALESCE(($2->>'nextRetryAt')::timestamptz, next_retry_at),
                        error_message = COALESCE($2->>'errorMessage', error_message),
                        version = $3,
                        updated_at = NOW()
                    WHERE aggregate_id = $1
                    "#,
                )
                .bind(&event.aggregate_id)
                .bind(&new_state)
                .bind(version)
                .execute(&mut **tx)
                .await?;
            }

            ("fulfillment", "created") => {
                self.insert_fulfillment(tx, event, &new_state, version).await?;
            }
            ("fulfillment", _) => {
                sqlx::query(
                    r#"
                    UPDATE fulfillment_list
                    SET payload = payload || $2,
                        status = COALESCE($2->>'status', status),
                        version = $3,
                        updated_at = NOW()
                    WHERE aggregate_id = $1
                    "#,
                )
                .bind(&event.aggregate_id)
                .bind(&new_state)
                .bind(version)
                .execute(&mut **tx)
                .await?;
            }

            (other, _) => {
                tracing::debug!(aggregate = other, event_name = %event.event_name, "No view handler");
            }
        }

        Ok(())
    }

    async fn insert_product(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        state: &Value,
        version: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO product_list (aggregate_id, aggregate_type, slug, status, payload, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (aggregate_id)
            DO UPDATE SET slug = $3, status = $4, payload = $5, version = $6, updated_at = NOW()
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(event_aggregate(event))
        .bind(required_str(event, state, "slug")?)
        .bind(required_str(event, state, "status")?)
        .bind(state)
        .bind(version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn patch_product(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        new_state: &Value,
        version: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            UPDATE product_list
            SET payload = payload || $2,
                slug = COALESCE($2->>'slug', slug),
                status = COALESCE($2->>'status', status),
                version = $3,
                updated_at = NOW()
            WHERE aggregate_id = $1
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(new_state)
        .bind(version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Copy the current product view row into the published catalogue.
    async fn upsert_published(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        product_id: &str,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO published_products (slug, product_id, payload, published_at)
            SELECT slug, aggregate_id, payload, NOW()
            FROM product_list
            WHERE aggregate_id = $1
            ON CONFLICT (slug)
            DO UPDATE SET product_id = EXCLUDED.product_id, payload = EXCLUDED.payload
            "#,
        )
        .bind(product_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_variant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        state: &Value,
        version: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO variant_list (aggregate_id, product_id, sku, status, position, payload, version, updated_at)
            VALUES ($1, $2, $3, $4, NULL, $5, $6, NOW())
            ON CONFLICT (aggregate_id)
            DO UPDATE SET product_id = $2, sku = $3, status = $4, payload = $5, version = $6, updated_at = NOW()
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(required_str(event, state, "productId")?)
        .bind(required_str(event, state, "sku")?)
        .bind(required_str(event, state, "status")?)
        .bind(state)
        .bind(version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_collection(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        state: &Value,
        version: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO collection_list (aggregate_id, slug, status, payload, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (aggregate_id)
            DO UPDATE SET slug = $2, status = $3, payload = $4, version = $5, updated_at = NOW()
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(required_str(event, state, "slug")?)
        .bind(required_str(event, state, "status")?)
        .bind(state)
        .bind(version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_schedule(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        state: &Value,
        version: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO schedule_list (
                aggregate_id, status, command_type, target_aggregate_id, target_aggregate_type,
                scheduled_for, retry_count, next_retry_at, error_message, payload, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, ($6)::timestamptz, 0, NULL, NULL, $7, $8, NOW())
            ON CONFLICT (aggregate_id)
            DO UPDATE SET status = $2, payload = $7, version = $8, updated_at = NOW()
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(required_str(event, state, "status")?)
        .bind(required_str(event, state, "commandType")?)
        .bind(required_str(event, state, "targetAggregateId")?)
        .bind(state.get("targetAggregateType").and_then(Value::as_str).unwrap_or_default())
        .bind(required_str(event, state, "scheduledFor")?)
        .bind(state)
        .bind(version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_fulfillment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        state: &Value,
        version: i64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO fulfillment_list (aggregate_id, order_id, status, payload, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (aggregate_id)
            DO UPDATE SET order_id = $2, status = $3, payload = $4, version = $5, updated_at = NOW()
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(required_str(event, state, "orderId")?)
        .bind(required_str(event, state, "status")?)
        .bind(state)
        .bind(version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Remember which parent owns a positions aggregate; membership updates
    /// later join through this (itself regenerable) mapping.
    async fn register_position_owner(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        state: &Value,
        owner_key: &str,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO position_owners (positions_id, owner_id)
            VALUES ($1, $2)
            ON CONFLICT (positions_id) DO UPDATE SET owner_id = $2
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(required_str(event, state, owner_key)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Apply a variant-ordering change: indexed positions for present ids,
    /// cleared positions for ids the event removed.
    async fn apply_variant_positions(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        prior_state: &Value,
        new_state: &Value,
    ) -> Result<(), ProjectionError> {
        let (positions, removed) = position_changes(prior_state, new_state, "variantIds");

        for (variant_id, position) in positions {
            sqlx::query("UPDATE variant_list SET position = $2 WHERE aggregate_id = $1")
                .bind(variant_id)
                .bind(position)
                .execute(&mut **tx)
                .await?;
        }
        for variant_id in removed {
            sqlx::query("UPDATE variant_list SET position = NULL WHERE aggregate_id = $1")
                .bind(variant_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    /// Apply a collection-membership change through the owner mapping.
    async fn apply_collection_positions(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        new_state: &Value,
    ) -> Result<(), ProjectionError> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM position_owners WHERE positions_id = $1")
                .bind(&event.aggregate_id)
                .fetch_optional(&mut **tx)
                .await?;
        let Some(collection_id) = owner else {
            return Err(ProjectionError::MalformedEvent {
                event_name: event.event_name.clone(),
                detail: format!("unknown positions aggregate {}", event.aggregate_id),
            });
        };

        let ids = string_list(new_state, "productIds");

        // Rewrite the membership rows for this collection
        sqlx::query("DELETE FROM collection_products WHERE collection_id = $1")
            .bind(&collection_id)
            .execute(&mut **tx)
            .await?;
        for (idx, product_id) in ids.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO collection_products (collection_id, product_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(&collection_id)
            .bind(product_id)
            .bind(idx as i64)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn upsert_slug_redirect(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
        new_state: &Value,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO slug_redirects (slug, entity_id, entity_type, status, new_slug, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (slug)
            DO UPDATE SET
                entity_id = COALESCE($2, slug_redirects.entity_id),
                entity_type = COALESCE($3, slug_redirects.entity_type),
                status = COALESCE($4, slug_redirects.status),
                new_slug = $5,
                updated_at = NOW()
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(new_state.get("entityId").and_then(Value::as_str))
        .bind(new_state.get("entityType").and_then(Value::as_str))
        .bind(new_state.get("status").and_then(Value::as_str))
        .bind(new_state.get("newSlug").and_then(Value::as_str))
        .bind(event.occurred_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn split_event_name(event: &StoredEvent) -> Result<(&str, &str), ProjectionError> {
    event
        .event_name
        .split_once('.')
        .ok_or_else(|| ProjectionError::MalformedEvent {
            event_name: event.event_name.clone(),
            detail: "missing '.' separator".to_string(),
        })
}

fn event_aggregate(event: &StoredEvent) -> &str {
    event.event_name.split_once('.').map(|(a, _)| a).unwrap_or("")
}

fn required_str<'a>(
    event: &StoredEvent,
    state: &'a Value,
    key: &str,
) -> Result<&'a str, ProjectionError> {
    state
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProjectionError::MalformedEvent {
            event_name: event.event_name.clone(),
            detail: format!("missing field {}", key),
        })
}

fn string_list(state: &Value, key: &str) -> Vec<String> {
    state
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Positions for every id present in `newState`, plus the ids that were in
/// `priorState` but dropped out (their view positions are cleared).
fn position_changes(
    prior_state: &Value,
    new_state: &Value,
    key: &str,
) -> (Vec<(String, i64)>, Vec<String>) {
    let new_ids = string_list(new_state, key);
    let prior_ids = string_list(prior_state, key);

    let positions: Vec<(String, i64)> = new_ids
        .iter()
        .enumerate()
        .map(|(idx, id)| (id.clone(), idx as i64))
        .collect();
    let removed: Vec<String> = prior_ids
        .into_iter()
        .filter(|id| !new_ids.contains(id))
        .collect();

    (positions, removed)
}
