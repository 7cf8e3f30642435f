//! Slug Reservation Aggregate
//!
//! The aggregate id IS the slug (or SKU) string, which turns "is this slug
//! free?" into an aggregate-exists check and rides on the store's
//! per-aggregate locking for serializable uniqueness. Released reservations
//! stay in place as redirect history; because aggregate ids are never
//! reused, a released slug is taken over via `reclaim` rather than a fresh
//! aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{validate_sku, validate_slug, DomainError};

use super::{Aggregate, AggregateState};

/// What kind of entity owns the reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservedEntityType {
    Product,
    Collection,
    DropshipProduct,
    Variant,
}

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
}

/// Reservation snapshot state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlugReservationState {
    pub entity_id: String,
    pub entity_type: ReservedEntityType,
    pub status: ReservationStatus,
    /// Forwarding pointer set when the owning entity was renamed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_slug: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl AggregateState for SlugReservationState {
    fn aggregate_type(&self) -> &'static str {
        "slugReservation"
    }
}

pub type SlugReservation = Aggregate<SlugReservationState>;

impl Aggregate<SlugReservationState> {
    /// Reserve a slug for an entity. The id of the new aggregate is the slug
    /// itself.
    pub fn create(
        slug: String,
        entity_id: String,
        entity_type: ReservedEntityType,
    ) -> Result<Self, DomainError> {
        match entity_type {
            ReservedEntityType::Variant => validate_sku(&slug)?,
            _ => validate_slug(&slug)?,
        }

        let state = SlugReservationState {
            entity_id,
            entity_type,
            status: ReservationStatus::Active,
            new_slug: None,
            created_at: Utc::now(),
            released_at: None,
        };

        Self::genesis(slug, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    /// Whether this reservation currently owns the slug
    pub fn is_active(&self) -> bool {
        self.state.status == ReservationStatus::Active
    }

    /// Release the reservation, optionally recording where the entity moved.
    pub fn release(&mut self, new_slug: Option<String>) -> Result<(), DomainError> {
        if self.state.status == ReservationStatus::Released {
            return Err(DomainError::illegal_transition("released", "released"));
        }
        if let Some(ref slug) = new_slug {
            match self.state.entity_type {
                ReservedEntityType::Variant => validate_sku(slug)?,
                _ => validate_slug(slug)?,
            }
        }

        let prior = json!({ "status": self.state.status, "newSlug": self.state.new_slug });
        self.state.status = ReservationStatus::Released;
        self.state.new_slug = new_slug;
        self.state.released_at = Some(Utc::now());
        self.record(
            "released",
            prior,
            json!({
                "status": self.state.status,
                "newSlug": self.state.new_slug,
                "releasedAt": self.state.released_at,
            }),
        );
        Ok(())
    }

    /// Take over a released slug for a different (or the same) entity.
    pub fn reclaim(
        &mut self,
        entity_id: String,
        entity_type: ReservedEntityType,
    ) -> Result<(), DomainError> {
        if self.state.status == ReservationStatus::Active {
            return Err(DomainError::SlugInUse(self.id().to_string()));
        }

        let prior = json!({
            "status": self.state.status,
            "entityId": self.state.entity_id,
            "entityType": self.state.entity_type,
            "newSlug": self.state.new_slug,
        });
        self.state.status = ReservationStatus::Active;
        self.state.entity_id = entity_id;
        self.state.entity_type = entity_type;
        self.state.new_slug = None;
        self.state.released_at = None;
        self.record(
            "reclaimed",
            prior,
            json!({
                "status": self.state.status,
                "entityId": self.state.entity_id,
                "entityType": self.state.entity_type,
                "newSlug": self.state.new_slug,
            }),
        );
        Ok(())
    }
}
