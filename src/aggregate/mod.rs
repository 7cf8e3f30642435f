//! Aggregate framework
//!
//! Aggregates are thin accumulators over a typed state: `{state, version,
//! uncommitted events}`. Domain methods validate preconditions, mutate the
//! state and record exactly one event each. The `version` field is always the
//! version the *next* event will receive, so a freshly created aggregate
//! (one genesis event at version 0) sits at version 1.

pub mod collection;
pub mod fulfillment;
pub mod positions;
pub mod product;
pub mod schedule;
pub mod slug_reservation;
pub mod variant;

pub use collection::{Collection, CollectionState, CollectionStatus};
pub use fulfillment::{Fulfillment, FulfillmentLine, FulfillmentState, FulfillmentStatus};
pub use positions::{
    CollectionProductPositions, CollectionProductPositionsState, VariantPositions,
    VariantPositionsState,
};
pub use product::{
    DropshipInfo, FulfillmentType, Product, ProductMetadata, ProductState, ProductStatus,
    VariantOption,
};
pub use schedule::{Schedule, ScheduleState, ScheduleStatus};
pub use slug_reservation::{ReservedEntityType, SlugReservation, SlugReservationState};
pub use variant::{Variant, VariantState, VariantStatus};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Typed snapshot payload of an aggregate.
///
/// `aggregate_type` is an instance method because a dropship product reports
/// a different type name than a plain product while sharing the state shape.
pub trait AggregateState: Serialize + DeserializeOwned {
    /// Type name in lowerCamel form, used as the event-name prefix and
    /// stored on the snapshot row (e.g. `variantPositionsWithinProduct`).
    fn aggregate_type(&self) -> &'static str;
}

/// An event recorded by a domain method but not yet committed.
///
/// Non-genesis payloads are explicit deltas: `prior_state` holds the mutated
/// fields before the change, `new_state` the same fields after.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_id: Uuid,
    pub event_name: String,
    pub version: i64,
    pub prior_state: Value,
    pub new_state: Value,
}

impl PendingEvent {
    /// Payload as stored in the event log
    pub fn payload(&self) -> Value {
        json!({
            "priorState": self.prior_state,
            "newState": self.new_state,
        })
    }
}

/// Thin accumulator holding an aggregate's identity, version and
/// uncommitted event buffer around its typed state.
#[derive(Debug, Clone)]
pub struct Aggregate<S> {
    id: String,
    version: i64,
    state: S,
    uncommitted: Vec<PendingEvent>,
}

impl<S: AggregateState> Aggregate<S> {
    /// Construct a fresh aggregate with its genesis `created` event at
    /// version 0, carrying the full snapshot as `newState`.
    pub(crate) fn genesis(id: String, state: S) -> Result<Self, serde_json::Error> {
        let snapshot = serde_json::to_value(&state)?;
        let mut aggregate = Self {
            id,
            version: 0,
            state,
            uncommitted: Vec::new(),
        };
        aggregate.record("created", json!({}), snapshot);
        Ok(aggregate)
    }

    /// Record one domain event and advance the version.
    pub(crate) fn record(&mut self, verb: &str, prior_state: Value, new_state: Value) {
        let event = PendingEvent {
            event_id: Uuid::new_v4(),
            event_name: format!("{}.{}", self.state.aggregate_type(), verb),
            version: self.version,
            prior_state,
            new_state,
        };
        self.uncommitted.push(event);
        self.version += 1;
    }

    /// Aggregate id. For slug reservations this IS the slug string.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The version the next event will receive. Equals the stored snapshot
    /// version when no events are pending.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Type name reported by the current state
    pub fn aggregate_type(&self) -> &'static str {
        self.state.aggregate_type()
    }

    /// Read access to the typed state
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Whether any events are waiting to be committed
    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Uncommitted events, in recording order
    pub fn uncommitted(&self) -> &[PendingEvent] {
        &self.uncommitted
    }

    /// Drain the uncommitted buffer for commit
    pub fn take_uncommitted(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    /// The version the store must hold for a commit of the pending events to
    /// be legal. `None` means the aggregate must not exist yet (genesis).
    pub fn expected_version(&self) -> Option<i64> {
        match self.uncommitted.first() {
            Some(first) if first.version == 0 => None,
            Some(first) => Some(first.version),
            None => Some(self.version),
        }
    }

    /// Full state for persistence
    pub fn to_snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.state)
    }

    /// Rehydrate from a stored snapshot row
    pub fn from_snapshot(
        id: String,
        version: i64,
        payload: Value,
    ) -> Result<Self, serde_json::Error> {
        let state: S = serde_json::from_value(payload)?;
        Ok(Self {
            id,
            version,
            state,
            uncommitted: Vec::new(),
        })
    }
}
