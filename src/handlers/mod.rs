//! Command Handlers module
//!
//! CQRS command services. Each handler validates its command, loads the
//! affected aggregates through a Unit of Work, invokes domain methods, and
//! commits events + snapshots + outbox rows atomically.

mod collection_handler;
mod commands;
mod fulfillment_handler;
mod product_handler;
mod schedule_handler;
mod variant_handler;


pub use collection_handler::CollectionHandler;
pub use commands::*;
pub use fulfillment_handler::FulfillmentHandler;
pub use product_handler::ProductHandler;
pub use schedule_handler::ScheduleHandler;
pub use variant_handler::VariantHandler;

use crate::aggregate::{Aggregate, AggregateState, ReservedEntityType, SlugReservation};
use crate::aggregate::slug_reservation::SlugReservationState;
use crate::domain::DomainError;
use crate::error::{AppError, AppResult};
use crate::uow::UnitOfWork;

/// Service-level optimistic concurrency check: the caller's expected version
/// must match the loaded snapshot version before any domain method runs. The
/// store repeats the check under a row lock at commit time.
pub(crate) fn check_expected_version<S: AggregateState>(
    aggregate: &Aggregate<S>,
    expected: i64,
) -> AppResult<()> {
    if aggregate.version() != expected {
        return Err(AppError::Conflict {
            aggregate_id: aggregate.id().to_string(),
            expected: Some(expected),
            actual: Some(aggregate.version()),
        });
    }
    Ok(())
}

/// Reserve a slug (or SKU) for an entity within the current Unit of Work.
///
/// A fresh slug becomes a new reservation aggregate whose id is the slug. A
/// released slug is taken over via `reclaimed` on the existing aggregate. An
/// active reservation fails the command with `constraint_violated`.
pub(crate) async fn reserve_slug(
    uow: &mut UnitOfWork,
    slug: &str,
    entity_id: &str,
    entity_type: ReservedEntityType,
) -> AppResult<SlugReservation> {
    match uow.find::<SlugReservationState>(slug).await? {
        Some(mut existing) => {
            if existing.is_active() {
                return Err(AppError::Domain(DomainError::SlugInUse(slug.to_string())));
            }
            existing.reclaim(entity_id.to_string(), entity_type)?;
            Ok(existing)
        }
        None => Ok(SlugReservation::create(
            slug.to_string(),
            entity_id.to_string(),
            entity_type,
        )?),
    }
}
