//! Fulfillment Handler
//!
//! Command services for the fulfillment lifecycle.

use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::fulfillment::FulfillmentState;
use crate::aggregate::Fulfillment;
use crate::domain::OperationContext;
use crate::error::AppResult;
use crate::uow::UnitOfWork;

use super::{
    check_expected_version, CommandAck, CreateFulfillmentCommand, FulfillmentLifecycleCommand,
    ShipFulfillmentCommand,
};

/// Handler for fulfillment commands
pub struct FulfillmentHandler {
    pool: PgPool,
}

impl FulfillmentHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending fulfillment for an order.
    pub async fn create(
        &self,
        command: CreateFulfillmentCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let fulfillment_id = command
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut fulfillment =
            Fulfillment::create(fulfillment_id.clone(), command.order_id, command.items)?;

        uow.save(&mut fulfillment)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&fulfillment_id).unwrap_or(1),
            id: fulfillment_id,
        })
    }

    /// Ship with tracking details.
    pub async fn ship(
        &self,
        command: ShipFulfillmentCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut fulfillment = uow.get::<FulfillmentState>(&command.fulfillment_id).await?;
        check_expected_version(&fulfillment, command.expected_version)?;

        fulfillment.ship(command.tracking_number, command.carrier)?;

        uow.save(&mut fulfillment)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.fulfillment_id).unwrap_or_default(),
            id: command.fulfillment_id,
        })
    }

    /// Mark a shipped fulfillment as delivered.
    pub async fn deliver(
        &self,
        command: FulfillmentLifecycleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut fulfillment = uow.get::<FulfillmentState>(&command.fulfillment_id).await?;
        check_expected_version(&fulfillment, command.expected_version)?;

        fulfillment.deliver()?;

        uow.save(&mut fulfillment)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.fulfillment_id).unwrap_or_default(),
            id: command.fulfillment_id,
        })
    }

    /// Cancel before delivery.
    pub async fn cancel(
        &self,
        command: FulfillmentLifecycleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut fulfillment = uow.get::<FulfillmentState>(&command.fulfillment_id).await?;
        check_expected_version(&fulfillment, command.expected_version)?;

        fulfillment.cancel()?;

        uow.save(&mut fulfillment)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.fulfillment_id).unwrap_or_default(),
            id: command.fulfillment_id,
        })
    }
}
