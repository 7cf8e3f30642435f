//! Schedule Handler
//!
//! Deferred-drop scheduling for dropship products and schedule lifecycle
//! commands. Scheduling a drop mutates the product into its transitional
//! pending-drop status and creates the schedule aggregate in the same
//! commit; the scheduler ticker later executes the recorded command.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::product::ProductState;
use crate::aggregate::schedule::{NewSchedule, ScheduleState};
use crate::aggregate::{Product, Schedule};
use crate::domain::OperationContext;
use crate::error::AppResult;
use crate::uow::UnitOfWork;

use super::{
    check_expected_version, CancelScheduleCommand, CommandAck, PublishDropshipProductCommand,
    ScheduleDropCommand, ScheduleDropResult,
};

/// The command type a drop schedule executes when due
pub const PUBLISH_DROPSHIP_COMMAND: &str = "publishDropshipProduct";

/// Handler for schedule commands
pub struct ScheduleHandler {
    pool: PgPool,
}

impl ScheduleHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Schedule a visible drop: the product becomes `visible_pending_drop`
    /// and a pending schedule targets its deferred publish.
    pub async fn schedule_visible_drop(
        &self,
        command: ScheduleDropCommand,
        context: &OperationContext,
    ) -> AppResult<ScheduleDropResult> {
        self.schedule_drop(command, context, true).await
    }

    /// Schedule a hidden drop: as above with `hidden_pending_drop`.
    pub async fn schedule_hidden_drop(
        &self,
        command: ScheduleDropCommand,
        context: &OperationContext,
    ) -> AppResult<ScheduleDropResult> {
        self.schedule_drop(command, context, false).await
    }

    async fn schedule_drop(
        &self,
        command: ScheduleDropCommand,
        context: &OperationContext,
        visible: bool,
    ) -> AppResult<ScheduleDropResult> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product: Product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        if visible {
            product.schedule_visible_drop()?;
        } else {
            product.schedule_hidden_drop()?;
        }

        let schedule_id = Uuid::new_v4().to_string();
        let mut schedule = Schedule::create(NewSchedule {
            id: schedule_id.clone(),
            target_aggregate_id: command.product_id.clone(),
            target_aggregate_type: product.aggregate_type().to_string(),
            command_type: PUBLISH_DROPSHIP_COMMAND.to_string(),
            command_data: json!({ "productId": command.product_id }),
            scheduled_for: command.scheduled_for,
        })?;

        uow.save(&mut product)?;
        uow.save(&mut schedule)?;
        let summary = uow.commit().await?;

        Ok(ScheduleDropResult {
            schedule_id,
            product_version: summary.version_of(&command.product_id).unwrap_or_default(),
            product_id: command.product_id,
            scheduled_for: command.scheduled_for,
        })
    }

    /// Complete a pending drop: the product goes active. Invoked by the
    /// scheduler when the drop time arrives (without an expected version),
    /// or manually from the admin UI (with one).
    pub async fn publish_dropship_product(
        &self,
        command: PublishDropshipProductCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product: Product = uow.get::<ProductState>(&command.product_id).await?;
        if let Some(expected) = command.expected_version {
            check_expected_version(&product, expected)?;
        }

        product.publish_drop()?;

        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Cancel a pending schedule. When the schedule guarded a pending drop,
    /// the product returns to draft in the same commit.
    pub async fn cancel(
        &self,
        command: CancelScheduleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut schedule = uow.get::<ScheduleState>(&command.schedule_id).await?;
        check_expected_version(&schedule, command.expected_version)?;

        schedule.cancel()?;

        if schedule.state().command_type == PUBLISH_DROPSHIP_COMMAND {
            let target = schedule.state().target_aggregate_id.clone();
            if let Some(mut product) = uow.find::<ProductState>(&target).await? {
                if product.state().status.is_pending_drop() {
                    product.cancel_drop()?;
                    uow.save(&mut product)?;
                }
            }
        }

        uow.save(&mut schedule)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.schedule_id).unwrap_or_default(),
            id: command.schedule_id,
        })
    }
}
