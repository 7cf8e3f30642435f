//! Variant Handler
//!
//! Command services for variants. Creation validates the option map against
//! the owning product (loaded read-only), reserves the SKU, and appends the
//! variant to the product's ordering child in the same commit.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::product::ProductState;
use crate::aggregate::positions::VariantPositionsState;
use crate::aggregate::slug_reservation::SlugReservationState;
use crate::aggregate::variant::{NewVariant, VariantState};
use crate::aggregate::{ProductStatus, ReservedEntityType, Variant};
use crate::domain::{DomainError, OperationContext};
use crate::error::{AppError, AppResult};
use crate::images::ImageStorage;
use crate::uow::UnitOfWork;

use super::{
    check_expected_version, reserve_slug, AddVariantImageCommand, ArchiveVariantCommand,
    CommandAck, CreateVariantCommand, CreateVariantResult, ReorderVariantsCommand,
    SetVariantInventoryCommand, UpdateVariantPriceCommand,
};

/// Handler for variant commands
pub struct VariantHandler {
    pool: PgPool,
    images: Arc<dyn ImageStorage>,
}

impl VariantHandler {
    pub fn new(pool: PgPool, images: Arc<dyn ImageStorage>) -> Self {
        Self { pool, images }
    }

    /// Create a variant: validates options against the product, reserves the
    /// SKU, and appends to the product's variant ordering, one commit.
    pub async fn create(
        &self,
        command: CreateVariantCommand,
        context: &OperationContext,
    ) -> AppResult<CreateVariantResult> {
        let variant_id = command
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut uow = UnitOfWork::begin(&self.pool, context).await?;

        // The product is read-only here: it guards the caller's view and the
        // option map, but no product event is produced.
        let product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;
        if product.state().status == ProductStatus::Archived {
            return Err(AppError::Domain(DomainError::illegal_transition(
                "archived",
                "variant added",
            )));
        }
        product.validate_variant_options(&command.options)?;

        let mut variant = Variant::create(NewVariant {
            id: variant_id.clone(),
            product_id: command.product_id.clone(),
            sku: command.sku.clone(),
            options: command.options,
            list_price: command.list_price,
            inventory: command.inventory,
        })?;

        let mut reservation = reserve_slug(
            &mut uow,
            &command.sku,
            &variant_id,
            ReservedEntityType::Variant,
        )
        .await?;

        let positions_id = product.state().variant_positions_id.clone();
        let mut positions = uow.get::<VariantPositionsState>(&positions_id).await?;
        positions.add_variant(&variant_id, command.position)?;
        let position = positions.variant_position(&variant_id);

        uow.save(&mut variant)?;
        uow.save(&mut reservation)?;
        uow.save(&mut positions)?;
        let summary = uow.commit().await?;

        Ok(CreateVariantResult {
            sku: command.sku,
            version: summary.version_of(&variant_id).unwrap_or(1),
            position,
            variant_id,
        })
    }

    /// Change the list price.
    pub async fn update_price(
        &self,
        command: UpdateVariantPriceCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut variant = uow.get::<VariantState>(&command.variant_id).await?;
        check_expected_version(&variant, command.expected_version)?;

        variant.update_price(command.list_price)?;

        uow.save(&mut variant)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.variant_id).unwrap_or_default(),
            id: command.variant_id,
        })
    }

    /// Set the absolute inventory level.
    pub async fn set_inventory(
        &self,
        command: SetVariantInventoryCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut variant = uow.get::<VariantState>(&command.variant_id).await?;
        check_expected_version(&variant, command.expected_version)?;

        variant.set_inventory(command.inventory)?;

        uow.save(&mut variant)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.variant_id).unwrap_or_default(),
            id: command.variant_id,
        })
    }

    /// Archive the variant, drop it from the product's ordering and release
    /// its SKU reservation.
    pub async fn archive(
        &self,
        command: ArchiveVariantCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut variant = uow.get::<VariantState>(&command.variant_id).await?;
        check_expected_version(&variant, command.expected_version)?;

        variant.archive()?;

        let product = uow.get::<ProductState>(&variant.state().product_id).await?;
        let positions_id = product.state().variant_positions_id.clone();
        let mut positions = uow.get::<VariantPositionsState>(&positions_id).await?;
        positions.remove_variant(&command.variant_id)?;

        // Free the SKU for reuse; the released reservation stays as history.
        let sku = variant.state().sku.clone();
        let mut sku_reservation = None;
        if let Some(mut reservation) = uow.find::<SlugReservationState>(&sku).await? {
            if reservation.is_active() && reservation.state().entity_id == command.variant_id {
                reservation.release(None)?;
                sku_reservation = Some(reservation);
            }
        }

        uow.save(&mut variant)?;
        uow.save(&mut positions)?;
        if let Some(mut reservation) = sku_reservation {
            uow.save(&mut reservation)?;
        }
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.variant_id).unwrap_or_default(),
            id: command.variant_id,
        })
    }

    /// Attach an already-uploaded image, compensating on a failed commit.
    pub async fn add_image(
        &self,
        command: AddVariantImageCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let image_id = command.image.image_id.clone();

        let result: AppResult<CommandAck> = async {
            let mut uow = UnitOfWork::begin(&self.pool, context).await?;
            let mut variant = uow.get::<VariantState>(&command.variant_id).await?;
            check_expected_version(&variant, command.expected_version)?;

            variant.add_image(command.image.clone())?;

            uow.save(&mut variant)?;
            let summary = uow.commit().await?;

            Ok(CommandAck {
                version: summary.version_of(&command.variant_id).unwrap_or_default(),
                id: command.variant_id.clone(),
            })
        }
        .await;

        if result.is_err() {
            if let Err(e) = self.images.delete_image(&image_id).await {
                tracing::warn!(image_id = %image_id, error = %e, "Image compensation delete failed");
            }
        }
        result
    }

    /// Reorder a product's variants. `expectedVersion` guards the positions
    /// aggregate itself, so reorders commit independently of the product.
    pub async fn reorder(
        &self,
        command: ReorderVariantsCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;

        let product = uow.get::<ProductState>(&command.product_id).await?;
        let positions_id = product.state().variant_positions_id.clone();
        let mut positions = uow.get::<VariantPositionsState>(&positions_id).await?;
        check_expected_version(&positions, command.expected_version)?;

        positions.reorder(command.order)?;

        uow.save(&mut positions)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&positions_id).unwrap_or_default(),
            id: positions_id,
        })
    }
}
