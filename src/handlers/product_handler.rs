//! Product Handler
//!
//! Command services for the product aggregate, including the cross-aggregate
//! creation flow (product + positions child + slug reservation in one
//! commit) and the slug rename chain.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::product::{NewProduct, ProductState};
use crate::aggregate::slug_reservation::SlugReservationState;
use crate::aggregate::positions::VariantPositionsState;
use crate::aggregate::{FulfillmentType, Product, ReservedEntityType, VariantPositions};
use crate::domain::OperationContext;
use crate::error::{AppError, AppResult};
use crate::images::ImageStorage;
use crate::uow::UnitOfWork;

use super::{
    check_expected_version, reserve_slug, AddProductImageCommand, CommandAck,
    CreateProductCommand, CreateProductResult, ProductLifecycleCommand,
    RemoveProductImageCommand, ReorderProductImagesCommand, SetProductVariantOptionsCommand,
    UpdateProductDetailsCommand, UpdateProductSlugCommand,
};

/// Handler for product commands
pub struct ProductHandler {
    pool: PgPool,
    images: Arc<dyn ImageStorage>,
}

impl ProductHandler {
    pub fn new(pool: PgPool, images: Arc<dyn ImageStorage>) -> Self {
        Self { pool, images }
    }

    fn reservation_type(product: &Product) -> ReservedEntityType {
        match product.state().fulfillment_type {
            FulfillmentType::Digital => ReservedEntityType::Product,
            FulfillmentType::Dropship => ReservedEntityType::DropshipProduct,
        }
    }

    /// Create a product together with its variant-positions child and slug
    /// reservation, all in one commit.
    pub async fn create(
        &self,
        command: CreateProductCommand,
        context: &OperationContext,
    ) -> AppResult<CreateProductResult> {
        let product_id = command
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let positions_id = Uuid::new_v4().to_string();

        let mut uow = UnitOfWork::begin(&self.pool, context).await?;

        if uow.find::<ProductState>(&product_id).await?.is_some() {
            return Err(AppError::Constraint(format!(
                "product {} already exists",
                product_id
            )));
        }

        let mut product = Product::create(NewProduct {
            id: product_id.clone(),
            name: command.name,
            slug: command.slug.clone(),
            collections: command.collections,
            variant_options: command.variant_options,
            metadata: command.metadata,
            tags: command.tags,
            fulfillment_type: command.fulfillment_type,
            dropship: command.dropship,
            dropship_safety_buffer: command.dropship_safety_buffer,
            variant_positions_id: positions_id.clone(),
            tax: command.tax,
            vendor: command.vendor,
        })?;

        let mut reservation = reserve_slug(
            &mut uow,
            &command.slug,
            &product_id,
            Self::reservation_type(&product),
        )
        .await?;
        let mut positions = VariantPositions::create(positions_id.clone(), product_id.clone())?;

        uow.save(&mut product)?;
        uow.save(&mut positions)?;
        uow.save(&mut reservation)?;
        let summary = uow.commit().await?;

        Ok(CreateProductResult {
            slug: command.slug,
            version: summary.version_of(&product_id).unwrap_or(1),
            product_id,
            variant_positions_id: positions_id,
        })
    }

    /// Update name, metadata, tags, vendor or tax info.
    pub async fn update_details(
        &self,
        command: UpdateProductDetailsCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        product.update_details(command.changes)?;

        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Rename the product's slug: the old reservation is released with a
    /// forwarding pointer, the new slug is reserved, and the product is
    /// mutated, all in one transaction.
    pub async fn update_slug(
        &self,
        command: UpdateProductSlugCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        let old_slug = product.state().slug.clone();
        product.change_slug(command.new_slug.clone())?;

        let mut old_reservation = uow.get::<SlugReservationState>(&old_slug).await?;
        old_reservation.release(Some(command.new_slug.clone()))?;

        let mut new_reservation = reserve_slug(
            &mut uow,
            &command.new_slug,
            &command.product_id,
            Self::reservation_type(&product),
        )
        .await?;

        uow.save(&mut product)?;
        uow.save(&mut old_reservation)?;
        uow.save(&mut new_reservation)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Publish a draft product.
    pub async fn publish(
        &self,
        command: ProductLifecycleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        product.publish()?;

        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Archive the product and its positions child together.
    pub async fn archive(
        &self,
        command: ProductLifecycleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        product.archive()?;

        let positions_id = product.state().variant_positions_id.clone();
        let mut positions = uow.get::<VariantPositionsState>(&positions_id).await?;
        positions.archive()?;

        uow.save(&mut product)?;
        uow.save(&mut positions)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Replace the variant option axes.
    pub async fn set_variant_options(
        &self,
        command: SetProductVariantOptionsCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        product.set_variant_options(command.variant_options)?;

        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Attach an already-uploaded image. A failed commit compensates by
    /// deleting the orphaned upload.
    pub async fn add_image(
        &self,
        command: AddProductImageCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let image_id = command.image.image_id.clone();

        let result: AppResult<CommandAck> = async {
            let mut uow = UnitOfWork::begin(&self.pool, context).await?;
            let mut product = uow.get::<ProductState>(&command.product_id).await?;
            check_expected_version(&product, command.expected_version)?;

            product.add_image(command.image.clone())?;

            uow.save(&mut product)?;
            let summary = uow.commit().await?;

            Ok(CommandAck {
                version: summary.version_of(&command.product_id).unwrap_or_default(),
                id: command.product_id.clone(),
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

    /// Detach an image and delete its renditions.
    pub async fn remove_image(
        &self,
        command: RemoveProductImageCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        product.remove_image(&command.image_id)?;

        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        // Storage cleanup happens after the commit; a failure here leaves an
        // unreferenced object, never a dangling reference.
        if let Err(e) = self.images.delete_image(&command.image_id).await {
            tracing::warn!(image_id = %command.image_id, error = %e, "Image delete failed");
        }

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }

    /// Reorder the product's images.
    pub async fn reorder_images(
        &self,
        command: ReorderProductImagesCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        check_expected_version(&product, command.expected_version)?;

        product.reorder_images(command.image_ids)?;

        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.product_id).unwrap_or_default(),
            id: command.product_id,
        })
    }
}
