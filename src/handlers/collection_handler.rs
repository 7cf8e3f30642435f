//! Collection Handler
//!
//! Command services for collections and their product membership. Membership
//! mutations touch both the collection's positions child and the product's
//! collection links in one commit.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::collection::{CollectionState, NewCollection};
use crate::aggregate::positions::CollectionProductPositionsState;
use crate::aggregate::product::ProductState;
use crate::aggregate::slug_reservation::SlugReservationState;
use crate::aggregate::{Collection, CollectionProductPositions, ProductStatus, ReservedEntityType};
use crate::domain::{DomainError, OperationContext};
use crate::error::{AppError, AppResult};
use crate::images::ImageStorage;
use crate::uow::UnitOfWork;

use super::{
    check_expected_version, reserve_slug, AddCollectionImageCommand, CollectionLifecycleCommand,
    CollectionMembershipCommand, CommandAck, CreateCollectionCommand, CreateCollectionResult,
    ReorderCollectionProductsCommand, UpdateCollectionDetailsCommand, UpdateCollectionSlugCommand,
};

/// Handler for collection commands
pub struct CollectionHandler {
    pool: PgPool,
    images: Arc<dyn ImageStorage>,
}

impl CollectionHandler {
    pub fn new(pool: PgPool, images: Arc<dyn ImageStorage>) -> Self {
        Self { pool, images }
    }

    /// Create a collection with its positions child and slug reservation.
    pub async fn create(
        &self,
        command: CreateCollectionCommand,
        context: &OperationContext,
    ) -> AppResult<CreateCollectionResult> {
        let collection_id = command
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let positions_id = Uuid::new_v4().to_string();

        let mut uow = UnitOfWork::begin(&self.pool, context).await?;

        if uow.find::<CollectionState>(&collection_id).await?.is_some() {
            return Err(AppError::Constraint(format!(
                "collection {} already exists",
                collection_id
            )));
        }

        let mut collection = Collection::create(NewCollection {
            id: collection_id.clone(),
            name: command.name,
            slug: command.slug.clone(),
            description: command.description,
            metadata: command.metadata,
            products_positions_id: positions_id.clone(),
        })?;

        let mut reservation = reserve_slug(
            &mut uow,
            &command.slug,
            &collection_id,
            ReservedEntityType::Collection,
        )
        .await?;
        let mut positions =
            CollectionProductPositions::create(positions_id.clone(), collection_id.clone())?;

        uow.save(&mut collection)?;
        uow.save(&mut positions)?;
        uow.save(&mut reservation)?;
        let summary = uow.commit().await?;

        Ok(CreateCollectionResult {
            slug: command.slug,
            version: summary.version_of(&collection_id).unwrap_or(1),
            collection_id,
            products_positions_id: positions_id,
        })
    }

    /// Update name, description or metadata.
    pub async fn update_details(
        &self,
        command: UpdateCollectionDetailsCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut collection = uow.get::<CollectionState>(&command.collection_id).await?;
        check_expected_version(&collection, command.expected_version)?;

        collection.update_details(command.changes)?;

        uow.save(&mut collection)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.collection_id).unwrap_or_default(),
            id: command.collection_id,
        })
    }

    /// Rename the collection's slug with the reservation chain.
    pub async fn update_slug(
        &self,
        command: UpdateCollectionSlugCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut collection = uow.get::<CollectionState>(&command.collection_id).await?;
        check_expected_version(&collection, command.expected_version)?;

        let old_slug = collection.state().slug.clone();
        collection.change_slug(command.new_slug.clone())?;

        let mut old_reservation = uow.get::<SlugReservationState>(&old_slug).await?;
        old_reservation.release(Some(command.new_slug.clone()))?;

        let mut new_reservation = reserve_slug(
            &mut uow,
            &command.new_slug,
            &command.collection_id,
            ReservedEntityType::Collection,
        )
        .await?;

        uow.save(&mut collection)?;
        uow.save(&mut old_reservation)?;
        uow.save(&mut new_reservation)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.collection_id).unwrap_or_default(),
            id: command.collection_id,
        })
    }

    /// Publish a draft collection.
    pub async fn publish(
        &self,
        command: CollectionLifecycleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut collection = uow.get::<CollectionState>(&command.collection_id).await?;
        check_expected_version(&collection, command.expected_version)?;

        collection.publish()?;

        uow.save(&mut collection)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.collection_id).unwrap_or_default(),
            id: command.collection_id,
        })
    }

    /// Archive the collection and its positions child together.
    pub async fn archive(
        &self,
        command: CollectionLifecycleCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let mut collection = uow.get::<CollectionState>(&command.collection_id).await?;
        check_expected_version(&collection, command.expected_version)?;

        collection.archive()?;

        let positions_id = collection.state().products_positions_id.clone();
        let mut positions = uow
            .get::<CollectionProductPositionsState>(&positions_id)
            .await?;
        positions.archive()?;

        uow.save(&mut collection)?;
        uow.save(&mut positions)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&command.collection_id).unwrap_or_default(),
            id: command.collection_id,
        })
    }

    /// Attach an already-uploaded image, compensating on a failed commit.
    pub async fn add_image(
        &self,
        command: AddCollectionImageCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let image_id = command.image.image_id.clone();

        let result: AppResult<CommandAck> = async {
            let mut uow = UnitOfWork::begin(&self.pool, context).await?;
            let mut collection = uow.get::<CollectionState>(&command.collection_id).await?;
            check_expected_version(&collection, command.expected_version)?;

            collection.add_image(command.image.clone())?;

            uow.save(&mut collection)?;
            let summary = uow.commit().await?;

            Ok(CommandAck {
                version: summary.version_of(&command.collection_id).unwrap_or_default(),
                id: command.collection_id.clone(),
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

    /// Add a product to the collection's ordering and link it back on the
    /// product, one commit.
    pub async fn add_product(
        &self,
        command: CollectionMembershipCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let collection = uow.get::<CollectionState>(&command.collection_id).await?;
        check_expected_version(&collection, command.expected_version)?;

        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        if product.state().status == ProductStatus::Archived {
            return Err(AppError::Domain(DomainError::illegal_transition(
                "archived",
                "added to collection",
            )));
        }

        let positions_id = collection.state().products_positions_id.clone();
        let mut positions = uow
            .get::<CollectionProductPositionsState>(&positions_id)
            .await?;
        positions.add_product(&command.product_id, command.position)?;
        product.link_collection(&command.collection_id)?;

        uow.save(&mut positions)?;
        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&positions_id).unwrap_or_default(),
            id: command.collection_id,
        })
    }

    /// Remove a product from the collection's ordering and unlink it.
    pub async fn remove_product(
        &self,
        command: CollectionMembershipCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;
        let collection = uow.get::<CollectionState>(&command.collection_id).await?;
        check_expected_version(&collection, command.expected_version)?;

        let positions_id = collection.state().products_positions_id.clone();
        let mut positions = uow
            .get::<CollectionProductPositionsState>(&positions_id)
            .await?;
        positions.remove_product(&command.product_id)?;

        let mut product = uow.get::<ProductState>(&command.product_id).await?;
        product.unlink_collection(&command.collection_id)?;

        uow.save(&mut positions)?;
        uow.save(&mut product)?;
        let summary = uow.commit().await?;

        Ok(CommandAck {
            version: summary.version_of(&positions_id).unwrap_or_default(),
            id: command.collection_id,
        })
    }

    /// Reorder the collection's products. `expectedVersion` guards the
    /// positions aggregate, so reorders commit independently.
    pub async fn reorder_products(
        &self,
        command: ReorderCollectionProductsCommand,
        context: &OperationContext,
    ) -> AppResult<CommandAck> {
        let mut uow = UnitOfWork::begin(&self.pool, context).await?;

        let collection = uow.get::<CollectionState>(&command.collection_id).await?;
        let positions_id = collection.state().products_positions_id.clone();
        let mut positions = uow
            .get::<CollectionProductPositionsState>(&positions_id)
            .await?;
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
