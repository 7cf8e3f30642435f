//! Command definitions
//!
//! Commands represent intentions to change the system state. The dispatcher
//! maps ingress `type` strings onto handler invocations; the scheduler uses
//! the same registry to execute deferred commands.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::aggregate::product::{DropshipInfo, ProductChanges, ProductMetadata, TaxInfo};
use crate::aggregate::collection::CollectionChanges;
use crate::aggregate::{FulfillmentLine, FulfillmentType, VariantOption};
use crate::api::AppState;
use crate::domain::OperationContext;
use crate::error::{AppError, AppResult};
use crate::images::Image;

use super::{
    CollectionHandler, FulfillmentHandler, ProductHandler, ScheduleHandler, VariantHandler,
};

// =========================================================================
// Product commands
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductCommand {
    /// Client-generated id; a fresh UUID is assigned when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub variant_options: Vec<VariantOption>,
    #[serde(default)]
    pub metadata: ProductMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
    pub fulfillment_type: FulfillmentType,
    #[serde(default)]
    pub dropship: Option<DropshipInfo>,
    #[serde(default)]
    pub dropship_safety_buffer: Option<i32>,
    #[serde(default)]
    pub tax: TaxInfo,
    #[serde(default)]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductResult {
    pub product_id: String,
    pub slug: String,
    pub version: i64,
    pub variant_positions_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductDetailsCommand {
    pub product_id: String,
    pub expected_version: i64,
    #[serde(flatten)]
    pub changes: ProductChanges,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductSlugCommand {
    pub product_id: String,
    pub new_slug: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLifecycleCommand {
    pub product_id: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetProductVariantOptionsCommand {
    pub product_id: String,
    pub variant_options: Vec<VariantOption>,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProductImageCommand {
    pub product_id: String,
    pub image: Image,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveProductImageCommand {
    pub product_id: String,
    pub image_id: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderProductImagesCommand {
    pub product_id: String,
    pub image_ids: Vec<String>,
    pub expected_version: i64,
}

// =========================================================================
// Variant commands
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVariantCommand {
    #[serde(default)]
    pub id: Option<String>,
    pub product_id: String,
    pub sku: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub list_price: Decimal,
    pub inventory: i64,
    /// Insertion position within the product's variant ordering
    #[serde(default)]
    pub position: Option<usize>,
    /// Version of the product aggregate the caller saw
    pub expected_version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVariantResult {
    pub variant_id: String,
    pub sku: String,
    pub version: i64,
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVariantPriceCommand {
    pub variant_id: String,
    pub list_price: Decimal,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariantInventoryCommand {
    pub variant_id: String,
    pub inventory: i64,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveVariantCommand {
    pub variant_id: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVariantImageCommand {
    pub variant_id: String,
    pub image: Image,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderVariantsCommand {
    pub product_id: String,
    pub order: Vec<String>,
    /// Version of the positions aggregate the caller saw
    pub expected_version: i64,
}

// =========================================================================
// Collection commands
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionCommand {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: ProductMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionResult {
    pub collection_id: String,
    pub slug: String,
    pub version: i64,
    pub products_positions_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollectionDetailsCommand {
    pub collection_id: String,
    pub expected_version: i64,
    #[serde(flatten)]
    pub changes: CollectionChanges,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollectionSlugCommand {
    pub collection_id: String,
    pub new_slug: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionLifecycleCommand {
    pub collection_id: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollectionImageCommand {
    pub collection_id: String,
    pub image: Image,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMembershipCommand {
    pub collection_id: String,
    pub product_id: String,
    #[serde(default)]
    pub position: Option<usize>,
    /// Version of the collection aggregate the caller saw
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderCollectionProductsCommand {
    pub collection_id: String,
    pub order: Vec<String>,
    /// Version of the positions aggregate the caller saw
    pub expected_version: i64,
}

// =========================================================================
// Schedule commands
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDropCommand {
    pub product_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDropResult {
    pub schedule_id: String,
    pub product_id: String,
    pub product_version: i64,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishDropshipProductCommand {
    pub product_id: String,
    /// Absent when invoked by the scheduler, which cannot know the version
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelScheduleCommand {
    pub schedule_id: String,
    pub expected_version: i64,
}

// =========================================================================
// Fulfillment commands
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFulfillmentCommand {
    #[serde(default)]
    pub id: Option<String>,
    pub order_id: String,
    pub items: Vec<FulfillmentLine>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipFulfillmentCommand {
    pub fulfillment_id: String,
    pub tracking_number: String,
    pub carrier: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentLifecycleCommand {
    pub fulfillment_id: String,
    pub expected_version: i64,
}

// =========================================================================
// Shared result for plain mutations
// =========================================================================

/// `{id, version}` acknowledgement for commands that mutate one aggregate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub id: String,
    pub version: i64,
}

// =========================================================================
// Dispatch
// =========================================================================

fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> AppResult<T> {
    serde_json::from_value(payload).map_err(|e| AppError::Validation(format!("invalid payload: {}", e)))
}

fn encode<T: Serialize>(value: T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(AppError::from)
}

/// Execute a command by its ingress `type` string. Used by the command
/// endpoint and by the scheduler for deferred commands.
pub async fn dispatch_command(
    state: &AppState,
    context: &OperationContext,
    kind: &str,
    payload: Value,
) -> AppResult<Value> {
    let pool = state.pool.clone();

    match kind {
        // Products
        "createProduct" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.create(parse(payload)?, context).await?)
        }
        "createDropshipProduct" => {
            let command: CreateProductCommand = parse(payload)?;
            if command.fulfillment_type != FulfillmentType::Dropship {
                return Err(AppError::Validation(
                    "createDropshipProduct requires fulfillmentType=dropship".to_string(),
                ));
            }
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.create(command, context).await?)
        }
        "updateProductDetails" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.update_details(parse(payload)?, context).await?)
        }
        "updateProductSlug" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.update_slug(parse(payload)?, context).await?)
        }
        "publishProduct" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.publish(parse(payload)?, context).await?)
        }
        "archiveProduct" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.archive(parse(payload)?, context).await?)
        }
        "setProductVariantOptions" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.set_variant_options(parse(payload)?, context).await?)
        }
        "addProductImage" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.add_image(parse(payload)?, context).await?)
        }
        "removeProductImage" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.remove_image(parse(payload)?, context).await?)
        }
        "reorderProductImages" => {
            let handler = ProductHandler::new(pool, state.images.clone());
            encode(handler.reorder_images(parse(payload)?, context).await?)
        }

        // Variants
        "createVariant" => {
            let handler = VariantHandler::new(pool, state.images.clone());
            encode(handler.create(parse(payload)?, context).await?)
        }
        "updateVariantPrice" => {
            let handler = VariantHandler::new(pool, state.images.clone());
            encode(handler.update_price(parse(payload)?, context).await?)
        }
        "setVariantInventory" => {
            let handler = VariantHandler::new(pool, state.images.clone());
            encode(handler.set_inventory(parse(payload)?, context).await?)
        }
        "archiveVariant" => {
            let handler = VariantHandler::new(pool, state.images.clone());
            encode(handler.archive(parse(payload)?, context).await?)
        }
        "addVariantImage" => {
            let handler = VariantHandler::new(pool, state.images.clone());
            encode(handler.add_image(parse(payload)?, context).await?)
        }
        "reorderVariants" => {
            let handler = VariantHandler::new(pool, state.images.clone());
            encode(handler.reorder(parse(payload)?, context).await?)
        }

        // Collections
        "createCollection" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.create(parse(payload)?, context).await?)
        }
        "updateCollectionDetails" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.update_details(parse(payload)?, context).await?)
        }
        "updateCollectionSlug" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.update_slug(parse(payload)?, context).await?)
        }
        "publishCollection" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.publish(parse(payload)?, context).await?)
        }
        "archiveCollection" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.archive(parse(payload)?, context).await?)
        }
        "addCollectionImage" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.add_image(parse(payload)?, context).await?)
        }
        "addProductToCollection" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.add_product(parse(payload)?, context).await?)
        }
        "removeProductFromCollection" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.remove_product(parse(payload)?, context).await?)
        }
        "reorderCollectionProducts" => {
            let handler = CollectionHandler::new(pool, state.images.clone());
            encode(handler.reorder_products(parse(payload)?, context).await?)
        }

        // Schedules / drops
        "scheduleVisibleDrop" => {
            let handler = ScheduleHandler::new(pool);
            encode(handler.schedule_visible_drop(parse(payload)?, context).await?)
        }
        "scheduleHiddenDrop" => {
            let handler = ScheduleHandler::new(pool);
            encode(handler.schedule_hidden_drop(parse(payload)?, context).await?)
        }
        "publishDropshipProduct" => {
            let handler = ScheduleHandler::new(pool);
            encode(handler.publish_dropship_product(parse(payload)?, context).await?)
        }
        "cancelSchedule" => {
            let handler = ScheduleHandler::new(pool);
            encode(handler.cancel(parse(payload)?, context).await?)
        }

        // Fulfillments
        "createFulfillment" => {
            let handler = FulfillmentHandler::new(pool);
            encode(handler.create(parse(payload)?, context).await?)
        }
        "shipFulfillment" => {
            let handler = FulfillmentHandler::new(pool);
            encode(handler.ship(parse(payload)?, context).await?)
        }
        "deliverFulfillment" => {
            let handler = FulfillmentHandler::new(pool);
            encode(handler.deliver(parse(payload)?, context).await?)
        }
        "cancelFulfillment" => {
            let handler = FulfillmentHandler::new(pool);
            encode(handler.cancel(parse(payload)?, context).await?)
        }

        other => Err(AppError::Validation(format!("unknown command type: {}", other))),
    }
}
