//! Product Aggregate
//!
//! Catalogue product, including the dropship specialization. Dropship
//! products share the state shape but report `dropshipProduct` as their
//! aggregate type and gain the transitional pending-drop statuses that a
//! scheduled publish clears.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::domain::{validate_slug, DomainError};
use crate::images::Image;

use super::{Aggregate, AggregateState};

/// Product lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
    /// Dropship product hidden from the storefront until the drop fires
    HiddenPendingDrop,
    /// Dropship product visible but locked until the drop fires
    VisiblePendingDrop,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
            Self::HiddenPendingDrop => "hidden_pending_drop",
            Self::VisiblePendingDrop => "visible_pending_drop",
        }
    }

    pub fn is_pending_drop(&self) -> bool {
        matches!(self, Self::HiddenPendingDrop | Self::VisiblePendingDrop)
    }
}

/// How orders for this product are fulfilled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    Digital,
    Dropship,
}

/// Named option axis with its allowed values (e.g. Size: S/M/L)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantOption {
    pub name: String,
    pub values: Vec<String>,
}

/// SEO metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tax treatment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxInfo {
    pub taxable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
}

/// Supplier details carried only by dropship products
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropshipInfo {
    pub supplier_cost: Decimal,
    pub supplier_sku: String,
    pub fulfillment_provider_id: String,
}

/// Product snapshot state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductState {
    pub name: String,
    pub slug: String,
    pub status: ProductStatus,
    pub collections: Vec<String>,
    pub variant_options: Vec<VariantOption>,
    pub metadata: ProductMetadata,
    pub tags: Vec<String>,
    pub images: Vec<Image>,
    pub fulfillment_type: FulfillmentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropship: Option<DropshipInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropship_safety_buffer: Option<i32>,
    pub variant_positions_id: String,
    pub tax: TaxInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AggregateState for ProductState {
    fn aggregate_type(&self) -> &'static str {
        match self.fulfillment_type {
            FulfillmentType::Digital => "product",
            FulfillmentType::Dropship => "dropshipProduct",
        }
    }
}

/// Parameters for creating a product
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub collections: Vec<String>,
    pub variant_options: Vec<VariantOption>,
    pub metadata: ProductMetadata,
    pub tags: Vec<String>,
    pub fulfillment_type: FulfillmentType,
    pub dropship: Option<DropshipInfo>,
    pub dropship_safety_buffer: Option<i32>,
    pub variant_positions_id: String,
    pub tax: TaxInfo,
    pub vendor: Option<String>,
}

/// Fields a details update may change
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<ProductMetadata>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub tax: Option<TaxInfo>,
}

pub type Product = Aggregate<ProductState>;

impl Aggregate<ProductState> {
    /// Create a new product in draft status, producing the genesis event.
    pub fn create(params: NewProduct) -> Result<Self, DomainError> {
        if params.name.trim().is_empty() {
            return Err(DomainError::Validation("product name is required".to_string()));
        }
        validate_slug(&params.slug)?;
        validate_option_definitions(&params.variant_options)?;
        if params.fulfillment_type == FulfillmentType::Dropship && params.dropship.is_none() {
            return Err(DomainError::Validation(
                "dropship products require supplier details".to_string(),
            ));
        }
        if params.fulfillment_type == FulfillmentType::Digital && params.dropship.is_some() {
            return Err(DomainError::Validation(
                "supplier details are only valid for dropship products".to_string(),
            ));
        }

        let state = ProductState {
            name: params.name,
            slug: params.slug,
            status: ProductStatus::Draft,
            collections: params.collections,
            variant_options: params.variant_options,
            metadata: params.metadata,
            tags: params.tags,
            images: Vec::new(),
            fulfillment_type: params.fulfillment_type,
            dropship: params.dropship,
            dropship_safety_buffer: params.dropship_safety_buffer,
            variant_positions_id: params.variant_positions_id,
            tax: params.tax,
            vendor: params.vendor,
            published_at: None,
            created_at: Utc::now(),
        };

        Self::genesis(params.id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.state.status == ProductStatus::Archived {
            return Err(DomainError::illegal_transition("archived", "mutated"));
        }
        Ok(())
    }

    /// Update name, metadata, tags, vendor or tax info.
    pub fn update_details(&mut self, changes: ProductChanges) -> Result<(), DomainError> {
        self.ensure_not_archived()?;

        let mut prior = serde_json::Map::new();
        let mut new = serde_json::Map::new();

        if let Some(name) = changes.name {
            if name.trim().is_empty() {
                return Err(DomainError::Validation("product name is required".to_string()));
            }
            prior.insert("name".to_string(), json!(self.state.name));
            new.insert("name".to_string(), json!(name));
            self.state.name = name;
        }
        if let Some(metadata) = changes.metadata {
            prior.insert("metadata".to_string(), json!(self.state.metadata));
            new.insert("metadata".to_string(), json!(metadata));
            self.state.metadata = metadata;
        }
        if let Some(tags) = changes.tags {
            prior.insert("tags".to_string(), json!(self.state.tags));
            new.insert("tags".to_string(), json!(tags));
            self.state.tags = tags;
        }
        if let Some(vendor) = changes.vendor {
            prior.insert("vendor".to_string(), json!(self.state.vendor));
            new.insert("vendor".to_string(), json!(vendor));
            self.state.vendor = Some(vendor);
        }
        if let Some(tax) = changes.tax {
            prior.insert("tax".to_string(), json!(self.state.tax));
            new.insert("tax".to_string(), json!(tax));
            self.state.tax = tax;
        }

        if new.is_empty() {
            return Err(DomainError::Validation("no fields to update".to_string()));
        }

        self.record("updated", prior.into(), new.into());
        Ok(())
    }

    /// Change the slug. Reservation bookkeeping is the service's concern.
    pub fn change_slug(&mut self, new_slug: String) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        validate_slug(&new_slug)?;
        if new_slug == self.state.slug {
            return Err(DomainError::Validation("slug is unchanged".to_string()));
        }

        let prior = json!({ "slug": self.state.slug });
        self.state.slug = new_slug;
        self.record("slug_changed", prior, json!({ "slug": self.state.slug }));
        Ok(())
    }

    /// Replace the variant option axes.
    pub fn set_variant_options(&mut self, options: Vec<VariantOption>) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        validate_option_definitions(&options)?;

        let prior = json!({ "variantOptions": self.state.variant_options });
        self.state.variant_options = options;
        self.record(
            "variant_options_set",
            prior,
            json!({ "variantOptions": self.state.variant_options }),
        );
        Ok(())
    }

    /// Publish a draft product.
    pub fn publish(&mut self) -> Result<(), DomainError> {
        if self.state.status != ProductStatus::Draft {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "active",
            ));
        }

        let prior = json!({ "status": self.state.status, "publishedAt": self.state.published_at });
        self.state.status = ProductStatus::Active;
        self.state.published_at = Some(Utc::now());
        self.record(
            "published",
            prior,
            json!({ "status": self.state.status, "publishedAt": self.state.published_at }),
        );
        Ok(())
    }

    /// Archive the product. Terminal.
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.state.status == ProductStatus::Archived {
            return Err(DomainError::illegal_transition("archived", "archived"));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = ProductStatus::Archived;
        self.record("archived", prior, json!({ "status": self.state.status }));
        Ok(())
    }

    /// Append an image.
    pub fn add_image(&mut self, image: Image) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if self.state.images.iter().any(|i| i.image_id == image.image_id) {
            return Err(DomainError::DuplicateEntry(image.image_id));
        }

        let prior = json!({ "images": self.state.images });
        self.state.images.push(image);
        self.record("image_added", prior, json!({ "images": self.state.images }));
        Ok(())
    }

    /// Remove an image by id.
    pub fn remove_image(&mut self, image_id: &str) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        let Some(idx) = self.state.images.iter().position(|i| i.image_id == image_id) else {
            return Err(DomainError::UnknownEntry(image_id.to_string()));
        };

        let prior = json!({ "images": self.state.images });
        self.state.images.remove(idx);
        self.record("image_removed", prior, json!({ "images": self.state.images }));
        Ok(())
    }

    /// Reorder images. The new order must be a permutation of the current ids.
    pub fn reorder_images(&mut self, image_ids: Vec<String>) -> Result<(), DomainError> {
        self.ensure_not_archived()?;

        let mut current: Vec<&str> = self.state.images.iter().map(|i| i.image_id.as_str()).collect();
        let mut requested: Vec<&str> = image_ids.iter().map(String::as_str).collect();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(DomainError::Validation(
                "image order must be a permutation of the current images".to_string(),
            ));
        }

        let prior = json!({ "images": self.state.images });
        let mut remaining = std::mem::take(&mut self.state.images);
        let mut reordered = Vec::with_capacity(image_ids.len());
        for id in &image_ids {
            if let Some(idx) = remaining.iter().position(|i| &i.image_id == id) {
                reordered.push(remaining.remove(idx));
            }
        }
        self.state.images = reordered;
        self.record("images_reordered", prior, json!({ "images": self.state.images }));
        Ok(())
    }

    /// Link the product to a collection.
    pub fn link_collection(&mut self, collection_id: &str) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if self.state.collections.iter().any(|c| c == collection_id) {
            return Err(DomainError::DuplicateEntry(collection_id.to_string()));
        }

        let prior = json!({ "collections": self.state.collections });
        self.state.collections.push(collection_id.to_string());
        self.record(
            "collection_linked",
            prior,
            json!({ "collections": self.state.collections }),
        );
        Ok(())
    }

    /// Unlink the product from a collection.
    pub fn unlink_collection(&mut self, collection_id: &str) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        let Some(idx) = self.state.collections.iter().position(|c| c == collection_id) else {
            return Err(DomainError::UnknownEntry(collection_id.to_string()));
        };

        let prior = json!({ "collections": self.state.collections });
        self.state.collections.remove(idx);
        self.record(
            "collection_unlinked",
            prior,
            json!({ "collections": self.state.collections }),
        );
        Ok(())
    }

    /// Move a draft dropship product into the visible pending-drop state.
    pub fn schedule_visible_drop(&mut self) -> Result<(), DomainError> {
        self.schedule_drop(ProductStatus::VisiblePendingDrop, "visible_drop_scheduled")
    }

    /// Move a draft dropship product into the hidden pending-drop state.
    pub fn schedule_hidden_drop(&mut self) -> Result<(), DomainError> {
        self.schedule_drop(ProductStatus::HiddenPendingDrop, "hidden_drop_scheduled")
    }

    fn schedule_drop(&mut self, target: ProductStatus, verb: &str) -> Result<(), DomainError> {
        if self.state.fulfillment_type != FulfillmentType::Dropship {
            return Err(DomainError::Validation(
                "drops can only be scheduled for dropship products".to_string(),
            ));
        }
        if self.state.status != ProductStatus::Draft {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                target.as_str(),
            ));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = target;
        self.record(verb, prior, json!({ "status": self.state.status }));
        Ok(())
    }

    /// Complete a scheduled drop: pending-drop becomes active.
    pub fn publish_drop(&mut self) -> Result<(), DomainError> {
        if !self.state.status.is_pending_drop() {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "active",
            ));
        }

        let prior = json!({ "status": self.state.status, "publishedAt": self.state.published_at });
        self.state.status = ProductStatus::Active;
        self.state.published_at = Some(Utc::now());
        self.record(
            "published",
            prior,
            json!({ "status": self.state.status, "publishedAt": self.state.published_at }),
        );
        Ok(())
    }

    /// Return a pending-drop product to draft when its schedule is cancelled.
    pub fn cancel_drop(&mut self) -> Result<(), DomainError> {
        if !self.state.status.is_pending_drop() {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "draft",
            ));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = ProductStatus::Draft;
        self.record("drop_cancelled", prior, json!({ "status": self.state.status }));
        Ok(())
    }

    /// Validate a variant's option map against this product's declared axes.
    /// Keys must be a subset of the axis names and each value must appear in
    /// the axis value list.
    pub fn validate_variant_options(
        &self,
        options: &BTreeMap<String, String>,
    ) -> Result<(), DomainError> {
        for (name, value) in options {
            let Some(axis) = self.state.variant_options.iter().find(|o| &o.name == name) else {
                return Err(DomainError::OptionNotValid {
                    name: name.clone(),
                    value: value.clone(),
                });
            };
            if !axis.values.iter().any(|v| v == value) {
                return Err(DomainError::OptionNotValid {
                    name: name.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

fn validate_option_definitions(options: &[VariantOption]) -> Result<(), DomainError> {
    let mut seen = std::collections::BTreeSet::new();
    for option in options {
        if option.name.trim().is_empty() {
            return Err(DomainError::Validation("option name is required".to_string()));
        }
        if !seen.insert(option.name.as_str()) {
            return Err(DomainError::Validation(format!(
                "duplicate option name '{}'",
                option.name
            )));
        }
        if option.values.is_empty() {
            return Err(DomainError::Validation(format!(
                "option '{}' has no values",
                option.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn digital_params() -> NewProduct {
        NewProduct {
            id: "prod-1".to_string(),
            name: "Shirt".to_string(),
            slug: "t-shirt".to_string(),
            collections: vec!["col-1".to_string()],
            variant_options: vec![VariantOption {
                name: "Size".to_string(),
                values: vec!["S".to_string(), "M".to_string()],
            }],
            metadata: ProductMetadata::default(),
            tags: vec![],
            fulfillment_type: FulfillmentType::Digital,
            dropship: None,
            dropship_safety_buffer: None,
            variant_positions_id: "pos-1".to_string(),
            tax: TaxInfo::default(),
            vendor: None,
        }
    }

    fn dropship_params() -> NewProduct {
        let mut params = digital_params();
        params.id = "prod-2".to_string();
        params.slug = "drop-shirt".to_string();
        params.fulfillment_type = FulfillmentType::Dropship;
        params.dropship = Some(DropshipInfo {
            supplier_cost: dec!(7.50),
            supplier_sku: "SUP-1".to_string(),
            fulfillment_provider_id: "provider-1".to_string(),
        });
        params.dropship_safety_buffer = Some(5);
        params
    }

    #[test]
    fn test_create_product() {
        let product = Product::create(digital_params()).unwrap();

        assert_eq!(product.id(), "prod-1");
        assert_eq!(product.version(), 1);
        assert_eq!(product.state().status, ProductStatus::Draft);
        assert_eq!(product.aggregate_type(), "product");

        let event = &product.uncommitted()[0];
        assert_eq!(event.event_name, "product.created");
        assert_eq!(event.version, 0);
        assert_eq!(event.new_state["status"], "draft");
    }

    #[test]
    fn test_dropship_event_name_prefix() {
        let product = Product::create(dropship_params()).unwrap();

        assert_eq!(product.aggregate_type(), "dropshipProduct");
        assert_eq!(product.uncommitted()[0].event_name, "dropshipProduct.created");
    }

    #[test]
    fn test_create_rejects_bad_slug() {
        let mut params = digital_params();
        params.slug = "T Shirt".to_string();
        assert!(matches!(
            Product::create(params),
            Err(DomainError::InvalidSlug(_))
        ));
    }

    #[test]
    fn test_create_dropship_requires_supplier() {
        let mut params = digital_params();
        params.fulfillment_type = FulfillmentType::Dropship;
        assert!(Product::create(params).is_err());
    }

    #[test]
    fn test_publish_transitions() {
        let mut product = Product::create(digital_params()).unwrap();

        product.publish().unwrap();
        assert_eq!(product.state().status, ProductStatus::Active);
        assert!(product.state().published_at.is_some());

        // Already active
        assert!(product.publish().is_err());
    }

    #[test]
    fn test_publish_event_delta() {
        let mut product = Product::create(digital_params()).unwrap();
        product.publish().unwrap();

        let event = &product.uncommitted()[1];
        assert_eq!(event.event_name, "product.published");
        assert_eq!(event.prior_state["status"], "draft");
        assert_eq!(event.prior_state["publishedAt"], serde_json::Value::Null);
        assert_eq!(event.new_state["status"], "active");
        assert!(!event.new_state["publishedAt"].is_null());
    }

    #[test]
    fn test_archive_is_terminal() {
        let mut product = Product::create(digital_params()).unwrap();
        product.archive().unwrap();

        assert!(product.archive().is_err());
        assert!(product.publish().is_err());
        assert!(product
            .update_details(ProductChanges {
                name: Some("New".to_string()),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn test_update_details_records_delta() {
        let mut product = Product::create(digital_params()).unwrap();
        product
            .update_details(ProductChanges {
                name: Some("Better Shirt".to_string()),
                tags: Some(vec!["summer".to_string()]),
                ..Default::default()
            })
            .unwrap();

        let event = &product.uncommitted()[1];
        assert_eq!(event.event_name, "product.updated");
        assert_eq!(event.prior_state["name"], "Shirt");
        assert_eq!(event.new_state["name"], "Better Shirt");
        assert_eq!(event.new_state["tags"][0], "summer");
        // Untouched fields are not part of the delta
        assert!(event.new_state.get("vendor").is_none());
    }

    #[test]
    fn test_update_details_requires_changes() {
        let mut product = Product::create(digital_params()).unwrap();
        assert!(product.update_details(ProductChanges::default()).is_err());
    }

    #[test]
    fn test_change_slug() {
        let mut product = Product::create(digital_params()).unwrap();
        product.change_slug("tee".to_string()).unwrap();

        assert_eq!(product.state().slug, "tee");
        let event = &product.uncommitted()[1];
        assert_eq!(event.event_name, "product.slug_changed");
        assert_eq!(event.prior_state["slug"], "t-shirt");
        assert_eq!(event.new_state["slug"], "tee");

        // Unchanged slug is rejected
        assert!(product.change_slug("tee".to_string()).is_err());
    }

    #[test]
    fn test_image_management() {
        let mut product = Product::create(digital_params()).unwrap();
        let image = Image {
            image_id: "img-1".to_string(),
            urls: Default::default(),
            alt_text: None,
        };

        product.add_image(image.clone()).unwrap();
        assert!(matches!(
            product.add_image(image),
            Err(DomainError::DuplicateEntry(_))
        ));

        assert!(matches!(
            product.remove_image("img-404"),
            Err(DomainError::UnknownEntry(_))
        ));
        product.remove_image("img-1").unwrap();
        assert!(product.state().images.is_empty());
    }

    #[test]
    fn test_reorder_images_requires_permutation() {
        let mut product = Product::create(digital_params()).unwrap();
        for id in ["img-1", "img-2"] {
            product
                .add_image(Image {
                    image_id: id.to_string(),
                    urls: Default::default(),
                    alt_text: None,
                })
                .unwrap();
        }

        assert!(product
            .reorder_images(vec!["img-2".to_string(), "img-404".to_string()])
            .is_err());
        assert!(product.reorder_images(vec!["img-2".to_string()]).is_err());

        product
            .reorder_images(vec!["img-2".to_string(), "img-1".to_string()])
            .unwrap();
        assert_eq!(product.state().images[0].image_id, "img-2");
    }

    #[test]
    fn test_variant_option_validation() {
        let product = Product::create(digital_params()).unwrap();

        let mut valid = BTreeMap::new();
        valid.insert("Size".to_string(), "M".to_string());
        assert!(product.validate_variant_options(&valid).is_ok());

        let mut bad_value = BTreeMap::new();
        bad_value.insert("Size".to_string(), "XL".to_string());
        assert!(matches!(
            product.validate_variant_options(&bad_value),
            Err(DomainError::OptionNotValid { .. })
        ));

        let mut bad_key = BTreeMap::new();
        bad_key.insert("Color".to_string(), "Red".to_string());
        assert!(product.validate_variant_options(&bad_key).is_err());

        // Subset of declared axes is fine
        assert!(product.validate_variant_options(&BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_schedule_drop_lifecycle() {
        let mut product = Product::create(dropship_params()).unwrap();

        product.schedule_visible_drop().unwrap();
        assert_eq!(product.state().status, ProductStatus::VisiblePendingDrop);
        assert_eq!(
            product.uncommitted()[1].event_name,
            "dropshipProduct.visible_drop_scheduled"
        );

        // Cannot schedule twice
        assert!(product.schedule_hidden_drop().is_err());

        product.publish_drop().unwrap();
        assert_eq!(product.state().status, ProductStatus::Active);
        assert!(product.state().published_at.is_some());
    }

    #[test]
    fn test_schedule_drop_rejects_digital() {
        let mut product = Product::create(digital_params()).unwrap();
        assert!(product.schedule_visible_drop().is_err());
    }

    #[test]
    fn test_cancel_drop_returns_to_draft() {
        let mut product = Product::create(dropship_params()).unwrap();
        product.schedule_hidden_drop().unwrap();
        product.cancel_drop().unwrap();

        assert_eq!(product.state().status, ProductStatus::Draft);
        // Not in a pending state anymore
        assert!(product.cancel_drop().is_err());
    }

    #[test]
    fn test_collection_links() {
        let mut product = Product::create(digital_params()).unwrap();

        assert!(matches!(
            product.link_collection("col-1"),
            Err(DomainError::DuplicateEntry(_))
        ));
        product.link_collection("col-2").unwrap();
        product.unlink_collection("col-1").unwrap();
        assert_eq!(product.state().collections, vec!["col-2".to_string()]);
        assert!(product.unlink_collection("col-404").is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut product = Product::create(dropship_params()).unwrap();
        product.schedule_visible_drop().unwrap();

        let snapshot = product.to_snapshot().unwrap();
        let reloaded: Product =
            Aggregate::from_snapshot("prod-2".to_string(), product.version(), snapshot).unwrap();

        assert_eq!(reloaded.to_snapshot().unwrap(), product.to_snapshot().unwrap());
        assert_eq!(reloaded.aggregate_type(), "dropshipProduct");
    }
}
