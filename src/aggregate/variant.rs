//! Variant Aggregate
//!
//! A purchasable variant of a product. The option map is validated against
//! the owning product's declared axes by the command service; this aggregate
//! only enforces its own invariants (SKU shape, non-negative price and
//! inventory, terminal archive).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::domain::{validate_sku, DomainError};
use crate::images::Image;

use super::{Aggregate, AggregateState};

/// Variant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    Active,
    Archived,
}

impl VariantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

/// Variant snapshot state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantState {
    pub product_id: String,
    pub sku: String,
    pub options: BTreeMap<String, String>,
    pub list_price: Decimal,
    pub inventory: i64,
    pub status: VariantStatus,
    pub images: Vec<Image>,
    pub created_at: DateTime<Utc>,
}

impl AggregateState for VariantState {
    fn aggregate_type(&self) -> &'static str {
        "variant"
    }
}

/// Parameters for creating a variant
#[derive(Debug, Clone)]
pub struct NewVariant {
    pub id: String,
    pub product_id: String,
    pub sku: String,
    pub options: BTreeMap<String, String>,
    pub list_price: Decimal,
    pub inventory: i64,
}

pub type Variant = Aggregate<VariantState>;

impl Aggregate<VariantState> {
    /// Create a new variant, producing the genesis event.
    pub fn create(params: NewVariant) -> Result<Self, DomainError> {
        validate_sku(&params.sku)?;
        if params.list_price < Decimal::ZERO {
            return Err(DomainError::Validation(
                "list price must not be negative".to_string(),
            ));
        }
        if params.inventory < 0 {
            return Err(DomainError::Validation(
                "inventory must not be negative".to_string(),
            ));
        }

        let state = VariantState {
            product_id: params.product_id,
            sku: params.sku,
            options: params.options,
            list_price: params.list_price,
            inventory: params.inventory,
            status: VariantStatus::Active,
            images: Vec::new(),
            created_at: Utc::now(),
        };

        Self::genesis(params.id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.state.status == VariantStatus::Archived {
            return Err(DomainError::illegal_transition("archived", "mutated"));
        }
        Ok(())
    }

    /// Change the list price.
    pub fn update_price(&mut self, list_price: Decimal) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if list_price < Decimal::ZERO {
            return Err(DomainError::Validation(
                "list price must not be negative".to_string(),
            ));
        }

        let prior = json!({ "listPrice": self.state.list_price });
        self.state.list_price = list_price;
        self.record("price_updated", prior, json!({ "listPrice": self.state.list_price }));
        Ok(())
    }

    /// Set the absolute inventory level. Zero is permitted.
    pub fn set_inventory(&mut self, inventory: i64) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if inventory < 0 {
            return Err(DomainError::Validation(
                "inventory must not be negative".to_string(),
            ));
        }

        let prior = json!({ "inventory": self.state.inventory });
        self.state.inventory = inventory;
        self.record("inventory_set", prior, json!({ "inventory": self.state.inventory }));
        Ok(())
    }

    /// Archive the variant. Terminal.
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.state.status == VariantStatus::Archived {
            return Err(DomainError::illegal_transition("archived", "archived"));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = VariantStatus::Archived;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> NewVariant {
        let mut options = BTreeMap::new();
        options.insert("Size".to_string(), "M".to_string());
        NewVariant {
            id: "var-1".to_string(),
            product_id: "prod-1".to_string(),
            sku: "SKU-1".to_string(),
            options,
            list_price: dec!(19.99),
            inventory: 10,
        }
    }

    #[test]
    fn test_create_variant() {
        let variant = Variant::create(params()).unwrap();

        assert_eq!(variant.id(), "var-1");
        assert_eq!(variant.version(), 1);
        assert_eq!(variant.state().status, VariantStatus::Active);

        let event = &variant.uncommitted()[0];
        assert_eq!(event.event_name, "variant.created");
        assert_eq!(event.new_state["sku"], "SKU-1");
        assert_eq!(event.new_state["options"]["Size"], "M");
    }

    #[test]
    fn test_create_rejects_bad_inputs() {
        let mut bad_sku = params();
        bad_sku.sku = "SKU 1".to_string();
        assert!(Variant::create(bad_sku).is_err());

        let mut negative_price = params();
        negative_price.list_price = dec!(-1);
        assert!(Variant::create(negative_price).is_err());

        let mut negative_inventory = params();
        negative_inventory.inventory = -1;
        assert!(Variant::create(negative_inventory).is_err());
    }

    #[test]
    fn test_inventory_boundaries() {
        let mut variant = Variant::create(params()).unwrap();

        // Zero is permitted
        variant.set_inventory(0).unwrap();
        assert_eq!(variant.state().inventory, 0);

        // Negative is not
        assert!(variant.set_inventory(-1).is_err());
    }

    #[test]
    fn test_inventory_event_delta() {
        let mut variant = Variant::create(params()).unwrap();
        variant.set_inventory(3).unwrap();

        let event = &variant.uncommitted()[1];
        assert_eq!(event.event_name, "variant.inventory_set");
        assert_eq!(event.prior_state["inventory"], 10);
        assert_eq!(event.new_state["inventory"], 3);
    }

    #[test]
    fn test_price_update() {
        let mut variant = Variant::create(params()).unwrap();
        variant.update_price(dec!(24.99)).unwrap();

        assert_eq!(variant.state().list_price, dec!(24.99));
        assert!(variant.update_price(dec!(-5)).is_err());
    }

    #[test]
    fn test_archive_is_terminal() {
        let mut variant = Variant::create(params()).unwrap();
        variant.archive().unwrap();

        assert!(variant.archive().is_err());
        assert!(variant.set_inventory(5).is_err());
        assert!(variant.update_price(dec!(1)).is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut variant = Variant::create(params()).unwrap();
        variant.set_inventory(7).unwrap();

        let snapshot = variant.to_snapshot().unwrap();
        let reloaded: Variant =
            Aggregate::from_snapshot("var-1".to_string(), variant.version(), snapshot).unwrap();

        assert_eq!(reloaded.to_snapshot().unwrap(), variant.to_snapshot().unwrap());
        assert_eq!(reloaded.state().inventory, 7);
    }
}
