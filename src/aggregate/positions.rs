//! Position Aggregates
//!
//! Ordered-membership children: `VariantPositions` keeps the display order of
//! a product's variants, `CollectionProductPositions` the order of a
//! collection's products. Both are created and archived together with their
//! parent but live as independent aggregates so a reorder commits against its
//! own version epoch without touching the parent.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::DomainError;

use super::{Aggregate, AggregateState};

/// Insert `id` at `position`, clamping to the list bounds. `None` appends.
fn insert_at(list: &mut Vec<String>, id: String, position: Option<usize>) {
    let idx = position.unwrap_or(list.len()).min(list.len());
    list.insert(idx, id);
}

/// Whether `requested` is a permutation of `current`.
fn is_permutation(current: &[String], requested: &[String]) -> bool {
    if current.len() != requested.len() {
        return false;
    }
    let mut a: Vec<&str> = current.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = requested.iter().map(String::as_str).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

// =========================================================================
// Variant positions within a product
// =========================================================================

/// Snapshot state for a product's variant ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantPositionsState {
    pub product_id: String,
    pub variant_ids: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

impl AggregateState for VariantPositionsState {
    fn aggregate_type(&self) -> &'static str {
        "variantPositionsWithinProduct"
    }
}

pub type VariantPositions = Aggregate<VariantPositionsState>;

impl Aggregate<VariantPositionsState> {
    /// Create the (empty) ordering child for a product.
    pub fn create(id: String, product_id: String) -> Result<Self, DomainError> {
        let state = VariantPositionsState {
            product_id,
            variant_ids: Vec::new(),
            archived: false,
        };
        Self::genesis(id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.state.archived {
            return Err(DomainError::illegal_transition("archived", "mutated"));
        }
        Ok(())
    }

    /// Insert a variant. Out-of-range positions clamp to the ends; a missing
    /// position appends.
    pub fn add_variant(
        &mut self,
        variant_id: &str,
        position: Option<usize>,
    ) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if self.state.variant_ids.iter().any(|v| v == variant_id) {
            return Err(DomainError::DuplicateEntry(variant_id.to_string()));
        }

        let prior = json!({ "variantIds": self.state.variant_ids });
        insert_at(&mut self.state.variant_ids, variant_id.to_string(), position);
        self.record(
            "variant_added",
            prior,
            json!({ "variantIds": self.state.variant_ids }),
        );
        Ok(())
    }

    /// Remove a variant.
    pub fn remove_variant(&mut self, variant_id: &str) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        let Some(idx) = self.state.variant_ids.iter().position(|v| v == variant_id) else {
            return Err(DomainError::UnknownEntry(variant_id.to_string()));
        };

        let prior = json!({ "variantIds": self.state.variant_ids });
        self.state.variant_ids.remove(idx);
        self.record(
            "variant_removed",
            prior,
            json!({ "variantIds": self.state.variant_ids }),
        );
        Ok(())
    }

    /// Replace the order. The new order must contain exactly the current ids.
    pub fn reorder(&mut self, new_order: Vec<String>) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if !is_permutation(&self.state.variant_ids, &new_order) {
            return Err(DomainError::Validation(
                "new order must contain exactly the current variant ids".to_string(),
            ));
        }

        let prior = json!({ "variantIds": self.state.variant_ids });
        self.state.variant_ids = new_order;
        self.record(
            "reordered",
            prior,
            json!({ "variantIds": self.state.variant_ids }),
        );
        Ok(())
    }

    /// Archive together with the parent product. Clears the list.
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.state.archived {
            return Err(DomainError::illegal_transition("archived", "archived"));
        }

        let prior = json!({ "variantIds": self.state.variant_ids, "archived": false });
        self.state.variant_ids.clear();
        self.state.archived = true;
        self.record(
            "archived",
            prior,
            json!({ "variantIds": self.state.variant_ids, "archived": true }),
        );
        Ok(())
    }

    /// Index of the variant, or -1 when absent.
    pub fn variant_position(&self, variant_id: &str) -> i64 {
        self.state
            .variant_ids
            .iter()
            .position(|v| v == variant_id)
            .map(|i| i as i64)
            .unwrap_or(-1)
    }
}

// =========================================================================
// Product positions within a collection
// =========================================================================

/// Snapshot state for a collection's product ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionProductPositionsState {
    pub collection_id: String,
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

impl AggregateState for CollectionProductPositionsState {
    fn aggregate_type(&self) -> &'static str {
        "collectionProductPositions"
    }
}

pub type CollectionProductPositions = Aggregate<CollectionProductPositionsState>;

impl Aggregate<CollectionProductPositionsState> {
    /// Create the (empty) ordering child for a collection.
    pub fn create(id: String, collection_id: String) -> Result<Self, DomainError> {
        let state = CollectionProductPositionsState {
            collection_id,
            product_ids: Vec::new(),
            archived: false,
        };
        Self::genesis(id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.state.archived {
            return Err(DomainError::illegal_transition("archived", "mutated"));
        }
        Ok(())
    }

    /// Insert a product. Out-of-range positions clamp to the ends.
    pub fn add_product(
        &mut self,
        product_id: &str,
        position: Option<usize>,
    ) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if self.state.product_ids.iter().any(|p| p == product_id) {
            return Err(DomainError::DuplicateEntry(product_id.to_string()));
        }

        let prior = json!({ "productIds": self.state.product_ids });
        insert_at(&mut self.state.product_ids, product_id.to_string(), position);
        self.record(
            "product_added",
            prior,
            json!({ "productIds": self.state.product_ids }),
        );
        Ok(())
    }

    /// Remove a product.
    pub fn remove_product(&mut self, product_id: &str) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        let Some(idx) = self.state.product_ids.iter().position(|p| p == product_id) else {
            return Err(DomainError::UnknownEntry(product_id.to_string()));
        };

        let prior = json!({ "productIds": self.state.product_ids });
        self.state.product_ids.remove(idx);
        self.record(
            "product_removed",
            prior,
            json!({ "productIds": self.state.product_ids }),
        );
        Ok(())
    }

    /// Replace the order. The new order must contain exactly the current ids.
    pub fn reorder(&mut self, new_order: Vec<String>) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if !is_permutation(&self.state.product_ids, &new_order) {
            return Err(DomainError::Validation(
                "new order must contain exactly the current product ids".to_string(),
            ));
        }

        let prior = json!({ "productIds": self.state.product_ids });
        self.state.product_ids = new_order;
        self.record(
            "reordered",
            prior,
            json!({ "productIds": self.state.product_ids }),
        );
        Ok(())
    }

    /// Archive together with the parent collection. Clears the list.
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.state.archived {
            return Err(DomainError::illegal_transition("archived", "archived"));
        }

        let prior = json!({ "productIds": self.state.product_ids, "archived": false });
        self.state.product_ids.clear();
        self.state.archived = true;
        self.record(
            "archived",
            prior,
            json!({ "productIds": self.state.product_ids, "archived": true }),
        );
        Ok(())
    }

    /// Index of the product, or -1 when absent.
    pub fn product_position(&self, product_id: &str) -> i64 {
        self.state
            .product_ids
            .iter()
            .position(|p| p == product_id)
            .map(|i| i as i64)
            .unwrap_or(-1)
    }
}
