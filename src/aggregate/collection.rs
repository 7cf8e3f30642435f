//! Collection Aggregate
//!
//! Curated grouping of products. Membership order lives in the owned
//! `CollectionProductPositions` child referenced by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{validate_slug, DomainError};
use crate::images::Image;

use super::{Aggregate, AggregateState};

/// Collection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Draft,
    Active,
    Archived,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

/// Collection snapshot state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionState {
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: CollectionStatus,
    pub metadata: super::ProductMetadata,
    pub images: Vec<Image>,
    pub products_positions_id: String,
    pub created_at: DateTime<Utc>,
}

impl AggregateState for CollectionState {
    fn aggregate_type(&self) -> &'static str {
        "collection"
    }
}

/// Parameters for creating a collection
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub metadata: super::ProductMetadata,
    pub products_positions_id: String,
}

/// Fields a details update may change
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<super::ProductMetadata>,
}

pub type Collection = Aggregate<CollectionState>;

impl Aggregate<CollectionState> {
    /// Create a new collection in draft status.
    pub fn create(params: NewCollection) -> Result<Self, DomainError> {
        if params.name.trim().is_empty() {
            return Err(DomainError::Validation(
                "collection name is required".to_string(),
            ));
        }
        validate_slug(&params.slug)?;

        let state = CollectionState {
            name: params.name,
            slug: params.slug,
            description: params.description,
            status: CollectionStatus::Draft,
            metadata: params.metadata,
            images: Vec::new(),
            products_positions_id: params.products_positions_id,
            created_at: Utc::now(),
        };

        Self::genesis(params.id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.state.status == CollectionStatus::Archived {
            return Err(DomainError::illegal_transition("archived", "mutated"));
        }
        Ok(())
    }

    /// Update name, description or metadata.
    pub fn update_details(&mut self, changes: CollectionChanges) -> Result<(), DomainError> {
        self.ensure_not_archived()?;

        let mut prior = serde_json::Map::new();
        let mut new = serde_json::Map::new();

        if let Some(name) = changes.name {
            if name.trim().is_empty() {
                return Err(DomainError::Validation(
                    "collection name is required".to_string(),
                ));
            }
            prior.insert("name".to_string(), json!(self.state.name));
            new.insert("name".to_string(), json!(name));
            self.state.name = name;
        }
        if let Some(description) = changes.description {
            prior.insert("description".to_string(), json!(self.state.description));
            new.insert("description".to_string(), json!(description));
            self.state.description = Some(description);
        }
        if let Some(metadata) = changes.metadata {
            prior.insert("metadata".to_string(), json!(self.state.metadata));
            new.insert("metadata".to_string(), json!(metadata));
            self.state.metadata = metadata;
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

    /// Publish a draft collection.
    pub fn publish(&mut self) -> Result<(), DomainError> {
        if self.state.status != CollectionStatus::Draft {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "active",
            ));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = CollectionStatus::Active;
        self.record("published", prior, json!({ "status": self.state.status }));
        Ok(())
    }

    /// Archive the collection. Terminal.
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.state.status == CollectionStatus::Archived {
            return Err(DomainError::illegal_transition("archived", "archived"));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = CollectionStatus::Archived;
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
}
