//! Image types and storage adapter
//!
//! Aggregates embed [`Image`] value objects; the transcoding/object-storage
//! pipeline lives outside this service and is reached through the
//! [`ImageStorage`] trait. Uploads happen at the request boundary before the
//! command commits, so services call `delete_image` to compensate when a
//! commit fails after an upload.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rendered sizes produced by the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    Thumbnail,
    Small,
    Medium,
    Large,
    Original,
}

/// Encodings produced by the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Original,
    Webp,
    Avif,
}

/// size -> format -> URL
pub type ImageUrlMap = BTreeMap<ImageSize, BTreeMap<ImageFormat, String>>;

/// Image value object embedded in product/variant/collection snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image_id: String,
    pub urls: ImageUrlMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// Result of an upload through the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub image_id: String,
    pub urls: ImageUrlMap,
}

/// Errors surfaced by the storage adapter
#[derive(Debug, thiserror::Error)]
pub enum ImageStorageError {
    #[error("Image storage is not configured")]
    Unconfigured,

    #[error("Image storage error: {0}")]
    Storage(String),
}

/// Adapter to the external image pipeline.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Register transcoded binary formats under `image_id` and return the
    /// resulting URL map.
    async fn upload_image(
        &self,
        formats: Vec<(ImageSize, ImageFormat, Vec<u8>)>,
        image_id: &str,
        extension: &str,
    ) -> Result<UploadedImage, ImageStorageError>;

    /// Remove all renditions of `image_id`.
    async fn delete_image(&self, image_id: &str) -> Result<(), ImageStorageError>;
}

/// Placeholder adapter used when storage credentials are absent. Commands
/// that only reference already-uploaded URLs still work; upload attempts and
/// compensating deletes are rejected/ignored with a warning.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredImageStorage;

#[async_trait]
impl ImageStorage for UnconfiguredImageStorage {
    async fn upload_image(
        &self,
        _formats: Vec<(ImageSize, ImageFormat, Vec<u8>)>,
        _image_id: &str,
        _extension: &str,
    ) -> Result<UploadedImage, ImageStorageError> {
        Err(ImageStorageError::Unconfigured)
    }

    async fn delete_image(&self, image_id: &str) -> Result<(), ImageStorageError> {
        tracing::warn!(image_id, "Image storage unconfigured; skipping delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_urls() -> ImageUrlMap {
        let mut formats = BTreeMap::new();
        formats.insert(ImageFormat::Webp, "https://cdn.test/img-1/medium.webp".to_string());
        let mut urls = BTreeMap::new();
        urls.insert(ImageSize::Medium, formats);
        urls
    }

    #[test]
    fn test_image_serialization_uses_camel_case() {
        let image = Image {
            image_id: "img-1".to_string(),
            urls: sample_urls(),
            alt_text: Some("Front view".to_string()),
        };

        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["imageId"], "img-1");
        assert_eq!(json["altText"], "Front view");
        assert_eq!(json["urls"]["medium"]["webp"], "https://cdn.test/img-1/medium.webp");
    }

    #[test]
    fn test_image_round_trip() {
        let image = Image {
            image_id: "img-2".to_string(),
            urls: sample_urls(),
            alt_text: None,
        };

        let json = serde_json::to_value(&image).unwrap();
        let back: Image = serde_json::from_value(json).unwrap();
        assert_eq!(back, image);
    }

    #[tokio::test]
    async fn test_unconfigured_storage() {
        let storage = UnconfiguredImageStorage;
        let err = storage.upload_image(vec![], "img-1", "png").await;
        assert!(matches!(err, Err(ImageStorageError::Unconfigured)));

        // Deletes are best-effort no-ops
        assert!(storage.delete_image("img-1").await.is_ok());
    }
}
