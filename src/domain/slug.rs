//! Slug validation
//!
//! URI slugs double as slug-reservation aggregate ids, so the format is
//! validated at every entry point before an aggregate is touched.

use super::DomainError;

const MAX_SLUG_LENGTH: usize = 200;

/// Validate a URI slug.
///
/// Allowed: lowercase ASCII letters, digits and single hyphens between
/// segments. No leading/trailing hyphen, no consecutive hyphens.
pub fn validate_slug(slug: &str) -> Result<(), DomainError> {
    if slug.is_empty() {
        return Err(DomainError::InvalidSlug("slug must not be empty".to_string()));
    }
    if slug.len() > MAX_SLUG_LENGTH {
        return Err(DomainError::InvalidSlug(format!(
            "slug exceeds {} characters",
            MAX_SLUG_LENGTH
        )));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(DomainError::InvalidSlug(
            "slug must not start or end with a hyphen".to_string(),
        ));
    }
    if slug.contains("--") {
        return Err(DomainError::InvalidSlug(
            "slug must not contain consecutive hyphens".to_string(),
        ));
    }
    if let Some(bad) = slug
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(DomainError::InvalidSlug(format!(
            "slug contains invalid character '{}'",
            bad
        )));
    }
    Ok(())
}

/// Validate a SKU. SKUs share the reservation namespace with slugs but allow
/// uppercase letters and underscores as commonly used by vendors.
pub fn validate_sku(sku: &str) -> Result<(), DomainError> {
    if sku.is_empty() {
        return Err(DomainError::InvalidSlug("sku must not be empty".to_string()));
    }
    if sku.len() > MAX_SLUG_LENGTH {
        return Err(DomainError::InvalidSlug(format!(
            "sku exceeds {} characters",
            MAX_SLUG_LENGTH
        )));
    }
    if let Some(bad) = sku
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(DomainError::InvalidSlug(format!(
            "sku contains invalid character '{}'",
            bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slugs() {
        assert!(validate_slug("t-shirt").is_ok());
        assert!(validate_slug("summer-2025").is_ok());
        assert!(validate_slug("a").is_ok());
    }

    #[test]
    fn test_empty_slug() {
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn test_uppercase_rejected() {
        assert!(validate_slug("T-Shirt").is_err());
    }

    #[test]
    fn test_hyphen_placement() {
        assert!(validate_slug("-t-shirt").is_err());
        assert!(validate_slug("t-shirt-").is_err());
        assert!(validate_slug("t--shirt").is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate_slug("t shirt").is_err());
        assert!(validate_slug("t_shirt").is_err());
        assert!(validate_slug("café").is_err());
    }

    #[test]
    fn test_too_long() {
        let slug = "a".repeat(MAX_SLUG_LENGTH + 1);
        assert!(validate_slug(&slug).is_err());
    }

    #[test]
    fn test_valid_skus() {
        assert!(validate_sku("SKU-1").is_ok());
        assert!(validate_sku("ab_42").is_ok());
        assert!(validate_sku("").is_err());
        assert!(validate_sku("SKU 1").is_err());
    }
}
