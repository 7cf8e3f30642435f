//! Domain Error Types
//!
//! Pure domain errors raised by aggregate methods. They are independent of
//! the web/infrastructure layer and carry the stable error kind used for
//! response envelopes.

use thiserror::Error;

/// Domain-specific errors
///
/// These represent business rule violations and domain invariant failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or missing input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Illegal status transition
    #[error("Illegal transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },

    /// Variant option not declared on the product, or value not in the
    /// product's value list
    #[error("Option {name}={value} is not valid for this product")]
    OptionNotValid { name: String, value: String },

    /// Slug does not match the allowed format
    #[error("Invalid slug format: {0}")]
    InvalidSlug(String),

    /// Slug or SKU already owned by an active reservation
    #[error("Slug \"{0}\" is already in use")]
    SlugInUse(String),

    /// Entry already present in an ordered list
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Entry not present in an ordered list
    #[error("Unknown entry: {0}")]
    UnknownEntry(String),
}

impl DomainError {
    /// Stable machine-readable kind for the response envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_)
            | Self::IllegalTransition { .. }
            | Self::OptionNotValid { .. }
            | Self::InvalidSlug(_) => "validation_failed",
            Self::SlugInUse(_) | Self::DuplicateEntry(_) | Self::UnknownEntry(_) => {
                "constraint_violated"
            }
        }
    }

    /// Helper for illegal transition errors
    pub fn illegal_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::IllegalTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}
