//! Error types for Trustline.
//!
//! Library crates use [`TrustlineError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Trustline operations.
#[derive(Debug, thiserror::Error)]
pub enum TrustlineError {
    /// Missing or invalid configuration (e.g. an external credential).
    #[error("config error: {message}")]
    Config { message: String },

    /// Unknown tenant, recommendation, product, customer or campaign.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Safety gate refused to publish a draft that still carries markers.
    #[error("needs verification: {}", markers.join(", "))]
    NeedsVerification { markers: Vec<String> },

    /// An external call (LLM, publish target) failed or timed out.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The trust policy does not allow the requested action in the current zone.
    #[error("blocked by trust policy: {action} is not allowed in zone {zone}")]
    PolicyBlocked { zone: String, action: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error (bad input, invalid state transition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrustlineError>;

impl TrustlineError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code, used in API results and receipts.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::NotFound { entity, .. } => match *entity {
                "product" => "product_not_found",
                "customer" => "customer_not_found",
                _ => "not_found",
            },
            Self::NeedsVerification { .. } => "needs_verification",
            Self::Upstream(_) => "upstream_error",
            Self::PolicyBlocked { .. } => "policy_blocked",
            Self::Storage(_) => "storage_error",
            Self::Validation { .. } => "validation_error",
            Self::Io { .. } => "io_error",
        }
    }

    /// HTTP-style status class for surfacing the error to callers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config { .. } | Self::NeedsVerification { .. } | Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::PolicyBlocked { .. } => 409,
            Self::Upstream(_) => 502,
            Self::Storage(_) | Self::Io { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TrustlineError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = TrustlineError::NeedsVerification {
            markers: vec!["returns window".into(), "shipping time".into()],
        };
        assert_eq!(
            err.to_string(),
            "needs verification: returns window, shipping time"
        );
    }

    #[test]
    fn not_found_codes_by_entity() {
        assert_eq!(
            TrustlineError::not_found("product", "tee").code(),
            "product_not_found"
        );
        assert_eq!(
            TrustlineError::not_found("customer", "a@b.c").code(),
            "customer_not_found"
        );
        assert_eq!(TrustlineError::not_found("tenant", "x").code(), "not_found");
        assert_eq!(TrustlineError::not_found("tenant", "x").status_code(), 404);
    }

    #[test]
    fn policy_block_explains_zone() {
        let err = TrustlineError::PolicyBlocked {
            zone: "UNSAFE".into(),
            action: "CAMPAIGN_DRY_RUN".into(),
        };
        assert!(err.to_string().contains("UNSAFE"));
        assert_eq!(err.code(), "policy_blocked");
    }
}
