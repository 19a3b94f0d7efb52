//! Errors surfaced by the application services.
//!
//! Store and domain failures are folded into one enum the HTTP layer maps to
//! status codes; lifecycle and tree errors keep their own variants so their
//! machine codes survive the trip.

use serde_json::Value as JsonValue;
use thiserror::Error;

use labinv_core::DomainError;
use labinv_inventory::LifecycleError;
use labinv_locations::TreeError;

use crate::store::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or rejected input. `details` carries per-field context.
    #[error("{message}")]
    BadRequest {
        code: &'static str,
        message: String,
        details: Option<JsonValue>,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Lifecycle(LifecycleError),

    #[error(transparent)]
    Tree(TreeError),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(self, value: JsonValue) -> Self {
        match self {
            Self::BadRequest { code, message, .. } => Self::BadRequest {
                code,
                message,
                details: Some(value),
            },
            other => other,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        let code = value.code();
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::bad_request(code, msg),
            DomainError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Lifecycle(e) => e.into(),
            StoreError::Tree(e) => Self::Tree(e),
            StoreError::Domain(e) => e.into(),
            StoreError::Unexpected(e) => Self::Unexpected(e),
        }
    }
}

impl From<LifecycleError> for ServiceError {
    fn from(value: LifecycleError) -> Self {
        match value {
            LifecycleError::StockNotFound | LifecycleError::RentalNotFound => Self::NotFound(value.to_string()),
            LifecycleError::NotBorrower => Self::Forbidden(value.to_string()),
            other => Self::Lifecycle(other),
        }
    }
}

impl From<TreeError> for ServiceError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

/// Per-item failure text for batch reports.
pub(crate) fn item_message(err: &StoreError) -> String {
    match err {
        StoreError::Lifecycle(e) => e.to_string(),
        StoreError::NotFound(_) => LifecycleError::StockNotFound.to_string(),
        StoreError::Unexpected(e) => {
            tracing::error!(error = %e, "batch item failed");
            "Internal error".to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_keep_their_kind() {
        let err: ServiceError = StoreError::Lifecycle(LifecycleError::NotBorrower).into();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let err: ServiceError = StoreError::Lifecycle(LifecycleError::Overdue).into();
        assert!(matches!(err, ServiceError::Lifecycle(LifecycleError::Overdue)));
        let err: ServiceError = StoreError::Lifecycle(LifecycleError::RentalNotFound).into();
        assert_eq!(err.to_string(), "Rental not found");
    }

    #[test]
    fn details_attach_only_to_bad_requests() {
        let err = ServiceError::bad_request("VALIDATION_FAILED", "Validation failed")
            .with_details(serde_json::json!({"errors": []}));
        assert!(matches!(err, ServiceError::BadRequest { details: Some(_), .. }));
        let err = ServiceError::not_found("x").with_details(serde_json::json!(1));
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
