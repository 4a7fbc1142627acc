use libris_db::{InventoryError, StoreError};
use libris_http::AppError;
use libris_kernel::DeadlineExceeded;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("operation did not finish before its deadline")]
    DeadlineExceeded,
}

impl CatalogError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl From<DeadlineExceeded> for CatalogError {
    fn from(_: DeadlineExceeded) -> Self {
        CatalogError::DeadlineExceeded
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        match err {
            CatalogError::Invalid { field, message } => AppError::validation(
                vec![json!({ "field": field, "error": message })],
                "validation failed",
            ),
            CatalogError::Storage(StoreError::NotFound { .. })
            | CatalogError::Inventory(InventoryError::NotFound(_)) => AppError::not_found(message),
            CatalogError::Storage(StoreError::Conflict(_)) => {
                AppError::conflict(Vec::new(), message)
            }
            CatalogError::Storage(StoreError::Unavailable(_)) => AppError::unavailable(message),
            CatalogError::Inventory(InventoryError::CopiesOnLoan { on_loan, .. }) => {
                AppError::Conflict {
                    details: vec![json!({ "copies_on_loan": on_loan })],
                    code: "copies_on_loan".to_string(),
                    message,
                }
            }
            CatalogError::Inventory(InventoryError::InsufficientShelfStock {
                requested,
                available,
                ..
            }) => AppError::validation(
                vec![json!({
                    "field": "copies_delta",
                    "requested": requested,
                    "available": available
                })],
                message,
            ),
            CatalogError::Inventory(InventoryError::Overflow(_)) => AppError::validation(
                vec![json!({ "field": "copies_delta", "error": "out of range" })],
                message,
            ),
            CatalogError::Inventory(_) => AppError::Internal(anyhow::anyhow!(message)),
            CatalogError::DeadlineExceeded => DeadlineExceeded.into(),
        }
    }
}
