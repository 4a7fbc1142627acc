use libris_db::{BookId, InventoryError, StoreError, UserId};
use libris_http::AppError;
use libris_kernel::DeadlineExceeded;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CirculationError {
    #[error("user {user_id} already has {limit} active borrows")]
    BorrowLimitExceeded { user_id: UserId, limit: usize },

    #[error("user {user_id} already has book {book_id} on loan")]
    AlreadyBorrowed { user_id: UserId, book_id: BookId },

    #[error("book {0} is out of stock")]
    OutOfStock(BookId),

    #[error("book {0} not found")]
    BookNotFound(BookId),

    #[error("user {user_id} has no active borrow of book {book_id}")]
    NoActiveBorrow { user_id: UserId, book_id: BookId },

    #[error("loan period of {days} days is outside 1..={max}")]
    InvalidLoanPeriod { days: u32, max: u32 },

    #[error("operation did not finish before its deadline")]
    DeadlineExceeded,

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Inventory(InventoryError),
}

impl CirculationError {
    /// Transient failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            CirculationError::Storage(err) => err.is_transient(),
            CirculationError::DeadlineExceeded => true,
            _ => false,
        }
    }
}

impl From<InventoryError> for CirculationError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::OutOfStock(book_id) => CirculationError::OutOfStock(book_id),
            InventoryError::NotFound(book_id) => CirculationError::BookNotFound(book_id),
            other => CirculationError::Inventory(other),
        }
    }
}

impl From<DeadlineExceeded> for CirculationError {
    fn from(_: DeadlineExceeded) -> Self {
        CirculationError::DeadlineExceeded
    }
}

impl From<CirculationError> for AppError {
    fn from(err: CirculationError) -> Self {
        let message = err.to_string();
        match err {
            CirculationError::BorrowLimitExceeded { limit, .. } => AppError::Conflict {
                details: vec![json!({ "limit": limit })],
                code: "borrow_limit_exceeded".to_string(),
                message,
            },
            CirculationError::AlreadyBorrowed { .. } => {
                AppError::conflict_with_code("already_borrowed", message)
            }
            CirculationError::OutOfStock(_) => AppError::conflict_with_code("out_of_stock", message),
            CirculationError::BookNotFound(_) | CirculationError::NoActiveBorrow { .. } => {
                AppError::not_found(message)
            }
            CirculationError::InvalidLoanPeriod { days, max } => AppError::validation(
                vec![json!({ "field": "loan_days", "value": days, "max": max })],
                message,
            ),
            CirculationError::DeadlineExceeded => DeadlineExceeded.into(),
            CirculationError::Storage(StoreError::Unavailable(_)) => AppError::unavailable(message),
            CirculationError::Storage(StoreError::NotFound { .. }) => AppError::not_found(message),
            CirculationError::Storage(StoreError::Conflict(_)) => {
                AppError::conflict(Vec::new(), message)
            }
            CirculationError::Inventory(_) => AppError::Internal(anyhow::anyhow!(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn business_errors_map_to_client_statuses() {
        let cases = [
            (
                CirculationError::BorrowLimitExceeded {
                    user_id: UserId(1),
                    limit: 5,
                },
                StatusCode::CONFLICT,
            ),
            (CirculationError::OutOfStock(BookId(1)), StatusCode::CONFLICT),
            (CirculationError::BookNotFound(BookId(1)), StatusCode::NOT_FOUND),
            (
                CirculationError::InvalidLoanPeriod { days: 0, max: 60 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CirculationError::Storage(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (CirculationError::DeadlineExceeded, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn inventory_errors_fold_into_business_errors() {
        assert_eq!(
            CirculationError::from(InventoryError::OutOfStock(BookId(3))),
            CirculationError::OutOfStock(BookId(3))
        );
        assert!(CirculationError::Storage(StoreError::Unavailable("x".into())).is_retryable());
        assert!(!CirculationError::OutOfStock(BookId(3)).is_retryable());
    }
}
