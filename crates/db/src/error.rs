use thiserror::Error;

use crate::model::BookId;

pub type StoreResult<T> = Result<T, StoreError>;

/// Repository failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Stock counter failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("book {0} is not stocked")]
    NotFound(BookId),

    #[error("book {0} is out of stock")]
    OutOfStock(BookId),

    #[error("book {book_id} already has all {total} copies on the shelf")]
    CeilingReached { book_id: BookId, total: u32 },

    #[error("book {0} is already stocked")]
    AlreadyRegistered(BookId),

    #[error("book {book_id} has {on_loan} copies on loan")]
    CopiesOnLoan { book_id: BookId, on_loan: u32 },

    #[error("cannot withdraw {requested} copies of book {book_id}; {available} on the shelf")]
    InsufficientShelfStock {
        book_id: BookId,
        requested: u32,
        available: u32,
    },

    #[error("copy count for book {0} out of range")]
    Overflow(BookId),
}
