//! Storage layer for Libris.
//!
//! [`InventoryStore`] owns per-book stock counters. Catalog metadata and
//! borrow records sit behind the [`CatalogRepository`] and
//! [`BorrowRepository`] traits; the in-memory implementations here back the
//! service and its tests.

pub mod borrow;
pub mod catalog;
pub mod error;
pub mod inventory;
pub mod model;

pub use borrow::{BorrowRepository, MemoryBorrowRepository};
pub use catalog::{BookFilter, BookPatch, CatalogRepository, MemoryCatalog, NewAuthor, NewBook};
pub use error::{InventoryError, StoreError, StoreResult};
pub use inventory::{InventorySnapshot, InventoryStore, StockLevel};
pub use model::{
    Author, AuthorId, BookEntry, BookId, BorrowId, BorrowRecord, BorrowStatus, Genre, GenreId,
    Price, UserId,
};
