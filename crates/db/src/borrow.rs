use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::model::{BookId, BorrowId, BorrowRecord, UserId};

/// Persistence for borrow records.
#[async_trait]
pub trait BorrowRepository: Send + Sync {
    /// Store a new active record. Rejects a second active record for the
    /// same (user, book) pair with `Conflict`.
    async fn insert(&self, record: BorrowRecord) -> StoreResult<()>;

    async fn find_active(&self, user_id: UserId, book_id: BookId)
        -> StoreResult<Option<BorrowRecord>>;

    /// Close an active record. `Conflict` if it was already returned.
    async fn mark_returned(&self, id: BorrowId, at: DateTime<Utc>) -> StoreResult<BorrowRecord>;

    async fn count_active_for_user(&self, user_id: UserId) -> StoreResult<usize>;

    async fn count_active_for_book(&self, book_id: BookId) -> StoreResult<usize>;

    async fn list_active(&self) -> StoreResult<Vec<BorrowRecord>>;

    async fn list_active_for_user(&self, user_id: UserId) -> StoreResult<Vec<BorrowRecord>>;
}

/// In-process borrow table.
#[derive(Debug, Default)]
pub struct MemoryBorrowRepository {
    records: RwLock<HashMap<BorrowId, BorrowRecord>>,
}

impl MemoryBorrowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn active_where<F>(&self, keep: F) -> Vec<BorrowRecord>
    where
        F: Fn(&BorrowRecord) -> bool,
    {
        let records = self.records.read().await;
        let mut active: Vec<_> = records
            .values()
            .filter(|record| record.is_active() && keep(record))
            .cloned()
            .collect();
        active.sort_by_key(|record| (record.borrowed_at, record.id.0));
        active
    }
}

#[async_trait]
impl BorrowRepository for MemoryBorrowRepository {
    async fn insert(&self, record: BorrowRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let duplicate = records.values().any(|existing| {
            existing.is_active()
                && existing.user_id == record.user_id
                && existing.book_id == record.book_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "user {} already has book {} on loan",
                record.user_id, record.book_id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn find_active(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> StoreResult<Option<BorrowRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.is_active() && r.user_id == user_id && r.book_id == book_id)
            .cloned())
    }

    async fn mark_returned(&self, id: BorrowId, at: DateTime<Utc>) -> StoreResult<BorrowRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("borrow record", id))?;
        if !record.is_active() {
            return Err(StoreError::Conflict(format!(
                "borrow record {id} is already returned"
            )));
        }
        record.close(at);
        Ok(record.clone())
    }

    async fn count_active_for_user(&self, user_id: UserId) -> StoreResult<usize> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.is_active() && r.user_id == user_id)
            .count())
    }

    async fn count_active_for_book(&self, book_id: BookId) -> StoreResult<usize> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.is_active() && r.book_id == book_id)
            .count())
    }

    async fn list_active(&self) -> StoreResult<Vec<BorrowRecord>> {
        Ok(self.active_where(|_| true).await)
    }

    async fn list_active_for_user(&self, user_id: UserId) -> StoreResult<Vec<BorrowRecord>> {
        Ok(self.active_where(|r| r.user_id == user_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BorrowStatus;
    use chrono::Duration;

    fn record(user: u64, book: u64) -> BorrowRecord {
        BorrowRecord::open(UserId(user), BookId(book), Utc::now(), Duration::days(14))
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_active_pair() {
        let repo = MemoryBorrowRepository::new();
        repo.insert(record(1, 1)).await.unwrap();

        let err = repo.insert(record(1, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        repo.insert(record(1, 2)).await.unwrap();
        repo.insert(record(2, 1)).await.unwrap();
        assert_eq!(repo.count_active_for_user(UserId(1)).await.unwrap(), 2);
        assert_eq!(repo.count_active_for_book(BookId(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mark_returned_closes_record_once() {
        let repo = MemoryBorrowRepository::new();
        let open = record(1, 1);
        let id = open.id;
        repo.insert(open).await.unwrap();

        let closed = repo.mark_returned(id, Utc::now()).await.unwrap();
        assert_eq!(closed.status, BorrowStatus::Returned);
        assert!(closed.returned_at.is_some());
        assert!(repo.find_active(UserId(1), BookId(1)).await.unwrap().is_none());

        let again = repo.mark_returned(id, Utc::now()).await.unwrap_err();
        assert!(matches!(again, StoreError::Conflict(_)));

        // The pair can borrow again after returning.
        repo.insert(record(1, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn mark_returned_unknown_id_is_not_found() {
        let repo = MemoryBorrowRepository::new();
        let err = repo
            .mark_returned(BorrowId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn listing_skips_returned_records() {
        let repo = MemoryBorrowRepository::new();
        let first = record(1, 1);
        let first_id = first.id;
        repo.insert(first).await.unwrap();
        repo.insert(record(1, 2)).await.unwrap();
        repo.insert(record(2, 3)).await.unwrap();
        repo.mark_returned(first_id, Utc::now()).await.unwrap();

        assert_eq!(repo.list_active().await.unwrap().len(), 2);
        let mine = repo.list_active_for_user(UserId(1)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].book_id, BookId(2));
    }
}
