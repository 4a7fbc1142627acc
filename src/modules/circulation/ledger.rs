//! Borrow and return bookkeeping.
//!
//! A borrow is a two-step saga: reserve a copy in the [`InventoryStore`],
//! then persist the record. A [`ReservationGuard`] releases the copy again
//! if the second step fails or the future is dropped in between, so stock
//! and active records stay in step even under cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use libris_cache::{Cache, CacheKey};
use libris_db::{
    BookId, BorrowRecord, BorrowRepository, InventoryError, InventoryStore, StoreError, UserId,
};
use libris_events::{EventBus, LibraryEvent};
use libris_kernel::{settings::CirculationSettings, Deadline, SharedClock};
use serde::Serialize;
use tokio::sync::Mutex;

use super::error::CirculationError;

/// Loan rules applied by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanPolicy {
    pub default_loan_days: u32,
    pub max_loan_days: u32,
    pub max_active_borrows: usize,
}

impl LoanPolicy {
    pub fn from_settings(settings: &CirculationSettings) -> Self {
        Self {
            default_loan_days: settings.loan_days,
            max_loan_days: settings.max_loan_days,
            max_active_borrows: settings.max_active_borrows,
        }
    }

    fn loan_period(&self, requested: Option<u32>) -> Result<Duration, CirculationError> {
        let days = requested.unwrap_or(self.default_loan_days);
        if days == 0 || days > self.max_loan_days {
            return Err(CirculationError::InvalidLoanPeriod {
                days,
                max: self.max_loan_days,
            });
        }
        Ok(Duration::days(i64::from(days)))
    }
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self::from_settings(&CirculationSettings::default())
    }
}

/// Non-fatal problems reported alongside a successful return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnWarning {
    InventoryReleaseFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnOutcome {
    pub record: BorrowRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ReturnWarning>,
}

#[async_trait]
pub trait Borrower: Send + Sync {
    /// Lend one copy of `book_id` to `user_id` for `loan_days` (default
    /// loan period when `None`).
    async fn borrow(
        &self,
        user_id: UserId,
        book_id: BookId,
        loan_days: Option<u32>,
        deadline: Deadline,
    ) -> Result<BorrowRecord, CirculationError>;
}

#[async_trait]
pub trait Returner: Send + Sync {
    async fn return_book(
        &self,
        user_id: UserId,
        book_id: BookId,
        deadline: Deadline,
    ) -> Result<ReturnOutcome, CirculationError>;
}

/// Releases a reserved copy unless the borrow was committed.
struct ReservationGuard<'a> {
    inventory: &'a InventoryStore,
    book_id: BookId,
    user_id: UserId,
    committed: bool,
}

impl<'a> ReservationGuard<'a> {
    fn new(inventory: &'a InventoryStore, book_id: BookId, user_id: UserId) -> Self {
        Self {
            inventory,
            book_id,
            user_id,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.inventory.release(self.book_id) {
            Ok(level) => tracing::info!(
                book_id = %self.book_id,
                user_id = %self.user_id,
                stock = level.stock,
                "borrow abandoned; reserved copy released"
            ),
            Err(err) => tracing::warn!(
                book_id = %self.book_id,
                user_id = %self.user_id,
                error = %err,
                replay = "release",
                "compensation failed; stock must be released by hand"
            ),
        }
    }
}

/// Active-borrow ledger over the inventory and the borrow repository.
pub struct BorrowLedger {
    inventory: Arc<InventoryStore>,
    borrows: Arc<dyn BorrowRepository>,
    cache: Arc<Cache>,
    bus: EventBus,
    clock: SharedClock,
    policy: LoanPolicy,
    /// Serializes the limit check and insert per user.
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl BorrowLedger {
    pub fn new(
        inventory: Arc<InventoryStore>,
        borrows: Arc<dyn BorrowRepository>,
        cache: Arc<Cache>,
        bus: EventBus,
        clock: SharedClock,
        policy: LoanPolicy,
    ) -> Self {
        Self {
            inventory,
            borrows,
            cache,
            bus,
            clock,
            policy,
            user_locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> LoanPolicy {
        self.policy
    }

    /// Active records due strictly before `as_of`, oldest borrow first.
    pub async fn list_overdue(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<BorrowRecord>, CirculationError> {
        let active = self.borrows.list_active().await?;
        Ok(active
            .into_iter()
            .filter(|record| record.is_overdue_at(as_of))
            .collect())
    }

    pub async fn list_active(&self, user_id: UserId) -> Result<Vec<BorrowRecord>, CirculationError> {
        Ok(self.borrows.list_active_for_user(user_id).await?)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn forget_user_lock(&self, user_id: UserId) {
        // Held by the map alone once no request for the user is in flight.
        self.user_locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn borrow_locked(
        &self,
        user_id: UserId,
        book_id: BookId,
        loan: Duration,
    ) -> Result<BorrowRecord, CirculationError> {
        let active = self.borrows.count_active_for_user(user_id).await?;
        if active >= self.policy.max_active_borrows {
            return Err(CirculationError::BorrowLimitExceeded {
                user_id,
                limit: self.policy.max_active_borrows,
            });
        }
        if self.borrows.find_active(user_id, book_id).await?.is_some() {
            return Err(CirculationError::AlreadyBorrowed { user_id, book_id });
        }

        let level = self.inventory.reserve(book_id)?;
        let reservation = ReservationGuard::new(&self.inventory, book_id, user_id);

        let record = BorrowRecord::open(user_id, book_id, self.clock.now(), loan);
        match self.borrows.insert(record.clone()).await {
            Ok(()) => reservation.commit(),
            Err(StoreError::Conflict(_)) => {
                return Err(CirculationError::AlreadyBorrowed { user_id, book_id })
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            user_id = %user_id,
            book_id = %book_id,
            borrow_id = %record.id,
            stock = level.stock,
            due_date = %record.due_date,
            "book borrowed"
        );
        Ok(record)
    }

    async fn return_locked(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<ReturnOutcome, CirculationError> {
        let open = self
            .borrows
            .find_active(user_id, book_id)
            .await?
            .ok_or(CirculationError::NoActiveBorrow { user_id, book_id })?;

        let now = self.clock.now();
        let record = match self.borrows.mark_returned(open.id, now).await {
            Ok(record) => record,
            Err(StoreError::NotFound { .. } | StoreError::Conflict(_)) => {
                return Err(CirculationError::NoActiveBorrow { user_id, book_id })
            }
            Err(err) => return Err(err.into()),
        };

        let warning = match self.inventory.release(book_id) {
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    book_id = %book_id,
                    borrow_id = %record.id,
                    error = %err,
                    "book returned but copy could not be put back on the shelf"
                );
                Some(ReturnWarning::from(err))
            }
        };

        tracing::info!(
            user_id = %user_id,
            book_id = %book_id,
            borrow_id = %record.id,
            late = open.is_overdue_at(now),
            "book returned"
        );

        self.bus.publish(
            LibraryEvent::BookReturned {
                borrow_id: record.id,
                user_id,
                book_id,
                returned_at: now,
                was_overdue: open.is_overdue_at(now),
            },
            now,
        );
        Ok(ReturnOutcome { record, warning })
    }

    async fn invalidate_books(&self) {
        self.cache.invalidate_pattern(&CacheKey::prefix("book")).await;
    }
}

#[async_trait]
impl Borrower for BorrowLedger {
    async fn borrow(
        &self,
        user_id: UserId,
        book_id: BookId,
        loan_days: Option<u32>,
        deadline: Deadline,
    ) -> Result<BorrowRecord, CirculationError> {
        let loan = self.policy.loan_period(loan_days)?;
        deadline.check()?;

        let lock = self.user_lock(user_id);
        let outcome = deadline
            .run(async {
                let _serialized = lock.lock().await;
                self.borrow_locked(user_id, book_id, loan).await
            })
            .await;
        drop(lock);
        self.forget_user_lock(user_id);

        let record = match outcome {
            Ok(result) => result?,
            Err(expired) => {
                tracing::warn!(
                    user_id = %user_id,
                    book_id = %book_id,
                    "borrow abandoned at deadline"
                );
                return Err(expired.into());
            }
        };

        self.bus.publish(
            LibraryEvent::BookBorrowed {
                borrow_id: record.id,
                user_id,
                book_id,
                due_date: record.due_date,
            },
            record.borrowed_at,
        );
        self.invalidate_books().await;
        Ok(record)
    }
}

#[async_trait]
impl Returner for BorrowLedger {
    async fn return_book(
        &self,
        user_id: UserId,
        book_id: BookId,
        deadline: Deadline,
    ) -> Result<ReturnOutcome, CirculationError> {
        deadline.check()?;

        let lock = self.user_lock(user_id);
        let outcome = deadline
            .run(async {
                let _serialized = lock.lock().await;
                self.return_locked(user_id, book_id).await
            })
            .await;
        drop(lock);
        self.forget_user_lock(user_id);

        let returned = outcome??;
        self.invalidate_books().await;
        Ok(returned)
    }
}

impl From<InventoryError> for ReturnWarning {
    fn from(err: InventoryError) -> Self {
        ReturnWarning::InventoryReleaseFailed {
            reason: err.to_string(),
        }
    }
}
