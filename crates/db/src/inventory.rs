//! Per-book stock counters.
//!
//! Each book owns one `AtomicU64` holding its shelf stock, total copies and a
//! retired flag. Every mutation is a compare-and-swap on that word, so
//! operations on one book are serialized without a lock and operations on
//! different books never contend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::InventoryError;
use crate::model::BookId;

const RETIRED: u64 = 1 << 63;
const MAX_COPIES: u32 = (1 << 31) - 1;

/// Point-in-time stock of one book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    /// Copies on the shelf.
    pub stock: u32,
    /// Copies owned, on the shelf or lent.
    pub total: u32,
}

impl StockLevel {
    pub fn on_loan(&self) -> u32 {
        self.total - self.stock
    }

    pub fn is_available(&self) -> bool {
        self.stock > 0
    }
}

/// Totals across the whole inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventorySnapshot {
    pub titles: usize,
    pub total_copies: u64,
    pub available_copies: u64,
    pub copies_on_loan: u64,
}

#[derive(Debug)]
struct StockCell(AtomicU64);

#[derive(Clone, Copy)]
struct Word {
    level: StockLevel,
    retired: bool,
}

impl Word {
    fn unpack(raw: u64) -> Self {
        Self {
            level: StockLevel {
                stock: (raw & u64::from(u32::MAX)) as u32,
                total: ((raw >> 32) & u64::from(MAX_COPIES)) as u32,
            },
            retired: raw & RETIRED != 0,
        }
    }

    fn pack(self) -> u64 {
        let flag = if self.retired { RETIRED } else { 0 };
        flag | (u64::from(self.level.total) << 32) | u64::from(self.level.stock)
    }
}

/// Authoritative stock counts.
#[derive(Debug, Default)]
pub struct InventoryStore {
    cells: DashMap<BookId, Arc<StockCell>>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `book_id` with `copies` on the shelf.
    pub fn register(&self, book_id: BookId, copies: u32) -> Result<StockLevel, InventoryError> {
        if copies > MAX_COPIES {
            return Err(InventoryError::Overflow(book_id));
        }
        let level = StockLevel {
            stock: copies,
            total: copies,
        };
        match self.cells.entry(book_id) {
            Entry::Occupied(_) => Err(InventoryError::AlreadyRegistered(book_id)),
            Entry::Vacant(slot) => {
                let word = Word {
                    level,
                    retired: false,
                };
                slot.insert(Arc::new(StockCell(AtomicU64::new(word.pack()))));
                tracing::debug!(book_id = %book_id, copies, "book stocked");
                Ok(level)
            }
        }
    }

    /// Take one copy off the shelf.
    ///
    /// Fails with `OutOfStock` when the shelf is empty at the moment of the
    /// swap; concurrent callers can never drive stock below zero.
    pub fn reserve(&self, book_id: BookId) -> Result<StockLevel, InventoryError> {
        self.update(book_id, |level| {
            if level.stock == 0 {
                return Err(InventoryError::OutOfStock(book_id));
            }
            Ok(StockLevel {
                stock: level.stock - 1,
                ..level
            })
        })
    }

    /// Put one copy back on the shelf.
    ///
    /// Not idempotent: callers must pair each call with exactly one
    /// successful [`reserve`](Self::reserve). Stock never exceeds total
    /// copies.
    pub fn release(&self, book_id: BookId) -> Result<StockLevel, InventoryError> {
        self.update(book_id, |level| {
            if level.stock >= level.total {
                return Err(InventoryError::CeilingReached {
                    book_id,
                    total: level.total,
                });
            }
            Ok(StockLevel {
                stock: level.stock + 1,
                ..level
            })
        })
    }

    /// Current stock. May be one operation stale under contention.
    pub fn get(&self, book_id: BookId) -> Result<StockLevel, InventoryError> {
        let word = Word::unpack(self.cell(book_id)?.0.load(Ordering::Acquire));
        if word.retired {
            return Err(InventoryError::NotFound(book_id));
        }
        Ok(word.level)
    }

    /// Add (`delta > 0`) or withdraw (`delta < 0`) owned copies. Withdrawn
    /// copies must be on the shelf.
    pub fn adjust(&self, book_id: BookId, delta: i64) -> Result<StockLevel, InventoryError> {
        self.update(book_id, |level| {
            let available = level.stock;
            let apply = |value: u32| -> Result<u32, InventoryError> {
                let next = i64::from(value) + delta;
                if next < 0 {
                    return Err(InventoryError::InsufficientShelfStock {
                        book_id,
                        requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
                        available,
                    });
                }
                u32::try_from(next)
                    .ok()
                    .filter(|copies| *copies <= MAX_COPIES)
                    .ok_or(InventoryError::Overflow(book_id))
            };
            Ok(StockLevel {
                stock: apply(level.stock)?,
                total: apply(level.total)?,
            })
        })
    }

    /// Stop tracking `book_id`. Refused while any copy is on loan.
    pub fn remove(&self, book_id: BookId) -> Result<StockLevel, InventoryError> {
        let cell = self.cell(book_id)?;
        let mut current = cell.0.load(Ordering::Acquire);
        loop {
            let word = Word::unpack(current);
            if word.retired {
                return Err(InventoryError::NotFound(book_id));
            }
            let on_loan = word.level.on_loan();
            if on_loan > 0 {
                return Err(InventoryError::CopiesOnLoan { book_id, on_loan });
            }
            let retired = Word {
                retired: true,
                ..word
            };
            match cell.0.compare_exchange_weak(
                current,
                retired.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        // Only drop the map slot if it still holds the cell we retired.
        self.cells
            .remove_if(&book_id, |_, existing| Arc::ptr_eq(existing, &cell));
        Ok(Word::unpack(current).level)
    }

    pub fn contains(&self, book_id: BookId) -> bool {
        self.get(book_id).is_ok()
    }

    /// Aggregate counts. Each book is read atomically, the totals are not.
    pub fn snapshot(&self) -> InventorySnapshot {
        self.cells
            .iter()
            .map(|entry| Word::unpack(entry.value().0.load(Ordering::Acquire)))
            .filter(|word| !word.retired)
            .fold(InventorySnapshot::default(), |mut acc, word| {
                acc.titles += 1;
                acc.total_copies += u64::from(word.level.total);
                acc.available_copies += u64::from(word.level.stock);
                acc.copies_on_loan += u64::from(word.level.on_loan());
                acc
            })
    }

    fn cell(&self, book_id: BookId) -> Result<Arc<StockCell>, InventoryError> {
        // Clone the Arc so the map shard lock is released before the CAS loop.
        self.cells
            .get(&book_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(InventoryError::NotFound(book_id))
    }

    fn update<F>(&self, book_id: BookId, apply: F) -> Result<StockLevel, InventoryError>
    where
        F: Fn(StockLevel) -> Result<StockLevel, InventoryError>,
    {
        let cell = self.cell(book_id)?;
        let mut current = cell.0.load(Ordering::Acquire);
        loop {
            let word = Word::unpack(current);
            if word.retired {
                return Err(InventoryError::NotFound(book_id));
            }
            let next = Word {
                level: apply(word.level)?,
                retired: false,
            };
            match cell.0.compare_exchange_weak(
                current,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next.level),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Barrier;
    use std::thread;

    const BOOK: BookId = BookId(1);

    #[test]
    fn reserve_and_release_move_stock() {
        let store = InventoryStore::new();
        store.register(BOOK, 2).unwrap();

        assert_eq!(store.reserve(BOOK).unwrap().stock, 1);
        assert_eq!(store.reserve(BOOK).unwrap().stock, 0);
        assert_eq!(store.reserve(BOOK), Err(InventoryError::OutOfStock(BOOK)));

        assert_eq!(store.release(BOOK).unwrap().stock, 1);
        assert_eq!(
            store.get(BOOK).unwrap(),
            StockLevel { stock: 1, total: 2 }
        );
    }

    #[test]
    fn unknown_book_is_not_found() {
        let store = InventoryStore::new();
        assert_eq!(
            store.reserve(BookId(9)),
            Err(InventoryError::NotFound(BookId(9)))
        );
        assert_eq!(
            store.release(BookId(9)),
            Err(InventoryError::NotFound(BookId(9)))
        );
        assert!(store.get(BookId(9)).is_err());
    }

    #[test]
    fn release_stops_at_total_copies() {
        let store = InventoryStore::new();
        store.register(BOOK, 1).unwrap();
        assert_eq!(
            store.release(BOOK),
            Err(InventoryError::CeilingReached {
                book_id: BOOK,
                total: 1
            })
        );
    }

    #[test]
    fn double_registration_is_rejected() {
        let store = InventoryStore::new();
        store.register(BOOK, 1).unwrap();
        assert_eq!(
            store.register(BOOK, 3),
            Err(InventoryError::AlreadyRegistered(BOOK))
        );
    }

    #[test]
    fn single_copy_admits_exactly_one_concurrent_reserve() {
        for _ in 0..50 {
            let store = Arc::new(InventoryStore::new());
            store.register(BOOK, 1).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        store.reserve(BOOK)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.contains(&Err(InventoryError::OutOfStock(BOOK))));
            assert_eq!(store.get(BOOK).unwrap().stock, 0);
        }
    }

    #[test]
    fn many_threads_never_overdraw() {
        let store = Arc::new(InventoryStore::new());
        store.register(BOOK, 7).unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.reserve(BOOK).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 7);
        assert_eq!(store.get(BOOK).unwrap(), StockLevel { stock: 0, total: 7 });
    }

    #[test]
    fn adjust_restocks_and_withdraws_from_shelf() {
        let store = InventoryStore::new();
        store.register(BOOK, 2).unwrap();
        store.reserve(BOOK).unwrap();

        assert_eq!(
            store.adjust(BOOK, 3).unwrap(),
            StockLevel { stock: 4, total: 5 }
        );
        assert_eq!(
            store.adjust(BOOK, -5),
            Err(InventoryError::InsufficientShelfStock {
                book_id: BOOK,
                requested: 5,
                available: 4
            })
        );
        assert_eq!(
            store.adjust(BOOK, -4).unwrap(),
            StockLevel { stock: 0, total: 1 }
        );
    }

    #[test]
    fn remove_refuses_while_copies_are_lent() {
        let store = InventoryStore::new();
        store.register(BOOK, 2).unwrap();
        store.reserve(BOOK).unwrap();

        assert_eq!(
            store.remove(BOOK),
            Err(InventoryError::CopiesOnLoan {
                book_id: BOOK,
                on_loan: 1
            })
        );

        store.release(BOOK).unwrap();
        store.remove(BOOK).unwrap();
        assert!(!store.contains(BOOK));
        assert_eq!(store.reserve(BOOK), Err(InventoryError::NotFound(BOOK)));
    }

    #[test]
    fn snapshot_sums_live_books() {
        let store = InventoryStore::new();
        store.register(BookId(1), 3).unwrap();
        store.register(BookId(2), 2).unwrap();
        store.register(BookId(3), 1).unwrap();
        store.reserve(BookId(1)).unwrap();
        store.remove(BookId(3)).unwrap();

        assert_eq!(
            store.snapshot(),
            InventorySnapshot {
                titles: 2,
                total_copies: 5,
                available_copies: 4,
                copies_on_loan: 1,
            }
        );
    }

    proptest! {
        #[test]
        fn paired_reserve_release_restores_stock(
            copies in 1u32..20,
            ops in proptest::collection::vec(any::<bool>(), 0..200),
        ) {
            let store = InventoryStore::new();
            store.register(BOOK, copies).unwrap();
            let mut held = 0u32;

            for reserve in ops {
                if reserve {
                    if store.reserve(BOOK).is_ok() {
                        held += 1;
                    }
                } else if held > 0 {
                    store.release(BOOK).unwrap();
                    held -= 1;
                }
                let level = store.get(BOOK).unwrap();
                prop_assert_eq!(level.stock + held, copies);
                prop_assert!(level.stock <= level.total);
            }

            for _ in 0..held {
                store.release(BOOK).unwrap();
            }
            prop_assert_eq!(store.get(BOOK).unwrap(), StockLevel { stock: copies, total: copies });
        }
    }
}
