use chrono::{DateTime, NaiveDate, Utc};
use libris_db::{BookId, BorrowId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LibraryEvent {
    BookBorrowed {
        borrow_id: BorrowId,
        user_id: UserId,
        book_id: BookId,
        due_date: DateTime<Utc>,
    },
    BookReturned {
        borrow_id: BorrowId,
        user_id: UserId,
        book_id: BookId,
        returned_at: DateTime<Utc>,
        was_overdue: bool,
    },
    BookOverdue {
        borrow_id: BorrowId,
        user_id: UserId,
        book_id: BookId,
        due_date: DateTime<Utc>,
        days_overdue: i64,
    },
}

impl LibraryEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            LibraryEvent::BookBorrowed { .. } => "book_borrowed",
            LibraryEvent::BookReturned { .. } => "book_returned",
            LibraryEvent::BookOverdue { .. } => "book_overdue",
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            LibraryEvent::BookBorrowed { user_id, .. }
            | LibraryEvent::BookReturned { user_id, .. }
            | LibraryEvent::BookOverdue { user_id, .. } => *user_id,
        }
    }

    pub fn book_id(&self) -> BookId {
        match self {
            LibraryEvent::BookBorrowed { book_id, .. }
            | LibraryEvent::BookReturned { book_id, .. }
            | LibraryEvent::BookOverdue { book_id, .. } => *book_id,
        }
    }
}

/// An event plus delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LibraryEvent,
}

impl EventEnvelope {
    pub fn new(event: LibraryEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at,
            event,
        }
    }

    /// Stable id for an overdue notice: one per borrow per day, so repeated
    /// scans on the same day dedupe downstream.
    pub fn overdue(event: LibraryEvent, occurred_at: DateTime<Utc>, day: NaiveDate) -> Self {
        let seed = match &event {
            LibraryEvent::BookOverdue { borrow_id, .. } => format!("{borrow_id}:{day}"),
            other => format!("{}:{day}", other.name()),
        };
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()),
            occurred_at,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overdue(borrow_id: BorrowId) -> LibraryEvent {
        LibraryEvent::BookOverdue {
            borrow_id,
            user_id: UserId(4),
            book_id: BookId(9),
            due_date: Utc::now(),
            days_overdue: 3,
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let envelope = EventEnvelope::new(
            LibraryEvent::BookReturned {
                borrow_id: BorrowId::new(),
                user_id: UserId(1),
                book_id: BookId(2),
                returned_at: Utc::now(),
                was_overdue: false,
            },
            Utc::now(),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "book_returned");
        assert_eq!(json["book_id"], 2);

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn overdue_ids_are_stable_per_day() {
        let borrow = BorrowId::new();
        let today = Utc::now().date_naive();
        let first = EventEnvelope::overdue(overdue(borrow), Utc::now(), today);
        let again = EventEnvelope::overdue(overdue(borrow), Utc::now(), today);
        let tomorrow = EventEnvelope::overdue(
            overdue(borrow),
            Utc::now(),
            today.succ_opt().unwrap(),
        );

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, tomorrow.id);
        assert_eq!(first.event.user_id(), UserId(4));
    }
}
