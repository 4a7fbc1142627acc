use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Catalog identifier of a book title.
    BookId
);
numeric_id!(AuthorId);
numeric_id!(GenreId);
numeric_id!(
    /// Opaque identifier issued by the external account system.
    UserId
);

/// Identifier of a borrow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BorrowId(pub Uuid);

impl BorrowId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BorrowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BorrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Non-negative amount with two decimal places, stored as cents.
///
/// Serialized as a decimal string (`"12.50"`) so clients never see float
/// rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price {
    cents: u64,
}

impl Price {
    pub const fn from_cents(cents: u64) -> Self {
        Self { cents }
    }

    pub const fn cents(self) -> u64 {
        self.cents
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid price '{0}': expected a non-negative amount with at most two decimals")]
pub struct InvalidPrice(String);

impl FromStr for Price {
    type Err = InvalidPrice;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPrice(raw.to_string());
        let trimmed = raw.trim();
        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));

        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !digits_only(whole) || !digits_only(fraction) || fraction.len() > 2
        {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let fraction: u64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction))
            .map(Self::from_cents)
            .ok_or_else(invalid)
    }
}

impl Serialize for Price {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: GenreId,
    pub name: String,
}

/// Catalog metadata for a book. Stock lives in the inventory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub id: BookId,
    pub title: String,
    pub author_id: AuthorId,
    pub genre_ids: Vec<GenreId>,
    pub price: Price,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored lifecycle state of a borrow. Overdue is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    Active,
    Returned,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    pub id: BorrowId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
}

impl BorrowRecord {
    /// New active record due `loan` after `borrowed_at`.
    pub fn open(
        user_id: UserId,
        book_id: BookId,
        borrowed_at: DateTime<Utc>,
        loan: chrono::Duration,
    ) -> Self {
        Self {
            id: BorrowId::new(),
            book_id,
            user_id,
            borrowed_at,
            due_date: borrowed_at + loan,
            returned_at: None,
            status: BorrowStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BorrowStatus::Active
    }

    pub fn is_overdue_at(&self, as_of: DateTime<Utc>) -> bool {
        self.is_active() && self.due_date < as_of
    }

    /// Status as seen at `now`, deriving `Overdue` for late active records.
    pub fn status_at(&self, now: DateTime<Utc>) -> BorrowStatus {
        if self.is_overdue_at(now) {
            BorrowStatus::Overdue
        } else {
            self.status
        }
    }

    /// Whole days past due at `as_of`; zero when not overdue.
    pub fn days_overdue(&self, as_of: DateTime<Utc>) -> i64 {
        if self.is_overdue_at(as_of) {
            (as_of - self.due_date).num_days()
        } else {
            0
        }
    }

    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        self.returned_at = Some(at);
        self.status = BorrowStatus::Returned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn price_parses_and_formats() {
        assert_eq!("12".parse::<Price>().unwrap().cents(), 1200);
        assert_eq!("12.5".parse::<Price>().unwrap().cents(), 1250);
        assert_eq!("0.07".parse::<Price>().unwrap().cents(), 7);
        assert_eq!(Price::from_cents(1999).to_string(), "19.99");
    }

    #[test]
    fn price_rejects_negative_and_extra_precision() {
        assert!("-1.00".parse::<Price>().is_err());
        assert!("1.999".parse::<Price>().is_err());
        assert!(".50".parse::<Price>().is_err());
        assert!("abc".parse::<Price>().is_err());
    }

    #[test]
    fn price_serializes_as_string() {
        let json = serde_json::to_string(&Price::from_cents(450)).unwrap();
        assert_eq!(json, "\"4.50\"");
        let back: Price = serde_json::from_str("\"4.5\"").unwrap();
        assert_eq!(back.cents(), 450);
    }

    #[test]
    fn overdue_is_derived_from_due_date() {
        let borrowed = Utc::now();
        let record = BorrowRecord::open(UserId(1), BookId(1), borrowed, Duration::days(14));

        assert_eq!(record.status_at(borrowed), BorrowStatus::Active);
        let late = borrowed + Duration::days(17);
        assert_eq!(record.status_at(late), BorrowStatus::Overdue);
        assert_eq!(record.days_overdue(late), 3);
        assert_eq!(record.status, BorrowStatus::Active);
    }

    #[test]
    fn returned_record_is_never_overdue() {
        let borrowed = Utc::now();
        let mut record = BorrowRecord::open(UserId(1), BookId(1), borrowed, Duration::days(1));
        record.close(borrowed + Duration::hours(2));

        let later = borrowed + Duration::days(30);
        assert_eq!(record.status_at(later), BorrowStatus::Returned);
        assert_eq!(record.days_overdue(later), 0);
    }
}
