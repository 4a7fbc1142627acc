use chrono::{DateTime, Utc};
use libris_db::{AuthorId, BookEntry, BookFilter, BookId, GenreId, Price, StockLevel};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// A catalog entry joined with its current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookView {
    pub id: BookId,
    pub title: String,
    pub author_id: AuthorId,
    pub genre_ids: Vec<GenreId>,
    pub price: Price,
    pub stock: u32,
    pub total_copies: u32,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookView {
    pub fn new(entry: BookEntry, level: StockLevel) -> Self {
        Self {
            id: entry.id,
            title: entry.title,
            author_id: entry.author_id,
            genre_ids: entry.genre_ids,
            price: entry.price,
            stock: level.stock,
            total_copies: level.total,
            is_available: level.is_available(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

/// Query string of the book listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BookQuery {
    pub author: Option<AuthorId>,
    pub genre: Option<GenreId>,
    pub available: Option<bool>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl BookQuery {
    /// Trimmed search term, `None` when blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            page_size: self.page_size,
        }
    }

    pub fn filter(&self) -> BookFilter {
        BookFilter {
            author_id: self.author,
            genre_id: self.genre,
            search: self.search_term().map(str::to_string),
        }
    }
}

/// Paging for the author and genre listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageQuery {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub author_id: AuthorId,
    #[serde(default)]
    pub genre_ids: Vec<GenreId>,
    pub price: Price,
    #[serde(default)]
    pub copies: u32,
}

/// Partial update. `copies_delta` restocks (positive) or withdraws
/// shelved copies (negative).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub author_id: Option<AuthorId>,
    pub genre_ids: Option<Vec<GenreId>>,
    pub price: Option<Price>,
    #[serde(default)]
    pub copies_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateGenreRequest {
    pub name: String,
}

/// Catalog and circulation aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub titles: usize,
    pub authors: usize,
    pub genres: usize,
    pub total_copies: u64,
    pub available_copies: u64,
    pub copies_on_loan: u64,
    pub active_borrows: usize,
    pub overdue_borrows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_normalizes_paging_and_blank_search() {
        let query = BookQuery {
            search: Some("   ".into()),
            page: Some(0),
            page_size: Some(500),
            ..BookQuery::default()
        };
        assert_eq!(query.search_term(), None);
        assert_eq!(query.paging().page(), 1);
        assert_eq!(query.paging().page_size(), MAX_PAGE_SIZE);
        assert_eq!(query.filter().search, None);
    }

    #[test]
    fn update_request_defaults_to_no_restock() {
        let request: UpdateBookRequest = serde_json::from_str(r#"{"price": "9.99"}"#).unwrap();
        assert_eq!(request.copies_delta, 0);
        assert_eq!(request.price, Some(Price::from_cents(999)));
    }
}
