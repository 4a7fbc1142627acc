use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::model::{Author, AuthorId, BookEntry, BookId, Genre, GenreId, Price};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewAuthor {
    pub name: String,
    #[serde(default)]
    pub biography: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub title: String,
    pub author_id: AuthorId,
    pub genre_ids: Vec<GenreId>,
    pub price: Price,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author_id: Option<AuthorId>,
    pub genre_ids: Option<Vec<GenreId>>,
    pub price: Option<Price>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author_id.is_none()
            && self.genre_ids.is_none()
            && self.price.is_none()
    }
}

/// Listing filter. `search` matches title or author name, case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    pub author_id: Option<AuthorId>,
    pub genre_id: Option<GenreId>,
    pub search: Option<String>,
}

/// Persistence for books, authors and genres.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn insert_author(&self, author: NewAuthor) -> StoreResult<Author>;
    async fn get_author(&self, id: AuthorId) -> StoreResult<Author>;
    async fn list_authors(&self) -> StoreResult<Vec<Author>>;
    /// `Conflict` while books reference the author.
    async fn delete_author(&self, id: AuthorId) -> StoreResult<()>;

    /// `Conflict` on a duplicate name (case-insensitive).
    async fn insert_genre(&self, name: String) -> StoreResult<Genre>;
    async fn list_genres(&self) -> StoreResult<Vec<Genre>>;
    /// `Conflict` while books reference the genre.
    async fn delete_genre(&self, id: GenreId) -> StoreResult<()>;

    /// `NotFound` when the author or a genre does not exist.
    async fn insert_book(&self, book: NewBook, at: DateTime<Utc>) -> StoreResult<BookEntry>;
    async fn get_book(&self, id: BookId) -> StoreResult<BookEntry>;
    /// Matching books ordered by id.
    async fn list_books(&self, filter: &BookFilter) -> StoreResult<Vec<BookEntry>>;
    async fn update_book(
        &self,
        id: BookId,
        patch: BookPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<BookEntry>;
    async fn delete_book(&self, id: BookId) -> StoreResult<BookEntry>;
}

#[derive(Debug, Default)]
struct Tables {
    authors: BTreeMap<AuthorId, Author>,
    genres: BTreeMap<GenreId, Genre>,
    books: BTreeMap<BookId, BookEntry>,
    sequences: [u64; 3],
}

const AUTHOR_SEQ: usize = 0;
const GENRE_SEQ: usize = 1;
const BOOK_SEQ: usize = 2;

impl Tables {
    fn allocate(&mut self, sequence: usize) -> u64 {
        self.sequences[sequence] += 1;
        self.sequences[sequence]
    }

    fn ensure_refs(&self, author_id: AuthorId, genre_ids: &[GenreId]) -> StoreResult<()> {
        if !self.authors.contains_key(&author_id) {
            return Err(StoreError::not_found("author", author_id));
        }
        if let Some(missing) = genre_ids.iter().find(|id| !self.genres.contains_key(*id)) {
            return Err(StoreError::not_found("genre", missing));
        }
        Ok(())
    }
}

/// In-process catalog tables.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<Tables>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dedup_genres(mut ids: Vec<GenreId>) -> Vec<GenreId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn insert_author(&self, author: NewAuthor) -> StoreResult<Author> {
        let mut tables = self.tables.write().await;
        let id = AuthorId(tables.allocate(AUTHOR_SEQ));
        let author = Author {
            id,
            name: author.name,
            biography: author.biography,
        };
        tables.authors.insert(id, author.clone());
        Ok(author)
    }

    async fn get_author(&self, id: AuthorId) -> StoreResult<Author> {
        let tables = self.tables.read().await;
        tables
            .authors
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("author", id))
    }

    async fn list_authors(&self) -> StoreResult<Vec<Author>> {
        Ok(self.tables.read().await.authors.values().cloned().collect())
    }

    async fn delete_author(&self, id: AuthorId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.authors.contains_key(&id) {
            return Err(StoreError::not_found("author", id));
        }
        let books = tables.books.values().filter(|b| b.author_id == id).count();
        if books > 0 {
            return Err(StoreError::Conflict(format!(
                "author {id} is referenced by {books} books"
            )));
        }
        tables.authors.remove(&id);
        Ok(())
    }

    async fn insert_genre(&self, name: String) -> StoreResult<Genre> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .genres
            .values()
            .any(|genre| genre.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(StoreError::Conflict(format!("genre '{name}' already exists")));
        }
        let id = GenreId(tables.allocate(GENRE_SEQ));
        let genre = Genre { id, name };
        tables.genres.insert(id, genre.clone());
        Ok(genre)
    }

    async fn list_genres(&self) -> StoreResult<Vec<Genre>> {
        Ok(self.tables.read().await.genres.values().cloned().collect())
    }

    async fn delete_genre(&self, id: GenreId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.genres.contains_key(&id) {
            return Err(StoreError::not_found("genre", id));
        }
        let books = tables
            .books
            .values()
            .filter(|b| b.genre_ids.contains(&id))
            .count();
        if books > 0 {
            return Err(StoreError::Conflict(format!(
                "genre {id} is referenced by {books} books"
            )));
        }
        tables.genres.remove(&id);
        Ok(())
    }

    async fn insert_book(&self, book: NewBook, at: DateTime<Utc>) -> StoreResult<BookEntry> {
        let mut tables = self.tables.write().await;
        tables.ensure_refs(book.author_id, &book.genre_ids)?;
        let id = BookId(tables.allocate(BOOK_SEQ));
        let entry = BookEntry {
            id,
            title: book.title,
            author_id: book.author_id,
            genre_ids: dedup_genres(book.genre_ids),
            price: book.price,
            created_at: at,
            updated_at: at,
        };
        tables.books.insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_book(&self, id: BookId) -> StoreResult<BookEntry> {
        let tables = self.tables.read().await;
        tables
            .books
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("book", id))
    }

    async fn list_books(&self, filter: &BookFilter) -> StoreResult<Vec<BookEntry>> {
        let tables = self.tables.read().await;
        let needle = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let matches = tables
            .books
            .values()
            .filter(|book| filter.author_id.map_or(true, |id| book.author_id == id))
            .filter(|book| filter.genre_id.map_or(true, |id| book.genre_ids.contains(&id)))
            .filter(|book| {
                let Some(needle) = needle.as_deref() else {
                    return true;
                };
                let author_matches = tables
                    .authors
                    .get(&book.author_id)
                    .is_some_and(|author| author.name.to_lowercase().contains(needle));
                book.title.to_lowercase().contains(needle) || author_matches
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn update_book(
        &self,
        id: BookId,
        patch: BookPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<BookEntry> {
        let mut tables = self.tables.write().await;
        let current = tables
            .books
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("book", id))?;

        let author_id = patch.author_id.unwrap_or(current.author_id);
        let genre_ids = patch
            .genre_ids
            .map(dedup_genres)
            .unwrap_or_else(|| current.genre_ids.clone());
        tables.ensure_refs(author_id, &genre_ids)?;

        let updated = BookEntry {
            title: patch.title.unwrap_or(current.title),
            author_id,
            genre_ids,
            price: patch.price.unwrap_or(current.price),
            updated_at: at,
            ..current
        };
        tables.books.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_book(&self, id: BookId) -> StoreResult<BookEntry> {
        let mut tables = self.tables.write().await;
        tables
            .books
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("book", id))
    }
}
