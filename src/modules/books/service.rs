//! Catalog services composed from the [`Lister`] and [`Creator`]
//! capabilities. Reads go through the shared cache; every mutation drops
//! the affected resource prefix.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libris_cache::{Cache, CacheKey};
use libris_db::{
    Author, BookId, BookPatch, BorrowRepository, CatalogRepository, Genre, InventoryStore,
    NewAuthor, NewBook,
};
use libris_kernel::{Deadline, SharedClock};

use super::error::CatalogError;
use super::models::{
    BookQuery, BookView, CreateBookRequest, CreateGenreRequest, PageQuery, Statistics,
    UpdateBookRequest,
};
use crate::capability::{Creator, Lister, Page};

pub const BOOK_RESOURCE: &str = "book";
pub const AUTHOR_RESOURCE: &str = "author";
pub const GENRE_RESOURCE: &str = "genre";

/// Statistics count authors and genres too, so their mutations drop it.
fn statistics_key() -> CacheKey {
    CacheKey::new(BOOK_RESOURCE).push("statistics")
}

fn non_blank(field: &'static str, value: &str) -> Result<String, CatalogError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::invalid(field, "must not be blank"));
    }
    Ok(trimmed.to_string())
}

pub struct BookService {
    catalog: Arc<dyn CatalogRepository>,
    inventory: Arc<InventoryStore>,
    borrows: Arc<dyn BorrowRepository>,
    cache: Arc<Cache>,
    clock: SharedClock,
    statistics_ttl: Duration,
}

impl BookService {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        inventory: Arc<InventoryStore>,
        borrows: Arc<dyn BorrowRepository>,
        cache: Arc<Cache>,
        clock: SharedClock,
        statistics_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            inventory,
            borrows,
            cache,
            clock,
            statistics_ttl,
        }
    }

    pub async fn detail(&self, id: BookId, deadline: Deadline) -> Result<BookView, CatalogError> {
        let key = CacheKey::new(BOOK_RESOURCE).push("detail").push(id);
        self.cache
            .get_or_compute_within(
                key.as_str(),
                self.cache.default_ttl(),
                deadline,
                || self.load(id),
            )
            .await
    }

    pub async fn statistics(&self, deadline: Deadline) -> Result<Statistics, CatalogError> {
        let key = statistics_key();
        self.cache
            .get_or_compute_within(key.as_str(), self.statistics_ttl, deadline, || {
                self.compute_statistics()
            })
            .await
    }

    /// Apply a partial update and an optional restock. The stock change is
    /// undone if the catalog write fails.
    pub async fn update(
        &self,
        id: BookId,
        request: UpdateBookRequest,
    ) -> Result<BookView, CatalogError> {
        let patch = BookPatch {
            title: request
                .title
                .as_deref()
                .map(|title| non_blank("title", title))
                .transpose()?,
            author_id: request.author_id,
            genre_ids: request.genre_ids,
            price: request.price,
        };
        self.catalog.get_book(id).await?;

        let delta = request.copies_delta;
        if delta != 0 {
            let level = self.inventory.adjust(id, delta)?;
            tracing::info!(book_id = %id, delta, stock = level.stock, total = level.total, "book restocked");
        }

        let written = if patch.is_empty() {
            self.catalog.get_book(id).await
        } else {
            self.catalog.update_book(id, patch, self.clock.now()).await
        };
        let entry = match written {
            Ok(entry) => entry,
            Err(err) => {
                if delta != 0 {
                    if let Err(undo) = self.inventory.adjust(id, delta.saturating_neg()) {
                        tracing::warn!(book_id = %id, delta, error = %undo, replay = "adjust", "restock compensation failed");
                    }
                }
                self.invalidate().await;
                return Err(err.into());
            }
        };

        let level = self.inventory.get(id)?;
        self.invalidate().await;
        Ok(BookView::new(entry, level))
    }

    /// Remove a book. Refused while any copy is on loan.
    pub async fn delete(&self, id: BookId) -> Result<(), CatalogError> {
        self.catalog.get_book(id).await?;
        let removed = self.inventory.remove(id)?;

        if let Err(err) = self.catalog.delete_book(id).await {
            if let Err(undo) = self.inventory.register(id, removed.total) {
                tracing::warn!(book_id = %id, copies = removed.total, error = %undo, replay = "register", "stock restore failed");
            }
            return Err(err.into());
        }

        tracing::info!(book_id = %id, copies = removed.total, "book deleted");
        self.invalidate().await;
        Ok(())
    }

    async fn load(&self, id: BookId) -> Result<BookView, CatalogError> {
        let entry = self.catalog.get_book(id).await?;
        let level = self.inventory.get(id)?;
        Ok(BookView::new(entry, level))
    }

    async fn load_page(&self, query: &BookQuery) -> Result<Page<BookView>, CatalogError> {
        let entries = self.catalog.list_books(&query.filter()).await?;
        let views = entries
            .into_iter()
            // A book deleted mid-listing has no stock entry left.
            .filter_map(|entry| {
                let level = self.inventory.get(entry.id).ok()?;
                Some(BookView::new(entry, level))
            })
            .filter(|view| {
                query
                    .available
                    .map_or(true, |wanted| view.is_available == wanted)
            })
            .collect();
        let paging = query.paging();
        Ok(Page::slice(views, paging.page(), paging.page_size()))
    }

    async fn compute_statistics(&self) -> Result<Statistics, CatalogError> {
        let snapshot = self.inventory.snapshot();
        let authors = self.catalog.list_authors().await?.len();
        let genres = self.catalog.list_genres().await?.len();
        let active = self.borrows.list_active().await?;
        let now = self.clock.now();
        let overdue_borrows = active
            .iter()
            .filter(|record| record.is_overdue_at(now))
            .count();

        Ok(Statistics {
            titles: snapshot.titles,
            authors,
            genres,
            total_copies: snapshot.total_copies,
            available_copies: snapshot.available_copies,
            copies_on_loan: snapshot.copies_on_loan,
            active_borrows: active.len(),
            overdue_borrows,
        })
    }

    async fn invalidate(&self) {
        self.cache
            .invalidate_pattern(&CacheKey::prefix(BOOK_RESOURCE))
            .await;
    }
}

#[async_trait]
impl Lister for BookService {
    type Query = BookQuery;
    type Item = BookView;
    type Error = CatalogError;

    async fn list(&self, query: BookQuery) -> Result<Page<BookView>, CatalogError> {
        let paging = query.paging();
        let key = CacheKey::new(BOOK_RESOURCE)
            .push("list")
            .param("author", query.author)
            .param("genre", query.genre)
            .param("available", query.available)
            .param("search", query.search_term().map(str::to_lowercase))
            .param("page", Some(paging.page()))
            .param("page_size", Some(paging.page_size()));
        self.cache
            .get_or_compute(key.as_str(), self.cache.default_ttl(), || {
                self.load_page(&query)
            })
            .await
    }
}

#[async_trait]
impl Creator for BookService {
    type Input = CreateBookRequest;
    type Output = BookView;
    type Error = CatalogError;

    /// Insert the catalog entry, then stock it. A stocking failure removes
    /// the entry again.
    async fn create(&self, input: CreateBookRequest) -> Result<BookView, CatalogError> {
        let book = NewBook {
            title: non_blank("title", &input.title)?,
            author_id: input.author_id,
            genre_ids: input.genre_ids,
            price: input.price,
        };
        let entry = self.catalog.insert_book(book, self.clock.now()).await?;

        let level = match self.inventory.register(entry.id, input.copies) {
            Ok(level) => level,
            Err(err) => {
                if let Err(undo) = self.catalog.delete_book(entry.id).await {
                    tracing::warn!(book_id = %entry.id, error = %undo, replay = "delete_book", "catalog rollback failed");
                }
                return Err(err.into());
            }
        };

        tracing::info!(book_id = %entry.id, copies = level.total, "book created");
        self.invalidate().await;
        Ok(BookView::new(entry, level))
    }
}

pub struct AuthorService {
    catalog: Arc<dyn CatalogRepository>,
    cache: Arc<Cache>,
}

impl AuthorService {
    pub fn new(catalog: Arc<dyn CatalogRepository>, cache: Arc<Cache>) -> Self {
        Self { catalog, cache }
    }
}

#[async_trait]
impl Lister for AuthorService {
    type Query = PageQuery;
    type Item = Author;
    type Error = CatalogError;

    async fn list(&self, query: PageQuery) -> Result<Page<Author>, CatalogError> {
        let key = CacheKey::new(AUTHOR_RESOURCE)
            .push("list")
            .param("page", Some(query.page()))
            .param("page_size", Some(query.page_size()));
        self.cache
            .get_or_compute(key.as_str(), self.cache.default_ttl(), || async {
                let authors = self.catalog.list_authors().await?;
                Ok(Page::slice(authors, query.page(), query.page_size()))
            })
            .await
    }
}

#[async_trait]
impl Creator for AuthorService {
    type Input = NewAuthor;
    type Output = Author;
    type Error = CatalogError;

    async fn create(&self, input: NewAuthor) -> Result<Author, CatalogError> {
        let author = NewAuthor {
            name: non_blank("name", &input.name)?,
            biography: input.biography,
        };
        let author = self.catalog.insert_author(author).await?;
        self.cache
            .invalidate_pattern(&CacheKey::prefix(AUTHOR_RESOURCE))
            .await;
        self.cache.invalidate_key(statistics_key().as_str()).await;
        Ok(author)
    }
}

pub struct GenreService {
    catalog: Arc<dyn CatalogRepository>,
    cache: Arc<Cache>,
}

impl GenreService {
    pub fn new(catalog: Arc<dyn CatalogRepository>, cache: Arc<Cache>) -> Self {
        Self { catalog, cache }
    }
}

#[async_trait]
impl Lister for GenreService {
    type Query = PageQuery;
    type Item = Genre;
    type Error = CatalogError;

    async fn list(&self, query: PageQuery) -> Result<Page<Genre>, CatalogError> {
        let key = CacheKey::new(GENRE_RESOURCE)
            .push("list")
            .param("page", Some(query.page()))
            .param("page_size", Some(query.page_size()));
        self.cache
            .get_or_compute(key.as_str(), self.cache.default_ttl(), || async {
                let genres = self.catalog.list_genres().await?;
                Ok(Page::slice(genres, query.page(), query.page_size()))
            })
            .await
    }
}

#[async_trait]
impl Creator for GenreService {
    type Input = CreateGenreRequest;
    type Output = Genre;
    type Error = CatalogError;

    async fn create(&self, input: CreateGenreRequest) -> Result<Genre, CatalogError> {
        let genre = self
            .catalog
            .insert_genre(non_blank("name", &input.name)?)
            .await?;
        self.cache
            .invalidate_pattern(&CacheKey::prefix(GENRE_RESOURCE))
            .await;
        self.cache.invalidate_key(statistics_key().as_str()).await;
        Ok(genre)
    }
}
