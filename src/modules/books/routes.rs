use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use libris_authz::Action;
use libris_db::{Author, BookId, Genre, NewAuthor};
use libris_http::{AppError, CurrentCaller, ThrottleGate};
use libris_kernel::Deadline;
use libris_throttle::Scope;

use super::models::{
    BookQuery, BookView, CreateBookRequest, CreateGenreRequest, PageQuery, Statistics,
    UpdateBookRequest,
};
use super::service::{AuthorService, BookService, GenreService};
use crate::capability::{Creator, Lister, Page};

#[derive(Clone)]
pub struct BooksState {
    pub books: Arc<BookService>,
    pub authors: Arc<AuthorService>,
    pub genres: Arc<GenreService>,
    pub gate: Arc<ThrottleGate>,
    pub request_timeout: Duration,
}

impl BooksState {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/statistics", get(statistics))
        .route("/authors", get(list_authors).post(create_author))
        .route("/genres", get(list_genres).post(create_genre))
        .route(
            "/{id}",
            get(get_book).put(update_book).delete(delete_book),
        )
        .with_state(state)
}

async fn list_books(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<BookQuery>,
) -> Result<Json<Page<BookView>>, AppError> {
    caller.authorize(Action::ReadCatalog)?;
    if query.search_term().is_some() {
        state.gate.check(&caller, Scope::Search)?;
    }
    let page = state.deadline().run(state.books.list(query)).await??;
    Ok(Json(page))
}

async fn create_book(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Json(request): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<BookView>), AppError> {
    caller.authorize(Action::ManageCatalog)?;
    let book = state.books.create(request).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<u64>,
) -> Result<Json<BookView>, AppError> {
    caller.authorize(Action::ReadCatalog)?;
    let book = state.books.detail(BookId(id), state.deadline()).await?;
    Ok(Json(book))
}

async fn update_book(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<u64>,
    Json(request): Json<UpdateBookRequest>,
) -> Result<Json<BookView>, AppError> {
    caller.authorize(Action::ManageCatalog)?;
    let book = state.books.update(BookId(id), request).await?;
    Ok(Json(book))
}

async fn delete_book(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    caller.authorize(Action::ManageCatalog)?;
    state.books.delete(BookId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn statistics(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<Statistics>, AppError> {
    caller.authorize(Action::ViewStatistics)?;
    state.gate.check(&caller, Scope::Monitored)?;
    let stats = state.books.statistics(state.deadline()).await?;
    Ok(Json(stats))
}

async fn list_authors(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Author>>, AppError> {
    caller.authorize(Action::ReadCatalog)?;
    let page = state.deadline().run(state.authors.list(query)).await??;
    Ok(Json(page))
}

async fn create_author(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Json(request): Json<NewAuthor>,
) -> Result<(StatusCode, Json<Author>), AppError> {
    caller.authorize(Action::ManageCatalog)?;
    let author = state.authors.create(request).await?;
    Ok((StatusCode::CREATED, Json(author)))
}

async fn list_genres(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Genre>>, AppError> {
    caller.authorize(Action::ReadCatalog)?;
    let page = state.deadline().run(state.genres.list(query)).await??;
    Ok(Json(page))
}

async fn create_genre(
    State(state): State<BooksState>,
    CurrentCaller(caller): CurrentCaller,
    Json(request): Json<CreateGenreRequest>,
) -> Result<(StatusCode, Json<Genre>), AppError> {
    caller.authorize(Action::ManageCatalog)?;
    let genre = state.genres.create(request).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}
