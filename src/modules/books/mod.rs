pub mod error;
pub mod models;
pub mod routes;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use libris_kernel::{InitCtx, Module};
use serde_json::json;

use crate::services::Services;
use routes::BooksState;
use service::{AuthorService, BookService, GenreService};

/// Catalog of books, authors and genres with their stock levels.
pub struct BooksModule {
    state: BooksState,
}

impl BooksModule {
    pub fn new(services: &Services) -> Self {
        let settings = &services.settings;
        let books = BookService::new(
            services.catalog.clone(),
            services.inventory.clone(),
            services.borrows.clone(),
            services.cache.clone(),
            services.clock.clone(),
            Duration::from_secs(settings.cache.statistics_ttl_secs),
        );
        Self {
            state: BooksState {
                books: Arc::new(books),
                authors: Arc::new(AuthorService::new(
                    services.catalog.clone(),
                    services.cache.clone(),
                )),
                genres: Arc::new(GenreService::new(
                    services.catalog.clone(),
                    services.cache.clone(),
                )),
                gate: services.gate.clone(),
                request_timeout: Duration::from_millis(settings.server.request_timeout_ms),
            },
        }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            cache_enabled = ctx.settings.cache.enabled,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

pub fn create_module(services: &Services) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(services))
}

fn error_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn json_body(schema: serde_json::Value) -> serde_json::Value {
    json!({ "content": { "application/json": { "schema": schema } } })
}

fn page_of(item: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "count": { "type": "integer" },
            "page": { "type": "integer" },
            "page_size": { "type": "integer" },
            "results": { "type": "array", "items": { "$ref": format!("#/components/schemas/{item}") } }
        },
        "required": ["count", "page", "page_size", "results"]
    })
}

fn paged_listing(summary: &str, item: &str, paging: &[serde_json::Value]) -> serde_json::Value {
    json!({
        "summary": summary,
        "tags": ["Books"],
        "parameters": paging,
        "responses": {
            "200": {
                "description": "One page of results",
                "content": { "application/json": { "schema": page_of(item) } }
            }
        }
    })
}

fn query_param(name: &str, schema: serde_json::Value) -> serde_json::Value {
    json!({ "name": name, "in": "query", "required": false, "schema": schema })
}

fn openapi_fragment() -> serde_json::Value {
    let book = json!({ "$ref": "#/components/schemas/Book" });
    let id_param = json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "integer", "format": "int64" }
    });
    let paging = vec![
        query_param("page", json!({ "type": "integer", "minimum": 1 })),
        query_param("page_size", json!({ "type": "integer", "minimum": 1, "maximum": 100 })),
    ];
    let mut book_filters = vec![
        query_param("author", json!({ "type": "integer" })),
        query_param("genre", json!({ "type": "integer" })),
        query_param("available", json!({ "type": "boolean" })),
        query_param("search", json!({ "type": "string" })),
    ];
    book_filters.extend(paging.iter().cloned());

    let list_authors = paged_listing("List authors", "Author", &paging);
    let list_genres = paged_listing("List genres", "Genre", &paging);

    json!({
        "paths": {
            "": {
                "get": {
                    "summary": "List books",
                    "tags": ["Books"],
                    "parameters": book_filters,
                    "responses": {
                        "200": {
                            "description": "One page of books",
                            "content": { "application/json": { "schema": page_of("Book") } }
                        },
                        "429": error_response("Membership or search rate limit reached")
                    }
                },
                "post": {
                    "summary": "Create a book (staff only)",
                    "tags": ["Books"],
                    "requestBody": json_body(json!({ "$ref": "#/components/schemas/CreateBook" })),
                    "responses": {
                        "201": { "description": "Created", "content": { "application/json": { "schema": book } } },
                        "403": error_response("Caller is not staff"),
                        "404": error_response("Unknown author or genre"),
                        "422": error_response("Validation error")
                    }
                }
            },
            "/{id}": {
                "get": {
                    "summary": "Book detail",
                    "tags": ["Books"],
                    "parameters": [id_param],
                    "responses": {
                        "200": { "description": "Book", "content": { "application/json": { "schema": book } } },
                        "404": error_response("Book not found")
                    }
                },
                "put": {
                    "summary": "Update or restock a book (staff only)",
                    "tags": ["Books"],
                    "parameters": [id_param],
                    "requestBody": json_body(json!({ "$ref": "#/components/schemas/UpdateBook" })),
                    "responses": {
                        "200": { "description": "Updated", "content": { "application/json": { "schema": book } } },
                        "404": error_response("Book not found"),
                        "422": error_response("Withdrawal exceeds copies on the shelf")
                    }
                },
                "delete": {
                    "summary": "Delete a book (staff only)",
                    "tags": ["Books"],
                    "parameters": [id_param],
                    "responses": {
                        "204": { "description": "Deleted" },
                        "404": error_response("Book not found"),
                        "409": error_response("Copies are on loan")
                    }
                }
            },
            "/statistics": {
                "get": {
                    "summary": "Catalog and circulation aggregates",
                    "tags": ["Books"],
                    "responses": {
                        "200": {
                            "description": "Statistics",
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Statistics" } } }
                        },
                        "429": error_response("Monitored rate limit reached")
                    }
                }
            },
            "/authors": {
                "get": list_authors,
                "post": {
                    "summary": "Create an author (staff only)",
                    "tags": ["Books"],
                    "requestBody": json_body(json!({ "$ref": "#/components/schemas/CreateAuthor" })),
                    "responses": {
                        "201": { "description": "Created", "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Author" } } } },
                        "403": error_response("Caller is not staff")
                    }
                }
            },
            "/genres": {
                "get": list_genres,
                "post": {
                    "summary": "Create a genre (staff only)",
                    "tags": ["Books"],
                    "requestBody": json_body(json!({ "$ref": "#/components/schemas/CreateGenre" })),
                    "responses": {
                        "201": { "description": "Created", "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Genre" } } } },
                        "403": error_response("Caller is not staff"),
                        "409": error_response("Genre name already exists")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "title": { "type": "string" },
                        "author_id": { "type": "integer", "format": "int64" },
                        "genre_ids": { "type": "array", "items": { "type": "integer", "format": "int64" } },
                        "price": { "type": "string", "description": "Decimal amount, e.g. \"12.50\"" },
                        "stock": { "type": "integer" },
                        "total_copies": { "type": "integer" },
                        "is_available": { "type": "boolean" },
                        "created_at": { "type": "string", "format": "date-time" },
                        "updated_at": { "type": "string", "format": "date-time" }
                    },
                    "required": ["id", "title", "author_id", "price", "stock", "total_copies", "is_available"]
                },
                "CreateBook": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "author_id": { "type": "integer", "format": "int64" },
                        "genre_ids": { "type": "array", "items": { "type": "integer", "format": "int64" } },
                        "price": { "type": "string" },
                        "copies": { "type": "integer", "minimum": 0 }
                    },
                    "required": ["title", "author_id", "price"]
                },
                "UpdateBook": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "author_id": { "type": "integer", "format": "int64" },
                        "genre_ids": { "type": "array", "items": { "type": "integer", "format": "int64" } },
                        "price": { "type": "string" },
                        "copies_delta": { "type": "integer", "description": "Copies added (positive) or withdrawn (negative)" }
                    }
                },
                "Author": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "name": { "type": "string" },
                        "biography": { "type": "string" }
                    },
                    "required": ["id", "name"]
                },
                "CreateAuthor": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "biography": { "type": "string" }
                    },
                    "required": ["name"]
                },
                "Genre": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "name": { "type": "string" }
                    },
                    "required": ["id", "name"]
                },
                "CreateGenre": {
                    "type": "object",
                    "properties": { "name": { "type": "string" } },
                    "required": ["name"]
                },
                "Statistics": {
                    "type": "object",
                    "properties": {
                        "titles": { "type": "integer" },
                        "authors": { "type": "integer" },
                        "genres": { "type": "integer" },
                        "total_copies": { "type": "integer" },
                        "available_copies": { "type": "integer" },
                        "copies_on_loan": { "type": "integer" },
                        "active_borrows": { "type": "integer" },
                        "overdue_borrows": { "type": "integer" }
                    }
                }
            }
        }
    })
}
