pub mod error;
pub mod ledger;
pub mod routes;
pub mod scanner;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use libris_events::EventBus;
use libris_kernel::{InitCtx, Module};
use tokio::task::JoinHandle;

use crate::services::Services;
use ledger::{BorrowLedger, LoanPolicy};
use routes::CirculationState;
use scanner::OverdueScanner;

/// Borrow and return endpoints plus the periodic overdue scan.
pub struct CirculationModule {
    state: CirculationState,
    bus: EventBus,
    scan_interval: Duration,
    scanner: Mutex<Option<JoinHandle<()>>>,
}

impl CirculationModule {
    pub fn new(services: &Services) -> Self {
        let settings = &services.settings;
        let ledger = Arc::new(BorrowLedger::new(
            services.inventory.clone(),
            services.borrows.clone(),
            services.cache.clone(),
            services.bus.clone(),
            services.clock.clone(),
            LoanPolicy::from_settings(&settings.circulation),
        ));
        Self {
            state: CirculationState {
                ledger,
                gate: services.gate.clone(),
                request_timeout: Duration::from_millis(settings.server.request_timeout_ms),
            },
            bus: services.bus.clone(),
            scan_interval: Duration::from_secs(settings.circulation.overdue_scan_interval_secs),
            scanner: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> Arc<BorrowLedger> {
        self.state.ledger.clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scanner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Module for CirculationModule {
    fn name(&self) -> &'static str {
        "circulation"
    }

    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let policy = self.state.ledger.policy();
        tracing::info!(
            module = self.name(),
            loan_days = policy.default_loan_days,
            max_active_borrows = policy.max_active_borrows,
            "circulation module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let scanner = OverdueScanner::new(self.ledger(), self.bus.clone(), self.scan_interval);
        let handle = scanner.spawn();
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
        tracing::info!(
            module = self.name(),
            interval_secs = self.scan_interval.as_secs(),
            "overdue scanner started"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let running = self.slot().take();
        if let Some(handle) = running {
            handle.abort();
        }
        tracing::info!(module = self.name(), "circulation module stopped");
        Ok(())
    }
}

pub fn create_module(services: &Services) -> Arc<dyn Module> {
    Arc::new(CirculationModule::new(services))
}

fn error_response(description: &str) -> serde_json::Value {
    serde_json::json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn openapi_fragment() -> serde_json::Value {
    let loan = serde_json::json!({ "$ref": "#/components/schemas/Loan" });
    let loans = serde_json::json!({ "type": "array", "items": loan });
    serde_json::json!({
        "paths": {
            "/borrow": {
                "post": {
                    "summary": "Borrow a copy of a book",
                    "tags": ["Circulation"],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/BorrowRequest" }
                            }
                        }
                    },
                    "responses": {
                        "201": {
                            "description": "Loan opened",
                            "content": { "application/json": { "schema": loan } }
                        },
                        "401": error_response("Missing or malformed caller identity"),
                        "404": error_response("Book not found"),
                        "409": error_response("Out of stock, already borrowed or borrow limit reached"),
                        "422": error_response("Loan period out of range"),
                        "429": error_response("Borrow rate limit reached"),
                        "503": error_response("Deadline exceeded or storage unavailable")
                    }
                }
            },
            "/return": {
                "post": {
                    "summary": "Return a borrowed book",
                    "tags": ["Circulation"],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/ReturnRequest" }
                            }
                        }
                    },
                    "responses": {
                        "200": {
                            "description": "Loan closed; `warning` is set when the copy could not be shelved",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {
                                            "loan": loan,
                                            "warning": { "type": "object" }
                                        },
                                        "required": ["loan"]
                                    }
                                }
                            }
                        },
                        "404": error_response("No active borrow of this book"),
                        "503": error_response("Deadline exceeded or storage unavailable")
                    }
                }
            },
            "/mine": {
                "get": {
                    "summary": "Active loans of the caller",
                    "tags": ["Circulation"],
                    "responses": {
                        "200": {
                            "description": "Active loans",
                            "content": { "application/json": { "schema": loans } }
                        },
                        "401": error_response("Missing caller identity")
                    }
                }
            },
            "/overdue": {
                "get": {
                    "summary": "Overdue loans (staff only)",
                    "tags": ["Circulation"],
                    "parameters": [{
                        "name": "as_of",
                        "in": "query",
                        "required": false,
                        "schema": { "type": "string", "format": "date-time" }
                    }],
                    "responses": {
                        "200": {
                            "description": "Loans due strictly before `as_of`",
                            "content": { "application/json": { "schema": loans } }
                        },
                        "403": error_response("Caller is not staff")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "BorrowRequest": {
                    "type": "object",
                    "properties": {
                        "book_id": { "type": "integer", "format": "int64" },
                        "loan_days": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["book_id"]
                },
                "ReturnRequest": {
                    "type": "object",
                    "properties": {
                        "book_id": { "type": "integer", "format": "int64" }
                    },
                    "required": ["book_id"]
                },
                "Loan": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "format": "uuid" },
                        "book_id": { "type": "integer", "format": "int64" },
                        "user_id": { "type": "integer", "format": "int64" },
                        "borrowed_at": { "type": "string", "format": "date-time" },
                        "due_date": { "type": "string", "format": "date-time" },
                        "returned_at": { "type": "string", "format": "date-time", "nullable": true },
                        "status": { "type": "string", "enum": ["active", "returned", "overdue"] },
                        "days_overdue": { "type": "integer" }
                    },
                    "required": ["id", "book_id", "user_id", "borrowed_at", "due_date", "status"]
                }
            }
        }
    })
}
