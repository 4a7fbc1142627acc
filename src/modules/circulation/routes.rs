use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use libris_authz::Action;
use libris_db::{BookId, BorrowId, BorrowRecord, BorrowStatus, UserId};
use libris_http::{AppError, CurrentCaller, ThrottleGate};
use libris_kernel::Deadline;
use libris_throttle::Scope;
use serde::{Deserialize, Serialize};

use super::ledger::{BorrowLedger, Borrower, ReturnWarning, Returner};

#[derive(Clone)]
pub struct CirculationState {
    pub ledger: Arc<BorrowLedger>,
    pub gate: Arc<ThrottleGate>,
    pub request_timeout: Duration,
}

impl CirculationState {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

pub fn router(state: CirculationState) -> Router {
    Router::new()
        .route("/borrow", post(borrow))
        .route("/return", post(return_book))
        .route("/mine", get(my_loans))
        .route("/overdue", get(overdue))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct BorrowRequest {
    pub book_id: BookId,
    #[serde(default)]
    pub loan_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnRequest {
    pub book_id: BookId,
}

#[derive(Debug, Deserialize)]
pub struct OverdueQuery {
    pub as_of: Option<DateTime<Utc>>,
}

/// A borrow record with its status evaluated at response time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanView {
    pub id: BorrowId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
    pub days_overdue: i64,
}

impl LoanView {
    fn at(record: BorrowRecord, now: DateTime<Utc>) -> Self {
        Self {
            status: record.status_at(now),
            days_overdue: record.days_overdue(now),
            id: record.id,
            book_id: record.book_id,
            user_id: record.user_id,
            borrowed_at: record.borrowed_at,
            due_date: record.due_date,
            returned_at: record.returned_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    pub loan: LoanView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ReturnWarning>,
}

async fn borrow(
    State(state): State<CirculationState>,
    CurrentCaller(caller): CurrentCaller,
    Json(request): Json<BorrowRequest>,
) -> Result<(StatusCode, Json<LoanView>), AppError> {
    caller.authorize(Action::Borrow)?;
    let user_id = caller.require_user()?;
    state.gate.check(&caller, Scope::Borrow)?;

    let record = state
        .ledger
        .borrow(user_id, request.book_id, request.loan_days, state.deadline())
        .await?;
    let now = state.ledger.now();
    Ok((StatusCode::CREATED, Json(LoanView::at(record, now))))
}

async fn return_book(
    State(state): State<CirculationState>,
    CurrentCaller(caller): CurrentCaller,
    Json(request): Json<ReturnRequest>,
) -> Result<Json<ReturnResponse>, AppError> {
    caller.authorize(Action::Borrow)?;
    let user_id = caller.require_user()?;

    let outcome = state
        .ledger
        .return_book(user_id, request.book_id, state.deadline())
        .await?;
    let now = state.ledger.now();
    Ok(Json(ReturnResponse {
        loan: LoanView::at(outcome.record, now),
        warning: outcome.warning,
    }))
}

async fn my_loans(
    State(state): State<CirculationState>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<Vec<LoanView>>, AppError> {
    caller.authorize(Action::ViewOwnLoans)?;
    let user_id = caller.require_user()?;

    let now = state.ledger.now();
    let loans = state
        .ledger
        .list_active(user_id)
        .await?
        .into_iter()
        .map(|record| LoanView::at(record, now))
        .collect();
    Ok(Json(loans))
}

async fn overdue(
    State(state): State<CirculationState>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<OverdueQuery>,
) -> Result<Json<Vec<LoanView>>, AppError> {
    caller.authorize(Action::ViewOverdue)?;

    let as_of = query.as_of.unwrap_or_else(|| state.ledger.now());
    let loans = state
        .ledger
        .list_overdue(as_of)
        .await?
        .into_iter()
        .map(|record| LoanView::at(record, as_of))
        .collect();
    Ok(Json(loans))
}
