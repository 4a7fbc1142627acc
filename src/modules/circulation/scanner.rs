use std::sync::Arc;
use std::time::Duration;

use libris_events::{EventBus, EventEnvelope, LibraryEvent};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::CirculationError;
use super::ledger::BorrowLedger;

/// Periodically announces overdue loans on the event bus.
///
/// Envelope ids are derived from the borrow id and the scan day, so every
/// loan produces at most one notice per day however often the scan runs.
pub struct OverdueScanner {
    ledger: Arc<BorrowLedger>,
    bus: EventBus,
    interval: Duration,
}

impl OverdueScanner {
    pub fn new(ledger: Arc<BorrowLedger>, bus: EventBus, interval: Duration) -> Self {
        Self {
            ledger,
            bus,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Publish a `BookOverdue` event for every overdue loan; returns how many.
    pub async fn scan_once(&self) -> Result<usize, CirculationError> {
        let now = self.ledger.now();
        let overdue = self.ledger.list_overdue(now).await?;
        for record in &overdue {
            let event = LibraryEvent::BookOverdue {
                borrow_id: record.id,
                user_id: record.user_id,
                book_id: record.book_id,
                due_date: record.due_date,
                days_overdue: record.days_overdue(now),
            };
            self.bus
                .publish_envelope(EventEnvelope::overdue(event, now, now.date_naive()));
        }
        if !overdue.is_empty() {
            tracing::info!(count = overdue.len(), "overdue loans announced");
        }
        Ok(overdue.len())
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.scan_once().await {
                    tracing::warn!(error = %err, retryable = err.is_retryable(), "overdue scan failed");
                }
            }
        })
    }
}
