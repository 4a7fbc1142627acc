use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use libris_db::UserId;
use serde::Serialize;
use uuid::Uuid;

use crate::bus::Subscriber;
use crate::event::{EventEnvelope, LibraryEvent};

/// Message addressed to one library member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient: UserId,
    pub subject: String,
    pub body: String,
}

impl Notification {
    fn for_event(event: &LibraryEvent) -> Self {
        let (subject, body) = match event {
            LibraryEvent::BookBorrowed {
                book_id, due_date, ..
            } => (
                "Book borrowed".to_string(),
                format!(
                    "You borrowed book {book_id}. Please return it by {}.",
                    due_date.format("%Y-%m-%d")
                ),
            ),
            LibraryEvent::BookReturned {
                book_id,
                was_overdue,
                ..
            } => (
                "Book returned".to_string(),
                if *was_overdue {
                    format!("Book {book_id} was returned after its due date. Thank you.")
                } else {
                    format!("Thank you for returning book {book_id}.")
                },
            ),
            LibraryEvent::BookOverdue {
                book_id,
                days_overdue,
                ..
            } => (
                "Book overdue".to_string(),
                format!("Book {book_id} is {days_overdue} day(s) overdue. Please return it."),
            ),
        };
        Self {
            recipient: event.user_id(),
            subject,
            body,
        }
    }
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            body = %notification.body,
            "notification sent"
        );
        Ok(())
    }
}

/// Bounded memory of recently handled envelope ids.
#[derive(Debug)]
struct SeenIds {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns false when `id` was already seen.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn forget(&mut self, id: &Uuid) {
        if self.ids.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }
}

/// Turns events into member notifications, at most once per envelope id.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    seen: Mutex<SeenIds>,
}

impl NotificationDispatcher {
    pub const DEFAULT_DEDUPE_CAPACITY: usize = 10_000;

    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_capacity(notifier, Self::DEFAULT_DEDUPE_CAPACITY)
    }

    pub fn with_capacity(notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        Self {
            notifier,
            seen: Mutex::new(SeenIds::new(capacity)),
        }
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, SeenIds> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Subscriber for NotificationDispatcher {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        if !self.seen().insert(envelope.id) {
            tracing::debug!(event_id = %envelope.id, "duplicate event skipped");
            return Ok(());
        }

        let notification = Notification::for_event(&envelope.event);
        if let Err(err) = self.notifier.send(&notification).await {
            // Let a redelivery try again.
            self.seen().forget(&envelope.id);
            return Err(err);
        }
        Ok(())
    }
}
