use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::{extract::State, routing::get, Json, Router};
use libris_authz::Action;
use libris_events::{spawn_subscriber, EventBus, LoggingNotifier, NotificationDispatcher, Notifier};
use libris_http::{AppError, CurrentCaller};
use libris_kernel::{InitCtx, Module};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::services::Services;

/// Runs the notification dispatcher against the event bus.
pub struct EventsModule {
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

#[derive(Debug, Serialize)]
struct EventsStatus {
    subscribers: usize,
    dispatcher_running: bool,
}

impl EventsModule {
    pub fn new(bus: EventBus, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            bus,
            notifier,
            dispatcher: Arc::new(Mutex::new(None)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Module for EventsModule {
    fn name(&self) -> &'static str {
        "events"
    }

    fn routes(&self) -> Router {
        let state = (self.bus.clone(), self.dispatcher.clone());
        Router::new().route("/status", get(status)).with_state(state)
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let dispatcher = Arc::new(NotificationDispatcher::new(self.notifier.clone()));
        let handle = spawn_subscriber(&self.bus, dispatcher);
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
        tracing::info!(module = self.name(), "notification dispatcher started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.slot().take() {
            handle.abort();
        }
        tracing::info!(module = self.name(), "events module stopped");
        Ok(())
    }
}

type StatusState = (EventBus, Arc<Mutex<Option<JoinHandle<()>>>>);

async fn status(
    State((bus, dispatcher)): State<StatusState>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<EventsStatus>, AppError> {
    caller.authorize(Action::ViewStatistics)?;
    let dispatcher_running = dispatcher
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|handle| !handle.is_finished());
    Ok(Json(EventsStatus {
        subscribers: bus.subscriber_count(),
        dispatcher_running,
    }))
}

pub fn create_module(services: &Services) -> Arc<dyn Module> {
    Arc::new(EventsModule::new(
        services.bus.clone(),
        Arc::new(LoggingNotifier),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use libris_db::{BookId, BorrowId, UserId};
    use libris_events::{LibraryEvent, Notification};
    use libris_kernel::settings::Settings;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Notification>);

    #[async_trait]
    impl Notifier for Forward {
        async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
            self.0.send(notification.clone())?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_events_between_start_and_stop() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let module = EventsModule::new(bus.clone(), Arc::new(Forward(tx)));
        let settings = Settings::default();
        let ctx = InitCtx {
            settings: &settings,
        };

        module.start(&ctx).await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(
            LibraryEvent::BookBorrowed {
                borrow_id: BorrowId::new(),
                user_id: UserId(4),
                book_id: BookId(2),
                due_date: Utc::now(),
            },
            Utc::now(),
        );
        let sent = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.recipient, UserId(4));

        module.stop().await.unwrap();
        assert!(module.slot().is_none());
    }
}
