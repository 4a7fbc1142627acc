//! Circulation events.
//!
//! Events are fire-and-forget: publishing never fails the operation that
//! produced them, delivery is at least once, and consumers dedupe on
//! [`EventEnvelope::id`].

pub mod bus;
pub mod event;
pub mod notify;

pub use bus::{spawn_subscriber, EventBus, Subscriber};
pub use event::{EventEnvelope, LibraryEvent};
pub use notify::{LoggingNotifier, Notification, NotificationDispatcher, Notifier};
