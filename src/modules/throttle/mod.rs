use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, routing::get, Json, Router};
use libris_authz::Action;
use libris_cache::{Cache, CacheStats};
use libris_http::{AppError, CurrentCaller};
use libris_kernel::{Clock, InitCtx, Module, SharedClock};
use libris_throttle::RateLimiter;
use serde::Serialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::services::Services;

/// Periodically evicts elapsed throttle windows and expired cache entries.
#[derive(Clone)]
pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    cache: Arc<Cache>,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>, cache: Arc<Cache>) -> Self {
        Self { limiter, cache }
    }

    /// Returns `(windows evicted, cache entries purged)`.
    pub async fn sweep_once(&self) -> (usize, usize) {
        let windows = self.limiter.sweep();
        let entries = self.cache.purge_expired().await;
        if windows > 0 || entries > 0 {
            tracing::debug!(windows, entries, "sweep evicted expired state");
        }
        (windows, entries)
    }

    fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; nothing has expired yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

#[derive(Clone)]
struct StatusState {
    limiter: Arc<RateLimiter>,
    cache: Arc<Cache>,
    clock: SharedClock,
}

#[derive(Debug, Serialize)]
struct ViolationCount {
    scope: String,
    count: u64,
}

#[derive(Debug, Serialize)]
struct ThrottleStatus {
    tracked_windows: usize,
    violations_today: Vec<ViolationCount>,
    cache: CacheStats,
    cache_hit_rate: f64,
}

pub struct ThrottleModule {
    sweeper: Sweeper,
    status: StatusState,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ThrottleModule {
    pub fn new(services: &Services) -> Self {
        Self {
            sweeper: Sweeper::new(services.limiter.clone(), services.cache.clone()),
            status: StatusState {
                limiter: services.limiter.clone(),
                cache: services.cache.clone(),
                clock: services.clock.clone(),
            },
            interval: Duration::from_secs(services.settings.throttle.sweep_interval_secs.max(1)),
            task: Mutex::new(None),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Module for ThrottleModule {
    fn name(&self) -> &'static str {
        "throttle"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            enabled = ctx.settings.throttle.enabled,
            member = %ctx.settings.throttle.member,
            borrow = %ctx.settings.throttle.borrow,
            "throttle module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/status", get(status))
            .with_state(self.status.clone())
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let handle = self.sweeper.clone().spawn(self.interval);
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
        tracing::info!(
            module = self.name(),
            interval_secs = self.interval.as_secs(),
            "sweeper started"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.slot().take() {
            handle.abort();
        }
        tracing::info!(module = self.name(), "throttle module stopped");
        Ok(())
    }
}

async fn status(
    State(state): State<StatusState>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<ThrottleStatus>, AppError> {
    caller.authorize(Action::ViewStatistics)?;
    let today = state.clock.now().date_naive();
    let violations_today = state
        .limiter
        .violations()
        .for_day(today)
        .into_iter()
        .map(|(scope, count)| ViolationCount { scope, count })
        .collect();
    let cache = state.cache.stats().await;
    Ok(Json(ThrottleStatus {
        tracked_windows: state.limiter.tracked(),
        violations_today,
        cache_hit_rate: cache.hit_rate(),
        cache,
    }))
}

pub fn create_module(services: &Services) -> Arc<dyn Module> {
    Arc::new(ThrottleModule::new(services))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libris_cache::MemoryBackend;
    use libris_kernel::ManualClock;

    #[tokio::test]
    async fn sweep_evicts_elapsed_windows_and_expired_entries() {
        let clock = ManualClock::default();
        let limiter = Arc::new(RateLimiter::new(clock.shared()));
        let cache = Arc::new(Cache::new(
            Arc::new(MemoryBackend::new()),
            clock.shared(),
            Duration::from_secs(30),
        ));
        let sweeper = Sweeper::new(limiter.clone(), cache.clone());

        limiter.allow("user:1", "borrow", 5, Duration::from_secs(60));
        cache
            .get_or_compute("book:list", Duration::from_secs(30), || async {
                Ok::<_, std::convert::Infallible>(1_u32)
            })
            .await
            .unwrap();
        assert_eq!(sweeper.sweep_once().await, (0, 0));

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(sweeper.sweep_once().await, (1, 1));
        assert_eq!(limiter.tracked(), 0);
        assert_eq!(cache.stats().await.entries, 0);
    }
}
