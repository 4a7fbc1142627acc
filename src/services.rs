//! Explicit wiring of the shared components every module uses.

use std::sync::Arc;

use anyhow::Context;
use libris_cache::{Cache, MemoryBackend};
use libris_db::{
    BorrowRepository, CatalogRepository, InventoryStore, MemoryBorrowRepository, MemoryCatalog,
};
use libris_events::EventBus;
use libris_http::ThrottleGate;
use libris_kernel::{settings::Settings, SharedClock, SystemClock};
use libris_throttle::{RateLimiter, ThrottlePolicies};

/// Shared handles built once at startup and passed to modules.
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<Settings>,
    pub clock: SharedClock,
    pub inventory: Arc<InventoryStore>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub borrows: Arc<dyn BorrowRepository>,
    pub cache: Arc<Cache>,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<ThrottleGate>,
    pub bus: EventBus,
}

impl Services {
    /// In-memory stores driven by the system clock.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        Self::with_clock(settings, SystemClock::shared())
    }

    pub fn with_clock(settings: Settings, clock: SharedClock) -> anyhow::Result<Self> {
        let policies = ThrottlePolicies::from_settings(&settings.throttle)
            .context("invalid throttle rate in settings")?;
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        let gate = Arc::new(ThrottleGate::new(limiter.clone(), policies));
        let cache = Arc::new(Cache::from_settings(
            &settings.cache,
            Arc::new(MemoryBackend::new()),
            clock.clone(),
        ));

        tracing::debug!(
            throttle_enabled = settings.throttle.enabled,
            cache_enabled = settings.cache.enabled,
            "services constructed"
        );

        Ok(Self {
            settings: Arc::new(settings),
            clock,
            inventory: Arc::new(InventoryStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            borrows: Arc::new(MemoryBorrowRepository::new()),
            cache,
            limiter,
            gate,
            bus: EventBus::default(),
        })
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("environment", &self.settings.environment)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
