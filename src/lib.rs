//! Libris application library: wiring of the shared services and the
//! modules mounted by the server.

pub mod capability;
pub mod modules;
pub mod services;

pub use modules::register_all;
pub use services::Services;

use libris_kernel::{settings::Settings, InitCtx, ModuleRegistry};

/// Registry with every module registered against `services`.
pub fn build_registry(services: &Services) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    register_all(&mut registry, services);
    registry
}

/// Run the service until Ctrl-C, then stop every module.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let services = Services::from_settings(settings)?;
    let registry = build_registry(&services);
    let ctx = InitCtx {
        settings: &services.settings,
    };

    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = libris_http::start_server(
        &registry,
        &services.settings,
        Some(services.gate.clone()),
        shutdown_signal(),
    )
    .await;

    let stopped = registry.stop_all().await;
    served.and(stopped)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
