pub mod books;
pub mod circulation;
pub mod events;
pub mod throttle;

use libris_kernel::ModuleRegistry;

use crate::services::Services;

/// Register the core and domain modules with the registry.
pub fn register_all(registry: &mut ModuleRegistry, services: &Services) {
    registry.register_core(events::create_module(services));
    registry.register_core(throttle::create_module(services));
    registry.register_custom(books::create_module(services));
    registry.register_custom(circulation::create_module(services));
}
