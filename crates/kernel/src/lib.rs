pub mod clock;
pub mod deadline;
pub mod module;
pub mod registry;
pub mod settings;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use deadline::{Deadline, DeadlineExceeded};
pub use module::{InitCtx, Module};
pub use registry::ModuleRegistry;
