//! Read-through cache for catalog queries.
//!
//! [`Cache::get_or_compute`] serves a stored value or runs the supplied
//! computation once per key, no matter how many callers miss at the same
//! time. Writers call [`Cache::invalidate_pattern`] or
//! [`Cache::invalidate_key`] after mutating the data a key was built from.
//!
//! The cache is an optimisation only. When the [`CacheBackend`] fails, reads
//! fall back to computing the value directly.

pub mod backend;
pub mod cache;
pub mod error;
pub mod key;

pub use backend::{CacheBackend, MemoryBackend};
pub use cache::{Cache, CacheStats};
pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
