//! Ready-made event handlers that keep local caches consistent.

mod domain_invalidation;
mod local_invalidation;

pub use domain_invalidation::CacheInvalidationHandler;
pub use local_invalidation::LocalInvalidationHandler;
