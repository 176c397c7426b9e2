//! Derived image cache.
//!
//! - [`keys`]: deterministic, fixed-length keys for derived artifacts
//! - [`store`]: the [`CacheStore`] contract and the in-memory backend
//! - [`physical`]: the sharded filesystem backend
//! - [`gate`]: per-key leases that keep population single-flight
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = "is-cache"
//! max_browser_cache_days = 7
//! max_cache_days = 365
//! cached_name_length = 12
//! folder_depth = 2
//! ```

mod config;
pub mod gate;
pub mod keys;
mod lock;
pub mod physical;
pub mod store;

pub use config::CacheConfig;
pub use gate::{ConcurrencyGate, Lease};
pub use keys::{CacheKey, CacheKeyGenerator};
pub use physical::PhysicalFileSystemCache;
pub use store::{CacheEntryMetadata, CacheStore, CacheStoreError, MemoryCache, NewCacheEntry};
