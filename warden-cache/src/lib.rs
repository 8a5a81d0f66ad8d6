//! Versioned cache stores for warden.
//!
//! Provides a unified interface over key-value backends with the one
//! primitive token storage cannot do without: a conditional write keyed by
//! version, so concurrent read-modify-write cycles never silently discard
//! each other's updates.
//!
//! # Features
//!
//! - `redis` - Enable the Redis store (Lua-scripted compare-and-swap)
//! - **In-memory store** - Always available, used in tests and single-node setups
//! - **Wildcard enumeration** - `keys("prefix*")` for sweeps over many sessions
//! - **Named partitions** - [`CacheRegistry`] maps names like `"session"` to stores
//!
//! # Examples
//!
//! ```
//! use warden_cache::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = InMemoryCache::new();
//!
//! // First writer creates the key.
//! assert!(cache.compare_and_swap("counter", None, "1".into(), None).await?);
//!
//! // Read, modify, and write back conditionally.
//! let current = cache.get_versioned("counter").await?.unwrap();
//! let swapped = cache
//!     .compare_and_swap("counter", Some(current.version), "2".into(), None)
//!     .await?;
//! assert!(swapped);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod registry;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use config::{CacheBackend, CacheConfig};
pub use error::{CacheError, CacheResult};
pub use memory::InMemoryCache;
pub use registry::CacheRegistry;
pub use traits::{CacheStore, Versioned};

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CacheBackend, CacheConfig};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::memory::InMemoryCache;
    pub use crate::registry::CacheRegistry;
    pub use crate::traits::{CacheStore, Versioned};

    #[cfg(feature = "redis")]
    pub use crate::redis_cache::RedisCache;
}
