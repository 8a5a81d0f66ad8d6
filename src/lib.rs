// Warden - Session-bound CSRF protection over a versioned cache
//
// This library issues, verifies, rotates and reaps anti-forgery tokens for
// web sessions, keeping every session's tokens in a single cache entry that
// is only ever rewritten through a conditional write.

// Re-export the cache layer
pub use warden_cache;

// Re-export optional crates
#[cfg(feature = "csrf")]
pub use warden_csrf;

#[cfg(feature = "csrf")]
pub use warden_csrf::{
    CsrfConfig, CsrfError, CsrfVerifier, RequestContext, SessionContext, TokenReaper, TokenStore,
    hidden_field,
};

pub use warden_cache::{CacheError, CacheRegistry, CacheStore, InMemoryCache};

#[cfg(feature = "redis")]
pub use warden_cache::RedisCache;

// Prelude for common imports
pub mod prelude {
    pub use warden_cache::prelude::*;

    #[cfg(feature = "csrf")]
    pub use warden_csrf::{
        Clock,
        CsrfConfig,
        CsrfError,
        CsrfVerifier,
        ManualClock,
        ReapReport,
        ReaperHandle,
        RequestContext,
        SessionContext,
        SystemClock,
        TokenReaper,
        TokenStore,
        hidden_field,
    };
}
