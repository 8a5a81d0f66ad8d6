//! # Warden CSRF Protection
//!
//! Session-bound anti-forgery tokens backed by a shared cache.
//!
//! ## Features
//!
//! - ✅ **Named Tokens** - Independent tokens per logical key (one per form)
//! - ✅ **Safe Concurrent Issuance** - Versioned compare-and-swap, no lost tokens
//! - ✅ **Expiry & Rotation** - Per-token lifetime, whole-session rotation
//! - ✅ **Background Reaper** - Periodic compaction of expired records
//! - ✅ **Auto-verification** - Header check for state-changing methods
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_cache::InMemoryCache;
//! use warden_csrf::{CsrfConfig, RequestContext, SessionContext, TokenStore};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), warden_csrf::CsrfError> {
//! let config = Arc::new(CsrfConfig::default().with_rotation_interval(15));
//! let store = TokenStore::new(Arc::new(InMemoryCache::new()), config);
//!
//! let ctx = RequestContext::with_session(SessionContext::new("sid-1", "app_sid-1"));
//!
//! // Generate (or reuse) the token for a form
//! let token = store.generate(&ctx, Some("checkout"), false).await?;
//! assert_eq!(token.len(), 40);
//!
//! // Verify it on submission
//! assert!(store.verify(&ctx, &token, Some("checkout")).await?);
//!
//! // Invalidate every token of the session, e.g. on login
//! assert!(store.rotate(&ctx).await?);
//! assert!(!store.verify(&ctx, &token, Some("checkout")).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Reaping
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_csrf::{TokenReaper, TokenStore};
//!
//! # async fn example(store: TokenStore) {
//! let handle = Arc::new(TokenReaper::new(store)).start();
//! // ... serve requests ...
//! handle.shutdown().await;
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod providers;
pub mod reaper;
pub mod session;
pub mod store;
pub mod token;
pub mod verifier;

pub use config::{CsrfConfig, DEFAULT_KEY_PREFIX, DEFAULT_TOKEN_KEY};
pub use error::{CsrfError, Result};
pub use factory::{TOKEN_LENGTH, TokenFactory};
pub use providers::{Clock, ManualClock, OsRandom, RandomSource, SystemClock};
pub use reaper::{ReapReport, ReaperHandle, TokenReaper};
pub use session::{RequestContext, SessionContext, resolve_client_ip};
pub use store::{Compaction, TokenStore, normalize_key};
pub use token::{TokenMap, TokenRecord};
pub use verifier::{CsrfVerifier, hidden_field};
