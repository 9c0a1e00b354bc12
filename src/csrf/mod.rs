//! CSRF token subsystem.
//!
//! # Data Flow
//! ```text
//! write handler
//!     → cache.rs (fresh? joined refresh? start refresh)
//!     → fetcher.rs (GET service root with `x-csrf-token: Fetch`)
//!     → dispatcher slot → transport
//! ```

pub mod cache;
pub mod fetcher;

pub use cache::{CachedTokenInfo, CsrfToken, CsrfTokenCache, TokenFetcher};
pub use fetcher::{BackendTokenFetcher, CSRF_HEADER};
