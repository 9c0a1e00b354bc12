//! S/4HANA backend subsystem.
//!
//! # Data Flow
//! ```text
//! handler
//!     → client.rs (build OData call, attach CSRF token for writes)
//!     → resilience::RequestExecutor (retries, dispatcher slot)
//!     → transport.rs (one HTTP call, per-call timeout)
//!     → error.rs (classify failure)
//! ```

pub mod client;
pub mod error;
pub mod transport;

pub use client::S4Client;
pub use error::{BackendError, NetworkCode};
pub use transport::{BackendRequest, BackendResponse, HttpTransport, Transport};
