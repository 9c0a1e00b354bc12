//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → retries.rs (attempt loop, transient classification)
//!     → dispatcher.rs (wait for a slot, run one attempt, release)
//!     → transport (per-call timeout)
//!     → On transient failure: backoff.rs (linear delay), then back to the dispatcher
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - A caller never holds a concurrency slot while backing off
//! - Errors are never wrapped on the way out

pub mod backoff;
pub mod dispatcher;
pub mod retries;

pub use dispatcher::Dispatcher;
pub use retries::RequestExecutor;
