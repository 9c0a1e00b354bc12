//! OData payload helpers.
//!
//! Payload schemas are owned by S/4HANA; this module only knows about the
//! envelope around them.

pub mod simplify;

pub use simplify::{error_message, simplify};
