//! S/4HANA OData integration proxy library

pub mod admin;
pub mod backend;
pub mod config;
pub mod csrf;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod odata;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
