//! Middleware for procurement-service.

pub mod tenant;

pub use tenant::TenantContext;
