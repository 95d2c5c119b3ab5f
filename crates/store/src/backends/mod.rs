//! Storage backend implementations.
//!
//! Backends are enabled via feature flags:
//!
//! - `sqlite` (default) - SQLite backend, in-memory or file-based

#[cfg(feature = "sqlite")]
pub mod sqlite;
