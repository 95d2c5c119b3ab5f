//! SQLite backend implementation.
//!
//! This module provides a SQLite implementation of every storage trait. It
//! supports both in-memory databases (great for testing) and file-based
//! databases.
//!
//! # Features
//!
//! - Versioned records with immutable history and soft deletes
//! - Per-kind search index tables rewritten on every version change
//! - Reference links with delete-time integrity checks
//! - Tag catalog shared across versions and resources
//! - Profile and value set resolution from stored resources
//!
//! Every create, update, delete and purge runs in one `BEGIN IMMEDIATE`
//! transaction covering the record, its history entry and all derived rows.
//!
//! # Example
//!
//! ```no_run
//! use helios_store::backends::sqlite::SqliteBackend;
//! use helios_store::core::ResourceStorage;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! let org = backend
//!     .create("Organization", json!({"resourceType": "Organization", "name": "Acme"}), Some("acme"))
//!     .await?;
//! assert_eq!(org.url(), "Organization/acme");
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! -- Current version of each resource
//! CREATE TABLE resources (
//!     logical_id TEXT PRIMARY KEY,
//!     resource_type TEXT NOT NULL,
//!     forced_id TEXT,
//!     version INTEGER NOT NULL,
//!     data BLOB NOT NULL,
//!     created_at TEXT NOT NULL,
//!     last_updated TEXT NOT NULL,
//!     last_updated_ms INTEGER NOT NULL,
//!     is_deleted INTEGER NOT NULL DEFAULT 0,
//!     deleted_at TEXT
//! );
//!
//! -- Every version ever written
//! CREATE TABLE resource_history (
//!     logical_id TEXT NOT NULL,
//!     resource_type TEXT NOT NULL,
//!     version INTEGER NOT NULL,
//!     data BLOB NOT NULL,
//!     last_updated TEXT NOT NULL,
//!     method TEXT NOT NULL,
//!     is_deleted INTEGER NOT NULL DEFAULT 0,
//!     PRIMARY KEY (logical_id, version)
//! );
//! ```
//!
//! plus `forced_ids`, the `idx_*` index tables, `resource_links`,
//! `tag_definitions` and `resource_tags`.

mod backend;
mod index;
mod links;
mod resolvers;
mod schema;
mod search;
mod storage;
mod tags;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use schema::SCHEMA_VERSION;
