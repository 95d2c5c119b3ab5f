//! Helios Resource Store
//!
//! This crate provides a versioned store for clinical resources. Every write
//! produces an immutable version, keeps a typed search index in step with the
//! current version, records outbound references for integrity checks and
//! catalogs the tags, profiles and security labels carried in `meta`.
//!
//! # Features
//!
//! - **Versioning**: Full resource history with optimistic locking and soft deletes
//! - **Forced Ids**: Client-chosen ids mapped onto server logical ids
//! - **Search**: String, token, date, number, quantity, uri, reference and `near` parameters
//! - **Reference Integrity**: Deletes refused while live resources point at the target
//! - **Validation**: Create, update and delete modes, including stored profiles and value sets
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`types`] - Stored resources, search queries, pagination and tags
//! - [`error`] - Error types for all operations
//! - [`outcome`] - Operation outcomes returned by validation and conflicts
//! - [`config`] - Store-wide settings
//! - [`registry`] - Resource types and their search parameter definitions
//! - [`search`] - Extraction of index values from resource content
//! - [`references`] - Reference discovery and classification
//! - [`validation`] - The validate operation
//! - [`core`] - Storage traits
//! - [`backends`] - Backend implementations
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_store::backends::sqlite::SqliteBackend;
//! use helios_store::core::{ResourceStorage, SearchProvider};
//! use helios_store::types::SearchQuery;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! let patient = backend
//!     .create(
//!         "Patient",
//!         json!({"resourceType": "Patient", "name": [{"family": "Smith"}]}),
//!         None,
//!     )
//!     .await?;
//! assert_eq!(patient.version(), 1);
//!
//! let query = SearchQuery::from_pairs("Patient", [("family", "smi")])?;
//! let result = backend.search(&query).await?;
//! assert_eq!(result.resources.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod outcome;
pub mod references;
pub mod registry;
pub mod search;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root
pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use outcome::OperationOutcome;
pub use registry::ResourceTypeRegistry;
pub use types::{SearchQuery, StoredResource, Tag};
pub use validation::{ValidationMode, Validator};

// Re-export core traits
pub use core::{
    PurgableStorage, ReferenceGraph, ResourceStorage, SearchProvider, SearchResult, TagStore,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
