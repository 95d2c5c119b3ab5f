//! Core storage traits.
//!
//! - [`ResourceStorage`] - versioned create, read, update and delete
//! - [`PurgableStorage`] - administrative permanent deletion
//! - [`SearchProvider`] - index-backed search and include retrieval
//! - [`ReferenceGraph`] - inbound and outbound reference links
//! - [`TagStore`] - tag catalog and per-version associations
//!
//! ```text
//! ResourceStorage
//!     ├── PurgableStorage
//!     └── SearchProvider
//!
//! ReferenceGraph   (consumed by the validator's delete mode)
//! TagStore
//! ```
//!
//! The validator's resolver traits live in [`crate::validation`].

pub mod graph;
pub mod search;
pub mod storage;
pub mod tags;

pub use graph::ReferenceGraph;
pub use search::{SearchProvider, SearchResult};
pub use storage::{PurgableStorage, ResourceStorage};
pub use tags::TagStore;
