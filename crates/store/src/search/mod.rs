//! Search index projection.
//!
//! - [`extractor`] - evaluates parameter paths against resource content
//! - [`converters`] - turns selected nodes into typed [`IndexValue`]s
//! - [`normalize`] - canonical strings, date ranges, decimals and units
//! - [`fulltext`] - the external full-text index capability
//! - [`errors`] - extraction error types
//!
//! Every write recomputes the complete value set for the resource; the
//! backend deletes the previous rows and inserts the new ones in the same
//! transaction as the version change.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_store::registry::ResourceTypeRegistry;
//! use helios_store::search::SearchParameterExtractor;
//! use serde_json::json;
//!
//! let extractor = SearchParameterExtractor::new(Arc::new(ResourceTypeRegistry::with_defaults()));
//! let values = extractor
//!     .extract(&json!({"resourceType": "Patient", "gender": "female"}), "Patient")
//!     .unwrap();
//!
//! assert!(values.iter().any(|v| v.param_name == "gender"));
//! ```

pub mod converters;
pub mod errors;
pub mod extractor;
pub mod fulltext;
pub mod normalize;

pub use converters::{IndexValue, ValueConverter};
pub use errors::ExtractionError;
pub use extractor::{ExtractedValue, SearchParameterExtractor};
pub use fulltext::{FullTextEntry, FullTextIndex, MemoryFullTextIndex, NoopFullTextIndex};
pub use normalize::{DatePrecision, DateRange};
