//! Core types for the resource store.
//!
//! - [`StoredResource`] - a resource version with record metadata
//! - [`SearchQuery`], [`SearchParameter`], [`SearchValue`] - search constraints
//! - [`Page`], [`PageCursor`] - keyset pagination
//! - [`Tag`] - resource-level tags, profiles and security labels
//!
//! # Building a Search Query
//!
//! ```
//! use helios_store::types::{SearchModifier, SearchParameter, SearchQuery, SearchValue};
//!
//! let query = SearchQuery::new("Patient")
//!     .with_parameter(
//!         SearchParameter::new("family", SearchValue::eq("Smith"))
//!             .with_modifier(SearchModifier::Exact),
//!     )
//!     .with_count(20);
//!
//! assert_eq!(query.parameters.len(), 1);
//! ```

mod pagination;
mod search_params;
mod stored_resource;
mod tags;

pub use pagination::{CursorValue, Page, PageCursor, PageInfo};
pub use search_params::{
    IncludeDirective, SearchModifier, SearchParamType, SearchParameter, SearchPrefix,
    SearchQuery, SearchValue,
};
pub use stored_resource::{HistoryEntry, ResourceMethod, StoredResource};
pub use tags::{Tag, TagScheme};
