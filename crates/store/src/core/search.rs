//! Search provider trait.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::{IncludeDirective, Page, SearchQuery, StoredResource};

use super::storage::ResourceStorage;

/// Result of a search operation.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matching resources, in result order.
    pub resources: Page<StoredResource>,

    /// Resources pulled in by include directives.
    pub included: Vec<StoredResource>,
}

impl SearchResult {
    /// Creates a new search result.
    pub fn new(resources: Page<StoredResource>) -> Self {
        Self {
            resources,
            included: Vec::new(),
        }
    }

    /// Adds included resources.
    pub fn with_included(mut self, included: Vec<StoredResource>) -> Self {
        self.included = included;
        self
    }

    /// Returns the logical ids of the matching resources.
    pub fn logical_ids(&self) -> Vec<&str> {
        self.resources
            .items
            .iter()
            .map(|r| r.logical_id())
            .collect()
    }

    /// Returns the cursor for the next page, if there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.resources.page_info.next_cursor.as_deref()
    }
}

/// Search over the projected index tables.
///
/// Parameters in a query AND together; the values of one parameter OR
/// together. Only current, non-deleted versions are ever returned.
///
/// # Example
///
/// ```ignore
/// use helios_store::core::SearchProvider;
/// use helios_store::types::SearchQuery;
///
/// async fn find_smiths<S: SearchProvider>(storage: &S) -> Result<(), StorageError> {
///     let query = SearchQuery::from_pairs("Patient", [("family", "smith"), ("_count", "20")])?;
///     let result = storage.search(&query).await?;
///
///     for resource in &result.resources.items {
///         println!("Found: {}", resource.url());
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SearchProvider: ResourceStorage {
    /// Searches for resources matching the query.
    ///
    /// # Returns
    ///
    /// One page of matches ordered by last update, with a cursor for the next
    /// page, plus the resources named by the query's include directives.
    ///
    /// # Errors
    ///
    /// * `StorageError::Search(UnknownParameter)` - If a parameter is not defined for the type
    /// * `StorageError::Search(UnsupportedModifier)` / `UnsupportedPrefix` - For invalid operators
    /// * `StorageError::Search(InvalidValue)` - If a value cannot be parsed for its type
    /// * `StorageError::Search(InvalidCursor)` - If the cursor is malformed
    async fn search(&self, query: &SearchQuery) -> StorageResult<SearchResult>;

    /// Resolves include directives for a set of resources.
    ///
    /// Returns the current versions of the targets of the sources' outbound
    /// links under each directive's parameter, without duplicates.
    async fn include(
        &self,
        resources: &[StoredResource],
        includes: &[IncludeDirective],
    ) -> StorageResult<Vec<StoredResource>>;
}
