//! Core resource storage trait.
//!
//! This module defines the [`ResourceStorage`] trait, which provides the
//! versioned record operations every backend implements, and
//! [`PurgableStorage`] for administrative permanent deletion.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ResourceError, StorageError, StorageResult};
use crate::types::{HistoryEntry, StoredResource};

/// Core storage trait for versioned resources.
///
/// # Identity
///
/// The store assigns every resource a logical id. A client may also supply a
/// forced id at creation, unique within the resource type. Every id-taking
/// operation accepts either form.
///
/// # Versioning
///
/// All mutating operations (create, update, delete) write a new version. The
/// previous version is retired into history unchanged, and the search index,
/// reference links and tags are re-projected in the same unit of work.
///
/// # Soft Deletes
///
/// `delete` writes a tombstone version. The tombstone is not searchable and
/// `read` reports it as [`ResourceError::Gone`]; earlier versions stay
/// readable through `vread`. Use [`PurgableStorage::purge`] for permanent
/// removal.
///
/// # Example
///
/// ```ignore
/// use helios_store::core::ResourceStorage;
///
/// async fn example<S: ResourceStorage>(storage: &S) -> Result<(), StorageError> {
///     let patient = serde_json::json!({
///         "resourceType": "Patient",
///         "name": [{"family": "Smith"}]
///     });
///     let stored = storage.create("Patient", patient, None).await?;
///
///     let mut content = stored.content().clone();
///     content["active"] = serde_json::json!(true);
///     let updated = storage
///         .update("Patient", stored.id(), Some(stored.version()), content)
///         .await?;
///     assert_eq!(updated.version(), 2);
///
///     storage.delete("Patient", stored.id(), false).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Creates a new resource.
    ///
    /// # Arguments
    ///
    /// * `resource_type` - The resource type (e.g., "Patient")
    /// * `resource` - The resource content as JSON
    /// * `forced_id` - Optional client-supplied identifier
    ///
    /// # Returns
    ///
    /// The stored resource at version 1, with `id`, `meta.versionId` and
    /// `meta.lastUpdated` stamped into its content.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(IdentifierConflict)` - If the forced id is in use for this type
    /// * `StorageError::Resource(UnsupportedResourceType)` - If the type is not registered
    /// * `StorageError::Validation(ValidationFailed)` - If the validator rejects the content
    /// * `StorageError::Validation(InvalidRequest)` - If the forced id is malformed
    async fn create(
        &self,
        resource_type: &str,
        resource: Value,
        forced_id: Option<&str>,
    ) -> StorageResult<StoredResource>;

    /// Reads the current version of a resource.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no resource has this id
    /// * `StorageError::Resource(Gone)` - If the current version is a tombstone
    async fn read(&self, resource_type: &str, id: &str) -> StorageResult<StoredResource>;

    /// Reads a specific version of a resource (vread).
    ///
    /// Tombstone versions are returned as-is with `is_deleted() == true`.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no resource has this id
    /// * `StorageError::Resource(VersionNotFound)` - If the version does not exist
    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: u64,
    ) -> StorageResult<StoredResource>;

    /// Reads the current version, or a specific version when one is given.
    async fn read_version(
        &self,
        resource_type: &str,
        id: &str,
        version: Option<u64>,
    ) -> StorageResult<StoredResource> {
        match version {
            Some(version) => self.vread(resource_type, id, version).await,
            None => self.read(resource_type, id).await,
        }
    }

    /// Writes a new version of an existing resource.
    ///
    /// When `expected_version` is given the update only succeeds if it names
    /// the current version. Updating a deleted resource revives it.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no resource has this id
    /// * `StorageError::Concurrency(VersionConflict)` - If `expected_version` is stale
    /// * `StorageError::Validation(ValidationFailed)` - If the validator rejects the content
    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: Option<u64>,
        resource: Value,
    ) -> StorageResult<StoredResource>;

    /// Deletes a resource by writing a tombstone version.
    ///
    /// The tombstone's index, link and tag rows are cleared. Deleting an
    /// already deleted resource returns the existing tombstone.
    ///
    /// # Arguments
    ///
    /// * `force` - Skip the inbound reference check
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no resource has this id
    /// * `StorageError::Concurrency(ReferentialConflict)` - If live resources still refer to it
    async fn delete(
        &self,
        resource_type: &str,
        id: &str,
        force: bool,
    ) -> StorageResult<StoredResource>;

    /// Lists every version of a resource, newest first.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no resource has this id
    async fn history(&self, resource_type: &str, id: &str) -> StorageResult<Vec<HistoryEntry>>;

    /// Checks if a resource exists and is not deleted.
    async fn exists(&self, resource_type: &str, id: &str) -> StorageResult<bool> {
        match self.read(resource_type, id).await {
            Ok(_) => Ok(true),
            Err(StorageError::Resource(ResourceError::NotFound { .. }))
            | Err(StorageError::Resource(ResourceError::Gone { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Counts the non-deleted resources of a type (or of all types).
    async fn count(&self, resource_type: Option<&str>) -> StorageResult<u64>;
}

/// Extension trait for storage backends that support permanent deletion.
#[async_trait]
pub trait PurgableStorage: ResourceStorage {
    /// Permanently deletes a resource, its history and all derived rows.
    ///
    /// This is an irreversible administrative operation.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no resource has this id
    async fn purge(&self, resource_type: &str, id: &str) -> StorageResult<()>;
}
