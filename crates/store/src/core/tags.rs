//! Tag store trait.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::Tag;

/// Catalog of tags, profiles and security labels attached to resource
/// versions.
///
/// Identical `(scheme, system, code, display)` tuples share one catalog
/// entry across every version and resource that carries them.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Attaches tags to one version of a resource. Tags already attached to
    /// that version are ignored.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(VersionNotFound)` - If the version does not exist
    async fn attach_tags(
        &self,
        resource_type: &str,
        id: &str,
        version: u64,
        tags: &[Tag],
    ) -> StorageResult<()>;

    /// Returns the tags of one version of a resource.
    async fn tags_for(&self, resource_type: &str, id: &str, version: u64)
        -> StorageResult<Vec<Tag>>;

    /// Returns the tags of the current version of a resource.
    async fn tags_for_resource(&self, resource_type: &str, id: &str) -> StorageResult<Vec<Tag>>;
}
