//! Reference graph trait.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::references::ReferenceLink;

/// Read access to the reference links projected from current versions.
///
/// Links are rewritten with every version change of their source, so this
/// view always reflects the live graph. Links from deleted resources are
/// never reported.
#[async_trait]
pub trait ReferenceGraph: Send + Sync {
    /// Returns the logical id for a logical or forced id, if a resource of
    /// this type exists (deleted or not).
    async fn resolve_id(&self, resource_type: &str, id: &str) -> StorageResult<Option<String>>;

    /// Returns the links from live resources that resolve to this resource.
    async fn inbound_references(
        &self,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Vec<ReferenceLink>>;

    /// Returns the links held by the current version of this resource,
    /// resolved and unresolved.
    async fn outbound_references(
        &self,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Vec<ReferenceLink>>;
}
