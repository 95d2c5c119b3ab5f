//! Stored resource types.
//!
//! This module defines the [`StoredResource`] type, which wraps a resource's
//! content with the record metadata the store maintains: logical id, optional
//! forced id, version number, timestamps and the soft-delete marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource version together with its record metadata.
///
/// The logical id is assigned by the store and never changes. A forced id is
/// a client-supplied alternate id, unique within the resource type, carried
/// forward unchanged across every version.
///
/// # Examples
///
/// ```
/// use helios_store::types::StoredResource;
/// use serde_json::json;
///
/// let resource = StoredResource::new(
///     "Patient",
///     "0b8a3c1e-6a44-4a56-9d7c-3a2f0f4d3f11",
///     Some("pat-1".to_string()),
///     json!({"resourceType": "Patient", "id": "pat-1"}),
/// );
///
/// assert_eq!(resource.id(), "pat-1");
/// assert_eq!(resource.version(), 1);
/// assert_eq!(resource.url(), "Patient/pat-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    /// The resource type (e.g., "Patient", "Observation").
    resource_type: String,

    /// The store-assigned logical id.
    logical_id: String,

    /// Client-supplied identifier, if the resource was created with one.
    forced_id: Option<String>,

    /// The version number (monotonically increasing from 1).
    version: u64,

    /// The resource content as JSON.
    content: Value,

    /// When the resource was first created.
    created_at: DateTime<Utc>,

    /// When this version was written.
    last_modified: DateTime<Utc>,

    /// Set when this version is a tombstone.
    deleted_at: Option<DateTime<Utc>>,

    /// The operation that produced this version.
    method: Option<ResourceMethod>,
}

/// Operation that produced a resource version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceMethod {
    /// The first version of a resource.
    Post,
    /// A later version written by update.
    Put,
    /// A tombstone written by delete.
    Delete,
}

impl ResourceMethod {
    /// Returns the string stored in the history table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceMethod::Post => "POST",
            ResourceMethod::Put => "PUT",
            ResourceMethod::Delete => "DELETE",
        }
    }

    /// Parses a stored method string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POST" => Some(ResourceMethod::Post),
            "PUT" => Some(ResourceMethod::Put),
            "DELETE" => Some(ResourceMethod::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StoredResource {
    /// Creates the first version of a resource.
    pub fn new(
        resource_type: impl Into<String>,
        logical_id: impl Into<String>,
        forced_id: Option<String>,
        content: Value,
    ) -> Self {
        let now = Utc::now();

        Self {
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            forced_id,
            version: 1,
            content,
            created_at: now,
            last_modified: now,
            deleted_at: None,
            method: Some(ResourceMethod::Post),
        }
    }

    /// Creates a stored resource from existing data (e.g., loaded from database).
    #[allow(clippy::too_many_arguments)]
    pub fn from_storage(
        resource_type: impl Into<String>,
        logical_id: impl Into<String>,
        forced_id: Option<String>,
        version: u64,
        content: Value,
        created_at: DateTime<Utc>,
        last_modified: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
        method: Option<ResourceMethod>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            forced_id,
            version,
            content,
            created_at,
            last_modified,
            deleted_at,
            method,
        }
    }

    /// Returns the resource type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the public id: the forced id if present, else the logical id.
    pub fn id(&self) -> &str {
        self.forced_id.as_deref().unwrap_or(&self.logical_id)
    }

    /// Returns the store-assigned logical id.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Returns the client-supplied id, if any.
    pub fn forced_id(&self) -> Option<&str> {
        self.forced_id.as_deref()
    }

    /// Returns the version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the resource content as JSON.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes self and returns the content.
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns when the resource was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when this version was written.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Returns when the resource was deleted, if this version is a tombstone.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns `true` if this version is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the operation that produced this version.
    pub fn method(&self) -> Option<ResourceMethod> {
        self.method
    }

    /// Returns the weak ETag for this version.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version)
    }

    /// Returns the relative URL (e.g., "Patient/123").
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id())
    }

    /// Returns the versioned URL (e.g., "Patient/123/_history/1").
    pub fn versioned_url(&self) -> String {
        format!("{}/{}/_history/{}", self.resource_type, self.id(), self.version)
    }

    /// Creates the next version of this resource with new content.
    pub fn new_version(self, content: Value) -> Self {
        Self {
            resource_type: self.resource_type,
            logical_id: self.logical_id,
            forced_id: self.forced_id,
            version: self.version + 1,
            content,
            created_at: self.created_at,
            last_modified: Utc::now(),
            deleted_at: None,
            method: Some(ResourceMethod::Put),
        }
    }

    /// Creates the tombstone version of this resource.
    pub fn mark_deleted(self) -> Self {
        let now = Utc::now();

        Self {
            resource_type: self.resource_type,
            logical_id: self.logical_id,
            forced_id: self.forced_id,
            version: self.version + 1,
            content: self.content,
            created_at: self.created_at,
            last_modified: now,
            deleted_at: Some(now),
            method: Some(ResourceMethod::Delete),
        }
    }

    /// Checks if the given ETag names this version.
    pub fn matches_etag(&self, etag: &str) -> bool {
        let normalized = etag.trim_start_matches("W/").trim_matches('"');
        normalized == self.version.to_string()
    }
}

/// One entry of a resource's version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The resource at this version.
    pub resource: StoredResource,

    /// The operation that created this version.
    pub method: ResourceMethod,

    /// When this version was created.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_resource() {
        let resource = StoredResource::new(
            "Patient",
            "abc",
            None,
            json!({"resourceType": "Patient", "id": "abc"}),
        );

        assert_eq!(resource.resource_type(), "Patient");
        assert_eq!(resource.id(), "abc");
        assert_eq!(resource.logical_id(), "abc");
        assert_eq!(resource.version(), 1);
        assert_eq!(resource.etag(), "W/\"1\"");
        assert_eq!(resource.method(), Some(ResourceMethod::Post));
        assert!(!resource.is_deleted());
    }

    #[test]
    fn test_forced_id_is_public_id() {
        let resource = StoredResource::new("Organization", "abc", Some("org-1".to_string()), json!({}));

        assert_eq!(resource.id(), "org-1");
        assert_eq!(resource.logical_id(), "abc");
        assert_eq!(resource.url(), "Organization/org-1");
    }

    #[test]
    fn test_new_version_carries_identity() {
        let resource = StoredResource::new("Patient", "abc", Some("p".to_string()), json!({"a": 1}));
        let created_at = resource.created_at();

        let v2 = resource.new_version(json!({"a": 2}));
        assert_eq!(v2.version(), 2);
        assert_eq!(v2.forced_id(), Some("p"));
        assert_eq!(v2.logical_id(), "abc");
        assert_eq!(v2.created_at(), created_at);
        assert_eq!(v2.content()["a"], 2);
        assert_eq!(v2.versioned_url(), "Patient/p/_history/2");
    }

    #[test]
    fn test_mark_deleted() {
        let resource = StoredResource::new("Patient", "abc", None, json!({}));
        let deleted = resource.mark_deleted();

        assert_eq!(deleted.version(), 2);
        assert!(deleted.is_deleted());
        assert_eq!(deleted.method(), Some(ResourceMethod::Delete));
    }

    #[test]
    fn test_matches_etag() {
        let resource = StoredResource::new("Patient", "abc", None, json!({}));

        assert!(resource.matches_etag("W/\"1\""));
        assert!(resource.matches_etag("\"1\""));
        assert!(resource.matches_etag("1"));
        assert!(!resource.matches_etag("W/\"2\""));
    }

    #[test]
    fn test_method_round_trip() {
        for method in [ResourceMethod::Post, ResourceMethod::Put, ResourceMethod::Delete] {
            assert_eq!(ResourceMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(ResourceMethod::parse("PATCH"), None);
    }
}
