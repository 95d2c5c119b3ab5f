//! External full-text index capability.
//!
//! The store hands every committed version to a [`FullTextIndex`] and routes
//! `_content` constraints to it. The index engine itself lives outside the
//! store; [`MemoryFullTextIndex`] is a small token index for embedding and
//! tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::StorageResult;

use super::normalize::normalize_string;

/// Text of one resource version handed to the full-text index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextEntry {
    /// The resource type.
    pub resource_type: String,
    /// The logical id.
    pub logical_id: String,
    /// Concatenated text content.
    pub text: String,
}

impl FullTextEntry {
    /// Builds an entry from every string value in a resource, skipping `meta`
    /// and `id`.
    pub fn from_resource(resource_type: &str, logical_id: &str, content: &Value) -> Self {
        let mut parts = Vec::new();
        if let Value::Object(obj) = content {
            for (key, value) in obj {
                if key != "meta" && key != "id" && key != "resourceType" {
                    collect_text(value, &mut parts);
                }
            }
        }

        Self {
            resource_type: resource_type.to_string(),
            logical_id: logical_id.to_string(),
            text: parts.join(" "),
        }
    }
}

fn collect_text<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(arr) => arr.iter().for_each(|v| collect_text(v, out)),
        Value::Object(obj) => obj.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

/// Capability interface for an external full-text index.
#[async_trait]
pub trait FullTextIndex: Send + Sync {
    /// Adds or replaces the entries for the given resources.
    async fn index(&self, entries: Vec<FullTextEntry>) -> StorageResult<()>;

    /// Removes one resource from the index.
    async fn remove(&self, resource_type: &str, logical_id: &str) -> StorageResult<()>;

    /// Removes every entry of a resource type.
    async fn purge(&self, resource_type: &str) -> StorageResult<()>;

    /// Returns the logical ids whose text matches the query.
    async fn query(&self, resource_type: &str, text: &str) -> StorageResult<Vec<String>>;
}

/// A full-text index that stores nothing and matches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFullTextIndex;

#[async_trait]
impl FullTextIndex for NoopFullTextIndex {
    async fn index(&self, _entries: Vec<FullTextEntry>) -> StorageResult<()> {
        Ok(())
    }

    async fn remove(&self, _resource_type: &str, _logical_id: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn purge(&self, _resource_type: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn query(&self, _resource_type: &str, _text: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// In-memory token index. A query matches when every query token is a
/// prefix of some token in the resource.
///
/// ```
/// use helios_store::search::{FullTextEntry, FullTextIndex, MemoryFullTextIndex};
///
/// # tokio_test::block_on(async {
/// let index = MemoryFullTextIndex::new();
/// index
///     .index(vec![FullTextEntry {
///         resource_type: "Patient".to_string(),
///         logical_id: "p1".to_string(),
///         text: "Ann Smith".to_string(),
///     }])
///     .await
///     .unwrap();
/// assert_eq!(index.query("Patient", "smi").await.unwrap(), vec!["p1"]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryFullTextIndex {
    entries: RwLock<HashMap<String, HashMap<String, BTreeSet<String>>>>,
}

impl MemoryFullTextIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of indexed resources of a type.
    pub fn len(&self, resource_type: &str) -> usize {
        self.entries
            .read()
            .get(resource_type)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    normalize_string(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl FullTextIndex for MemoryFullTextIndex {
    async fn index(&self, entries: Vec<FullTextEntry>) -> StorageResult<()> {
        let mut index = self.entries.write();
        for entry in entries {
            index
                .entry(entry.resource_type)
                .or_default()
                .insert(entry.logical_id, tokenize(&entry.text));
        }
        Ok(())
    }

    async fn remove(&self, resource_type: &str, logical_id: &str) -> StorageResult<()> {
        if let Some(by_id) = self.entries.write().get_mut(resource_type) {
            by_id.remove(logical_id);
        }
        Ok(())
    }

    async fn purge(&self, resource_type: &str) -> StorageResult<()> {
        self.entries.write().remove(resource_type);
        Ok(())
    }

    async fn query(&self, resource_type: &str, text: &str) -> StorageResult<Vec<String>> {
        let wanted = tokenize(text);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.entries.read();
        let mut ids: Vec<String> = index
            .get(resource_type)
            .map(|by_id| {
                by_id
                    .iter()
                    .filter(|(_, tokens)| {
                        wanted
                            .iter()
                            .all(|w| tokens.iter().any(|t| t.starts_with(w.as_str())))
                    })
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_from_resource() {
        let entry = FullTextEntry::from_resource(
            "Patient",
            "p1",
            &json!({
                "resourceType": "Patient",
                "id": "p1",
                "meta": {"versionId": "1"},
                "name": [{"family": "Smith", "given": ["Ann"]}],
                "active": true
            }),
        );
        assert_eq!(entry.text, "Smith Ann");
    }

    #[test]
    fn test_noop_index_matches_nothing() {
        let index = NoopFullTextIndex;
        let entry = FullTextEntry::from_resource(
            "Patient",
            "p1",
            &json!({"resourceType": "Patient", "name": [{"family": "Smith"}]}),
        );
        tokio_test::block_on(index.index(vec![entry])).unwrap();
        assert!(
            tokio_test::block_on(index.query("Patient", "smith"))
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_memory_index_query() {
        let index = MemoryFullTextIndex::new();
        index
            .index(vec![
                FullTextEntry {
                    resource_type: "Patient".to_string(),
                    logical_id: "a".to_string(),
                    text: "Zoë Smith diabetic".to_string(),
                },
                FullTextEntry {
                    resource_type: "Patient".to_string(),
                    logical_id: "b".to_string(),
                    text: "John Smith".to_string(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(index.query("Patient", "smith").await.unwrap(), vec!["a", "b"]);
        assert_eq!(index.query("Patient", "zoe diab").await.unwrap(), vec!["a"]);
        assert!(index.query("Observation", "smith").await.unwrap().is_empty());

        index.remove("Patient", "a").await.unwrap();
        assert_eq!(index.query("Patient", "smith").await.unwrap(), vec!["b"]);

        index.purge("Patient").await.unwrap();
        assert_eq!(index.len("Patient"), 0);
    }
}
