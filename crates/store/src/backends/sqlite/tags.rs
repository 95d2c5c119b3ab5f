//! Tag catalog and per-version tag associations.

use async_trait::async_trait;
use rusqlite::{Connection, TransactionBehavior, params};

use crate::core::TagStore;
use crate::error::{ResourceError, StorageError, StorageResult};
use crate::types::{Tag, TagScheme};

use super::SqliteBackend;
use super::backend::internal_error;
use super::storage::{CurrentRow, load_current};

fn column(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn nullable(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Returns the catalog id of a tag, adding it on first use.
fn definition_id(conn: &Connection, tag: &Tag) -> StorageResult<i64> {
    let (scheme, system, code, display) = (
        tag.scheme.as_str(),
        column(&tag.system),
        column(&tag.code),
        column(&tag.display),
    );
    conn.prepare_cached(
        "INSERT OR IGNORE INTO tag_definitions (scheme, system, code, display)
         VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![scheme, system, code, display])?;

    Ok(conn
        .prepare_cached(
            "SELECT id FROM tag_definitions
             WHERE scheme = ?1 AND system = ?2 AND code = ?3 AND display = ?4",
        )?
        .query_row(params![scheme, system, code, display], |row| row.get(0))?)
}

/// Associates tags with one version of a resource.
pub(crate) fn attach(
    conn: &Connection,
    logical_id: &str,
    version: u64,
    tags: &[Tag],
) -> StorageResult<()> {
    for tag in tags {
        let tag_id = definition_id(conn, tag)?;
        conn.prepare_cached(
            "INSERT OR IGNORE INTO resource_tags (logical_id, version, tag_id)
             VALUES (?1, ?2, ?3)",
        )?
        .execute(params![logical_id, version as i64, tag_id])?;
    }
    Ok(())
}

fn tags_of_version(
    conn: &Connection,
    logical_id: &str,
    version: u64,
    limit: u32,
) -> StorageResult<Vec<Tag>> {
    let mut stmt = conn.prepare_cached(
        "SELECT d.scheme, d.system, d.code, d.display
         FROM resource_tags t
         JOIN tag_definitions d ON d.id = t.tag_id
         WHERE t.logical_id = ?1 AND t.version = ?2
         ORDER BY t.rowid
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![logical_id, version as i64, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(scheme, system, code, display)| {
            let scheme = TagScheme::parse(&scheme)
                .ok_or_else(|| internal_error(format!("Unknown tag scheme '{}'", scheme)))?;
            Ok(Tag {
                scheme,
                system: nullable(system),
                code: nullable(code),
                display: nullable(display),
            })
        })
        .collect()
}

/// Loads the current row and checks that `version` exists in its history.
fn require_version(
    conn: &Connection,
    resource_type: &str,
    id: &str,
    version: u64,
) -> StorageResult<CurrentRow> {
    let current = load_current(conn, resource_type, id)?.ok_or_else(|| {
        StorageError::Resource(ResourceError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })
    })?;

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM resource_history WHERE logical_id = ?1 AND version = ?2)",
        params![current.logical_id, version as i64],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StorageError::Resource(ResourceError::VersionNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version,
        }));
    }
    Ok(current)
}

#[async_trait]
impl TagStore for SqliteBackend {
    async fn attach_tags(
        &self,
        resource_type: &str,
        id: &str,
        version: u64,
        tags: &[Tag],
    ) -> StorageResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = require_version(&tx, resource_type, id, version)?;
        attach(&tx, &current.logical_id, version, tags)?;
        tx.commit()?;
        Ok(())
    }

    async fn tags_for(
        &self,
        resource_type: &str,
        id: &str,
        version: u64,
    ) -> StorageResult<Vec<Tag>> {
        let conn = self.get_connection()?;
        let current = require_version(&conn, resource_type, id, version)?;
        tags_of_version(
            &conn,
            &current.logical_id,
            version,
            self.store_config().tag_list_limit,
        )
    }

    async fn tags_for_resource(&self, resource_type: &str, id: &str) -> StorageResult<Vec<Tag>> {
        let conn = self.get_connection()?;
        let current = load_current(&conn, resource_type, id)?.ok_or_else(|| {
            StorageError::Resource(ResourceError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            })
        })?;
        tags_of_version(
            &conn,
            &current.logical_id,
            current.version,
            self.store_config().tag_list_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::core::ResourceStorage;
    use serde_json::json;

    fn create_test_backend() -> SqliteBackend {
        let backend = SqliteBackend::in_memory()
            .unwrap()
            .with_store_config(StoreConfig::default().with_validate_on_write(false))
            .unwrap();
        backend.init_schema().unwrap();
        backend
    }

    fn catalog_size(backend: &SqliteBackend) -> i64 {
        let conn = backend.get_connection().unwrap();
        conn.query_row("SELECT COUNT(*) FROM tag_definitions", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_tags_from_meta() {
        let backend = create_test_backend();
        let created = backend
            .create(
                "Patient",
                json!({
                    "resourceType": "Patient",
                    "meta": {
                        "tag": [{"system": "http://example.com/tags", "code": "vip"}],
                        "security": [{"system": "http://terminology.hl7.org/CodeSystem/v3-Confidentiality",
                                      "code": "R", "display": "restricted"}],
                        "profile": ["http://example.com/StructureDefinition/my-patient"]
                    }
                }),
                None,
            )
            .await
            .unwrap();

        let tags = backend.tags_for("Patient", created.id(), 1).await.unwrap();
        assert_eq!(tags.len(), 3);
        assert!(tags.contains(&Tag::tag("http://example.com/tags", "vip")));
        assert!(tags.contains(
            &Tag::security("http://terminology.hl7.org/CodeSystem/v3-Confidentiality", "R")
                .with_display("restricted")
        ));
        assert!(tags.contains(&Tag::profile("http://example.com/StructureDefinition/my-patient")));
    }

    #[tokio::test]
    async fn test_catalog_is_shared() {
        let backend = create_test_backend();
        let tagged = json!({
            "resourceType": "Patient",
            "meta": {"tag": [{"system": "http://example.com/tags", "code": "vip"}]}
        });

        let first = backend.create("Patient", tagged.clone(), None).await.unwrap();
        backend.create("Patient", tagged.clone(), None).await.unwrap();
        backend
            .update("Patient", first.id(), None, tagged)
            .await
            .unwrap();

        assert_eq!(catalog_size(&backend), 1);
        assert_eq!(backend.tags_for("Patient", first.id(), 1).await.unwrap().len(), 1);
        assert_eq!(backend.tags_for("Patient", first.id(), 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tags_are_per_version() {
        let backend = create_test_backend();
        let created = backend
            .create(
                "Patient",
                json!({"resourceType": "Patient",
                       "meta": {"tag": [{"system": "s", "code": "old"}]}}),
                None,
            )
            .await
            .unwrap();
        backend
            .update(
                "Patient",
                created.id(),
                None,
                json!({"resourceType": "Patient",
                       "meta": {"tag": [{"system": "s", "code": "new"}]}}),
            )
            .await
            .unwrap();

        let current = backend.tags_for_resource("Patient", created.id()).await.unwrap();
        assert_eq!(current, vec![Tag::tag("s", "new")]);

        let v1 = backend.tags_for("Patient", created.id(), 1).await.unwrap();
        assert_eq!(v1, vec![Tag::tag("s", "old")]);
    }

    #[tokio::test]
    async fn test_attach_tags_explicitly() {
        let backend = create_test_backend();
        let created = backend
            .create("Patient", json!({"resourceType": "Patient"}), None)
            .await
            .unwrap();

        backend
            .attach_tags("Patient", created.id(), 1, &[Tag::tag("s", "a"), Tag::tag("s", "a")])
            .await
            .unwrap();
        assert_eq!(backend.tags_for("Patient", created.id(), 1).await.unwrap().len(), 1);

        let err = backend
            .attach_tags("Patient", created.id(), 9, &[Tag::tag("s", "a")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Resource(ResourceError::VersionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_tag_list_limit() {
        let backend = SqliteBackend::in_memory()
            .unwrap()
            .with_store_config(StoreConfig {
                tag_list_limit: 2,
                validate_on_write: false,
                ..StoreConfig::default()
            })
            .unwrap();
        backend.init_schema().unwrap();

        let created = backend
            .create(
                "Patient",
                json!({"resourceType": "Patient", "meta": {"tag": [
                    {"system": "s", "code": "a"},
                    {"system": "s", "code": "b"},
                    {"system": "s", "code": "c"}
                ]}}),
                None,
            )
            .await
            .unwrap();

        let tags = backend.tags_for("Patient", created.id(), 1).await.unwrap();
        assert_eq!(tags, vec![Tag::tag("s", "a"), Tag::tag("s", "b")]);
    }
}
