//! Profile and terminology resolution from stored conformance resources.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::error::StorageResult;
use crate::validation::{
    ProfileResolver, TerminologyResolver, canonical_url, value_set_contains,
};

use super::SqliteBackend;
use super::backend::serialization_error;

/// Newest live resource of `resource_type` whose `url` matches.
fn find_by_url(conn: &Connection, resource_type: &str, url: &str) -> StorageResult<Option<Value>> {
    let data: Option<Vec<u8>> = conn
        .prepare_cached(
            "SELECT r.data FROM resources r
             JOIN idx_uri u ON u.logical_id = r.logical_id
             WHERE r.resource_type = ?1 AND r.is_deleted = 0
               AND u.param_name = 'url' AND u.value = ?2
             ORDER BY r.last_updated_ms DESC
             LIMIT 1",
        )?
        .query_row(params![resource_type, canonical_url(url)], |row| row.get(0))
        .optional()?;

    data.map(|bytes| {
        serde_json::from_slice(&bytes)
            .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))
    })
    .transpose()
}

#[async_trait]
impl ProfileResolver for SqliteBackend {
    async fn resolve_profile(&self, url: &str) -> StorageResult<Option<Value>> {
        let conn = self.get_connection()?;
        find_by_url(&conn, "StructureDefinition", url)
    }
}

#[async_trait]
impl TerminologyResolver for SqliteBackend {
    async fn validate_code(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> StorageResult<Option<bool>> {
        let found = {
            let conn = self.get_connection()?;
            find_by_url(&conn, "ValueSet", value_set)?
        };
        Ok(found.and_then(|vs| value_set_contains(&vs, system, code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceStorage;
    use serde_json::json;

    fn create_test_backend() -> SqliteBackend {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        backend
    }

    #[tokio::test]
    async fn test_resolve_stored_profile() {
        let backend = create_test_backend();
        backend
            .create(
                "StructureDefinition",
                json!({
                    "resourceType": "StructureDefinition",
                    "url": "http://example.com/StructureDefinition/p",
                    "type": "Patient"
                }),
                None,
            )
            .await
            .unwrap();

        let found = backend
            .resolve_profile("http://example.com/StructureDefinition/p|1.0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["type"], "Patient");

        assert!(
            backend
                .resolve_profile("http://example.com/StructureDefinition/other")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_deleted_profile_is_not_resolved() {
        let backend = create_test_backend();
        let sd = backend
            .create(
                "StructureDefinition",
                json!({"resourceType": "StructureDefinition",
                       "url": "http://example.com/StructureDefinition/p"}),
                None,
            )
            .await
            .unwrap();
        backend
            .delete("StructureDefinition", sd.id(), false)
            .await
            .unwrap();

        assert!(
            backend
                .resolve_profile("http://example.com/StructureDefinition/p")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_validate_code_against_stored_value_set() {
        let backend = create_test_backend();
        backend
            .create(
                "ValueSet",
                json!({
                    "resourceType": "ValueSet",
                    "url": "http://example.com/ValueSet/colors",
                    "compose": {"include": [{
                        "system": "http://example.com/colors",
                        "concept": [{"code": "red"}, {"code": "blue"}]
                    }]}
                }),
                None,
            )
            .await
            .unwrap();

        let vs = "http://example.com/ValueSet/colors";
        assert_eq!(
            backend
                .validate_code(vs, Some("http://example.com/colors"), "red")
                .await
                .unwrap(),
            Some(true)
        );
        assert_eq!(
            backend
                .validate_code(vs, Some("http://example.com/colors"), "green")
                .await
                .unwrap(),
            Some(false)
        );
        assert_eq!(
            backend
                .validate_code("http://example.com/ValueSet/unknown", None, "red")
                .await
                .unwrap(),
            None
        );
    }
}
