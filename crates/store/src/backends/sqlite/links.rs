//! Reference link rows and the ReferenceGraph implementation.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::core::ReferenceGraph;
use crate::error::StorageResult;
use crate::references::{ParsedReference, ReferenceLink, extract_references};

use super::SqliteBackend;
use super::storage::{load_current, resolve_logical_id};

/// Link columns plus the source's forced id; queries join `resources r`.
const LINK_COLUMNS: &str = "l.source_type, l.source_id, r.forced_id, l.source_path, \
     l.target_type, l.target_id, l.target_uri";

fn read_link(row: &Row<'_>) -> rusqlite::Result<ReferenceLink> {
    Ok(ReferenceLink {
        source_type: row.get(0)?,
        source_id: row.get(1)?,
        source_forced_id: row.get(2)?,
        source_path: row.get(3)?,
        target_type: row.get(4)?,
        target_id: row.get(5)?,
        target_uri: row.get(6)?,
    })
}

/// Resolves every reference in the content against stored resources.
///
/// `Type/id` references that match a stored resource carry its logical id;
/// the rest keep the reference as written in `target_uri`.
pub(crate) fn resolve_links(
    conn: &Connection,
    resource_type: &str,
    logical_id: &str,
    content: &Value,
    base_url: Option<&str>,
) -> StorageResult<Vec<ReferenceLink>> {
    let source_forced_id: Option<String> = conn
        .prepare_cached("SELECT forced_id FROM resources WHERE logical_id = ?1")?
        .query_row([logical_id], |row| row.get(0))
        .optional()?
        .flatten();
    let mut links = Vec::new();

    for raw in extract_references(resource_type, content) {
        let link = match ParsedReference::parse(&raw.reference, base_url) {
            ParsedReference::Local {
                resource_type: target_type,
                id,
            } => {
                let target_id = resolve_logical_id(conn, &target_type, &id)?;
                ReferenceLink {
                    source_type: resource_type.to_string(),
                    source_id: logical_id.to_string(),
                    source_forced_id: source_forced_id.clone(),
                    source_path: raw.path,
                    target_uri: target_id.is_none().then(|| raw.reference.clone()),
                    target_type: Some(target_type),
                    target_id,
                }
            }
            ParsedReference::External(uri) => ReferenceLink {
                source_type: resource_type.to_string(),
                source_id: logical_id.to_string(),
                source_forced_id: source_forced_id.clone(),
                source_path: raw.path,
                target_type: None,
                target_id: None,
                target_uri: Some(uri),
            },
        };
        if !links.contains(&link) {
            links.push(link);
        }
    }

    Ok(links)
}

/// Replaces the outbound links of a resource.
pub(crate) fn replace_links(
    conn: &Connection,
    source_id: &str,
    links: &[ReferenceLink],
) -> StorageResult<()> {
    clear_links(conn, source_id)?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO resource_links
            (source_id, source_type, source_path, target_type, target_id, target_uri)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for link in links {
        stmt.execute(params![
            source_id,
            link.source_type,
            link.source_path,
            link.target_type,
            link.target_id,
            link.target_uri
        ])?;
    }
    Ok(())
}

pub(crate) fn clear_links(conn: &Connection, source_id: &str) -> StorageResult<()> {
    conn.prepare_cached("DELETE FROM resource_links WHERE source_id = ?1")?
        .execute([source_id])?;
    Ok(())
}

/// Links from other live resources to the given logical id.
///
/// Self-references never count; tombstones hold no links.
pub(crate) fn inbound(conn: &Connection, logical_id: &str) -> StorageResult<Vec<ReferenceLink>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM resource_links l
         JOIN resources r ON r.logical_id = l.source_id
         WHERE l.target_id = ?1 AND l.source_id != ?1 AND r.is_deleted = 0
         ORDER BY l.source_type, l.source_id, l.source_path",
        LINK_COLUMNS
    ))?;
    let links = stmt
        .query_map([logical_id], read_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Links recorded for the current version of a resource, in document order.
pub(crate) fn outbound(conn: &Connection, logical_id: &str) -> StorageResult<Vec<ReferenceLink>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM resource_links l
         LEFT JOIN resources r ON r.logical_id = l.source_id
         WHERE l.source_id = ?1
         ORDER BY l.rowid",
        LINK_COLUMNS
    ))?;
    let links = stmt
        .query_map([logical_id], read_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Turns links to a purged resource back into unresolved references.
pub(crate) fn unresolve_inbound(
    conn: &Connection,
    logical_id: &str,
    reference: &str,
) -> StorageResult<()> {
    conn.execute(
        "UPDATE resource_links SET target_id = NULL, target_uri = ?2 WHERE target_id = ?1",
        params![logical_id, reference],
    )?;
    Ok(())
}

impl SqliteBackend {
    /// Logical id of the live resource addressed by `id`.
    fn live_logical_id(
        conn: &Connection,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Option<String>> {
        Ok(load_current(conn, resource_type, id)?
            .filter(|row| !row.is_deleted)
            .map(|row| row.logical_id))
    }
}

#[async_trait]
impl ReferenceGraph for SqliteBackend {
    async fn resolve_id(&self, resource_type: &str, id: &str) -> StorageResult<Option<String>> {
        let conn = self.get_connection()?;
        Self::live_logical_id(&conn, resource_type, id)
    }

    async fn inbound_references(
        &self,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Vec<ReferenceLink>> {
        let conn = self.get_connection()?;
        match Self::live_logical_id(&conn, resource_type, id)? {
            Some(logical_id) => inbound(&conn, &logical_id),
            None => Ok(Vec::new()),
        }
    }

    async fn outbound_references(
        &self,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Vec<ReferenceLink>> {
        let conn = self.get_connection()?;
        match Self::live_logical_id(&conn, resource_type, id)? {
            Some(logical_id) => outbound(&conn, &logical_id),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceStorage;
    use crate::error::{ConcurrencyError, StorageError};
    use serde_json::json;

    fn create_test_backend() -> SqliteBackend {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        backend
    }

    #[tokio::test]
    async fn test_links_resolve_and_track_current_version() {
        let backend = create_test_backend();
        let org = backend
            .create("Organization", json!({"resourceType": "Organization"}), Some("acme"))
            .await
            .unwrap();
        let patient = backend
            .create(
                "Patient",
                json!({
                    "resourceType": "Patient",
                    "managingOrganization": {"reference": "Organization/acme"},
                    "generalPractitioner": [
                        {"reference": "Practitioner/unknown"},
                        {"reference": "http://other.org/fhir/Practitioner/1"}
                    ]
                }),
                None,
            )
            .await
            .unwrap();

        let outbound = backend
            .outbound_references("Patient", patient.id())
            .await
            .unwrap();
        assert_eq!(outbound.len(), 3);

        let managing = outbound
            .iter()
            .find(|l| l.source_path == "Patient.managingOrganization")
            .unwrap();
        assert_eq!(managing.target_id.as_deref(), Some(org.logical_id()));

        let practitioners: Vec<_> = outbound
            .iter()
            .filter(|l| l.source_path == "Patient.generalPractitioner")
            .collect();
        assert!(practitioners.iter().all(|l| !l.is_resolved()));
        assert!(practitioners.iter().any(|l| {
            l.target_type.as_deref() == Some("Practitioner")
                && l.target_uri.as_deref() == Some("Practitioner/unknown")
        }));
        assert!(practitioners.iter().any(|l| l.target_type.is_none()));

        let inbound = backend.inbound_references("Organization", "acme").await.unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].source_path, "Patient.managingOrganization");

        // Removing the reference removes the link
        backend
            .update("Patient", patient.id(), None, json!({"resourceType": "Patient"}))
            .await
            .unwrap();
        assert!(
            backend
                .inbound_references("Organization", "acme")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_delete_blocked_by_inbound_reference() {
        let backend = create_test_backend();
        backend
            .create("Organization", json!({"resourceType": "Organization"}), Some("acme"))
            .await
            .unwrap();
        let patient = backend
            .create(
                "Patient",
                json!({"resourceType": "Patient",
                       "managingOrganization": {"reference": "Organization/acme"}}),
                None,
            )
            .await
            .unwrap();

        let err = backend.delete("Organization", "acme", false).await.unwrap_err();
        match &err {
            StorageError::Concurrency(ConcurrencyError::ReferentialConflict { outcome, .. }) => {
                assert!(outcome.contains_text("Unable to delete Organization/acme"));
            }
            other => panic!("expected referential conflict, got {:?}", other),
        }

        // Once the referrer is gone the delete goes through
        backend.delete("Patient", patient.id(), false).await.unwrap();
        backend.delete("Organization", "acme", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_conflict_names_referrer_by_forced_id() {
        let backend = create_test_backend();
        backend
            .create("Organization", json!({"resourceType": "Organization"}), Some("acme"))
            .await
            .unwrap();
        let patient = backend
            .create(
                "Patient",
                json!({"resourceType": "Patient",
                       "managingOrganization": {"reference": "Organization/acme"}}),
                Some("mrn-42"),
            )
            .await
            .unwrap();

        let inbound = backend
            .inbound_references("Organization", "acme")
            .await
            .unwrap();
        assert_eq!(inbound[0].source_id, patient.logical_id());
        assert_eq!(inbound[0].source_public_id(), "mrn-42");

        let err = backend.delete("Organization", "acme", false).await.unwrap_err();
        let outcome = err.outcome().unwrap();
        assert!(outcome.contains_text(
            "First reference found was resource Patient/mrn-42 in path Patient.managingOrganization"
        ));
        assert!(!outcome.contains_text(patient.logical_id()));
    }

    #[tokio::test]
    async fn test_forced_delete_and_self_reference() {
        let backend = create_test_backend();
        backend
            .create(
                "Organization",
                json!({"resourceType": "Organization",
                       "partOf": {"reference": "Organization/self"}}),
                Some("self"),
            )
            .await
            .unwrap();
        // A resource referring only to itself can be deleted
        backend.delete("Organization", "self", false).await.unwrap();

        backend
            .create("Organization", json!({"resourceType": "Organization"}), Some("parent"))
            .await
            .unwrap();
        backend
            .create(
                "Organization",
                json!({"resourceType": "Organization",
                       "partOf": {"reference": "Organization/parent"}}),
                None,
            )
            .await
            .unwrap();
        backend.delete("Organization", "parent", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_id_ignores_deleted() {
        let backend = create_test_backend();
        backend
            .create("Patient", json!({"resourceType": "Patient"}), Some("gone"))
            .await
            .unwrap();
        assert!(backend.resolve_id("Patient", "gone").await.unwrap().is_some());

        backend.delete("Patient", "gone", false).await.unwrap();
        assert!(backend.resolve_id("Patient", "gone").await.unwrap().is_none());
        assert!(backend.resolve_id("Patient", "never").await.unwrap().is_none());
    }
}
