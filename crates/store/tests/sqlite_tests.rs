//! SQLite backend integration tests.
//!
//! These tests exercise the store through its public traits only.

mod common;

use serde_json::json;

use helios_store::backends::sqlite::SqliteBackend;
use helios_store::config::StoreConfig;
use helios_store::core::{
    PurgableStorage, ReferenceGraph, ResourceStorage, SearchProvider, TagStore,
};
use helios_store::error::{ConcurrencyError, ResourceError, StorageError};
use helios_store::types::{ResourceMethod, SearchQuery, Tag};

use common::*;

// ============================================================================
// Record Store
// ============================================================================

#[tokio::test]
async fn test_create_read_update_history() {
    let backend = create_backend();

    let created = backend
        .create("Patient", patient("Smith"), None)
        .await
        .unwrap();
    assert_eq!(created.version(), 1);
    assert_eq!(created.content()["id"], created.id());
    assert_eq!(created.content()["meta"]["versionId"], "1");

    let mut content = created.content().clone();
    content["name"][0]["family"] = json!("Smythe");
    let updated = backend
        .update("Patient", created.id(), Some(1), content)
        .await
        .unwrap();
    assert_eq!(updated.version(), 2);
    assert_eq!(updated.created_at().timestamp_millis(), created.created_at().timestamp_millis());

    let history = backend.history("Patient", created.id()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].resource.version(), 2);
    assert_eq!(history[0].method, ResourceMethod::Put);
    assert_eq!(history[1].method, ResourceMethod::Post);

    // Earlier versions are never rewritten
    let v1 = backend.vread("Patient", created.id(), 1).await.unwrap();
    assert_eq!(v1.content()["name"][0]["family"], "Smith");
}

#[tokio::test]
async fn test_stale_update_is_rejected() {
    let backend = create_backend();
    let created = backend
        .create("Patient", patient("Smith"), None)
        .await
        .unwrap();
    backend
        .update("Patient", created.id(), Some(1), patient("Jones"))
        .await
        .unwrap();

    let err = backend
        .update("Patient", created.id(), Some(1), patient("Brown"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Concurrency(ConcurrencyError::VersionConflict { .. })
    ));
    assert_eq!(backend.read("Patient", created.id()).await.unwrap().version(), 2);
}

#[tokio::test]
async fn test_delete_then_read_is_gone() {
    let backend = create_backend();
    let created = backend
        .create("Patient", patient("Smith"), Some("to-delete"))
        .await
        .unwrap();

    backend.delete("Patient", "to-delete", false).await.unwrap();
    let err = backend.read("Patient", "to-delete").await.unwrap_err();
    assert!(matches!(err, StorageError::Resource(ResourceError::Gone { .. })));

    // The version before the tombstone is still readable
    let v1 = backend.vread("Patient", created.id(), 1).await.unwrap();
    assert_eq!(v1.content()["name"][0]["family"], "Smith");
    assert!(!backend.exists("Patient", "to-delete").await.unwrap());
}

#[tokio::test]
async fn test_forced_ids() {
    let backend = create_backend();

    let created = backend
        .create("Patient", patient("Smith"), Some("mrn-1001"))
        .await
        .unwrap();
    assert_eq!(created.id(), "mrn-1001");
    assert_ne!(created.logical_id(), "mrn-1001");

    // Same forced id on another type is independent
    backend
        .create("Organization", organization("Acme"), Some("mrn-1001"))
        .await
        .unwrap();

    let err = backend
        .create("Patient", patient("Jones"), Some("mrn-1001"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::IdentifierConflict { .. })
    ));

    let read = backend.read("Patient", "mrn-1001").await.unwrap();
    assert_eq!(read.logical_id(), created.logical_id());
}

#[tokio::test]
async fn test_purge_removes_everything() {
    let backend = create_backend();
    backend
        .create("Patient", patient("Smith"), Some("purged"))
        .await
        .unwrap();

    backend.purge("Patient", "purged").await.unwrap();
    assert!(matches!(
        backend.read("Patient", "purged").await,
        Err(StorageError::Resource(ResourceError::NotFound { .. }))
    ));
    assert_eq!(backend.count(Some("Patient")).await.unwrap(), 0);

    // The forced id is free again
    backend
        .create("Patient", patient("Jones"), Some("purged"))
        .await
        .unwrap();
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_search_never_returns_stale_values() {
    let backend = create_backend();
    let created = backend
        .create("Patient", patient("Smith"), None)
        .await
        .unwrap();
    backend
        .update("Patient", created.id(), None, patient("Jones"))
        .await
        .unwrap();

    let smith = SearchQuery::from_pairs("Patient", [("family", "smith")]).unwrap();
    assert!(backend.search(&smith).await.unwrap().resources.is_empty());

    let jones = SearchQuery::from_pairs("Patient", [("family", "jones")]).unwrap();
    let result = backend.search(&jones).await.unwrap();
    assert_eq!(result.resources.len(), 1);
    assert_eq!(result.resources.items[0].version(), 2);
}

#[tokio::test]
async fn test_search_observations_by_subject_with_include() {
    let backend = create_backend();
    backend
        .create("Patient", patient("Smith"), Some("smith"))
        .await
        .unwrap();
    backend
        .create("Observation", observation_for("Patient/smith"), None)
        .await
        .unwrap();
    backend
        .create("Observation", observation_for("Patient/someone-else"), None)
        .await
        .unwrap();

    let query = SearchQuery::from_pairs(
        "Observation",
        [("subject", "Patient/smith"), ("_include", "Observation:subject")],
    )
    .unwrap();
    let result = backend.search(&query).await.unwrap();
    assert_eq!(result.resources.len(), 1);
    assert_eq!(result.included.len(), 1);
    assert_eq!(result.included[0].id(), "smith");

    // The unresolved reference still matches by what was written
    let query =
        SearchQuery::from_pairs("Observation", [("subject", "Patient/someone-else")]).unwrap();
    assert_eq!(backend.search(&query).await.unwrap().resources.len(), 1);
}

// ============================================================================
// Reference Graph
// ============================================================================

#[tokio::test]
async fn test_delete_with_inbound_reference() {
    let backend = create_backend();
    backend
        .create("Patient", patient("Smith"), Some("smith"))
        .await
        .unwrap();
    let obs = backend
        .create("Observation", observation_for("Patient/smith"), None)
        .await
        .unwrap();

    let inbound = backend.inbound_references("Patient", "smith").await.unwrap();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].source_id, obs.logical_id());
    assert_eq!(inbound[0].source_path, "Observation.subject");

    let err = backend.delete("Patient", "smith", false).await.unwrap_err();
    let outcome = err.outcome().expect("conflict carries an outcome");
    assert!(outcome.contains_text("Unable to delete Patient/smith"));
    assert!(outcome.contains_text("in path Observation.subject"));

    backend.delete("Observation", obs.id(), false).await.unwrap();
    assert!(
        backend
            .inbound_references("Patient", "smith")
            .await
            .unwrap()
            .is_empty()
    );
    backend.delete("Patient", "smith", false).await.unwrap();
}

#[tokio::test]
async fn test_delete_without_integrity_enforcement() {
    let backend = create_backend_with(StoreConfig::default().with_referential_integrity(false));
    backend
        .create("Patient", patient("Smith"), Some("smith"))
        .await
        .unwrap();
    backend
        .create("Observation", observation_for("Patient/smith"), None)
        .await
        .unwrap();

    backend.delete("Patient", "smith", false).await.unwrap();
}

// ============================================================================
// Tags
// ============================================================================

#[tokio::test]
async fn test_tags_follow_versions() {
    let backend = create_backend();
    let mut content = patient("Smith");
    content["meta"] = json!({"tag": [{"system": "http://example.com/tags", "code": "vip"}]});
    let created = backend.create("Patient", content, None).await.unwrap();

    backend
        .update("Patient", created.id(), None, patient("Smith"))
        .await
        .unwrap();

    assert_eq!(
        backend.tags_for("Patient", created.id(), 1).await.unwrap(),
        vec![Tag::tag("http://example.com/tags", "vip")]
    );
    assert!(
        backend
            .tags_for_resource("Patient", created.id())
            .await
            .unwrap()
            .is_empty()
    );
}

// ============================================================================
// Configuration and files
// ============================================================================

#[tokio::test]
async fn test_file_database_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        backend.init_schema().unwrap();
        backend
            .create("Patient", patient("Smith"), Some("durable"))
            .await
            .unwrap();
    }

    let backend = SqliteBackend::open(&path).unwrap();
    backend.init_schema().unwrap();
    let read = backend.read("Patient", "durable").await.unwrap();
    assert_eq!(read.content()["name"][0]["family"], "Smith");

    let query = SearchQuery::from_pairs("Patient", [("family", "smith")]).unwrap();
    assert_eq!(backend.search(&query).await.unwrap().resources.len(), 1);
}

#[tokio::test]
async fn test_config_file_drives_page_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(
        &path,
        r#"{"default_page_size": 2, "max_page_size": 10, "validate_on_write": false}"#,
    )
    .unwrap();

    let config = StoreConfig::from_file(&path).unwrap();
    assert!(!config.validate_on_write);
    let backend = create_backend_with(config);

    for i in 0..3 {
        let id = format!("p{}", i);
        backend
            .create("Patient", patient("Paged"), Some(id.as_str()))
            .await
            .unwrap();
    }

    let query = SearchQuery::from_pairs("Patient", [("family", "paged")]).unwrap();
    let first = backend.search(&query).await.unwrap();
    assert_eq!(first.resources.len(), 2);
    let cursor = first.next_cursor().expect("a second page").to_string();

    let second = backend.search(&query.clone().with_cursor(cursor)).await.unwrap();
    assert_eq!(second.resources.len(), 1);
    assert!(second.next_cursor().is_none());
}
