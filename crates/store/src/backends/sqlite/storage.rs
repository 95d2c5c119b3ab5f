//! ResourceStorage implementation for SQLite.
//!
//! Every write runs in one IMMEDIATE transaction that changes the record,
//! appends the history snapshot and re-projects index, link and tag rows.
//! Any failure drops the transaction and rolls the whole unit back.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{PurgableStorage, ResourceStorage};
use crate::error::{
    ConcurrencyError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::search::FullTextEntry;
use crate::types::{HistoryEntry, ResourceMethod, StoredResource, Tag};
use crate::validation::delete_conflict_outcome;

use super::SqliteBackend;
use super::backend::{internal_error, serialization_error};
use super::{index, links, tags};

/// Columns read by [`read_current_row`], in order.
pub(crate) const CURRENT_COLUMNS: &str = "logical_id, forced_id, version, data, created_at, \
     last_updated, is_deleted, deleted_at";

/// The current row of a resource.
#[derive(Debug)]
pub(crate) struct CurrentRow {
    pub logical_id: String,
    pub forced_id: Option<String>,
    pub version: u64,
    pub data: Vec<u8>,
    pub created_at: String,
    pub last_updated: String,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
}

impl CurrentRow {
    /// The id clients see: the forced id when present.
    pub fn public_id(&self) -> &str {
        self.forced_id.as_deref().unwrap_or(&self.logical_id)
    }

    fn method(&self) -> ResourceMethod {
        if self.is_deleted {
            ResourceMethod::Delete
        } else if self.version == 1 {
            ResourceMethod::Post
        } else {
            ResourceMethod::Put
        }
    }

    pub fn into_stored(self, resource_type: &str) -> StorageResult<StoredResource> {
        let method = self.method();
        let content: Value = serde_json::from_slice(&self.data)
            .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))?;
        let deleted_at = self.deleted_at.as_deref().map(parse_timestamp).transpose()?;

        Ok(StoredResource::from_storage(
            resource_type,
            self.logical_id,
            self.forced_id,
            self.version,
            content,
            parse_timestamp(&self.created_at)?,
            parse_timestamp(&self.last_updated)?,
            deleted_at,
            Some(method),
        ))
    }
}

pub(crate) fn read_current_row(row: &Row<'_>) -> rusqlite::Result<CurrentRow> {
    Ok(CurrentRow {
        logical_id: row.get(0)?,
        forced_id: row.get(1)?,
        version: row.get::<_, i64>(2)? as u64,
        data: row.get(3)?,
        created_at: row.get(4)?,
        last_updated: row.get(5)?,
        is_deleted: row.get::<_, i64>(6)? != 0,
        deleted_at: row.get(7)?,
    })
}

/// Maps a forced id or logical id to the logical id of a stored resource,
/// deleted or not.
pub(crate) fn resolve_logical_id(
    conn: &Connection,
    resource_type: &str,
    id: &str,
) -> StorageResult<Option<String>> {
    let forced: Option<String> = conn
        .prepare_cached(
            "SELECT logical_id FROM forced_ids WHERE resource_type = ?1 AND forced_id = ?2",
        )?
        .query_row(params![resource_type, id], |row| row.get(0))
        .optional()?;
    if forced.is_some() {
        return Ok(forced);
    }

    Ok(conn
        .prepare_cached(
            "SELECT logical_id FROM resources WHERE resource_type = ?1 AND logical_id = ?2",
        )?
        .query_row(params![resource_type, id], |row| row.get(0))
        .optional()?)
}

pub(crate) fn load_current(
    conn: &Connection,
    resource_type: &str,
    id: &str,
) -> StorageResult<Option<CurrentRow>> {
    let Some(logical_id) = resolve_logical_id(conn, resource_type, id)? else {
        return Ok(None);
    };

    Ok(conn
        .prepare_cached(&format!(
            "SELECT {} FROM resources WHERE logical_id = ?1",
            CURRENT_COLUMNS
        ))?
        .query_row([&logical_id], read_current_row)
        .optional()?)
}

pub(crate) fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| serialization_error(format!("Invalid stored timestamp '{}': {}", s, e)))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn not_found(resource_type: &str, id: &str) -> StorageError {
    StorageError::Resource(ResourceError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    })
}

fn invalid_request(message: impl Into<String>) -> StorageError {
    StorageError::Validation(ValidationError::InvalidRequest {
        message: message.into(),
    })
}

/// Writes the record metadata the store owns into the content.
fn stamp_content(
    content: &mut Value,
    resource_type: &str,
    id: &str,
    version: u64,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let obj = content
        .as_object_mut()
        .ok_or_else(|| invalid_request("Resource must be a JSON object"))?;

    obj.insert(
        "resourceType".to_string(),
        Value::String(resource_type.to_string()),
    );
    obj.insert("id".to_string(), Value::String(id.to_string()));

    let meta = obj
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("versionId".to_string(), Value::String(version.to_string()));
        meta.insert("lastUpdated".to_string(), Value::String(format_timestamp(now)));
    }
    Ok(())
}

fn insert_history(
    conn: &Connection,
    logical_id: &str,
    version: u64,
    resource_type: &str,
    data: &[u8],
    last_updated: &str,
    method: ResourceMethod,
) -> StorageResult<()> {
    conn.prepare_cached(
        "INSERT INTO resource_history
            (logical_id, version, resource_type, data, last_updated, method, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(params![
        logical_id,
        version as i64,
        resource_type,
        data,
        last_updated,
        method.as_str(),
        (method == ResourceMethod::Delete) as i64
    ])?;
    Ok(())
}

impl SqliteBackend {
    fn check_resource_type(&self, resource_type: &str) -> StorageResult<()> {
        if self.registry().contains(resource_type) {
            Ok(())
        } else {
            Err(StorageError::Resource(ResourceError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            }))
        }
    }

    /// Runs the validator's content rules when write validation is enabled.
    async fn check_content(&self, resource_type: &str, resource: &Value) -> StorageResult<()> {
        if !resource.is_object() {
            return Err(invalid_request("Resource must be a JSON object"));
        }
        if !self.store_config().validate_on_write {
            return Ok(());
        }

        let outcome = self
            .validator()
            .validate_content(resource_type, resource)
            .await?;
        if outcome.has_errors() {
            tracing::debug!(resource_type, "Write rejected: {}", outcome.summary());
            return Err(ValidationError::ValidationFailed { outcome }.into());
        }
        Ok(())
    }

    /// Recomputes every derived row for the current version of a resource.
    pub(crate) fn project(
        &self,
        conn: &Connection,
        resource_type: &str,
        logical_id: &str,
        version: u64,
        content: &Value,
    ) -> StorageResult<()> {
        let values = self
            .extractor()
            .extract(content, resource_type)
            .map_err(|e| {
                internal_error(format!(
                    "Failed to extract search values for {}/{}: {}",
                    resource_type, logical_id, e
                ))
            })?;
        index::clear_index(conn, logical_id)?;
        index::write_index(conn, resource_type, logical_id, &values)?;

        let resolved = links::resolve_links(
            conn,
            resource_type,
            logical_id,
            content,
            self.store_config().base_url.as_deref(),
        )?;
        links::replace_links(conn, logical_id, &resolved)?;

        let found = Tag::extract_from(content);
        tags::attach(conn, logical_id, version, &found)?;

        tracing::debug!(
            resource_type,
            logical_id,
            version,
            index_values = values.len(),
            links = resolved.len(),
            tags = found.len(),
            "Projected derived rows"
        );
        Ok(())
    }

    /// Hands a committed version to the full-text index. Failures are logged
    /// and never undo the commit.
    async fn index_full_text(&self, resource: &StoredResource) {
        let entry = FullTextEntry::from_resource(
            resource.resource_type(),
            resource.logical_id(),
            resource.content(),
        );
        if let Err(e) = self.full_text().index(vec![entry]).await {
            tracing::warn!(
                resource_type = resource.resource_type(),
                logical_id = resource.logical_id(),
                "Failed to update full-text index: {}",
                e
            );
        }
    }

    async fn remove_full_text(&self, resource_type: &str, logical_id: &str) {
        if let Err(e) = self.full_text().remove(resource_type, logical_id).await {
            tracing::warn!(
                resource_type,
                logical_id,
                "Failed to remove resource from full-text index: {}",
                e
            );
        }
    }

    fn create_sync(
        &self,
        resource_type: &str,
        mut content: Value,
        forced_id: Option<&str>,
    ) -> StorageResult<StoredResource> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(forced_id) = forced_id {
            // A forced id may not shadow another forced id or a logical id of the same type
            if resolve_logical_id(&tx, resource_type, forced_id)?.is_some() {
                return Err(StorageError::Resource(ResourceError::IdentifierConflict {
                    resource_type: resource_type.to_string(),
                    forced_id: forced_id.to_string(),
                }));
            }
        }

        let logical_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let last_updated = format_timestamp(now);
        stamp_content(
            &mut content,
            resource_type,
            forced_id.unwrap_or(&logical_id),
            1,
            now,
        )?;
        let data = serde_json::to_vec(&content)
            .map_err(|e| serialization_error(format!("Failed to serialize resource: {}", e)))?;

        tx.execute(
            "INSERT INTO resources
                (logical_id, resource_type, forced_id, version, data, created_at,
                 last_updated, last_updated_ms, is_deleted)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5, ?6, 0)",
            params![
                logical_id,
                resource_type,
                forced_id,
                data,
                last_updated,
                now.timestamp_millis()
            ],
        )?;
        insert_history(
            &tx,
            &logical_id,
            1,
            resource_type,
            &data,
            &last_updated,
            ResourceMethod::Post,
        )?;
        if let Some(forced_id) = forced_id {
            tx.execute(
                "INSERT INTO forced_ids (resource_type, forced_id, logical_id) VALUES (?1, ?2, ?3)",
                params![resource_type, forced_id, logical_id],
            )?;
        }

        self.project(&tx, resource_type, &logical_id, 1, &content)?;
        tx.commit()?;

        tracing::debug!(resource_type, logical_id = %logical_id, forced_id, "Created resource");

        Ok(StoredResource::from_storage(
            resource_type,
            logical_id,
            forced_id.map(String::from),
            1,
            content,
            now,
            now,
            None,
            Some(ResourceMethod::Post),
        ))
    }

    fn update_sync(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: Option<u64>,
        mut content: Value,
    ) -> StorageResult<StoredResource> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current =
            load_current(&tx, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(StorageError::Concurrency(ConcurrencyError::VersionConflict {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                    expected_version: expected,
                    actual_version: current.version,
                }));
            }
        }

        if let Some(content_id) = content.get("id").and_then(|v| v.as_str()) {
            if content_id != id && content_id != current.public_id() {
                return Err(invalid_request(format!(
                    "Resource id '{}' does not match the target id '{}'",
                    content_id, id
                )));
            }
        }

        let new_version = current.version + 1;
        let now = Utc::now();
        let last_updated = format_timestamp(now);
        stamp_content(
            &mut content,
            resource_type,
            current.public_id(),
            new_version,
            now,
        )?;
        let data = serde_json::to_vec(&content)
            .map_err(|e| serialization_error(format!("Failed to serialize resource: {}", e)))?;

        tx.execute(
            "UPDATE resources
             SET version = ?1, data = ?2, last_updated = ?3, last_updated_ms = ?4,
                 is_deleted = 0, deleted_at = NULL
             WHERE logical_id = ?5",
            params![
                new_version as i64,
                data,
                last_updated,
                now.timestamp_millis(),
                current.logical_id
            ],
        )?;
        insert_history(
            &tx,
            &current.logical_id,
            new_version,
            resource_type,
            &data,
            &last_updated,
            ResourceMethod::Put,
        )?;

        self.project(&tx, resource_type, &current.logical_id, new_version, &content)?;
        tx.commit()?;

        tracing::debug!(
            resource_type,
            logical_id = %current.logical_id,
            version = new_version,
            revived = current.is_deleted,
            "Updated resource"
        );

        Ok(StoredResource::from_storage(
            resource_type,
            current.logical_id.clone(),
            current.forced_id.clone(),
            new_version,
            content,
            parse_timestamp(&current.created_at)?,
            now,
            None,
            Some(ResourceMethod::Put),
        ))
    }

    fn delete_sync(
        &self,
        resource_type: &str,
        id: &str,
        force: bool,
    ) -> StorageResult<StoredResource> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current =
            load_current(&tx, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;

        if current.is_deleted {
            return current.into_stored(resource_type);
        }

        if self.store_config().enforce_referential_integrity_on_delete && !force {
            let inbound = links::inbound(&tx, &current.logical_id)?;
            if let Some(first) = inbound.first() {
                return Err(StorageError::Concurrency(
                    ConcurrencyError::ReferentialConflict {
                        resource_type: resource_type.to_string(),
                        id: id.to_string(),
                        outcome: delete_conflict_outcome(resource_type, id, first),
                    },
                ));
            }
        }

        let new_version = current.version + 1;
        let now = Utc::now();
        let last_updated = format_timestamp(now);

        tx.execute(
            "UPDATE resources
             SET version = ?1, last_updated = ?2, last_updated_ms = ?3,
                 is_deleted = 1, deleted_at = ?2
             WHERE logical_id = ?4",
            params![
                new_version as i64,
                last_updated,
                now.timestamp_millis(),
                current.logical_id
            ],
        )?;
        insert_history(
            &tx,
            &current.logical_id,
            new_version,
            resource_type,
            &current.data,
            &last_updated,
            ResourceMethod::Delete,
        )?;

        // A tombstone is not searchable and refers to nothing.
        index::clear_index(&tx, &current.logical_id)?;
        links::clear_links(&tx, &current.logical_id)?;
        tx.commit()?;

        tracing::debug!(
            resource_type,
            logical_id = %current.logical_id,
            version = new_version,
            force,
            "Deleted resource"
        );

        let content: Value = serde_json::from_slice(&current.data)
            .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))?;
        Ok(StoredResource::from_storage(
            resource_type,
            current.logical_id,
            current.forced_id,
            new_version,
            content,
            parse_timestamp(&current.created_at)?,
            now,
            Some(now),
            Some(ResourceMethod::Delete),
        ))
    }

    fn read_sync(&self, resource_type: &str, id: &str) -> StorageResult<StoredResource> {
        let conn = self.get_connection()?;
        let current =
            load_current(&conn, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;

        if current.is_deleted {
            return Err(StorageError::Resource(ResourceError::Gone {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                deleted_at: current.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            }));
        }

        current.into_stored(resource_type)
    }

    fn vread_sync(
        &self,
        resource_type: &str,
        id: &str,
        version: u64,
    ) -> StorageResult<StoredResource> {
        let conn = self.get_connection()?;
        let current =
            load_current(&conn, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;

        let row: Option<(Vec<u8>, String, String)> = conn
            .query_row(
                "SELECT data, last_updated, method FROM resource_history
                 WHERE logical_id = ?1 AND version = ?2",
                params![current.logical_id, version as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((data, last_updated, method)) = row else {
            return Err(StorageError::Resource(ResourceError::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version,
            }));
        };

        history_resource(
            resource_type,
            &current,
            version,
            &data,
            &last_updated,
            &method,
        )
    }

    fn history_sync(&self, resource_type: &str, id: &str) -> StorageResult<Vec<HistoryEntry>> {
        let conn = self.get_connection()?;
        let current =
            load_current(&conn, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;

        let mut stmt = conn.prepare(
            "SELECT version, data, last_updated, method FROM resource_history
             WHERE logical_id = ?1
             ORDER BY version DESC",
        )?;
        let rows = stmt
            .query_map([&current.logical_id], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, data, last_updated, method)| {
                let resource = history_resource(
                    resource_type,
                    &current,
                    version,
                    &data,
                    &last_updated,
                    &method,
                )?;
                Ok(HistoryEntry {
                    method: resource.method().unwrap_or(ResourceMethod::Put),
                    timestamp: resource.last_modified(),
                    resource,
                })
            })
            .collect()
    }

    fn count_sync(&self, resource_type: Option<&str>) -> StorageResult<u64> {
        let conn = self.get_connection()?;
        let count: i64 = match resource_type {
            Some(rt) => conn.query_row(
                "SELECT COUNT(*) FROM resources WHERE resource_type = ?1 AND is_deleted = 0",
                [rt],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM resources WHERE is_deleted = 0",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }

    fn purge_sync(&self, resource_type: &str, id: &str) -> StorageResult<String> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current =
            load_current(&tx, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;
        let logical_id = current.logical_id.as_str();

        index::clear_index(&tx, logical_id)?;
        links::clear_links(&tx, logical_id)?;
        links::unresolve_inbound(
            &tx,
            logical_id,
            &format!("{}/{}", resource_type, current.public_id()),
        )?;
        tx.execute("DELETE FROM resource_tags WHERE logical_id = ?1", [logical_id])?;
        tx.execute("DELETE FROM resource_history WHERE logical_id = ?1", [logical_id])?;
        tx.execute("DELETE FROM forced_ids WHERE logical_id = ?1", [logical_id])?;
        tx.execute("DELETE FROM resources WHERE logical_id = ?1", [logical_id])?;
        tx.commit()?;

        tracing::debug!(resource_type, logical_id, "Purged resource");
        Ok(current.logical_id)
    }
}

fn history_resource(
    resource_type: &str,
    current: &CurrentRow,
    version: u64,
    data: &[u8],
    last_updated: &str,
    method: &str,
) -> StorageResult<StoredResource> {
    let content: Value = serde_json::from_slice(data)
        .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))?;
    let method = ResourceMethod::parse(method)
        .ok_or_else(|| internal_error(format!("Unknown history method '{}'", method)))?;
    let last_modified = parse_timestamp(last_updated)?;
    let deleted_at = (method == ResourceMethod::Delete).then_some(last_modified);

    Ok(StoredResource::from_storage(
        resource_type,
        current.logical_id.clone(),
        current.forced_id.clone(),
        version,
        content,
        parse_timestamp(&current.created_at)?,
        last_modified,
        deleted_at,
        Some(method),
    ))
}

#[async_trait]
impl ResourceStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(
        &self,
        resource_type: &str,
        resource: Value,
        forced_id: Option<&str>,
    ) -> StorageResult<StoredResource> {
        self.check_resource_type(resource_type)?;
        if let Some(forced_id) = forced_id {
            if !self.is_valid_forced_id(forced_id) {
                return Err(invalid_request(format!(
                    "Invalid forced id '{}': must match {}",
                    forced_id,
                    self.store_config().forced_id_pattern
                )));
            }
        }
        self.check_content(resource_type, &resource).await?;

        let stored = self.create_sync(resource_type, resource, forced_id)?;
        self.index_full_text(&stored).await;
        Ok(stored)
    }

    async fn read(&self, resource_type: &str, id: &str) -> StorageResult<StoredResource> {
        self.read_sync(resource_type, id)
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: u64,
    ) -> StorageResult<StoredResource> {
        self.vread_sync(resource_type, id, version)
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: Option<u64>,
        resource: Value,
    ) -> StorageResult<StoredResource> {
        self.check_resource_type(resource_type)?;
        self.check_content(resource_type, &resource).await?;

        let stored = self.update_sync(resource_type, id, expected_version, resource)?;
        self.index_full_text(&stored).await;
        Ok(stored)
    }

    async fn delete(
        &self,
        resource_type: &str,
        id: &str,
        force: bool,
    ) -> StorageResult<StoredResource> {
        let tombstone = self.delete_sync(resource_type, id, force)?;
        self.remove_full_text(resource_type, tombstone.logical_id())
            .await;
        Ok(tombstone)
    }

    async fn history(&self, resource_type: &str, id: &str) -> StorageResult<Vec<HistoryEntry>> {
        self.history_sync(resource_type, id)
    }

    async fn count(&self, resource_type: Option<&str>) -> StorageResult<u64> {
        self.count_sync(resource_type)
    }
}

#[async_trait]
impl PurgableStorage for SqliteBackend {
    async fn purge(&self, resource_type: &str, id: &str) -> StorageResult<()> {
        let logical_id = self.purge_sync(resource_type, id)?;
        self.remove_full_text(resource_type, &logical_id).await;
        Ok(())
    }
}
