//! Search over the index tables.
//!
//! Results are ordered by `(last_updated_ms, logical_id)` and paged with a
//! keyset cursor holding the last row's sort key, so pages stay stable while
//! other resources are written.

pub mod query_builder;

use std::collections::HashSet;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::core::{SearchProvider, SearchResult};
use crate::error::{ResourceError, SearchError, StorageError, StorageResult};
use crate::types::{
    CursorValue, IncludeDirective, Page, PageCursor, PageInfo, SearchParamType, SearchQuery,
    StoredResource,
};

use super::SqliteBackend;
use super::storage::{CURRENT_COLUMNS, read_current_row};
use query_builder::{QueryBuilder, SqlFragment, SqlParam};

/// Decodes a cursor into `(last_updated_ms, logical_id)`.
fn decode_cursor(cursor: &str) -> StorageResult<(i64, String)> {
    let decoded = PageCursor::decode(cursor)?;
    match decoded.sort_values() {
        [CursorValue::Number(ms)] => Ok((*ms, decoded.resource_id().to_string())),
        _ => Err(SearchError::InvalidCursor {
            cursor: cursor.to_string(),
        }
        .into()),
    }
}

impl SqliteBackend {
    fn search_sync(
        &self,
        query: &SearchQuery,
        content_ids: Option<&[String]>,
        count: u32,
    ) -> StorageResult<Page<StoredResource>> {
        let builder = QueryBuilder::new(
            self.registry(),
            &query.resource_type,
            self.store_config().base_url.as_deref(),
        );
        let conditions = builder.build(&query.parameters)?;

        let mut filter = SqlFragment::with_params(
            "resource_type = ? AND is_deleted = 0",
            vec![SqlParam::string(&query.resource_type)],
        )
        .and(conditions);

        if let Some(ids) = content_ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            filter = filter.and(SqlFragment::with_params(
                format!("logical_id IN ({})", placeholders),
                ids.iter().map(SqlParam::string).collect(),
            ));
        }

        if let Some(cursor) = &query.cursor {
            let (ms, logical_id) = decode_cursor(cursor)?;
            filter = filter.and(SqlFragment::with_params(
                "last_updated_ms > ? OR (last_updated_ms = ? AND logical_id > ?)",
                vec![
                    SqlParam::integer(ms),
                    SqlParam::integer(ms),
                    SqlParam::string(logical_id),
                ],
            ));
        }

        let sql = format!(
            "SELECT {}, last_updated_ms FROM resources WHERE {} \
             ORDER BY last_updated_ms, logical_id LIMIT {}",
            CURRENT_COLUMNS,
            filter.sql,
            count as i64 + 1
        );
        tracing::trace!(sql = %sql, params = filter.params.len(), "Executing search");

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_from_iter(filter.params.iter()), |row| {
                Ok((read_current_row(row)?, row.get::<_, i64>(8)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = rows.len() > count as usize;
        rows.truncate(count as usize);

        let next = match rows.last() {
            Some((row, ms)) if has_more => Some(PageCursor::new(
                vec![CursorValue::Number(*ms)],
                row.logical_id.clone(),
            )),
            _ => None,
        };

        let items = rows
            .into_iter()
            .map(|(row, _)| row.into_stored(&query.resource_type))
            .collect::<StorageResult<Vec<_>>>()?;

        let info = match next {
            Some(cursor) => PageInfo::with_next(cursor),
            None => PageInfo::end(),
        };
        Ok(Page::new(items, info))
    }

    /// Link paths of a reference parameter used by an include directive.
    fn include_paths(&self, directive: &IncludeDirective) -> StorageResult<Vec<String>> {
        let definition = self
            .registry()
            .search_param(&directive.source_type, &directive.search_param)
            .ok_or_else(|| SearchError::UnknownParameter {
                resource_type: directive.source_type.clone(),
                parameter: directive.search_param.clone(),
            })?;

        if definition.param_type != SearchParamType::Reference {
            return Err(SearchError::InvalidValue {
                parameter: "_include".to_string(),
                value: format!("{}:{}", directive.source_type, directive.search_param),
                message: "not a reference parameter".to_string(),
            }
            .into());
        }

        Ok(definition
            .paths()
            .map(|path| {
                path.split('.')
                    .take_while(|segment| !segment.contains('('))
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .collect())
    }

    fn include_sync(
        &self,
        resources: &[StoredResource],
        includes: &[(IncludeDirective, Vec<String>)],
    ) -> StorageResult<Vec<StoredResource>> {
        let conn = self.get_connection()?;
        let limit = self.store_config().include_limit as usize;

        let mut seen: HashSet<String> = resources
            .iter()
            .map(|r| r.logical_id().to_string())
            .collect();
        let mut included = Vec::new();

        for (directive, paths) in includes {
            for source in resources
                .iter()
                .filter(|r| r.resource_type() == directive.source_type)
            {
                for (target_type, target_id) in link_targets(&conn, source.logical_id(), paths)? {
                    if directive
                        .target_type
                        .as_deref()
                        .is_some_and(|t| t != target_type)
                    {
                        continue;
                    }
                    if !seen.insert(target_id.clone()) {
                        continue;
                    }
                    if included.len() >= limit {
                        tracing::warn!(
                            limit,
                            source_type = %directive.source_type,
                            search_param = %directive.search_param,
                            "Include limit reached, truncating included resources"
                        );
                        return Ok(included);
                    }
                    if let Some(target) = load_live(&conn, &target_type, &target_id)? {
                        included.push(target);
                    }
                }
            }
        }

        Ok(included)
    }
}

/// Resolved link targets of a resource under the given paths.
fn link_targets(
    conn: &Connection,
    source_id: &str,
    paths: &[String],
) -> StorageResult<Vec<(String, String)>> {
    let placeholders = vec!["?"; paths.len()].join(", ");
    let sql = format!(
        "SELECT target_type, target_id FROM resource_links
         WHERE source_id = ? AND target_id IS NOT NULL AND source_path IN ({})
         ORDER BY rowid",
        placeholders
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let bound = std::iter::once(source_id).chain(paths.iter().map(String::as_str));
    let targets = stmt
        .query_map(params_from_iter(bound), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(targets)
}

fn load_live(
    conn: &Connection,
    resource_type: &str,
    logical_id: &str,
) -> StorageResult<Option<StoredResource>> {
    let row = conn
        .prepare_cached(&format!(
            "SELECT {} FROM resources
             WHERE logical_id = ?1 AND resource_type = ?2 AND is_deleted = 0",
            CURRENT_COLUMNS
        ))?
        .query_row(params![logical_id, resource_type], read_current_row)
        .optional()?;
    row.map(|r| r.into_stored(resource_type)).transpose()
}

#[async_trait]
impl SearchProvider for SqliteBackend {
    async fn search(&self, query: &SearchQuery) -> StorageResult<SearchResult> {
        if !self.registry().contains(&query.resource_type) {
            return Err(StorageError::Resource(
                ResourceError::UnsupportedResourceType {
                    resource_type: query.resource_type.clone(),
                },
            ));
        }

        let count = self.store_config().page_size(query.count);
        if count == 0 {
            return Ok(SearchResult::new(Page::empty()));
        }

        let content_ids = match &query.content {
            Some(text) => {
                let ids = self.full_text().query(&query.resource_type, text).await?;
                if ids.is_empty() {
                    return Ok(SearchResult::new(Page::empty()));
                }
                Some(ids)
            }
            None => None,
        };

        let page = self.search_sync(query, content_ids.as_deref(), count)?;
        tracing::debug!(
            resource_type = %query.resource_type,
            parameters = query.parameters.len(),
            results = page.len(),
            has_next = page.page_info.has_next,
            "Search completed"
        );

        let included = if query.includes.is_empty() {
            Vec::new()
        } else {
            self.include(&page.items, &query.includes).await?
        };
        Ok(SearchResult::new(page).with_included(included))
    }

    async fn include(
        &self,
        resources: &[StoredResource],
        includes: &[IncludeDirective],
    ) -> StorageResult<Vec<StoredResource>> {
        let resolved = includes
            .iter()
            .map(|d| Ok((d.clone(), self.include_paths(d)?)))
            .collect::<StorageResult<Vec<_>>>()?;
        self.include_sync(resources, &resolved)
    }
}
