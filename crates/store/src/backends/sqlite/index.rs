//! Search index rows.
//!
//! Each [`IndexValue`] variant maps to one `idx_*` table. Rows are keyed by
//! logical id and always describe the current version only.

use rusqlite::{Connection, params};

use crate::error::StorageResult;
use crate::search::{ExtractedValue, IndexValue};

const INDEX_TABLES: [&str; 7] = [
    "idx_string",
    "idx_token",
    "idx_number",
    "idx_quantity",
    "idx_date",
    "idx_uri",
    "idx_coords",
];

/// Deletes every index row for a resource.
pub(crate) fn clear_index(conn: &Connection, logical_id: &str) -> StorageResult<()> {
    for table in INDEX_TABLES {
        conn.prepare_cached(&format!("DELETE FROM {} WHERE logical_id = ?1", table))?
            .execute([logical_id])?;
    }
    Ok(())
}

/// Inserts index rows for the extracted values of a resource.
pub(crate) fn write_index(
    conn: &Connection,
    resource_type: &str,
    logical_id: &str,
    values: &[ExtractedValue],
) -> StorageResult<()> {
    for extracted in values {
        let param = extracted.param_name.as_str();
        match &extracted.value {
            IndexValue::String { normalized, exact } => {
                conn.prepare_cached(
                    "INSERT INTO idx_string
                        (logical_id, resource_type, param_name, value_normalized, value_exact)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![logical_id, resource_type, param, normalized, exact])?;
            }
            IndexValue::Token {
                system,
                code,
                display,
            } => {
                conn.prepare_cached(
                    "INSERT INTO idx_token
                        (logical_id, resource_type, param_name, system, code, display)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?
                .execute(params![logical_id, resource_type, param, system, code, display])?;
            }
            IndexValue::Number(value) => {
                conn.prepare_cached(
                    "INSERT INTO idx_number (logical_id, resource_type, param_name, value)
                     VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![logical_id, resource_type, param, value])?;
            }
            IndexValue::Quantity {
                value,
                system,
                code,
                unit,
                canonical_value,
                canonical_code,
            } => {
                conn.prepare_cached(
                    "INSERT INTO idx_quantity
                        (logical_id, resource_type, param_name, value, system, code, unit,
                         canonical_value, canonical_code)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?
                .execute(params![
                    logical_id,
                    resource_type,
                    param,
                    value,
                    system,
                    code,
                    unit,
                    canonical_value,
                    canonical_code
                ])?;
            }
            IndexValue::Date(range) => {
                conn.prepare_cached(
                    "INSERT INTO idx_date (logical_id, resource_type, param_name, start_ms, end_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![
                    logical_id,
                    resource_type,
                    param,
                    range.start_ms,
                    range.end_ms
                ])?;
            }
            IndexValue::Uri(value) => {
                conn.prepare_cached(
                    "INSERT INTO idx_uri (logical_id, resource_type, param_name, value)
                     VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![logical_id, resource_type, param, value])?;
            }
            IndexValue::Coordinates {
                latitude,
                longitude,
            } => {
                conn.prepare_cached(
                    "INSERT INTO idx_coords
                        (logical_id, resource_type, param_name, latitude, longitude)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![logical_id, resource_type, param, latitude, longitude])?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::schema::initialize_schema;
    use crate::search::DateRange;
    use crate::types::SearchParamType;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_write_and_clear_index() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let values = vec![
            ExtractedValue::new("family", SearchParamType::String, IndexValue::string("Smith")),
            ExtractedValue::new(
                "gender",
                SearchParamType::Token,
                IndexValue::token(None, "female"),
            ),
            ExtractedValue::new(
                "birthdate",
                SearchParamType::Date,
                IndexValue::Date(DateRange::parse("1980-05").unwrap()),
            ),
        ];
        write_index(&conn, "Patient", "L1", &values).unwrap();
        write_index(&conn, "Patient", "L2", &values[..1]).unwrap();

        assert_eq!(count(&conn, "idx_string"), 2);
        assert_eq!(count(&conn, "idx_token"), 1);
        assert_eq!(count(&conn, "idx_date"), 1);

        let exact: String = conn
            .query_row(
                "SELECT value_exact FROM idx_string WHERE logical_id = 'L1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exact, "Smith");

        clear_index(&conn, "L1").unwrap();
        assert_eq!(count(&conn, "idx_string"), 1);
        assert_eq!(count(&conn, "idx_token"), 0);
        assert_eq!(count(&conn, "idx_date"), 0);
    }
}
