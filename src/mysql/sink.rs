//! Row upserts, orphan pruning, and the image fallback path.

use crate::convert::document_to_row;
use crate::types::SqlRow;
use anyhow::{Context, Result};
use bson::Document;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Params, Value};
use std::collections::HashSet;

/// Columns stripped when a full image row is rejected by the server.
const IMAGE_COLUMNS: [&str; 2] = ["profile_image_data", "profile_image_content_type"];

/// Build the upsert statement for a column set.
///
/// `id` stays out of the update list so the primary key is never rewritten;
/// every other column takes the incoming value on conflict.
pub fn upsert_statement(table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let updates = columns
        .iter()
        .filter(|c| c.as_str() != "id")
        .map(|c| format!("`{c}` = VALUES(`{c}`)"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO `{table}` ({column_list}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {updates}"
    )
}

/// Bind `columns` positionally from a row. A column the row lacks binds as
/// NULL, which keeps rows with dropped optional fields executable under a
/// statement derived from a wider row.
pub fn bind_columns(columns: &[String], row: &SqlRow) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).map(Value::from).unwrap_or(Value::NULL))
        .collect()
}

/// Upsert a batch of rows one execution at a time.
///
/// The statement is derived from the first row's columns and reused for the
/// whole batch. A rejected row is logged and skipped rather than failing
/// the batch; the count of rows that made it in is returned.
pub async fn upsert_rows(conn: &mut Conn, table: &str, rows: &[SqlRow]) -> u64 {
    if rows.is_empty() {
        return 0;
    }
    let columns = rows[0].column_names();
    let statement = upsert_statement(table, &columns);

    let mut inserted = 0u64;
    for row in rows {
        let params = Params::Positional(bind_columns(&columns, row));
        match conn.exec_drop(&statement, params).await {
            Ok(()) => inserted += 1,
            Err(e) => {
                tracing::error!(
                    "Failed to upsert row {:?} into {table}: {e}",
                    row.id().unwrap_or("<no id>")
                );
            }
        }
    }
    inserted
}

/// Delete rows whose ids vanished from the source snapshot.
///
/// An empty snapshot deletes nothing: a source read that returned nothing
/// must not be treated as everyone having been deleted.
pub async fn prune_orphans(conn: &mut Conn, table: &str, current_ids: &[String]) -> Result<u64> {
    if current_ids.is_empty() {
        return Ok(0);
    }

    let existing: Vec<String> = conn
        .query(format!("SELECT id FROM `{table}`"))
        .await
        .with_context(|| format!("Failed to read ids from {table}"))?;

    let orphans = orphaned_ids(&existing, current_ids);
    if orphans.is_empty() {
        return Ok(0);
    }

    let placeholders = orphans.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let delete = format!("DELETE FROM `{table}` WHERE id IN ({placeholders})");
    let params: Vec<Value> = orphans
        .iter()
        .map(|id| Value::Bytes(id.clone().into_bytes()))
        .collect();
    conn.exec_drop(&delete, Params::Positional(params))
        .await
        .with_context(|| format!("Failed to delete orphaned rows from {table}"))?;

    tracing::info!("Deleted {} orphaned rows from {table}", orphans.len());
    Ok(orphans.len() as u64)
}

/// Ids present in the table but missing from the current snapshot.
pub fn orphaned_ids(existing: &[String], current_ids: &[String]) -> Vec<String> {
    let current: HashSet<&str> = current_ids.iter().map(String::as_str).collect();
    existing
        .iter()
        .filter(|id| !current.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Upsert image-table documents one at a time, retrying without the blob
/// columns when the full row is rejected. Oversized payloads lose their
/// image but keep their record.
pub async fn upsert_with_image_fallback(
    conn: &mut Conn,
    table: &str,
    documents: &[Document],
) -> u64 {
    let mut inserted = 0u64;
    for doc in documents {
        let row = document_to_row(doc);
        match upsert_row(conn, table, &row).await {
            Ok(()) => inserted += 1,
            Err(e) => {
                tracing::warn!(
                    "Upsert into {table} failed for {:?}, retrying without image data: {e}",
                    row.id().unwrap_or("<no id>")
                );
                let mut stripped = row.clone();
                for column in IMAGE_COLUMNS {
                    stripped.remove(column);
                }
                match upsert_row(conn, table, &stripped).await {
                    Ok(()) => inserted += 1,
                    Err(e) => {
                        tracing::error!(
                            "Fallback upsert into {table} failed for {:?}: {e}",
                            row.id().unwrap_or("<no id>")
                        );
                    }
                }
            }
        }
    }
    inserted
}

/// Single-row upsert with the statement built from this row's own columns.
async fn upsert_row(conn: &mut Conn, table: &str, row: &SqlRow) -> Result<()> {
    let columns = row.column_names();
    let statement = upsert_statement(table, &columns);
    conn.exec_drop(&statement, Params::Positional(bind_columns(&columns, row)))
        .await?;
    Ok(())
}
