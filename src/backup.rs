//! Backup orchestration and statistics.
//!
//! A run walks the table catalog in order, one collection at a time, on a
//! single borrowed connection. Failures are confined to the collection that
//! raised them: the run always finishes and reports per-table outcomes
//! instead of aborting halfway through the catalog.

use crate::convert::document_to_row;
use crate::mongodb::{fetch_all, fetch_with_images};
use crate::mysql::sink::{prune_orphans, upsert_rows, upsert_with_image_fallback};
use crate::schema::{self, TableSpec};
use crate::types::{SqlRow, SqlValue};
use anyhow::Result;
use bson::{Bson, Document};
use mongodb::Database;
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-table outcome of one backup pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableBackup {
    /// Documents found in the source collection.
    pub total: u64,
    /// Rows that made it into the backup table.
    pub inserted: u64,
    /// Set when the collection failed as a whole; counts are zero then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableBackup {
    fn completed(total: u64, inserted: u64) -> Self {
        TableBackup {
            total,
            inserted,
            error: None,
        }
    }

    fn failed(e: &anyhow::Error) -> Self {
        TableBackup {
            total: 0,
            inserted: 0,
            error: Some(format!("{e:#}")),
        }
    }
}

/// Aggregate statistics for a full backup run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_records: u64,
    pub processed_records: u64,
    pub tables: BTreeMap<String, TableBackup>,
}

impl BackupStats {
    /// Fold one collection's outcome into the aggregate. A failed collection
    /// contributes an error slot and nothing to the counters.
    pub fn record(&mut self, table: &str, outcome: Result<TableBackup>) {
        let entry = match outcome {
            Ok(result) => {
                self.total_records += result.total;
                self.processed_records += result.inserted;
                result
            }
            Err(e) => {
                tracing::error!("Backup of {table} failed: {e:#}");
                TableBackup::failed(&e)
            }
        };
        self.tables.insert(table.to_string(), entry);
    }
}

/// Back up every collection into the relational target.
///
/// Tables are processed strictly in sequence on the one connection.
/// Concurrent runs are not serialized against each other; they interleave
/// row by row and the last writer wins per row.
pub async fn run_full_backup(db: &Database, conn: &mut Conn) -> BackupStats {
    let mut stats = BackupStats::default();

    for spec in schema::regular_tables() {
        tracing::info!("Backing up {}", spec.table);
        let outcome = backup_collection(db, conn, spec).await;
        stats.record(spec.table, outcome);
    }
    for spec in schema::image_tables() {
        tracing::info!("Backing up {} (with images)", spec.table);
        let outcome = backup_collection(db, conn, spec).await;
        stats.record(spec.table, outcome);
    }

    tracing::info!(
        "Backup finished: {}/{} records across {} tables",
        stats.processed_records,
        stats.total_records,
        stats.tables.len()
    );
    stats
}

/// Snapshot one collection, upsert its rows, and prune rows that no longer
/// have a source document. A prune failure is logged and does not undo the
/// upserts that already happened.
async fn backup_collection(
    db: &Database,
    conn: &mut Conn,
    spec: &TableSpec,
) -> Result<TableBackup> {
    let documents = fetch_all(db, spec.collection).await?;

    let rows: Vec<SqlRow> = documents
        .iter()
        .map(|doc| {
            let mut row = document_to_row(doc);
            if spec.images {
                copy_image_fields(doc, &mut row);
            }
            row
        })
        .collect();

    let inserted = upsert_rows(conn, spec.table, &rows).await;

    let current_ids: Vec<String> = rows
        .iter()
        .filter_map(|row| row.id().map(str::to_string))
        .collect();
    if let Err(e) = prune_orphans(conn, spec.table, &current_ids).await {
        tracing::error!("Failed to prune orphaned rows from {}: {e:#}", spec.table);
    }

    tracing::info!(
        "Backed up {inserted}/{} records into {}",
        documents.len(),
        spec.table
    );
    Ok(TableBackup::completed(documents.len() as u64, inserted))
}

/// Pin the image columns whenever the document carries a payload, whatever
/// shape the rest of the conversion produced.
fn copy_image_fields(doc: &Document, row: &mut SqlRow) {
    if let Some(Bson::Binary(bin)) = doc.get("profileImageData") {
        row.set("profile_image_data", SqlValue::Bytes(bin.bytes.clone()));
        let content_type = match doc.get("profileImageContentType") {
            Some(Bson::String(s)) => SqlValue::Text(s.clone()),
            _ => SqlValue::Null,
        };
        row.set("profile_image_content_type", content_type);
    }
}

/// Refresh only the image-carrying tables, using the per-document fallback
/// inserter. Collections without any image documents are reported with zero
/// counts rather than skipped silently.
pub async fn run_image_backup(db: &Database, conn: &mut Conn) -> BTreeMap<String, TableBackup> {
    let mut results = BTreeMap::new();
    for spec in schema::image_tables() {
        tracing::info!("Backing up images for {}", spec.table);
        let entry = match backup_images(db, conn, spec).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Image backup of {} failed: {e:#}", spec.table);
                TableBackup::failed(&e)
            }
        };
        results.insert(spec.table.to_string(), entry);
    }
    results
}

async fn backup_images(db: &Database, conn: &mut Conn, spec: &TableSpec) -> Result<TableBackup> {
    let documents = fetch_with_images(db, spec.collection).await?;
    if documents.is_empty() {
        tracing::info!("No image documents found for {}", spec.table);
        return Ok(TableBackup::completed(0, 0));
    }

    let inserted = upsert_with_image_fallback(conn, spec.table, &documents).await;
    tracing::info!(
        "Backed up {inserted}/{} image records into {}",
        documents.len(),
        spec.table
    );
    Ok(TableBackup::completed(documents.len() as u64, inserted))
}

/// Read-only per-table state of a backup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_images: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Row counts for every backup table. A table that cannot be counted gets
/// an error slot; one image count failing degrades that table to zero
/// instead of discarding its row count.
pub async fn backup_status(conn: &mut Conn) -> BTreeMap<String, TableStatus> {
    let mut status = BTreeMap::new();
    for spec in schema::TABLES {
        let entry = match table_count(conn, spec.table).await {
            Ok(count) => {
                let with_images = if spec.images {
                    match image_count(conn, spec.table).await {
                        Ok(n) => Some(n),
                        Err(e) => {
                            tracing::warn!("Failed to count images in {}: {e:#}", spec.table);
                            Some(0)
                        }
                    }
                } else {
                    None
                };
                TableStatus {
                    count,
                    has_images: Some(spec.images),
                    with_images,
                    error: None,
                }
            }
            Err(e) => TableStatus {
                count: 0,
                has_images: None,
                with_images: None,
                error: Some(format!("{e:#}")),
            },
        };
        status.insert(spec.table.to_string(), entry);
    }
    status
}

/// Image-table state split by image presence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTableStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_images: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub without_images: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageTableStatus {
    /// The two counts come from separate queries, so a concurrent run can
    /// push the image count past the total between them.
    fn from_counts(total: u64, with_images: u64) -> Self {
        ImageTableStatus {
            total: Some(total),
            with_images: Some(with_images),
            without_images: Some(total.saturating_sub(with_images)),
            error: None,
        }
    }
}

/// Per-table image coverage for the image-carrying tables.
pub async fn image_backup_status(conn: &mut Conn) -> BTreeMap<String, ImageTableStatus> {
    let mut status = BTreeMap::new();
    for spec in schema::image_tables() {
        let entry = match image_table_counts(conn, spec.table).await {
            Ok((total, with_images)) => ImageTableStatus::from_counts(total, with_images),
            Err(e) => ImageTableStatus {
                total: None,
                with_images: None,
                without_images: None,
                error: Some(format!("{e:#}")),
            },
        };
        status.insert(spec.table.to_string(), entry);
    }
    status
}

async fn table_count(conn: &mut Conn, table: &str) -> Result<u64> {
    let count: Option<i64> = conn
        .query_first(format!("SELECT COUNT(*) FROM `{table}`"))
        .await?;
    Ok(count.unwrap_or(0) as u64)
}

async fn image_count(conn: &mut Conn, table: &str) -> Result<u64> {
    let count: Option<i64> = conn
        .query_first(format!(
            "SELECT COUNT(*) FROM `{table}` WHERE profile_image_data IS NOT NULL"
        ))
        .await?;
    Ok(count.unwrap_or(0) as u64)
}

async fn image_table_counts(conn: &mut Conn, table: &str) -> Result<(u64, u64)> {
    Ok((table_count(conn, table).await?, image_count(conn, table).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_stats_fold_success_and_failure() {
        let mut stats = BackupStats::default();
        stats.record("users", Ok(TableBackup::completed(10, 9)));
        stats.record("portals", Ok(TableBackup::completed(3, 3)));
        stats.record("quizzes", Err(anyhow::anyhow!("collection scan failed")));

        assert_eq!(stats.total_records, 13);
        assert_eq!(stats.processed_records, 12);
        assert_eq!(stats.tables.len(), 3);

        let failed = &stats.tables["quizzes"];
        assert_eq!(failed.total, 0);
        assert_eq!(failed.inserted, 0);
        assert_eq!(failed.error.as_deref(), Some("collection scan failed"));
    }

    #[test]
    fn test_stats_serialize_shape() {
        let mut stats = BackupStats::default();
        stats.record("users", Ok(TableBackup::completed(2, 2)));
        stats.record("hods", Err(anyhow::anyhow!("boom")));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalRecords"], 2);
        assert_eq!(json["processedRecords"], 2);
        assert_eq!(json["tables"]["users"]["total"], 2);
        assert!(json["tables"]["users"].get("error").is_none());
        assert_eq!(json["tables"]["hods"]["error"], "boom");
    }

    #[test]
    fn test_table_status_serialize_shape() {
        let ok = TableStatus {
            count: 5,
            has_images: Some(true),
            with_images: Some(2),
            error: None,
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["count"], 5);
        assert_eq!(json["hasImages"], true);
        assert_eq!(json["withImages"], 2);
        assert!(json.get("error").is_none());

        let failed = TableStatus {
            count: 0,
            has_images: None,
            with_images: None,
            error: Some("no such table".to_string()),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["count"], 0);
        assert!(json.get("hasImages").is_none());
        assert_eq!(json["error"], "no such table");
    }

    #[test]
    fn test_image_table_status_serialize_shape() {
        let ok = ImageTableStatus {
            total: Some(4),
            with_images: Some(3),
            without_images: Some(1),
            error: None,
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["total"], 4);
        assert_eq!(json["withImages"], 3);
        assert_eq!(json["withoutImages"], 1);
    }

    #[test]
    fn test_image_status_counts_do_not_underflow() {
        let status = ImageTableStatus::from_counts(5, 2);
        assert_eq!(status.total, Some(5));
        assert_eq!(status.with_images, Some(2));
        assert_eq!(status.without_images, Some(3));

        // Image rows landing between the two counts can outnumber the total.
        let racing = ImageTableStatus::from_counts(2, 3);
        assert_eq!(racing.without_images, Some(0));
        assert_eq!(racing.error, None);
    }

    #[test]
    fn test_copy_image_fields() {
        let doc = doc! {
            "_id": "t1",
            "fullName": "Prof X",
            "profileImageData": bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: vec![1, 2, 3],
            },
            "profileImageContentType": "image/png",
        };

        let mut row = document_to_row(&doc);
        copy_image_fields(&doc, &mut row);

        assert_eq!(
            row.get("profile_image_data"),
            Some(&SqlValue::Bytes(vec![1, 2, 3]))
        );
        assert_eq!(
            row.get("profile_image_content_type"),
            Some(&SqlValue::Text("image/png".to_string()))
        );
    }

    #[test]
    fn test_copy_image_fields_without_payload() {
        let doc = doc! { "_id": "t2", "fullName": "Prof Y" };

        let mut row = document_to_row(&doc);
        copy_image_fields(&doc, &mut row);

        assert_eq!(row.get("profile_image_data"), None);
        assert_eq!(row.get("profile_image_content_type"), None);
    }
}
