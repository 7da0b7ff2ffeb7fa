//! HTTP surface for triggering and inspecting backups.
//!
//! Response bodies mirror what the dashboard consumes: a `success` flag,
//! camelCase statistics, and millisecond UTC timestamps. Backup runs answer
//! 500 on fatal errors; the status routes answer 200 either way because a
//! missing backup database is an answer, not a failure.

use crate::backup::{self, BackupStats, ImageTableStatus, TableBackup, TableStatus};
use crate::mysql::client::{self, MySqlOpts};
use crate::schema;
use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use mongodb::Database;
use mysql_async::Pool;
use serde::Serialize;
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;

const MYSQL_SUGGESTION: &str = "Please ensure the MySQL server is running and reachable";
const GENERIC_SUGGESTION: &str =
    "Check server logs for details. If image backup failed, try the image-only backup endpoint";

/// Shared state for the `/data` routes.
#[derive(Clone)]
pub struct AppState {
    pub mongo: Database,
    pub mysql: Pool,
    pub settings: MySqlOpts,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/data/backup-nosql-to-sql", post(backup_nosql_to_sql))
        .route("/data/backup-images-only", post(backup_images_only))
        .route("/data/backup-status", get(backup_status))
        .route("/data/image-backup-status", get(image_backup_status))
        .route("/data/test-mysql-connection", get(test_mysql_connection))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FullBackupResponse {
    success: bool,
    message: String,
    timestamp: String,
    statistics: BackupStats,
    records_processed: u64,
    tables_backed_up: usize,
}

async fn backup_nosql_to_sql(State(state): State<AppState>) -> Response {
    tracing::info!("Starting NoSQL to SQL backup");

    if let Err(e) = client::test_connection(&state.mysql).await {
        tracing::error!("MySQL is not reachable: {e:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                success: false,
                message: "Cannot connect to MySQL".to_string(),
                error: None,
                timestamp: None,
                suggestion: Some(MYSQL_SUGGESTION.to_string()),
            }),
        )
            .into_response();
    }

    match full_backup(&state).await {
        Ok(stats) => {
            let records_processed = stats.processed_records;
            let tables_backed_up = stats.tables.len();
            (
                StatusCode::OK,
                Json(FullBackupResponse {
                    success: true,
                    message: "Backup completed successfully (including images)".to_string(),
                    timestamp: now(),
                    statistics: stats,
                    records_processed,
                    tables_backed_up,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Backup failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "Backup failed".to_string(),
                    error: Some(format!("{e:#}")),
                    timestamp: Some(now()),
                    suggestion: Some(suggestion_for(&e)),
                }),
            )
                .into_response()
        }
    }
}

/// The run executes on a task the runtime owns: a client that disconnects
/// mid-backup abandons the response, not the work. The connection lives for
/// exactly that one task and returns to the pool when dropped, whichever
/// way the run ends.
async fn full_backup(state: &AppState) -> anyhow::Result<BackupStats> {
    let state = state.clone();
    let run = tokio::spawn(async move {
        let mut conn = state
            .mysql
            .get_conn()
            .await
            .context("Failed to acquire MySQL connection")?;
        client::ensure_database(&mut conn, &state.settings.mysql_database).await?;
        schema::create_tables(&mut conn).await?;
        Ok(backup::run_full_backup(&state.mongo, &mut conn).await)
    });
    run.await.context("Backup task panicked")?
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageBackupResponse {
    success: bool,
    message: String,
    timestamp: String,
    statistics: BTreeMap<String, TableBackup>,
}

async fn backup_images_only(State(state): State<AppState>) -> Response {
    tracing::info!("Starting image-only backup");

    if let Err(e) = client::test_connection(&state.mysql).await {
        tracing::error!("MySQL is not reachable: {e:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                success: false,
                message: "Cannot connect to MySQL".to_string(),
                error: None,
                timestamp: None,
                suggestion: None,
            }),
        )
            .into_response();
    }

    match image_backup(&state).await {
        Ok(results) => (
            StatusCode::OK,
            Json(ImageBackupResponse {
                success: true,
                message: "Image backup completed successfully".to_string(),
                timestamp: now(),
                statistics: results,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Image backup failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "Image backup failed".to_string(),
                    error: Some(format!("{e:#}")),
                    timestamp: Some(now()),
                    suggestion: None,
                }),
            )
                .into_response()
        }
    }
}

/// Image-only runs never create the database or tables; a backup must
/// already exist for them to refresh. The work is spawned the same way as
/// the full run; a dropped request does not cancel it.
async fn image_backup(state: &AppState) -> anyhow::Result<BTreeMap<String, TableBackup>> {
    let state = state.clone();
    let run = tokio::spawn(async move {
        let mut conn = state
            .mysql
            .get_conn()
            .await
            .context("Failed to acquire MySQL connection")?;
        client::select_database(&mut conn, &state.settings.mysql_database).await?;
        Ok(backup::run_image_backup(&state.mongo, &mut conn).await)
    });
    run.await.context("Image backup task panicked")?
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusSummary {
    total_tables: usize,
    tables_with_images: usize,
    total_records: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupStatusResponse {
    success: bool,
    backup_exists: bool,
    table_stats: BTreeMap<String, TableStatus>,
    timestamp: String,
    summary: StatusSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupStatusError {
    success: bool,
    backup_exists: bool,
    error: String,
    timestamp: String,
}

async fn backup_status(State(state): State<AppState>) -> Response {
    match read_status(&state).await {
        Ok(table_stats) => {
            let summary = StatusSummary {
                total_tables: table_stats.len(),
                tables_with_images: table_stats
                    .values()
                    .filter(|s| s.has_images == Some(true))
                    .count(),
                total_records: table_stats.values().map(|s| s.count).sum(),
            };
            Json(BackupStatusResponse {
                success: true,
                backup_exists: true,
                table_stats,
                timestamp: now(),
                summary,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to read backup status: {e:#}");
            Json(BackupStatusError {
                success: false,
                backup_exists: false,
                error: format!("{e:#}"),
                timestamp: now(),
            })
            .into_response()
        }
    }
}

async fn read_status(state: &AppState) -> anyhow::Result<BTreeMap<String, TableStatus>> {
    let mut conn = state
        .mysql
        .get_conn()
        .await
        .context("Failed to acquire MySQL connection")?;
    client::select_database(&mut conn, &state.settings.mysql_database).await?;
    Ok(backup::backup_status(&mut conn).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageBackupStatusResponse {
    success: bool,
    image_status: BTreeMap<String, ImageTableStatus>,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageStatusError {
    success: bool,
    error: String,
    timestamp: String,
}

async fn image_backup_status(State(state): State<AppState>) -> Response {
    match read_image_status(&state).await {
        Ok(image_status) => Json(ImageBackupStatusResponse {
            success: true,
            image_status,
            timestamp: now(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to read image backup status: {e:#}");
            Json(ImageStatusError {
                success: false,
                error: format!("{e:#}"),
                timestamp: now(),
            })
            .into_response()
        }
    }
}

async fn read_image_status(
    state: &AppState,
) -> anyhow::Result<BTreeMap<String, ImageTableStatus>> {
    let mut conn = state
        .mysql
        .get_conn()
        .await
        .context("Failed to acquire MySQL connection")?;
    client::select_database(&mut conn, &state.settings.mysql_database).await?;
    Ok(backup::image_backup_status(&mut conn).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionTestResponse {
    success: bool,
    message: String,
    config: ConnectionConfig,
}

/// Connection settings echoed back by the probe, password excluded.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionConfig {
    host: String,
    user: String,
    port: u16,
    database: String,
}

async fn test_mysql_connection(State(state): State<AppState>) -> Response {
    match client::test_connection(&state.mysql).await {
        Ok(()) => Json(ConnectionTestResponse {
            success: true,
            message: "MySQL connection successful".to_string(),
            config: ConnectionConfig {
                host: state.settings.mysql_host.clone(),
                user: state.settings.mysql_user.clone(),
                port: state.settings.mysql_port,
                database: state.settings.mysql_database.clone(),
            },
        })
        .into_response(),
        Err(e) => {
            tracing::error!("MySQL connection test failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "MySQL connection failed".to_string(),
                    error: None,
                    timestamp: None,
                    suggestion: Some(MYSQL_SUGGESTION.to_string()),
                }),
            )
                .into_response()
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn suggestion_for(e: &anyhow::Error) -> String {
    if format!("{e:#}").contains("MySQL") {
        MYSQL_SUGGESTION.to_string()
    } else {
        GENERIC_SUGGESTION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_backup_response_shape() {
        let mut stats = BackupStats::default();
        stats.record("users", Ok(TableBackup::default()));
        let response = FullBackupResponse {
            success: true,
            message: "Backup completed successfully (including images)".to_string(),
            timestamp: now(),
            statistics: stats,
            records_processed: 0,
            tables_backed_up: 1,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["recordsProcessed"], 0);
        assert_eq!(json["tablesBackedUp"], 1);
        assert!(json["statistics"]["tables"]["users"].is_object());
    }

    #[test]
    fn test_error_response_omits_empty_fields() {
        let response = ErrorResponse {
            success: false,
            message: "Cannot connect to MySQL".to_string(),
            error: None,
            timestamp: None,
            suggestion: Some(MYSQL_SUGGESTION.to_string()),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["suggestion"], MYSQL_SUGGESTION);
        assert!(json.get("error").is_none());
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_status_response_shape() {
        let mut table_stats = BTreeMap::new();
        table_stats.insert(
            "users".to_string(),
            TableStatus {
                count: 12,
                has_images: Some(false),
                with_images: None,
                error: None,
            },
        );
        table_stats.insert(
            "teachers".to_string(),
            TableStatus {
                count: 3,
                has_images: Some(true),
                with_images: Some(2),
                error: None,
            },
        );

        let summary = StatusSummary {
            total_tables: table_stats.len(),
            tables_with_images: table_stats
                .values()
                .filter(|s| s.has_images == Some(true))
                .count(),
            total_records: table_stats.values().map(|s| s.count).sum(),
        };
        let response = BackupStatusResponse {
            success: true,
            backup_exists: true,
            table_stats,
            timestamp: now(),
            summary,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["backupExists"], true);
        assert_eq!(json["summary"]["totalTables"], 2);
        assert_eq!(json["summary"]["tablesWithImages"], 1);
        assert_eq!(json["summary"]["totalRecords"], 15);
        assert_eq!(json["tableStats"]["teachers"]["withImages"], 2);
    }

    #[test]
    fn test_connection_config_excludes_password() {
        let config = ConnectionConfig {
            host: "localhost".to_string(),
            user: "root".to_string(),
            port: 3306,
            database: "university_lms_backup".to_string(),
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["host"], "localhost");
        assert_eq!(json["port"], 3306);
        assert!(json.get("password").is_none());
    }

    #[test]
    fn test_suggestion_matches_error_text() {
        let mysql_err = anyhow::anyhow!("MySQL ping failed");
        assert_eq!(suggestion_for(&mysql_err), MYSQL_SUGGESTION);

        let other_err = anyhow::anyhow!("collection scan failed");
        assert_eq!(suggestion_for(&other_err), GENERIC_SUGGESTION);
    }
}
