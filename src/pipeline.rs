// Extraction Pipeline
// Connect, execute, materialize, export and close; batch runs and connection checks

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::db::{self, CellValue, ColumnInfo, Connection, ConnectionConfig, Cursor, DatabaseType, ValueKind};
use crate::error::{Error, Result};
use crate::export::{ExportOptions, ExportSummary, ParquetExporter};

/// Run one query on an open handle and write its records to `destination`.
///
/// The handle is borrowed and left open.
pub async fn export_query(
    conn: &mut dyn Connection,
    sql: &str,
    destination: &Path,
    exporter: &ParquetExporter,
) -> Result<ExportSummary> {
    let records = db::execute(conn, sql).await?;
    let summary = exporter.write(&records, destination)?;
    Ok(summary)
}

/// Open a handle from `config`, export one query, and close the handle.
pub async fn extract_to_parquet(
    config: &ConnectionConfig,
    sql: &str,
    destination: &Path,
    exporter: &ParquetExporter,
) -> Result<ExportSummary> {
    let start = Instant::now();
    let mut conn = db::connect(config).await?;

    let outcome = export_query(conn.as_mut(), sql, destination, exporter).await;
    release(conn.as_mut()).await;

    let summary = outcome?;
    info!(
        server = %config.target(),
        path = %summary.path.display(),
        rows = summary.rows_exported,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "extraction complete"
    );
    Ok(summary)
}

/// Close a handle, logging instead of propagating a failure
async fn release(conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        warn!(connection_id = conn.connection_id(), error = %e, "failed to close connection");
    }
}

/// File stem of the per-run metadata file written next to the batch outputs
pub const BATCH_SUMMARY_NAME: &str = "export_summary";

/// One named query of a batch plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQuery {
    /// Output file stem; the query is written to `<name>.parquet`
    pub name: String,
    pub sql: String,
}

/// A set of named queries exported over a single connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub queries: Vec<BatchQuery>,
    #[serde(default)]
    pub options: Option<ExportOptions>,
}

impl BatchPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidPlan(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let plan: BatchPlan =
            serde_json::from_str(content).map_err(|e| Error::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(Error::InvalidPlan("plan has no queries".to_string()));
        }

        let mut seen = HashSet::new();
        for query in &self.queries {
            let valid_name = !query.name.is_empty()
                && !query.name.starts_with('.')
                && query
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
            if !valid_name {
                return Err(Error::InvalidPlan(format!(
                    "query name '{}' must be a plain file stem (letters, digits, '_', '-', '.')",
                    query.name
                )));
            }
            if query.name == BATCH_SUMMARY_NAME {
                return Err(Error::InvalidPlan(format!(
                    "query name '{}' is reserved for the run summary",
                    BATCH_SUMMARY_NAME
                )));
            }
            if !seen.insert(query.name.as_str()) {
                return Err(Error::InvalidPlan(format!("duplicate query name '{}'", query.name)));
            }
            if query.sql.trim().is_empty() {
                return Err(Error::InvalidPlan(format!("query '{}' has no SQL", query.name)));
            }
        }

        if let Some(options) = &self.options {
            options.validate()?;
        }
        Ok(())
    }
}

/// Result of one query within a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub name: String,
    pub summary: ExportSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub output_dir: PathBuf,
    pub entries: Vec<BatchEntry>,
    /// `export_summary.parquet`, written by `run_batch` after every query succeeded
    pub summary_file: Option<ExportSummary>,
}

impl BatchReport {
    pub fn total_rows(&self) -> usize {
        self.entries.iter().map(|e| e.summary.rows_exported).sum()
    }
}

/// Timestamped run directory: `<base>/export_<YYYYmmdd_HHMMSS>`
pub fn batch_output_dir(base: &Path, at: DateTime<Local>) -> PathBuf {
    base.join(format!("export_{}", at.format("%Y%m%d_%H%M%S")))
}

/// Export every query of `plan` over one connection into a fresh run directory.
///
/// Stops at the first failing query; files already written stay in place.
pub async fn run_batch(
    config: &ConnectionConfig,
    plan: &BatchPlan,
    output_base: &Path,
    exporter: &ParquetExporter,
) -> Result<BatchReport> {
    plan.validate()?;
    let started_at = Local::now();
    let output_dir = batch_output_dir(output_base, started_at);
    let mut conn = db::connect(config).await?;

    let outcome = run_plan(conn.as_mut(), plan, &output_dir, exporter).await;
    release(conn.as_mut()).await;

    let mut report = outcome?;
    let summary_path = output_dir.join(format!("{}.parquet", BATCH_SUMMARY_NAME));
    let records = db::materialize(summary_cursor(config, &report, started_at))?;
    report.summary_file = Some(exporter.write(&records, &summary_path)?);
    Ok(report)
}

/// One-row description of a finished batch run
fn summary_cursor(config: &ConnectionConfig, report: &BatchReport, started_at: DateTime<Local>) -> Cursor {
    let columns = [
        ("export_timestamp", ValueKind::DateTime),
        ("backend", ValueKind::String),
        ("server", ValueKind::String),
        ("total_exports", ValueKind::Int),
        ("total_rows", ValueKind::Int),
        ("export_directory", ValueKind::String),
    ];
    let description = columns
        .iter()
        .enumerate()
        .map(|(idx, (name, kind))| ColumnInfo::new(*name, kind.to_string(), idx).with_kind(Some(*kind)))
        .collect();

    let directory = report
        .output_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let row = vec![
        CellValue::DateTime(started_at.naive_local()),
        CellValue::from(config.database_type().to_string()),
        CellValue::from(config.target()),
        CellValue::Int(report.entries.len() as i64),
        CellValue::Int(report.total_rows() as i64),
        CellValue::from(directory),
    ];
    Cursor::new(Some(description), vec![row])
}

/// Run a validated plan on an open handle
pub async fn run_plan(
    conn: &mut dyn Connection,
    plan: &BatchPlan,
    output_dir: &Path,
    exporter: &ParquetExporter,
) -> Result<BatchReport> {
    let mut entries = Vec::with_capacity(plan.queries.len());
    for query in &plan.queries {
        let destination = output_dir.join(format!("{}.parquet", query.name));
        let summary = export_query(conn, &query.sql, &destination, exporter)
            .await
            .map_err(|e| {
                warn!(query = %query.name, error = %e, "batch query failed");
                e
            })?;
        info!(query = %query.name, rows = summary.rows_exported, "batch query exported");
        entries.push(BatchEntry {
            name: query.name.clone(),
            summary,
        });
    }

    Ok(BatchReport {
        output_dir: output_dir.to_path_buf(),
        entries,
        summary_file: None,
    })
}

/// Outcome of a connection check
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub database_type: DatabaseType,
    pub target: String,
    pub alive: bool,
    pub server_version: Option<String>,
}

/// Statement returning the server version string for a backend
pub fn version_query(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::Mssql => "SELECT @@VERSION AS version",
        DatabaseType::Mysql => "SELECT VERSION() AS version",
        DatabaseType::Postgresql => "SELECT version() AS version",
        DatabaseType::Sqlite => "SELECT sqlite_version() AS version",
    }
}

/// Connect, probe liveness, read the server version, and close.
pub async fn check_connection(config: &ConnectionConfig) -> Result<CheckReport> {
    let mut conn = db::connect(config).await?;
    let outcome = probe(conn.as_mut()).await;
    release(conn.as_mut()).await;
    outcome
}

async fn probe(conn: &mut dyn Connection) -> Result<CheckReport> {
    let database_type = conn.database_type();
    let alive = conn.is_alive().await;
    let server_version = if alive {
        let records = db::execute(conn, version_query(database_type)).await?;
        records
            .records()
            .first()
            .and_then(|r| r.values().first())
            .and_then(|v| match v {
                CellValue::String(s) => Some(s.clone()),
                _ => None,
            })
    } else {
        None
    };

    Ok(CheckReport {
        database_type,
        target: conn.target().to_string(),
        alive,
        server_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::tests::ScriptedConnection;
    use crate::db::{ColumnInfo, Cursor, DatabaseError, SqliteConfig};
    use chrono::TimeZone;

    fn users_cursor() -> Cursor {
        Cursor::new(
            Some(vec![ColumnInfo::new("id", "int", 0), ColumnInfo::new("name", "text", 1)]),
            vec![
                vec![CellValue::Int(1), CellValue::from("John")],
                vec![CellValue::Int(2), CellValue::from("Jane")],
            ],
        )
    }

    fn plan(queries: &[(&str, &str)]) -> BatchPlan {
        BatchPlan {
            queries: queries
                .iter()
                .map(|(name, sql)| BatchQuery {
                    name: name.to_string(),
                    sql: sql.to_string(),
                })
                .collect(),
            options: None,
        }
    }

    #[tokio::test]
    async fn test_export_query_writes_file_and_leaves_handle_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.parquet");
        let mut conn = ScriptedConnection::new(vec![Ok(users_cursor())]);

        let summary = export_query(&mut conn, "SELECT id, name FROM users", &path, &ParquetExporter::default())
            .await
            .unwrap();
        assert_eq!(summary.rows_exported, 2);
        assert!(path.exists());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_closed_handle_produces_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.parquet");
        let mut conn = ScriptedConnection::new(vec![Ok(users_cursor())]);
        conn.close().await.unwrap();

        let err = export_query(&mut conn, "SELECT 1", &path, &ParquetExporter::default())
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_extract_to_parquet_with_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("source.db");
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (id INTEGER, name TEXT);
                 INSERT INTO users VALUES (1, 'John'), (2, 'Jane');",
            )
            .unwrap();
        }

        let config = ConnectionConfig::Sqlite(SqliteConfig::new(db_path.to_string_lossy()));
        let out = dir.path().join("out/users.parquet");
        let summary = extract_to_parquet(&config, "SELECT id, name FROM users ORDER BY id", &out, &ParquetExporter::default())
            .await
            .unwrap();
        assert_eq!(summary.rows_exported, 2);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_extract_query_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("missing.parquet");
        let config = ConnectionConfig::Sqlite(SqliteConfig::in_memory());

        let err = extract_to_parquet(&config, "SELECT * FROM no_such_table", &out, &ParquetExporter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::QueryError { .. })));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_statement_without_result_set_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("ddl.parquet");
        let config = ConnectionConfig::Sqlite(SqliteConfig::in_memory());

        let summary = extract_to_parquet(&config, "CREATE TABLE t (x INTEGER)", &out, &ParquetExporter::default())
            .await
            .unwrap();
        assert_eq!(summary.rows_exported, 0);
        assert!(out.exists());
    }

    #[test]
    fn test_batch_plan_from_json() {
        let plan = BatchPlan::from_json(
            r#"{
                "queries": [
                    {"name": "users", "sql": "SELECT * FROM users"},
                    {"name": "orders_2024", "sql": "SELECT * FROM orders"}
                ],
                "options": {"compression": "zstd"}
            }"#,
        )
        .unwrap();
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.queries[1].name, "orders_2024");
        assert_eq!(
            plan.options.unwrap().compression,
            crate::export::ParquetCompression::Zstd
        );
    }

    #[test]
    fn test_batch_plan_validation() {
        assert!(matches!(plan(&[]).validate(), Err(Error::InvalidPlan(_))));
        assert!(plan(&[("a", "SELECT 1"), ("a", "SELECT 2")]).validate().is_err());
        assert!(plan(&[("../escape", "SELECT 1")]).validate().is_err());
        assert!(plan(&[(".hidden", "SELECT 1")]).validate().is_err());
        assert!(plan(&[("blank", "   ")]).validate().is_err());
        assert!(plan(&[("export_summary", "SELECT 1")]).validate().is_err());
        assert!(plan(&[("ok-name_1", "SELECT 1")]).validate().is_ok());
    }

    #[test]
    fn test_batch_output_dir_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            batch_output_dir(Path::new("parquetFiles/sqlserver"), at),
            PathBuf::from("parquetFiles/sqlserver/export_20240309_140507")
        );
    }

    #[tokio::test]
    async fn test_run_plan_exports_each_query() {
        let dir = tempfile::tempdir().unwrap();
        let second = Cursor::new(
            Some(vec![ColumnInfo::new("total", "float", 0)]),
            vec![vec![CellValue::Float(9.5)]],
        );
        let mut conn = ScriptedConnection::new(vec![Ok(users_cursor()), Ok(second)]);
        let plan = plan(&[("users", "SELECT id, name FROM users"), ("totals", "SELECT total FROM t")]);

        let report = run_plan(&mut conn, &plan, dir.path(), &ParquetExporter::default())
            .await
            .unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.total_rows(), 3);
        assert!(dir.path().join("users.parquet").exists());
        assert!(dir.path().join("totals.parquet").exists());
    }

    #[tokio::test]
    async fn test_run_plan_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let failure = DatabaseError::query("SELECT broken", "syntax error");
        let mut conn = ScriptedConnection::new(vec![Err(failure), Ok(users_cursor())]);
        let plan = plan(&[("broken", "SELECT broken"), ("users", "SELECT id, name FROM users")]);

        let result = run_plan(&mut conn, &plan, dir.path(), &ParquetExporter::default()).await;
        assert!(result.is_err());
        assert_eq!(conn.executed, vec!["SELECT broken".to_string()]);
        assert!(!dir.path().join("users.parquet").exists());
    }

    #[tokio::test]
    async fn test_check_connection_sqlite() {
        let config = ConnectionConfig::Sqlite(SqliteConfig::in_memory());
        let report = check_connection(&config).await.unwrap();
        assert!(report.alive);
        assert_eq!(report.database_type, DatabaseType::Sqlite);
        assert!(report.server_version.unwrap().starts_with('3'));
    }

    #[test]
    fn test_version_query_per_backend() {
        assert_eq!(version_query(DatabaseType::Mssql), "SELECT @@VERSION AS version");
        assert!(version_query(DatabaseType::Sqlite).contains("sqlite_version"));
    }
}
