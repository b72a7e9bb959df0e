// SQLite Driver
// Implements DatabaseDriver for SQLite files (and :memory:) using rusqlite

use crate::db::config::{ConnectionConfig, SqliteConfig};
use crate::db::traits::{
    CellValue, ColumnInfo, Connection, Cursor, DatabaseDriver, DatabaseError, DatabaseType,
    ValueKind,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::path::Path;
use tracing::info;

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    id: String,
    path: String,
    conn: Option<RusqliteConnection>,
}

impl SqliteConnection {
    fn closed_error(&self) -> DatabaseError {
        DatabaseError::ConnectionClosed {
            target: self.path.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn target(&self) -> &str {
        &self.path
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    async fn is_alive(&mut self) -> bool {
        match &self.conn {
            Some(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            None => false,
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<Cursor, DatabaseError> {
        match &self.conn {
            Some(conn) => SqliteDriver::run_statement(conn, sql),
            None => Err(self.closed_error()),
        }
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| DatabaseError::connection(self.path.clone(), e))?;
            info!(connection_id = %self.id, path = %self.path, "closed SQLite database");
        }
        Ok(())
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    fn sqlite_config(config: &ConnectionConfig) -> Result<&SqliteConfig, DatabaseError> {
        match config {
            ConnectionConfig::Sqlite(c) => Ok(c),
            other => Err(DatabaseError::InvalidConfig(format!(
                "SQLite driver cannot use a {} configuration",
                other.database_type()
            ))),
        }
    }

    /// Expand a leading `~/` to the home directory
    fn get_database_path(config: &SqliteConfig) -> String {
        if let Some(rest) = config.path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return Path::new(&home).join(rest).to_string_lossy().to_string();
            }
        }
        config.path.clone()
    }

    /// Open an existing SQLite database; a missing file is a connection error
    fn open_connection(path: &str) -> Result<RusqliteConnection, DatabaseError> {
        RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DatabaseError::connection(path, format!("Failed to open SQLite database: {}", e)))
    }

    fn run_statement(conn: &RusqliteConnection, sql: &str) -> Result<Cursor, DatabaseError> {
        let mut stmt = conn.prepare(sql).map_err(|e| DatabaseError::query(sql, e))?;

        if stmt.column_count() == 0 {
            stmt.execute([]).map_err(|e| DatabaseError::query(sql, e))?;
            return Ok(Cursor::no_result_set());
        }

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                ColumnInfo::new(col.name(), Self::sqlite_type_to_string(col.decl_type()), idx)
                    .with_kind(Self::declared_kind(col.decl_type()))
            })
            .collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut result = stmt.query([]).map_err(|e| DatabaseError::query(sql, e))?;
        while let Some(row) = result.next().map_err(|e| DatabaseError::query(sql, e))? {
            let values = (0..column_count)
                .map(|idx| row.get_ref(idx).map(Self::cell_value_from_ref))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DatabaseError::query(sql, e))?;
            rows.push(values);
        }

        Ok(Cursor::new(Some(columns), rows))
    }

    /// Convert SQLite declared type to string
    fn sqlite_type_to_string(sqlite_type: Option<&str>) -> String {
        match sqlite_type {
            Some(t) => t.to_lowercase(),
            None => "any".to_string(),
        }
    }

    /// Map a declared type to a value kind using SQLite's affinity rules
    fn declared_kind(sqlite_type: Option<&str>) -> Option<ValueKind> {
        let decl = sqlite_type?.to_ascii_uppercase();
        if decl.contains("INT") {
            Some(ValueKind::Int)
        } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
            Some(ValueKind::String)
        } else if decl.contains("BLOB") {
            Some(ValueKind::Binary)
        } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
            Some(ValueKind::Float)
        } else if decl.contains("BOOL") {
            Some(ValueKind::Bool)
        } else {
            None
        }
    }

    /// Extract cell value from the stored SQLite value
    fn cell_value_from_ref(value: ValueRef<'_>) -> CellValue {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Int(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(bytes) => CellValue::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Binary(bytes.to_vec()),
        }
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        config.validate()?;
        let sqlite_config = Self::sqlite_config(config)?;
        let path = Self::get_database_path(sqlite_config);
        let conn = Self::open_connection(&path)?;

        let connection = SqliteConnection {
            id: uuid::Uuid::new_v4().to_string(),
            path,
            conn: Some(conn),
        };
        info!(connection_id = %connection.id, path = %connection.path, "opened SQLite database");

        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::MysqlConfig;
    use crate::db::query;

    async fn memory_connection() -> Box<dyn Connection> {
        SqliteDriver::new()
            .connect(&ConnectionConfig::Sqlite(SqliteConfig::in_memory()))
            .await
            .unwrap()
    }

    #[test]
    fn test_sqlite_type_to_string() {
        assert_eq!(SqliteDriver::sqlite_type_to_string(Some("INTEGER")), "integer");
        assert_eq!(SqliteDriver::sqlite_type_to_string(Some("VARCHAR(20)")), "varchar(20)");
        assert_eq!(SqliteDriver::sqlite_type_to_string(None), "any");
    }

    #[test]
    fn test_declared_kind_affinity() {
        assert_eq!(SqliteDriver::declared_kind(Some("BIGINT")), Some(ValueKind::Int));
        assert_eq!(SqliteDriver::declared_kind(Some("nvarchar(10)")), Some(ValueKind::String));
        assert_eq!(SqliteDriver::declared_kind(Some("DOUBLE")), Some(ValueKind::Float));
        assert_eq!(SqliteDriver::declared_kind(Some("BLOB")), Some(ValueKind::Binary));
        assert_eq!(SqliteDriver::declared_kind(Some("NUMERIC")), None);
        assert_eq!(SqliteDriver::declared_kind(None), None);
    }

    #[test]
    fn test_driver_type() {
        let driver = SqliteDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Sqlite);
    }

    #[tokio::test]
    async fn test_rejects_other_backend_config() {
        let config = ConnectionConfig::Mysql(MysqlConfig::new("h", "d", "u", "p"));
        let result = SqliteDriver::new().connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_execute_reads_columns_and_rows() {
        let mut conn = memory_connection().await;
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB)")
            .await
            .unwrap();
        conn.execute("INSERT INTO users VALUES (1, 'John', 1.5, x'0102'), (2, 'Jane', NULL, NULL)")
            .await
            .unwrap();

        let cursor = conn.execute("SELECT id, name, score, avatar FROM users ORDER BY id").await.unwrap();
        let description = cursor.description().unwrap().to_vec();
        assert_eq!(
            description.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["id", "name", "score", "avatar"]
        );
        assert_eq!(description[0].kind, Some(ValueKind::Int));

        let rows = cursor.fetch_all();
        assert_eq!(
            rows[0],
            vec![
                CellValue::Int(1),
                CellValue::from("John"),
                CellValue::Float(1.5),
                CellValue::Binary(vec![1, 2]),
            ]
        );
        assert_eq!(rows[1][2], CellValue::Null);

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_select_still_describes_columns() {
        let mut conn = memory_connection().await;
        conn.execute("CREATE TABLE empty_table (id INTEGER, label TEXT)").await.unwrap();

        let result = query::execute(conn.as_mut(), "SELECT id, label FROM empty_table").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.column_names(), vec!["id", "label"]);
    }

    #[tokio::test]
    async fn test_syntax_error_is_query_error() {
        let mut conn = memory_connection().await;
        let err = conn.execute("SELEC nonsense").await.unwrap_err();
        match err {
            DatabaseError::QueryError { statement, .. } => assert_eq!(statement, "SELEC nonsense"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(conn.is_alive().await);
        assert!(conn.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_execution() {
        let mut conn = memory_connection().await;
        assert!(!conn.is_closed());
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(!conn.is_alive().await);

        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_missing_database_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.db");
        let config = ConnectionConfig::Sqlite(SqliteConfig::new(path.to_string_lossy()));

        let err = SqliteDriver::new().connect(&config).await.err().unwrap();
        match err {
            DatabaseError::ConnectionFailed { target, .. } => assert_eq!(target, path.to_string_lossy()),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_test_connection() {
        let driver = SqliteDriver::new();
        let ok = driver
            .test_connection(&ConnectionConfig::Sqlite(SqliteConfig::in_memory()))
            .await
            .unwrap();
        assert!(ok);
    }
}
