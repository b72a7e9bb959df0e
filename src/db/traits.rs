// Database Driver Traits
// Defines the capability surface every backend adapter must satisfy

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::config::ConnectionConfig;

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Mssql,
    Mysql,
    Postgresql,
    Sqlite,
}

impl DatabaseType {
    /// Display name for logs and diagnostics
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Mysql => "MySQL",
            DatabaseType::Postgresql => "PostgreSQL",
            DatabaseType::Sqlite => "SQLite",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Mssql => 1433,
            DatabaseType::Mysql => 3306,
            DatabaseType::Postgresql => 5432,
            DatabaseType::Sqlite => 0, // File-based, no port
        }
    }

    /// Prefix of the environment variable family for this backend
    pub fn env_prefix(&self) -> &'static str {
        match self {
            DatabaseType::Mssql => "SQLSERVER",
            DatabaseType::Mysql => "MYSQL",
            DatabaseType::Postgresql => "POSTGRES",
            DatabaseType::Sqlite => "SQLITE",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql-server" => Ok(DatabaseType::Mssql),
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseType::Postgresql),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            other => Err(format!(
                "unknown backend '{}' (expected mssql, mysql, postgres or sqlite)",
                other
            )),
        }
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection to {target} failed: {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("Connection to {target} is closed")]
    ConnectionClosed { target: String },

    #[error("Query execution error: {message} (statement: {statement})")]
    QueryError { statement: String, message: String },

    #[error("Cursor state error: {0}")]
    CursorState(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DatabaseError {
    pub fn connection(target: impl Into<String>, message: impl fmt::Display) -> Self {
        DatabaseError::ConnectionFailed {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn query(statement: &str, message: impl fmt::Display) -> Self {
        DatabaseError::QueryError {
            statement: statement.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the failure happened at the transport level rather than in a statement
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed { .. } | DatabaseError::ConnectionClosed { .. }
        )
    }
}

/// Logical kind of a scalar value, shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
    Date,
    Time,
    DateTime,
    DateTimeUtc,
    Binary,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Date => "date",
            ValueKind::Time => "time",
            ValueKind::DateTime => "datetime",
            ValueKind::DateTimeUtc => "datetime with time zone",
            ValueKind::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// Column information from cursor metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Backend-native type name, for diagnostics
    pub data_type: String,
    /// Logical kind the backend declared, when it maps to one
    pub kind: Option<ValueKind>,
    pub is_nullable: bool,
    pub ordinal_position: usize,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: usize) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            kind: None,
            is_nullable: true,
            ordinal_position,
        }
    }

    pub fn with_kind(mut self, kind: Option<ValueKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_nullable(mut self, is_nullable: bool) -> Self {
        self.is_nullable = is_nullable;
        self
    }
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl CellValue {
    /// Logical kind of this value, `None` for NULL
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(_) => Some(ValueKind::Bool),
            CellValue::Int(_) => Some(ValueKind::Int),
            CellValue::Float(_) => Some(ValueKind::Float),
            CellValue::String(_) => Some(ValueKind::String),
            CellValue::Date(_) => Some(ValueKind::Date),
            CellValue::Time(_) => Some(ValueKind::Time),
            CellValue::DateTime(_) => Some(ValueKind::DateTime),
            CellValue::DateTimeUtc(_) => Some(ValueKind::DateTimeUtc),
            CellValue::Binary(_) => Some(ValueKind::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// Post-execution view of a single statement.
///
/// `description` is `None` when the backend reported no result-set metadata
/// at all; a statement that produces no columns reports `Some(vec![])`.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    description: Option<Vec<ColumnInfo>>,
    rows: Vec<Vec<CellValue>>,
}

impl Cursor {
    pub fn new(description: Option<Vec<ColumnInfo>>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { description, rows }
    }

    /// Cursor for a statement that returned no result set
    pub fn no_result_set() -> Self {
        Self::new(Some(Vec::new()), Vec::new())
    }

    pub fn description(&self) -> Option<&[ColumnInfo]> {
        self.description.as_deref()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn fetch_all(self) -> Vec<Vec<CellValue>> {
        self.rows
    }

    pub fn into_parts(self) -> (Option<Vec<ColumnInfo>>, Vec<Vec<CellValue>>) {
        (self.description, self.rows)
    }
}

/// Connection trait - all database handles must implement this
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Backend this handle talks to
    fn database_type(&self) -> DatabaseType;

    /// Human-readable target (host, port, database) for diagnostics
    fn target(&self) -> &str;

    fn is_closed(&self) -> bool;

    /// Test if the connection is alive
    async fn is_alive(&mut self) -> bool;

    /// Execute one statement and fetch its first result set completely
    async fn execute(&mut self, sql: &str) -> Result<Cursor, DatabaseError>;

    /// Release the handle. Calling this on a closed handle is a no-op.
    async fn close(&mut self) -> Result<(), DatabaseError>;
}

/// Database driver trait - one provider per backend
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    /// Open a new handle from configuration
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, DatabaseError>;

    /// Test a connection configuration without keeping the handle
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<bool, DatabaseError> {
        let mut conn = self.connect(config).await?;
        let alive = conn.is_alive().await;
        conn.close().await?;
        Ok(alive)
    }
}
