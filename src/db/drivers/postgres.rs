// PostgreSQL Driver
// Implements DatabaseDriver for PostgreSQL using tokio-postgres

use crate::db::config::{ConnectionConfig, PostgresConfig};
use crate::db::traits::{
    CellValue, ColumnInfo, Connection, Cursor, DatabaseDriver, DatabaseError, DatabaseType,
    ValueKind,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{info, warn};

/// PostgreSQL specific connection wrapper
pub struct PostgresConnection {
    id: String,
    target: String,
    client: Option<Client>,
    /// Background task driving the socket for `client`
    driver_task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    async fn is_alive(&mut self) -> bool {
        match &self.client {
            Some(client) => !client.is_closed() && client.simple_query("SELECT 1").await.is_ok(),
            None => false,
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<Cursor, DatabaseError> {
        let client = self.client.as_ref().ok_or_else(|| DatabaseError::ConnectionClosed {
            target: self.target.clone(),
        })?;

        let stmt = client.prepare(sql).await.map_err(|e| DatabaseError::query(sql, e))?;

        if stmt.columns().is_empty() {
            client
                .execute(&stmt, &[])
                .await
                .map_err(|e| DatabaseError::query(sql, e))?;
            return Ok(Cursor::no_result_set());
        }

        let description: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                ColumnInfo::new(col.name(), col.type_().name(), idx)
                    .with_kind(PostgresDriver::column_kind(col.type_()))
            })
            .collect();

        let pg_rows = client
            .query(&stmt, &[])
            .await
            .map_err(|e| DatabaseError::query(sql, e))?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for row in &pg_rows {
            let values = (0..description.len())
                .map(|idx| PostgresDriver::cell_value_from_row(row, idx))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DatabaseError::query(sql, e))?;
            rows.push(values);
        }

        Ok(Cursor::new(Some(description), rows))
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        // Dropping the client ends the connection task
        if self.client.take().is_some() {
            if let Some(task) = self.driver_task.take() {
                task.await
                    .map_err(|e| DatabaseError::connection(self.target.clone(), e))?;
            }
            info!(connection_id = %self.id, server = %self.target, "closed PostgreSQL connection");
        }
        Ok(())
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    fn postgres_config(config: &ConnectionConfig) -> Result<&PostgresConfig, DatabaseError> {
        match config {
            ConnectionConfig::Postgres(c) => Ok(c),
            other => Err(DatabaseError::InvalidConfig(format!(
                "PostgreSQL driver cannot use a {} configuration",
                other.database_type()
            ))),
        }
    }

    /// Build tokio-postgres config from the connection settings
    fn build_config(config: &PostgresConfig) -> Result<Config, DatabaseError> {
        let ssl_mode = match config.sslmode.as_str() {
            "disable" => SslMode::Disable,
            // Connections use NoTls, so prefer falls back to plaintext
            "prefer" => SslMode::Prefer,
            other => {
                return Err(DatabaseError::InvalidConfig(format!(
                    "unsupported sslmode '{}'",
                    other
                )))
            }
        };

        let mut pg_config = Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);
        Ok(pg_config)
    }

    fn column_kind(pg_type: &Type) -> Option<ValueKind> {
        match *pg_type {
            Type::BOOL => Some(ValueKind::Bool),
            Type::INT2 | Type::INT4 | Type::INT8 | Type::OID | Type::CHAR => Some(ValueKind::Int),
            Type::FLOAT4 | Type::FLOAT8 => Some(ValueKind::Float),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::JSON | Type::JSONB | Type::UUID => {
                Some(ValueKind::String)
            }
            Type::BYTEA => Some(ValueKind::Binary),
            Type::DATE => Some(ValueKind::Date),
            Type::TIME => Some(ValueKind::Time),
            Type::TIMESTAMP => Some(ValueKind::DateTime),
            Type::TIMESTAMPTZ => Some(ValueKind::DateTimeUtc),
            _ => None,
        }
    }

    fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error>
    where
        T: FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx)
    }

    /// Extract cell value from a row by column position
    fn cell_value_from_row(row: &Row, idx: usize) -> Result<CellValue, String> {
        let pg_type = row.columns()[idx].type_().clone();
        let value = match pg_type {
            Type::BOOL => Self::get::<bool>(row, idx).map(CellValue::from),
            Type::CHAR => Self::get::<i8>(row, idx).map(|v| CellValue::from(v.map(|v| v as i64))),
            Type::INT2 => Self::get::<i16>(row, idx).map(|v| CellValue::from(v.map(|v| v as i64))),
            Type::INT4 => Self::get::<i32>(row, idx).map(|v| CellValue::from(v.map(|v| v as i64))),
            Type::INT8 => Self::get::<i64>(row, idx).map(CellValue::from),
            Type::OID => Self::get::<u32>(row, idx).map(|v| CellValue::from(v.map(|v| v as i64))),
            Type::FLOAT4 => Self::get::<f32>(row, idx).map(|v| CellValue::from(v.map(|v| v as f64))),
            Type::FLOAT8 => Self::get::<f64>(row, idx).map(CellValue::from),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                Self::get::<String>(row, idx).map(CellValue::from)
            }
            Type::JSON | Type::JSONB => {
                Self::get::<serde_json::Value>(row, idx).map(|v| CellValue::from(v.map(|j| j.to_string())))
            }
            Type::UUID => Self::get::<uuid::Uuid>(row, idx).map(|v| CellValue::from(v.map(|u| u.to_string()))),
            Type::BYTEA => Self::get::<Vec<u8>>(row, idx)
                .map(|v| v.map(CellValue::Binary).unwrap_or(CellValue::Null)),
            Type::DATE => {
                Self::get::<NaiveDate>(row, idx).map(|v| v.map(CellValue::Date).unwrap_or(CellValue::Null))
            }
            Type::TIME => {
                Self::get::<NaiveTime>(row, idx).map(|v| v.map(CellValue::Time).unwrap_or(CellValue::Null))
            }
            Type::TIMESTAMP => Self::get::<NaiveDateTime>(row, idx)
                .map(|v| v.map(CellValue::DateTime).unwrap_or(CellValue::Null)),
            Type::TIMESTAMPTZ => Self::get::<DateTime<Utc>>(row, idx)
                .map(|v| v.map(CellValue::DateTimeUtc).unwrap_or(CellValue::Null)),
            other => {
                return Err(format!(
                    "column '{}' has unsupported type {}; cast it to text or double precision",
                    row.columns()[idx].name(),
                    other.name()
                ))
            }
        };
        value.map_err(|e| e.to_string())
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        config.validate()?;
        let pg_config = Self::postgres_config(config)?;
        let target = config.target();

        info!(server = %target, user = %pg_config.user, sslmode = %pg_config.sslmode, "connecting to PostgreSQL server");

        let (client, connection) = Self::build_config(pg_config)?
            .connect(NoTls)
            .await
            .map_err(|e| DatabaseError::connection(target.clone(), e))?;

        let task_target = target.clone();
        let driver_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(server = %task_target, error = %e, "PostgreSQL connection terminated");
            }
        });

        let connection = PostgresConnection {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            client: Some(client),
            driver_task: Some(driver_task),
        };
        info!(connection_id = %connection.id, server = %connection.target, "connected to PostgreSQL server");

        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::SqliteConfig;
    use tokio_postgres::config::Host;

    #[test]
    fn test_build_config() {
        let config = PostgresConfig::new("pg.internal", "warehouse", "etl", "pass word");
        let pg_config = PostgresDriver::build_config(&config).unwrap();
        assert_eq!(pg_config.get_hosts(), &[Host::Tcp("pg.internal".to_string())]);
        assert_eq!(pg_config.get_ports(), &[5432]);
        assert_eq!(pg_config.get_dbname(), Some("warehouse"));
        assert_eq!(pg_config.get_user(), Some("etl"));
        assert_eq!(pg_config.get_password(), Some(&b"pass word"[..]));
        assert_eq!(pg_config.get_ssl_mode(), SslMode::Prefer);
    }

    #[test]
    fn test_build_config_rejects_unknown_sslmode() {
        let mut config = PostgresConfig::new("pg.internal", "warehouse", "etl", "pw");
        config.sslmode = "verify-full".to_string();
        assert!(matches!(
            PostgresDriver::build_config(&config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_sslmode_require_fails_before_connecting() {
        let mut config = PostgresConfig::new("127.0.0.1", "warehouse", "etl", "pw");
        config.port = 1;
        config.sslmode = "require".to_string();
        let result = PostgresDriver::new().connect(&ConnectionConfig::Postgres(config)).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }

    #[test]
    fn test_column_kind() {
        assert_eq!(PostgresDriver::column_kind(&Type::INT8), Some(ValueKind::Int));
        assert_eq!(PostgresDriver::column_kind(&Type::FLOAT8), Some(ValueKind::Float));
        assert_eq!(PostgresDriver::column_kind(&Type::JSONB), Some(ValueKind::String));
        assert_eq!(PostgresDriver::column_kind(&Type::TIMESTAMPTZ), Some(ValueKind::DateTimeUtc));
        assert_eq!(PostgresDriver::column_kind(&Type::NUMERIC), None);
    }

    #[test]
    fn test_driver_type() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Postgresql);
        assert_eq!(driver.driver_name(), "PostgreSQL");
    }

    #[tokio::test]
    async fn test_rejects_other_backend_config() {
        let config = ConnectionConfig::Sqlite(SqliteConfig::in_memory());
        let result = PostgresDriver::new().connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }
}
