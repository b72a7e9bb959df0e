// MySQL Driver
// Implements DatabaseDriver for MySQL and MariaDB using mysql_async

use crate::db::config::{ConnectionConfig, MysqlConfig};
use crate::db::traits::{
    CellValue, ColumnInfo, Connection, Cursor, DatabaseDriver, DatabaseError, DatabaseType,
    ValueKind,
};
use chrono::{NaiveDate, NaiveTime};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Row, SslOpts, Value};
use tracing::info;

/// Character set number MySQL reports for binary strings
const BINARY_CHARSET: u16 = 63;

/// MySQL specific connection wrapper
pub struct MysqlConnection {
    id: String,
    target: String,
    conn: Option<Conn>,
}

#[async_trait::async_trait]
impl Connection for MysqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    async fn is_alive(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<Cursor, DatabaseError> {
        let conn = self.conn.as_mut().ok_or_else(|| DatabaseError::ConnectionClosed {
            target: self.target.clone(),
        })?;

        let mut result = conn
            .exec_iter(sql, ())
            .await
            .map_err(|e| DatabaseError::query(sql, e))?;

        let columns = result.columns().map(|c| c.to_vec()).unwrap_or_default();
        if columns.is_empty() {
            result.drop_result().await.map_err(|e| DatabaseError::query(sql, e))?;
            return Ok(Cursor::no_result_set());
        }

        let description: Vec<ColumnInfo> = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let binary = col.character_set() == BINARY_CHARSET;
                ColumnInfo::new(
                    col.name_str(),
                    MysqlDriver::column_type_to_string(col.column_type()),
                    idx,
                )
                .with_kind(MysqlDriver::column_kind(col.column_type(), binary))
                .with_nullable(!col.flags().contains(ColumnFlags::NOT_NULL_FLAG))
            })
            .collect();

        let raw_rows: Vec<Row> = result
            .collect::<Row>()
            .await
            .map_err(|e| DatabaseError::query(sql, e))?;
        // Later result sets (multi-statement calls) are discarded
        result.drop_result().await.map_err(|e| DatabaseError::query(sql, e))?;

        let rows: Vec<Vec<CellValue>> = raw_rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let binary = col.character_set() == BINARY_CHARSET;
                        match row.as_ref(idx) {
                            Some(value) => MysqlDriver::cell_value_from_value(col.column_type(), binary, value),
                            None => CellValue::Null,
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Cursor::new(Some(description), rows))
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect()
                .await
                .map_err(|e| DatabaseError::connection(self.target.clone(), e))?;
            info!(connection_id = %self.id, server = %self.target, "closed MySQL connection");
        }
        Ok(())
    }
}

/// MySQL driver implementation
pub struct MysqlDriver;

impl MysqlDriver {
    /// Create a new MySQL driver
    pub fn new() -> Self {
        Self
    }

    fn mysql_config(config: &ConnectionConfig) -> Result<&MysqlConfig, DatabaseError> {
        match config {
            ConnectionConfig::Mysql(c) => Ok(c),
            other => Err(DatabaseError::InvalidConfig(format!(
                "MySQL driver cannot use a {} configuration",
                other.database_type()
            ))),
        }
    }

    fn to_opts(config: &MysqlConfig) -> OptsBuilder {
        let opts = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .user(Some(&config.user))
            .pass(Some(&config.password))
            .db_name(Some(&config.database))
            .prefer_socket(Some(false));

        if config.transport_encryption.is_yes() {
            opts.ssl_opts(Some(
                SslOpts::default().with_danger_accept_invalid_certs(config.trust_server_certificate.is_yes()),
            ))
        } else {
            opts
        }
    }

    fn column_type_to_string(col_type: ColumnType) -> String {
        let name = match col_type {
            ColumnType::MYSQL_TYPE_TINY => "tinyint",
            ColumnType::MYSQL_TYPE_SHORT => "smallint",
            ColumnType::MYSQL_TYPE_INT24 => "mediumint",
            ColumnType::MYSQL_TYPE_LONG => "int",
            ColumnType::MYSQL_TYPE_LONGLONG => "bigint",
            ColumnType::MYSQL_TYPE_YEAR => "year",
            ColumnType::MYSQL_TYPE_FLOAT => "float",
            ColumnType::MYSQL_TYPE_DOUBLE => "double",
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "decimal",
            ColumnType::MYSQL_TYPE_BIT => "bit",
            ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "date",
            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "time",
            ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "datetime",
            ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "timestamp",
            ColumnType::MYSQL_TYPE_JSON => "json",
            ColumnType::MYSQL_TYPE_ENUM => "enum",
            ColumnType::MYSQL_TYPE_SET => "set",
            ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => "varchar",
            ColumnType::MYSQL_TYPE_STRING => "char",
            ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB => "blob",
            ColumnType::MYSQL_TYPE_GEOMETRY => "geometry",
            ColumnType::MYSQL_TYPE_NULL => "null",
            _ => "unknown",
        };
        name.to_string()
    }

    fn column_kind(col_type: ColumnType, binary: bool) -> Option<ValueKind> {
        match col_type {
            ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
            | ColumnType::MYSQL_TYPE_BIT => Some(ValueKind::Int),
            ColumnType::MYSQL_TYPE_FLOAT
            | ColumnType::MYSQL_TYPE_DOUBLE
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL => Some(ValueKind::Float),
            ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => Some(ValueKind::Date),
            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => Some(ValueKind::Time),
            ColumnType::MYSQL_TYPE_DATETIME
            | ColumnType::MYSQL_TYPE_DATETIME2
            | ColumnType::MYSQL_TYPE_TIMESTAMP
            | ColumnType::MYSQL_TYPE_TIMESTAMP2 => Some(ValueKind::DateTime),
            ColumnType::MYSQL_TYPE_JSON | ColumnType::MYSQL_TYPE_ENUM | ColumnType::MYSQL_TYPE_SET => {
                Some(ValueKind::String)
            }
            ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB => Some(if binary { ValueKind::Binary } else { ValueKind::String }),
            ColumnType::MYSQL_TYPE_GEOMETRY => Some(ValueKind::Binary),
            _ => None,
        }
    }

    /// Extract cell value from a binary-protocol value
    fn cell_value_from_value(col_type: ColumnType, binary: bool, value: &Value) -> CellValue {
        match value {
            Value::NULL => CellValue::Null,
            Value::Int(v) => CellValue::Int(*v),
            Value::UInt(v) => match i64::try_from(*v) {
                Ok(v) => CellValue::Int(v),
                Err(_) => CellValue::Float(*v as f64),
            },
            Value::Float(v) => CellValue::Float(*v as f64),
            Value::Double(v) => CellValue::Float(*v),
            Value::Bytes(bytes) => Self::cell_value_from_bytes(col_type, binary, bytes),
            Value::Date(year, month, day, hour, minute, second, micros) => {
                let date = NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32);
                match col_type {
                    ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
                        date.map(CellValue::Date).unwrap_or(CellValue::Null)
                    }
                    _ => date
                        .and_then(|d| {
                            d.and_hms_micro_opt(*hour as u32, *minute as u32, *second as u32, *micros)
                        })
                        .map(CellValue::DateTime)
                        // Zero dates such as 0000-00-00 have no calendar value
                        .unwrap_or(CellValue::Null),
                }
            }
            Value::Time(negative, days, hours, minutes, seconds, micros) => {
                if !negative && *days == 0 {
                    if let Some(t) =
                        NaiveTime::from_hms_micro_opt(*hours as u32, *minutes as u32, *seconds as u32, *micros)
                    {
                        return CellValue::Time(t);
                    }
                }
                // Durations outside a single day stay textual
                let total_hours = *days * 24 + *hours as u32;
                CellValue::String(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    if *negative { "-" } else { "" },
                    total_hours,
                    minutes,
                    seconds,
                    micros
                ))
            }
        }
    }

    fn cell_value_from_bytes(col_type: ColumnType, binary: bool, bytes: &[u8]) -> CellValue {
        match col_type {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                let text = String::from_utf8_lossy(bytes);
                match text.parse::<f64>() {
                    Ok(v) => CellValue::Float(v),
                    Err(_) => CellValue::String(text.into_owned()),
                }
            }
            ColumnType::MYSQL_TYPE_BIT => {
                let v = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
                match i64::try_from(v) {
                    Ok(v) => CellValue::Int(v),
                    Err(_) => CellValue::Float(v as f64),
                }
            }
            ColumnType::MYSQL_TYPE_GEOMETRY => CellValue::Binary(bytes.to_vec()),
            _ if binary => CellValue::Binary(bytes.to_vec()),
            _ => CellValue::String(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MysqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        config.validate()?;
        let mysql_config = Self::mysql_config(config)?;
        let target = config.target();

        info!(
            server = %target,
            user = %mysql_config.user,
            transport_encryption = %mysql_config.transport_encryption,
            "connecting to MySQL server"
        );

        let conn = Conn::new(Self::to_opts(mysql_config))
            .await
            .map_err(|e| DatabaseError::connection(target.clone(), e))?;

        let connection = MysqlConnection {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            conn: Some(conn),
        };
        info!(connection_id = %connection.id, server = %connection.target, "connected to MySQL server");

        Ok(Box::new(connection))
    }
}
