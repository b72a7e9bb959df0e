// MS-SQL Driver
// Implements DatabaseDriver for MS-SQL using tiberius over a dedicated TCP connection

use crate::db::config::{ConnectionConfig, MssqlConfig};
use crate::db::traits::{
    CellValue, ColumnInfo, Connection, Cursor, DatabaseDriver, DatabaseError, DatabaseType,
    ValueKind,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, ColumnType, Config, EncryptionLevel, FromSql, QueryItem};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

type MssqlClient = Client<Compat<TcpStream>>;

/// Server error raised when the login password has expired
const PASSWORD_EXPIRED: u32 = 18488;

/// MS-SQL specific connection wrapper
pub struct MssqlConnection {
    id: String,
    target: String,
    client: Option<MssqlClient>,
}

#[async_trait::async_trait]
impl Connection for MssqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    async fn is_alive(&mut self) -> bool {
        match self.client.as_mut() {
            Some(client) => match client.simple_query("SELECT 1").await {
                Ok(stream) => stream.into_results().await.is_ok(),
                Err(_) => false,
            },
            None => false,
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<Cursor, DatabaseError> {
        let client = self.client.as_mut().ok_or_else(|| DatabaseError::ConnectionClosed {
            target: self.target.clone(),
        })?;

        let mut stream = client
            .simple_query(sql)
            .await
            .map_err(|e| DatabaseError::query(sql, e))?;

        // Only the first result set is materialized; later ones are drained
        // so the connection stays usable for the next statement.
        let mut description: Option<Vec<ColumnInfo>> = None;
        let mut rows = Vec::new();
        while let Some(item) = stream.try_next().await.map_err(|e| DatabaseError::query(sql, e))? {
            match item {
                QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                    description = Some(
                        meta.columns()
                            .iter()
                            .enumerate()
                            .map(|(idx, col)| {
                                let col_type = col.column_type();
                                ColumnInfo::new(col.name(), MssqlDriver::column_type_to_string(&col_type), idx)
                                    .with_kind(MssqlDriver::column_kind(&col_type))
                            })
                            .collect(),
                    );
                }
                QueryItem::Row(row) if row.result_index() == 0 => {
                    let values = row
                        .into_iter()
                        .map(MssqlDriver::cell_value_from_data)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| DatabaseError::query(sql, e))?;
                    rows.push(values);
                }
                _ => {}
            }
        }

        Ok(Cursor::new(description, rows))
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| DatabaseError::connection(self.target.clone(), e))?;
            info!(connection_id = %self.id, server = %self.target, "closed MS-SQL connection");
        }
        Ok(())
    }
}

/// MS-SQL driver implementation
pub struct MssqlDriver;

impl MssqlDriver {
    /// Create a new MS-SQL driver
    pub fn new() -> Self {
        Self
    }

    fn mssql_config(config: &ConnectionConfig) -> Result<&MssqlConfig, DatabaseError> {
        match config {
            ConnectionConfig::Mssql(c) => Ok(c),
            other => Err(DatabaseError::InvalidConfig(format!(
                "MS-SQL driver cannot use a {} configuration",
                other.database_type()
            ))),
        }
    }

    /// Create a tiberius Config from the connection settings
    fn to_tiberius_config(config: &MssqlConfig) -> Config {
        let mut tiberius_config = Config::new();
        tiberius_config.host(&config.host);
        tiberius_config.port(config.port);
        tiberius_config.database(&config.database);
        tiberius_config.authentication(AuthMethod::sql_server(&config.user, &config.password));

        if config.trust_server_certificate.is_yes() {
            tiberius_config.trust_cert();
        }

        if let Some(name) = config.application_name() {
            tiberius_config.application_name(name);
        }

        tiberius_config.encryption(if config.transport_encryption.is_yes() {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        tiberius_config
    }

    fn connection_error(target: &str, err: tiberius::error::Error) -> DatabaseError {
        if let tiberius::error::Error::Server(e) = &err {
            if e.code() == PASSWORD_EXPIRED {
                return DatabaseError::connection(
                    target,
                    format!("password expired, change it before reconnecting ({})", e),
                );
            }
        }
        DatabaseError::connection(target, err)
    }

    async fn open_client(config: Config, target: &str) -> Result<MssqlClient, DatabaseError> {
        let tcp = Self::open_tcp(&config, target).await?;

        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL gateways answer the first login with a redirect
            Err(tiberius::error::Error::Routing { host, port }) => {
                info!(server = %target, redirect_host = %host, redirect_port = port, "following MS-SQL routing redirect");
                let mut routed = config;
                routed.host(&host);
                routed.port(port);
                let tcp = Self::open_tcp(&routed, target).await?;
                Client::connect(routed, tcp.compat_write())
                    .await
                    .map_err(|e| Self::connection_error(target, e))
            }
            Err(e) => Err(Self::connection_error(target, e)),
        }
    }

    async fn open_tcp(config: &Config, target: &str) -> Result<TcpStream, DatabaseError> {
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| DatabaseError::connection(target, format!("TCP connection failed: {}", e)))?;

        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::connection(target, format!("Failed to set TCP_NODELAY: {}", e)))?;

        Ok(tcp)
    }

    /// Convert Tiberius ColumnType to string
    fn column_type_to_string(col_type: &ColumnType) -> String {
        match col_type {
            ColumnType::Int1 => "tinyint".to_string(),
            ColumnType::Int2 => "smallint".to_string(),
            ColumnType::Int4 => "int".to_string(),
            ColumnType::Int8 => "bigint".to_string(),
            ColumnType::Intn => "int".to_string(),
            ColumnType::Float4 => "real".to_string(),
            ColumnType::Float8 | ColumnType::Floatn => "float".to_string(),
            ColumnType::Decimaln | ColumnType::Numericn => "decimal".to_string(),
            ColumnType::Money | ColumnType::Money4 => "money".to_string(),
            ColumnType::Bit | ColumnType::Bitn => "bit".to_string(),
            ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::NVarchar | ColumnType::NChar
            | ColumnType::Text | ColumnType::NText => "nvarchar".to_string(),
            ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen => "datetime".to_string(),
            ColumnType::Datetime4 => "smalldatetime".to_string(),
            ColumnType::Daten => "date".to_string(),
            ColumnType::Timen => "time".to_string(),
            ColumnType::DatetimeOffsetn => "datetimeoffset".to_string(),
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => "varbinary".to_string(),
            ColumnType::Guid => "uniqueidentifier".to_string(),
            ColumnType::Xml => "xml".to_string(),
            ColumnType::Null => "null".to_string(),
            _ => format!("{:?}", col_type).to_lowercase(),
        }
    }

    fn column_kind(col_type: &ColumnType) -> Option<ValueKind> {
        match col_type {
            ColumnType::Int1 | ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 | ColumnType::Intn => {
                Some(ValueKind::Int)
            }
            ColumnType::Float4 | ColumnType::Float8 | ColumnType::Floatn | ColumnType::Decimaln
            | ColumnType::Numericn | ColumnType::Money | ColumnType::Money4 => Some(ValueKind::Float),
            ColumnType::Bit | ColumnType::Bitn => Some(ValueKind::Bool),
            ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::NVarchar | ColumnType::NChar
            | ColumnType::Text | ColumnType::NText | ColumnType::Guid | ColumnType::Xml => {
                Some(ValueKind::String)
            }
            ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime4 => {
                Some(ValueKind::DateTime)
            }
            ColumnType::Daten => Some(ValueKind::Date),
            ColumnType::Timen => Some(ValueKind::Time),
            ColumnType::DatetimeOffsetn => Some(ValueKind::DateTimeUtc),
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => Some(ValueKind::Binary),
            _ => None,
        }
    }

    /// Extract cell value from the raw column data of a row
    fn cell_value_from_data(data: ColumnData<'static>) -> Result<CellValue, tiberius::error::Error> {
        let value = match &data {
            ColumnData::U8(v) => v.map(|v| CellValue::Int(v as i64)),
            ColumnData::I16(v) => v.map(|v| CellValue::Int(v as i64)),
            ColumnData::I32(v) => v.map(|v| CellValue::Int(v as i64)),
            ColumnData::I64(v) => v.map(CellValue::Int),
            ColumnData::F32(v) => v.map(|v| CellValue::Float(v as f64)),
            ColumnData::F64(v) => v.map(CellValue::Float),
            ColumnData::Bit(v) => v.map(CellValue::Bool),
            ColumnData::String(v) => v.as_ref().map(|s| CellValue::String(s.to_string())),
            ColumnData::Guid(v) => v.map(|u| CellValue::String(u.to_string())),
            ColumnData::Binary(v) => v.as_ref().map(|b| CellValue::Binary(b.to_vec())),
            ColumnData::Numeric(v) => v.map(|n| CellValue::Float(f64::from(n))),
            ColumnData::Xml(v) => v
                .as_ref()
                .map(|xml| CellValue::String(xml.clone().into_owned().into_string())),
            ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
                NaiveDateTime::from_sql(&data)?.map(CellValue::DateTime)
            }
            ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(CellValue::Date),
            ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(CellValue::Time),
            ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(&data)?.map(CellValue::DateTimeUtc),
        };
        Ok(value.unwrap_or(CellValue::Null))
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        config.validate()?;
        let mssql_config = Self::mssql_config(config)?;
        let target = config.target();

        info!(
            server = %target,
            user = %mssql_config.user,
            encrypt = %mssql_config.transport_encryption,
            trust_server_certificate = %mssql_config.trust_server_certificate,
            driver = %mssql_config.driver_name,
            "connecting to MS-SQL server"
        );

        let tiberius_config = Self::to_tiberius_config(mssql_config);
        let client = match mssql_config.connect_timeout()? {
            Some(limit) => tokio::time::timeout(limit, Self::open_client(tiberius_config, &target))
                .await
                .map_err(|_| {
                    DatabaseError::connection(
                        target.clone(),
                        format!("login did not complete within {}s", limit.as_secs()),
                    )
                })??,
            None => Self::open_client(tiberius_config, &target).await?,
        };

        let connection = MssqlConnection {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            client: Some(client),
        };
        info!(connection_id = %connection.id, server = %connection.target, "connected to MS-SQL server");

        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{SqliteConfig, YesNo};
    use std::borrow::Cow;

    #[test]
    fn test_column_type_to_string() {
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::Int4), "int");
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::Float8), "float");
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::NVarchar), "nvarchar");
        assert_eq!(MssqlDriver::column_type_to_string(&ColumnType::Datetime), "datetime");
    }

    #[test]
    fn test_column_kind() {
        assert_eq!(MssqlDriver::column_kind(&ColumnType::Intn), Some(ValueKind::Int));
        assert_eq!(MssqlDriver::column_kind(&ColumnType::Decimaln), Some(ValueKind::Float));
        assert_eq!(MssqlDriver::column_kind(&ColumnType::Bitn), Some(ValueKind::Bool));
        assert_eq!(MssqlDriver::column_kind(&ColumnType::Daten), Some(ValueKind::Date));
        assert_eq!(MssqlDriver::column_kind(&ColumnType::DatetimeOffsetn), Some(ValueKind::DateTimeUtc));
        assert_eq!(MssqlDriver::column_kind(&ColumnType::Null), None);
    }

    #[test]
    fn test_cell_value_from_data() {
        assert_eq!(
            MssqlDriver::cell_value_from_data(ColumnData::I32(Some(42))).unwrap(),
            CellValue::Int(42)
        );
        assert_eq!(
            MssqlDriver::cell_value_from_data(ColumnData::U8(Some(7))).unwrap(),
            CellValue::Int(7)
        );
        assert_eq!(
            MssqlDriver::cell_value_from_data(ColumnData::I64(None)).unwrap(),
            CellValue::Null
        );
        assert_eq!(
            MssqlDriver::cell_value_from_data(ColumnData::Bit(Some(true))).unwrap(),
            CellValue::Bool(true)
        );
        assert_eq!(
            MssqlDriver::cell_value_from_data(ColumnData::String(Some(Cow::Borrowed("O'Connor")))).unwrap(),
            CellValue::from("O'Connor")
        );
        assert_eq!(
            MssqlDriver::cell_value_from_data(ColumnData::Binary(Some(Cow::Owned(vec![0xCA, 0xFE])))).unwrap(),
            CellValue::Binary(vec![0xCA, 0xFE])
        );
    }

    #[test]
    fn test_driver_type() {
        let driver = MssqlDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Mssql);
        assert_eq!(driver.driver_name(), "Microsoft SQL Server");
    }

    #[test]
    fn test_tiberius_config_conversion() {
        let mut config = MssqlConfig::new("localhost", "master", "sa", "password123");
        config.transport_encryption = YesNo::No;
        config.trust_server_certificate = YesNo::No;
        config.extra.insert("Application Name".to_string(), "nightly-export".to_string());

        let tiberius_config = MssqlDriver::to_tiberius_config(&config);
        assert_eq!(tiberius_config.get_addr(), "localhost:1433");
    }

    #[tokio::test]
    async fn test_unsupported_settings_fail_before_connecting() {
        let mut with_mars = MssqlConfig::new("127.0.0.1", "master", "sa", "pw");
        with_mars.port = 1;
        with_mars.mars = YesNo::Yes;
        let result = MssqlDriver::new().connect(&ConnectionConfig::Mssql(with_mars)).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));

        let mut with_unknown = MssqlConfig::new("127.0.0.1", "master", "sa", "pw");
        with_unknown.port = 1;
        with_unknown.extra.insert("MultiSubnetFailover".to_string(), "yes".to_string());
        let result = MssqlDriver::new().connect(&ConnectionConfig::Mssql(with_unknown)).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_rejects_other_backend_config() {
        let config = ConnectionConfig::Sqlite(SqliteConfig::in_memory());
        let result = MssqlDriver::new().connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let mut config = MssqlConfig::new("127.0.0.1", "master", "sa", "pw");
        config.port = 1;
        let err = MssqlDriver::new()
            .connect(&ConnectionConfig::Mssql(config))
            .await
            .err()
            .unwrap();
        match err {
            DatabaseError::ConnectionFailed { target, .. } => assert_eq!(target, "127.0.0.1:1/master"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
