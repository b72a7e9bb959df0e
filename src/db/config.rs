// Connection Configuration
// Backend-tagged configuration variants, environment loading and saved profiles

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::db::traits::{DatabaseError, DatabaseType};

pub const DEFAULT_MSSQL_DRIVER: &str = "tiberius";
pub const DEFAULT_POSTGRES_SSLMODE: &str = "prefer";
pub const SQLITE_IN_MEMORY: &str = ":memory:";

/// Extra SQL Server connection-string keys the provider applies
const MSSQL_APPLICATION_NAME_KEYS: &[&str] = &["application name", "app"];
const MSSQL_CONNECT_TIMEOUT_KEYS: &[&str] = &["connect timeout", "connection timeout"];

/// A `yes` / `no` switch, as used by ODBC-style connection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        self == YesNo::Yes
    }
}

impl From<bool> for YesNo {
    fn from(value: bool) -> Self {
        if value {
            YesNo::Yes
        } else {
            YesNo::No
        }
    }
}

impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_yes() { "yes" } else { "no" })
    }
}

impl FromStr for YesNo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" | "on" => Ok(YesNo::Yes),
            "no" | "false" | "0" | "off" => Ok(YesNo::No),
            other => Err(format!("expected 'yes' or 'no', got '{}'", other)),
        }
    }
}

fn default_mssql_port() -> u16 {
    DatabaseType::Mssql.default_port()
}

fn default_mysql_port() -> u16 {
    DatabaseType::Mysql.default_port()
}

fn default_postgres_port() -> u16 {
    DatabaseType::Postgresql.default_port()
}

fn default_yes() -> YesNo {
    YesNo::Yes
}

fn default_no() -> YesNo {
    YesNo::No
}

fn default_mssql_driver() -> String {
    DEFAULT_MSSQL_DRIVER.to_string()
}

fn default_sslmode() -> String {
    DEFAULT_POSTGRES_SSLMODE.to_string()
}

/// Connection configuration for MS-SQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MssqlConfig {
    pub host: String,
    #[serde(default = "default_mssql_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default, skip_serializing)] // Don't serialize password
    pub password: String,
    #[serde(default = "default_yes", alias = "encrypt")]
    pub transport_encryption: YesNo,
    #[serde(default = "default_yes")]
    pub trust_server_certificate: YesNo,
    /// Transport driver identifier, reported in logs and diagnostics
    #[serde(default = "default_mssql_driver")]
    pub driver_name: String,
    /// Multiple active result sets; only `no` is supported
    #[serde(default = "default_no")]
    pub mars: YesNo,
    /// Additional connection-string settings (`Application Name`, `Connect Timeout`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl MssqlConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_mssql_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            transport_encryption: YesNo::Yes,
            trust_server_certificate: YesNo::Yes,
            driver_name: default_mssql_driver(),
            mars: YesNo::No,
            extra: BTreeMap::new(),
        }
    }

    fn extra_value(&self, keys: &[&str]) -> Option<&str> {
        self.extra
            .iter()
            .find(|(key, _)| keys.contains(&normalize_key(key).as_str()))
            .map(|(_, value)| value.trim())
    }

    /// `Application Name` from the extra settings
    pub fn application_name(&self) -> Option<&str> {
        self.extra_value(MSSQL_APPLICATION_NAME_KEYS)
    }

    /// `Connect Timeout` from the extra settings, in seconds
    pub fn connect_timeout(&self) -> Result<Option<Duration>, DatabaseError> {
        match self.extra_value(MSSQL_CONNECT_TIMEOUT_KEYS) {
            None => Ok(None),
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
                _ => Err(DatabaseError::InvalidConfig(format!(
                    "Connect Timeout must be a positive number of seconds, got '{}'",
                    raw
                ))),
            },
        }
    }

    fn validate_extra(&self) -> Result<(), DatabaseError> {
        for key in self.extra.keys() {
            let normalized = normalize_key(key);
            let known = MSSQL_APPLICATION_NAME_KEYS.contains(&normalized.as_str())
                || MSSQL_CONNECT_TIMEOUT_KEYS.contains(&normalized.as_str());
            if !known {
                return Err(DatabaseError::InvalidConfig(format!(
                    "Unsupported SQL Server connection setting '{}' (supported: Application Name, Connect Timeout)",
                    key
                )));
            }
        }
        self.connect_timeout()?;
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Parse `key=value;key=value` connection-string pairs
pub fn parse_connection_pairs(raw: &str) -> Result<BTreeMap<String, String>, DatabaseError> {
    let mut pairs = BTreeMap::new();
    for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            DatabaseError::InvalidConfig(format!("Expected key=value, got '{}'", part))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DatabaseError::InvalidConfig(format!("Missing key in '{}'", part)));
        }
        pairs.insert(key.to_string(), value.trim().to_string());
    }
    Ok(pairs)
}

/// Connection configuration for MySQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_no")]
    pub transport_encryption: YesNo,
    #[serde(default = "default_no")]
    pub trust_server_certificate: YesNo,
}

impl MysqlConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_mysql_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            transport_encryption: YesNo::No,
            trust_server_certificate: YesNo::No,
        }
    }
}

/// Connection configuration for PostgreSQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// "disable", "prefer" or "require"
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

impl PostgresConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_postgres_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            sslmode: default_sslmode(),
        }
    }
}

/// Connection configuration for SQLite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file path, or `:memory:`
    pub path: String,
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_memory() -> Self {
        Self::new(SQLITE_IN_MEMORY)
    }
}

/// Unified connection configuration, one variant per backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ConnectionConfig {
    Mssql(MssqlConfig),
    Mysql(MysqlConfig),
    #[serde(alias = "postgresql")]
    Postgres(PostgresConfig),
    Sqlite(SqliteConfig),
}

impl ConnectionConfig {
    pub fn database_type(&self) -> DatabaseType {
        match self {
            ConnectionConfig::Mssql(_) => DatabaseType::Mssql,
            ConnectionConfig::Mysql(_) => DatabaseType::Mysql,
            ConnectionConfig::Postgres(_) => DatabaseType::Postgresql,
            ConnectionConfig::Sqlite(_) => DatabaseType::Sqlite,
        }
    }

    /// Diagnostic target: `host:port/database`, or the SQLite path
    pub fn target(&self) -> String {
        match self {
            ConnectionConfig::Mssql(c) => format!("{}:{}/{}", c.host, c.port, c.database),
            ConnectionConfig::Mysql(c) => format!("{}:{}/{}", c.host, c.port, c.database),
            ConnectionConfig::Postgres(c) => format!("{}:{}/{}", c.host, c.port, c.database),
            ConnectionConfig::Sqlite(c) => c.path.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        match self {
            ConnectionConfig::Mssql(c) => {
                validate_network(&c.host, c.port, &c.database, &c.user)?;
                if c.driver_name.trim().is_empty() {
                    return Err(DatabaseError::InvalidConfig(
                        "Driver name cannot be empty".to_string(),
                    ));
                }
                if c.mars.is_yes() {
                    return Err(DatabaseError::InvalidConfig(
                        "MARS is not supported; statements run one at a time on a connection".to_string(),
                    ));
                }
                c.validate_extra()?;
            }
            ConnectionConfig::Mysql(c) => validate_network(&c.host, c.port, &c.database, &c.user)?,
            ConnectionConfig::Postgres(c) => {
                validate_network(&c.host, c.port, &c.database, &c.user)?;
                match c.sslmode.as_str() {
                    "disable" | "prefer" => {}
                    "require" => {
                        return Err(DatabaseError::InvalidConfig(
                            "sslmode 'require' is not supported: PostgreSQL connections are made without TLS (use disable or prefer)"
                                .to_string(),
                        ))
                    }
                    other => {
                        return Err(DatabaseError::InvalidConfig(format!(
                            "Unsupported sslmode '{}' (expected disable or prefer)",
                            other
                        )))
                    }
                }
            }
            ConnectionConfig::Sqlite(c) => {
                if c.path.trim().is_empty() {
                    return Err(DatabaseError::InvalidConfig(
                        "SQLite database path is required".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Build a configuration from the process environment
    pub fn from_env(database_type: DatabaseType) -> Result<Self, DatabaseError> {
        Self::from_lookup(database_type, |key| std::env::var(key).ok())
    }

    /// Build a configuration from `<PREFIX>_<FIELD>` variables resolved by `lookup`
    pub fn from_lookup<F>(database_type: DatabaseType, lookup: F) -> Result<Self, DatabaseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = database_type.env_prefix();
        let var = |field: &str| -> Option<String> {
            lookup(&format!("{}_{}", prefix, field)).filter(|v| !v.trim().is_empty())
        };
        let required = |field: &str| -> Result<String, DatabaseError> {
            var(field).ok_or_else(|| {
                DatabaseError::InvalidConfig(format!("{}_{} is not set", prefix, field))
            })
        };
        let port = |default: u16| -> Result<u16, DatabaseError> {
            match var("PORT") {
                Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                    DatabaseError::InvalidConfig(format!("Invalid port number: {}", raw))
                }),
                None => Ok(default),
            }
        };
        let switch = |field: &str, default: YesNo| -> Result<YesNo, DatabaseError> {
            match var(field) {
                Some(raw) => raw.parse::<YesNo>().map_err(|e| {
                    DatabaseError::InvalidConfig(format!("{}_{}: {}", prefix, field, e))
                }),
                None => Ok(default),
            }
        };

        let config = match database_type {
            DatabaseType::Mssql => ConnectionConfig::Mssql(MssqlConfig {
                host: required("HOST")?,
                port: port(default_mssql_port())?,
                database: required("DATABASE")?,
                user: required("USER")?,
                password: var("PASSWORD").unwrap_or_default(),
                transport_encryption: switch("ENCRYPT", YesNo::Yes)?,
                trust_server_certificate: switch("TRUST_CERT", YesNo::Yes)?,
                driver_name: var("DRIVER").unwrap_or_else(default_mssql_driver),
                mars: switch("MARS", YesNo::No)?,
                extra: match var("EXTRA") {
                    Some(raw) => parse_connection_pairs(&raw).map_err(|e| {
                        DatabaseError::InvalidConfig(format!("{}_EXTRA: {}", prefix, e))
                    })?,
                    None => BTreeMap::new(),
                },
            }),
            DatabaseType::Mysql => ConnectionConfig::Mysql(MysqlConfig {
                host: required("HOST")?,
                port: port(default_mysql_port())?,
                database: required("DATABASE")?,
                user: required("USER")?,
                password: var("PASSWORD").unwrap_or_default(),
                transport_encryption: switch("ENCRYPT", YesNo::No)?,
                trust_server_certificate: switch("TRUST_CERT", YesNo::No)?,
            }),
            DatabaseType::Postgresql => ConnectionConfig::Postgres(PostgresConfig {
                host: required("HOST")?,
                port: port(default_postgres_port())?,
                database: required("DATABASE")?,
                user: required("USER")?,
                password: var("PASSWORD").unwrap_or_default(),
                sslmode: var("SSLMODE").unwrap_or_else(default_sslmode),
            }),
            DatabaseType::Sqlite => ConnectionConfig::Sqlite(SqliteConfig {
                path: required("PATH")?,
            }),
        };

        config.validate()?;
        Ok(config)
    }
}

fn validate_network(host: &str, port: u16, database: &str, user: &str) -> Result<(), DatabaseError> {
    if host.trim().is_empty() {
        return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
    }
    if port == 0 {
        return Err(DatabaseError::InvalidConfig("Invalid port number: 0".to_string()));
    }
    if database.trim().is_empty() {
        return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
    }
    if user.trim().is_empty() {
        return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
    }
    Ok(())
}

/// Named connection configurations stored in a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionProfiles {
    #[serde(default)]
    pub profiles: BTreeMap<String, ConnectionConfig>,
}

impl ConnectionProfiles {
    /// Default location: `<config dir>/sql-parquet-export/profiles.json`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sql-parquet-export")
            .map(|dirs| dirs.config_dir().join("profiles.json"))
    }

    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| match e {
            DatabaseError::InvalidConfig(msg) => {
                DatabaseError::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, DatabaseError> {
        let profiles: Self = serde_json::from_str(content)
            .map_err(|e| DatabaseError::InvalidConfig(format!("Invalid profiles file: {}", e)))?;
        for (name, config) in &profiles.profiles {
            config.validate().map_err(|e| {
                DatabaseError::InvalidConfig(format!("Profile '{}': {}", name, e))
            })?;
        }
        Ok(profiles)
    }

    pub fn get(&self, name: &str) -> Result<&ConnectionConfig, DatabaseError> {
        self.profiles
            .get(name)
            .ok_or_else(|| DatabaseError::InvalidConfig(format!("Profile '{}' not found", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_mssql_from_env_with_defaults() {
        let lookup = lookup_from(&[
            ("SQLSERVER_HOST", "db.local"),
            ("SQLSERVER_DATABASE", "sales"),
            ("SQLSERVER_USER", "sa"),
            ("SQLSERVER_PASSWORD", "secret"),
        ]);

        let config = ConnectionConfig::from_lookup(DatabaseType::Mssql, lookup).unwrap();
        match config {
            ConnectionConfig::Mssql(c) => {
                assert_eq!(c.host, "db.local");
                assert_eq!(c.port, 1433);
                assert_eq!(c.password, "secret");
                assert_eq!(c.transport_encryption, YesNo::Yes);
                assert_eq!(c.trust_server_certificate, YesNo::Yes);
                assert_eq!(c.driver_name, DEFAULT_MSSQL_DRIVER);
                assert_eq!(c.mars, YesNo::No);
                assert!(c.extra.is_empty());
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_mysql_from_env_overrides() {
        let lookup = lookup_from(&[
            ("MYSQL_HOST", "127.0.0.1"),
            ("MYSQL_PORT", "3307"),
            ("MYSQL_DATABASE", "shop"),
            ("MYSQL_USER", "root"),
            ("MYSQL_ENCRYPT", "yes"),
        ]);

        let config = ConnectionConfig::from_lookup(DatabaseType::Mysql, lookup).unwrap();
        assert_eq!(config.database_type(), DatabaseType::Mysql);
        assert_eq!(config.target(), "127.0.0.1:3307/shop");
        match config {
            ConnectionConfig::Mysql(c) => {
                assert_eq!(c.transport_encryption, YesNo::Yes);
                assert_eq!(c.trust_server_certificate, YesNo::No);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_from_env_missing_required_field() {
        let lookup = lookup_from(&[("SQLSERVER_HOST", "db.local"), ("SQLSERVER_USER", "sa")]);
        let err = ConnectionConfig::from_lookup(DatabaseType::Mssql, lookup).unwrap_err();
        assert!(err.to_string().contains("SQLSERVER_DATABASE"));
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let bad_port = lookup_from(&[
            ("POSTGRES_HOST", "pg"),
            ("POSTGRES_PORT", "70000"),
            ("POSTGRES_DATABASE", "app"),
            ("POSTGRES_USER", "app"),
        ]);
        assert!(ConnectionConfig::from_lookup(DatabaseType::Postgresql, bad_port).is_err());

        let bad_switch = lookup_from(&[
            ("SQLSERVER_HOST", "db"),
            ("SQLSERVER_DATABASE", "x"),
            ("SQLSERVER_USER", "sa"),
            ("SQLSERVER_ENCRYPT", "maybe"),
        ]);
        let err = ConnectionConfig::from_lookup(DatabaseType::Mssql, bad_switch).unwrap_err();
        assert!(err.to_string().contains("SQLSERVER_ENCRYPT"));
    }

    #[test]
    fn test_validate_network_config() {
        let mut config = MssqlConfig::new("localhost", "master", "sa", "pw");
        assert!(ConnectionConfig::Mssql(config.clone()).validate().is_ok());

        config.port = 0;
        assert!(ConnectionConfig::Mssql(config.clone()).validate().is_err());

        config.port = 1433;
        config.user = String::new();
        assert!(ConnectionConfig::Mssql(config).validate().is_err());

        let mut pg = PostgresConfig::new("localhost", "app", "app", "pw");
        pg.sslmode = "verify-full".to_string();
        assert!(ConnectionConfig::Postgres(pg.clone()).validate().is_err());
        pg.sslmode = "disable".to_string();
        assert!(ConnectionConfig::Postgres(pg).validate().is_ok());

        assert!(ConnectionConfig::Sqlite(SqliteConfig::new("")).validate().is_err());
    }

    #[test]
    fn test_postgres_sslmode_require_rejected() {
        let mut pg = PostgresConfig::new("localhost", "app", "app", "pw");
        pg.sslmode = "require".to_string();
        match ConnectionConfig::Postgres(pg).validate() {
            Err(DatabaseError::InvalidConfig(msg)) => assert!(msg.contains("require")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_mssql_mars_rejected() {
        let mut config = MssqlConfig::new("localhost", "master", "sa", "pw");
        config.mars = YesNo::Yes;
        match ConnectionConfig::Mssql(config).validate() {
            Err(DatabaseError::InvalidConfig(msg)) => assert!(msg.contains("MARS")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_mssql_extra_settings() {
        let mut config = MssqlConfig::new("localhost", "master", "sa", "pw");
        config.extra.insert("Application Name".to_string(), "nightly-export".to_string());
        config.extra.insert("Connect  Timeout".to_string(), "15".to_string());
        assert!(ConnectionConfig::Mssql(config.clone()).validate().is_ok());
        assert_eq!(config.application_name(), Some("nightly-export"));
        assert_eq!(config.connect_timeout().unwrap(), Some(Duration::from_secs(15)));

        let mut bad_timeout = config.clone();
        bad_timeout.extra.insert("Connect  Timeout".to_string(), "soon".to_string());
        assert!(ConnectionConfig::Mssql(bad_timeout).validate().is_err());

        config.extra.insert("Packet Size".to_string(), "4096".to_string());
        let err = ConnectionConfig::Mssql(config).validate().unwrap_err();
        assert!(err.to_string().contains("Packet Size"));
    }

    #[test]
    fn test_mssql_extra_and_mars_from_env() {
        let lookup = lookup_from(&[
            ("SQLSERVER_HOST", "db.local"),
            ("SQLSERVER_DATABASE", "sales"),
            ("SQLSERVER_USER", "sa"),
            ("SQLSERVER_EXTRA", "Application Name=reports; Connect Timeout=5;"),
        ]);
        match ConnectionConfig::from_lookup(DatabaseType::Mssql, lookup).unwrap() {
            ConnectionConfig::Mssql(c) => {
                assert_eq!(c.extra.len(), 2);
                assert_eq!(c.application_name(), Some("reports"));
                assert_eq!(c.connect_timeout().unwrap(), Some(Duration::from_secs(5)));
            }
            other => panic!("unexpected config: {:?}", other),
        }

        let with_mars = lookup_from(&[
            ("SQLSERVER_HOST", "db.local"),
            ("SQLSERVER_DATABASE", "sales"),
            ("SQLSERVER_USER", "sa"),
            ("SQLSERVER_MARS", "yes"),
        ]);
        assert!(ConnectionConfig::from_lookup(DatabaseType::Mssql, with_mars).is_err());

        assert!(parse_connection_pairs("no-equals-sign").is_err());
        assert!(parse_connection_pairs("=value").is_err());
    }

    #[test]
    fn test_yes_no_parsing() {
        assert_eq!("YES".parse::<YesNo>().unwrap(), YesNo::Yes);
        assert_eq!("false".parse::<YesNo>().unwrap(), YesNo::No);
        assert!("sometimes".parse::<YesNo>().is_err());
        assert_eq!(YesNo::from(true).to_string(), "yes");
    }

    #[test]
    fn test_profiles_from_json() {
        let json = r#"{
            "profiles": {
                "warehouse": {
                    "backend": "mssql",
                    "host": "wh.internal",
                    "database": "dw",
                    "user": "reader",
                    "password": "pw",
                    "encrypt": "no"
                },
                "local": { "backend": "sqlite", "path": ":memory:" }
            }
        }"#;

        let profiles = ConnectionProfiles::from_json(json).unwrap();
        match profiles.get("warehouse").unwrap() {
            ConnectionConfig::Mssql(c) => {
                assert_eq!(c.port, 1433);
                assert_eq!(c.transport_encryption, YesNo::No);
                assert_eq!(c.password, "pw");
            }
            other => panic!("unexpected config: {:?}", other),
        }
        assert_eq!(
            profiles.get("local").unwrap().database_type(),
            DatabaseType::Sqlite
        );
        assert!(profiles.get("missing").is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let config = ConnectionConfig::Mysql(MysqlConfig::new("h", "d", "u", "hunter2"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""backend":"mysql""#));
        assert!(!json.contains("hunter2"));
    }
}
