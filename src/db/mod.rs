// Database Module
// Connection providers, configuration and record materialization

pub mod config;
pub mod drivers;
pub mod query;
pub mod traits;

pub use config::{
    ConnectionConfig, ConnectionProfiles, MssqlConfig, MysqlConfig, PostgresConfig, SqliteConfig,
    YesNo,
};
pub use drivers::{
    connect, driver_for, test_connection, MssqlDriver, MysqlDriver, PostgresDriver, SqliteDriver,
};
pub use query::{execute, materialize, Record, RecordSet};
pub use traits::{
    CellValue, ColumnInfo, Connection, Cursor, DatabaseDriver, DatabaseError, DatabaseType,
    ValueKind,
};
