// Database Drivers
// One connection provider per supported backend

pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

// Re-export drivers
pub use mssql::MssqlDriver;
pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use crate::db::config::ConnectionConfig;
use crate::db::traits::{Connection, DatabaseDriver, DatabaseError, DatabaseType};

/// Get the driver for a database type
pub fn driver_for(db_type: DatabaseType) -> Box<dyn DatabaseDriver> {
    match db_type {
        DatabaseType::Mssql => Box::new(MssqlDriver::new()),
        DatabaseType::Mysql => Box::new(MysqlDriver::new()),
        DatabaseType::Postgresql => Box::new(PostgresDriver::new()),
        DatabaseType::Sqlite => Box::new(SqliteDriver::new()),
    }
}

/// Open a handle with the driver matching the configuration's backend
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connection>, DatabaseError> {
    driver_for(config.database_type()).connect(config).await
}

/// Connect, probe and release a handle without running any user statement
pub async fn test_connection(config: &ConnectionConfig) -> Result<bool, DatabaseError> {
    driver_for(config.database_type()).test_connection(config).await
}
