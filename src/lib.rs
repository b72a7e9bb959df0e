// sql-parquet-export
// db: connection providers and the record materializer; export: Parquet writer;
// pipeline: connect, execute, export and close as one call, plus batch runs

// Module declarations
pub mod db;
pub mod error;
pub mod export;
pub mod pipeline;

pub use db::{
    CellValue, ColumnInfo, Connection, ConnectionConfig, DatabaseError, DatabaseType, Record,
    RecordSet,
};
pub use error::{Error, Result};
pub use export::{ExportError, ExportOptions, ExportSummary, ParquetCompression, ParquetExporter};
pub use pipeline::{check_connection, extract_to_parquet, run_batch, BatchPlan, BatchQuery};
