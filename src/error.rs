// Crate Error
// Unifies DatabaseError and ExportError for the extraction pipeline

use thiserror::Error;

use crate::db::DatabaseError;
use crate::export::ExportError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Batch plan could not be read or is malformed
    #[error("Invalid batch plan: {0}")]
    InvalidPlan(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Database(e) if e.is_connection_error())
    }
}
