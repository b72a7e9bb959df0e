// Export Module
// Persists materialized record sets as Parquet files

pub mod parquet;

pub use self::parquet::ParquetExporter;

use ::parquet::basic::{Compression as ParquetCompressionCodec, GzipLevel, ZstdLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::db::ValueKind;

/// Compression codec applied to every column chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    None,
    #[default]
    Snappy,
    Gzip,
    Lz4,
    Zstd,
}

impl ParquetCompression {
    pub(crate) fn to_codec(self) -> ParquetCompressionCodec {
        match self {
            ParquetCompression::None => ParquetCompressionCodec::UNCOMPRESSED,
            ParquetCompression::Snappy => ParquetCompressionCodec::SNAPPY,
            ParquetCompression::Gzip => ParquetCompressionCodec::GZIP(GzipLevel::default()),
            ParquetCompression::Lz4 => ParquetCompressionCodec::LZ4_RAW,
            ParquetCompression::Zstd => ParquetCompressionCodec::ZSTD(ZstdLevel::default()),
        }
    }
}

impl fmt::Display for ParquetCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParquetCompression::None => "none",
            ParquetCompression::Snappy => "snappy",
            ParquetCompression::Gzip => "gzip",
            ParquetCompression::Lz4 => "lz4",
            ParquetCompression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

impl FromStr for ParquetCompression {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(ParquetCompression::None),
            "snappy" => Ok(ParquetCompression::Snappy),
            "gzip" => Ok(ParquetCompression::Gzip),
            "lz4" => Ok(ParquetCompression::Lz4),
            "zstd" => Ok(ParquetCompression::Zstd),
            other => Err(ExportError::InvalidOptions(format!(
                "unknown compression '{}' (expected none, snappy, gzip, lz4 or zstd)",
                other
            ))),
        }
    }
}

/// Export options for customizing output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default)]
    pub compression: ParquetCompression,
    /// Upper bound on rows per row group (None = writer default)
    #[serde(default)]
    pub max_row_group_size: Option<usize>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            compression: ParquetCompression::default(),
            max_row_group_size: None,
        }
    }
}

impl ExportOptions {
    #[must_use]
    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_max_row_group_size(mut self, rows: usize) -> Self {
        self.max_row_group_size = Some(rows);
        self
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.max_row_group_size == Some(0) {
            return Err(ExportError::InvalidOptions(
                "max_row_group_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a completed export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows_exported: usize,
    pub bytes_written: u64,
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Column '{column}' holds {found} at row {row} but earlier rows hold {expected}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Invalid export options: {0}")]
    InvalidOptions(String),

    #[error("Export to {path} failed: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: Box<ExportError>,
    },
}

impl ExportError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Attach the destination path unless the error already names one
    pub(crate) fn at(self, path: &Path) -> Self {
        match self {
            ExportError::Io { .. } | ExportError::Destination { .. } => self,
            other => ExportError::Destination {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }

    /// Destination path carried by this error, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ExportError::Io { path, .. } | ExportError::Destination { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<arrow::error::ArrowError> for ExportError {
    fn from(err: arrow::error::ArrowError) -> Self {
        ExportError::Arrow(err.to_string())
    }
}

impl From<::parquet::errors::ParquetError> for ExportError {
    fn from(err: ::parquet::errors::ParquetError) -> Self {
        ExportError::Parquet(err.to_string())
    }
}
