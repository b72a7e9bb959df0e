// Parquet Exporter
// Converts a record set into one Arrow batch and writes it through a temp file
// that is renamed into place once the footer is synced

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    Time64MicrosecondArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{Datelike, NaiveTime, Timelike};
use ::parquet::arrow::ArrowWriter;
use ::parquet::file::properties::WriterProperties;
use tracing::{debug, info};

use super::{ExportError, ExportOptions, ExportSummary};
use crate::db::{CellValue, ColumnInfo, Record, RecordSet, ValueKind};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Timezone tag for instants normalized to UTC
const UTC: &str = "UTC";

static NULL_CELL: CellValue = CellValue::Null;

/// Parquet exporter for record sets
pub struct ParquetExporter {
    options: ExportOptions,
}

impl ParquetExporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn with_default_options() -> Self {
        Self::new(ExportOptions::default())
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Write `records` to a Parquet file at `destination`.
    ///
    /// Missing parent directories are created. On failure nothing is left at
    /// the destination and the temporary file is removed.
    pub fn write(&self, records: &RecordSet, destination: &Path) -> Result<ExportSummary, ExportError> {
        self.write_file(records, destination)
            .map_err(|e| e.at(destination))
    }

    fn write_file(&self, records: &RecordSet, destination: &Path) -> Result<ExportSummary, ExportError> {
        self.options.validate()?;
        // Conversion happens before the filesystem is touched
        let batch = to_record_batch(records)?;

        let file_name = destination
            .file_name()
            .ok_or_else(|| ExportError::InvalidOptions("destination has no file name".to_string()))?;
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| ExportError::io(&parent, e))?;

        let temp = TempFile::new(parent.join(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4()
        )));

        let file = File::create(temp.path()).map_err(|e| ExportError::io(temp.path(), e))?;
        let writer = self.write_batch(&batch, BufWriter::new(file))?;
        let file = writer
            .into_inner()
            .map_err(|e| ExportError::io(temp.path(), e.into_error()))?;
        file.sync_all().map_err(|e| ExportError::io(temp.path(), e))?;
        let bytes_written = file
            .metadata()
            .map_err(|e| ExportError::io(temp.path(), e))?
            .len();
        drop(file);

        fs::rename(temp.path(), destination).map_err(|e| ExportError::io(destination, e))?;
        temp.persist();
        sync_dir(&parent).map_err(|e| ExportError::io(&parent, e))?;

        info!(
            path = %destination.display(),
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            bytes = bytes_written,
            compression = %self.options.compression,
            "parquet export complete"
        );

        Ok(ExportSummary {
            path: destination.to_path_buf(),
            rows_exported: batch.num_rows(),
            bytes_written,
        })
    }

    /// Write `records` as Parquet into any writer, returning the row count
    pub fn write_to<W: Write + Send>(&self, records: &RecordSet, writer: W) -> Result<usize, ExportError> {
        self.options.validate()?;
        let batch = to_record_batch(records)?;
        self.write_batch(&batch, writer)?;
        Ok(batch.num_rows())
    }

    fn write_batch<W: Write + Send>(&self, batch: &RecordBatch, writer: W) -> Result<W, ExportError> {
        let mut props = WriterProperties::builder().set_compression(self.options.compression.to_codec());
        if let Some(rows) = self.options.max_row_group_size {
            props = props.set_max_row_group_size(rows);
        }

        let mut parquet_writer = ArrowWriter::try_new(writer, batch.schema(), Some(props.build()))?;
        parquet_writer.write(batch)?;
        // into_inner writes the footer
        Ok(parquet_writer.into_inner()?)
    }
}

impl Default for ParquetExporter {
    fn default() -> Self {
        Self::with_default_options()
    }
}

/// Flush directory entries so the rename survives a crash. No-op off Unix.
fn sync_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Temporary output file, removed on drop unless persisted
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self) {
        self.keep = true;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Convert a record set into one Arrow batch.
///
/// Column types come from the non-null values; integer and float values in
/// one column widen to float64, and all-null columns fall back to the
/// declared kind (Utf8 when unknown). A record set without columns, as
/// produced by statements that return no result set, becomes an empty-schema
/// batch with zero rows.
pub fn to_record_batch(records: &RecordSet) -> Result<RecordBatch, ExportError> {
    let columns = records.columns();
    if columns.is_empty() {
        let options = RecordBatchOptions::new().with_row_count(Some(0));
        let batch = RecordBatch::try_new_with_options(Arc::new(Schema::empty()), vec![], &options)?;
        return Ok(batch);
    }

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    for (col_idx, column) in columns.iter().enumerate() {
        let kind = infer_kind(records.records(), col_idx, column)?;
        debug!(column = %column.name, kind = %kind, "inferred column type");
        fields.push(Field::new(column.name.as_str(), data_type(kind), true));
        arrays.push(build_array(records.records(), col_idx, column, kind)?);
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    Ok(batch)
}

fn cell<'a>(record: &'a Record, col_idx: usize) -> &'a CellValue {
    record.values().get(col_idx).unwrap_or(&NULL_CELL)
}

fn infer_kind(records: &[Record], col_idx: usize, column: &ColumnInfo) -> Result<ValueKind, ExportError> {
    let mut inferred: Option<ValueKind> = None;
    for (row, record) in records.iter().enumerate() {
        let Some(found) = cell(record, col_idx).kind() else {
            continue;
        };
        inferred = match inferred {
            None => Some(found),
            Some(current) if current == found => Some(current),
            Some(ValueKind::Int) | Some(ValueKind::Float)
                if matches!(found, ValueKind::Int | ValueKind::Float) =>
            {
                Some(ValueKind::Float)
            }
            Some(expected) => {
                return Err(ExportError::TypeMismatch {
                    column: column.name.clone(),
                    row,
                    expected,
                    found,
                })
            }
        };
    }
    Ok(inferred.or(column.kind).unwrap_or(ValueKind::String))
}

fn data_type(kind: ValueKind) -> DataType {
    match kind {
        ValueKind::Bool => DataType::Boolean,
        ValueKind::Int => DataType::Int64,
        ValueKind::Float => DataType::Float64,
        ValueKind::String => DataType::Utf8,
        ValueKind::Date => DataType::Date32,
        ValueKind::Time => DataType::Time64(TimeUnit::Microsecond),
        ValueKind::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
        ValueKind::DateTimeUtc => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
        ValueKind::Binary => DataType::Binary,
    }
}

/// Gather one column, mapping each non-null cell with `extract`.
/// `extract` returns `None` for cells of the wrong kind.
fn collect_column<'a, T>(
    records: &'a [Record],
    col_idx: usize,
    column: &ColumnInfo,
    expected: ValueKind,
    extract: impl Fn(&'a CellValue) -> Option<T>,
) -> Result<Vec<Option<T>>, ExportError> {
    records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let value = cell(record, col_idx);
            match value.kind() {
                None => Ok(None),
                Some(found) => extract(value).map(Some).ok_or_else(|| ExportError::TypeMismatch {
                    column: column.name.clone(),
                    row,
                    expected,
                    found,
                }),
            }
        })
        .collect()
}

fn time_micros(t: &NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64 * 1_000_000 + (t.nanosecond() / 1_000) as i64
}

fn build_array(
    records: &[Record],
    col_idx: usize,
    column: &ColumnInfo,
    kind: ValueKind,
) -> Result<ArrayRef, ExportError> {
    let array: ArrayRef = match kind {
        ValueKind::Bool => Arc::new(BooleanArray::from(collect_column(records, col_idx, column, kind, |v| {
            match v {
                CellValue::Bool(b) => Some(*b),
                _ => None,
            }
        })?)),
        ValueKind::Int => Arc::new(Int64Array::from(collect_column(records, col_idx, column, kind, |v| {
            match v {
                CellValue::Int(i) => Some(*i),
                _ => None,
            }
        })?)),
        ValueKind::Float => Arc::new(Float64Array::from(collect_column(records, col_idx, column, kind, |v| {
            match v {
                CellValue::Float(f) => Some(*f),
                CellValue::Int(i) => Some(*i as f64),
                _ => None,
            }
        })?)),
        ValueKind::String => Arc::new(StringArray::from(collect_column(records, col_idx, column, kind, |v| {
            match v {
                CellValue::String(s) => Some(s.as_str()),
                _ => None,
            }
        })?)),
        ValueKind::Date => Arc::new(Date32Array::from(collect_column(records, col_idx, column, kind, |v| {
            match v {
                CellValue::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                _ => None,
            }
        })?)),
        ValueKind::Time => Arc::new(Time64MicrosecondArray::from(collect_column(
            records,
            col_idx,
            column,
            kind,
            |v| match v {
                CellValue::Time(t) => Some(time_micros(t)),
                _ => None,
            },
        )?)),
        ValueKind::DateTime => Arc::new(TimestampMicrosecondArray::from(collect_column(
            records,
            col_idx,
            column,
            kind,
            |v| match v {
                CellValue::DateTime(dt) => Some(dt.and_utc().timestamp_micros()),
                _ => None,
            },
        )?)),
        ValueKind::DateTimeUtc => Arc::new(
            TimestampMicrosecondArray::from(collect_column(records, col_idx, column, kind, |v| match v {
                CellValue::DateTimeUtc(dt) => Some(dt.timestamp_micros()),
                _ => None,
            })?)
            .with_timezone(UTC),
        ),
        ValueKind::Binary => Arc::new(BinaryArray::from(collect_column(records, col_idx, column, kind, |v| {
            match v {
                CellValue::Binary(b) => Some(b.as_slice()),
                _ => None,
            }
        })?)),
    };
    Ok(array)
}
