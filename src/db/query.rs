// Record Materializer
// Executes one statement on a borrowed handle and pairs cursor metadata with
// every fetched row, producing name-keyed records

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::db::traits::{CellValue, ColumnInfo, Connection, Cursor, DatabaseError};

/// One result row keyed by column name, in cursor column order.
///
/// Records from the same execution share one column list, so their key sets
/// are identical by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<CellValue>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| &self.values[idx])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.keys().zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<CellValue> {
        self.values
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Records of one execution together with the column descriptor they were built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<ColumnInfo>,
    records: Vec<Record>,
}

impl RecordSet {
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Execute `sql` on an open handle and materialize the full result set.
///
/// The handle is only borrowed; it is never opened or closed here.
pub async fn execute(conn: &mut dyn Connection, sql: &str) -> Result<RecordSet, DatabaseError> {
    if sql.trim().is_empty() {
        return Err(DatabaseError::query(sql, "query text is empty"));
    }

    let start = Instant::now();
    let cursor = conn.execute(sql).await?;
    let record_set = materialize(cursor)?;

    debug!(
        connection_id = conn.connection_id(),
        columns = record_set.columns().len(),
        rows = record_set.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "query materialized"
    );

    Ok(record_set)
}

/// Pair a cursor's column descriptor positionally with each of its rows
pub fn materialize(cursor: Cursor) -> Result<RecordSet, DatabaseError> {
    let (description, rows) = cursor.into_parts();

    let columns = match description {
        Some(columns) => columns,
        None if rows.is_empty() => return Ok(RecordSet::default()),
        None => {
            return Err(DatabaseError::CursorState(format!(
                "backend returned {} rows without column metadata",
                rows.len()
            )))
        }
    };

    let mut seen = HashSet::with_capacity(columns.len());
    for column in &columns {
        if !seen.insert(column.name.as_str()) {
            return Err(DatabaseError::CursorState(format!(
                "duplicate column name '{}' in result set; alias the columns to make them unique",
                column.name
            )));
        }
    }

    let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();

    if names.is_empty() {
        // Non-data statement; any row carrying values would be malformed
        if let Some(idx) = rows.iter().position(|row| !row.is_empty()) {
            return Err(DatabaseError::CursorState(format!(
                "row {} has {} values but the cursor describes no columns",
                idx,
                rows[idx].len()
            )));
        }
        return Ok(RecordSet {
            columns,
            records: Vec::new(),
        });
    }

    let records = rows
        .into_iter()
        .enumerate()
        .map(|(idx, values)| {
            if values.len() != names.len() {
                return Err(DatabaseError::CursorState(format!(
                    "row {} has {} values but the cursor describes {} columns",
                    idx,
                    values.len(),
                    names.len()
                )));
            }
            Ok(Record {
                columns: Arc::clone(&names),
                values,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RecordSet { columns, records })
}
