// src/process/mod.rs
pub mod aggregate;
pub mod chunk;
pub mod matcher;
pub mod sniff;

use anyhow::{anyhow, Result};
use arrow::array::{Array, StringArray};
use arrow::record_batch::RecordBatch;
use serde::Serialize;

/// One output row: the value pulled from the report, the identifier it was
/// matched on, and that identifier's label as it stood in the reference table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchRecord {
    pub value: String,
    pub identifier: String,
    pub label: String,
}

impl MatchRecord {
    pub fn new(
        value: impl Into<String>,
        identifier: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            identifier: identifier.into(),
            label: label.into(),
        }
    }
}

/// Replace non-breaking spaces with plain spaces, then trim.
///
/// Shared by the reference loader and the matcher so that both sides of the
/// join see identical keys.
pub fn normalize_cell(raw: &str) -> String {
    if raw.contains('\u{a0}') {
        raw.replace('\u{a0}', " ").trim().to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Borrow column `idx` of a batch as a string column.
pub fn string_column(batch: &RecordBatch, idx: usize) -> Result<&StringArray> {
    let column = batch.column(idx);
    column
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("column {} is {:?}, expected Utf8", idx, column.data_type()))
}
