// src/process/aggregate.rs
use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};

use super::MatchRecord;

/// Column headers of the result table, in output order.
pub const HEADERS: [&str; 3] = ["Asset ID", "Channel ID", "Channel Name"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub unique_values: usize,
    pub unique_identifiers: usize,
}

/// Unique match records sorted by (label, value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    records: Vec<MatchRecord>,
}

impl ResultTable {
    /// Keep the first record seen for each (value, identifier) pair, then
    /// sort by label and value. The sort is stable, so remaining ties keep
    /// their arrival order.
    pub fn from_records(records: Vec<MatchRecord>) -> Self {
        let mut seen = HashSet::with_capacity(records.len());
        let mut unique: Vec<MatchRecord> = records
            .into_iter()
            .filter(|r| seen.insert((r.value.clone(), r.identifier.clone())))
            .collect();
        unique.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.value.cmp(&b.value)));
        Self { records: unique }
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> Summary {
        let values: HashSet<&str> = self.records.iter().map(|r| r.value.as_str()).collect();
        let ids: HashSet<&str> = self
            .records
            .iter()
            .map(|r| r.identifier.as_str())
            .collect();
        Summary {
            total: self.records.len(),
            unique_values: values.len(),
            unique_identifiers: ids.len(),
        }
    }

    /// The table as a single Arrow batch with [`HEADERS`] as column names.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Schema::new(
            HEADERS
                .iter()
                .map(|h| Field::new(*h, DataType::Utf8, false))
                .collect::<Vec<_>>(),
        );
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                self.records.iter().map(|r| r.value.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                self.records.iter().map(|r| r.identifier.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                self.records.iter().map(|r| r.label.as_str()),
            )),
        ];
        RecordBatch::try_new(Arc::new(schema), columns).context("building result batch")
    }
}

/// Final state of a run's matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// Every file was read but nothing matched.
    NoMatches,
    Table(ResultTable),
}

impl Aggregate {
    pub fn table(&self) -> Option<&ResultTable> {
        match self {
            Aggregate::NoMatches => None,
            Aggregate::Table(t) => Some(t),
        }
    }
}

/// Collects per-file match records in processing order.
#[derive(Debug, Default)]
pub struct Aggregator {
    records: Vec<MatchRecord>,
    files: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of one file's records.
    pub fn push(&mut self, records: impl IntoIterator<Item = MatchRecord>) {
        self.files += 1;
        self.records.extend(records);
    }

    /// Number of files that contributed, matches or not.
    pub fn files(&self) -> usize {
        self.files
    }

    pub fn finish(self) -> Aggregate {
        if self.records.is_empty() {
            Aggregate::NoMatches
        } else {
            Aggregate::Table(ResultTable::from_records(self.records))
        }
    }
}
