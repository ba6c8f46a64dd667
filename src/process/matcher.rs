// src/process/matcher.rs
use anyhow::{Context, Result};
use arrow::array::{Array, BooleanArray, StringArray};
use arrow::compute::filter;
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use tracing::{debug, trace};

use super::{normalize_cell, string_column, MatchRecord};
use crate::config::{RunConfig, IDENTIFIER_COLUMN, VALUE_COLUMN};
use crate::reference::IdentifierMap;

/// Fixed zero-based positions of the two columns the join reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub value: usize,
    pub identifier: usize,
}

impl ColumnLayout {
    /// Narrowest batch that still holds both columns.
    pub fn min_width(&self) -> usize {
        self.value.max(self.identifier) + 1
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            value: VALUE_COLUMN,
            identifier: IDENTIFIER_COLUMN,
        }
    }
}

impl From<&RunConfig> for ColumnLayout {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            value: cfg.value_column,
            identifier: cfg.identifier_column,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub batches: u64,
    /// Batches too narrow to hold both columns.
    pub skipped_batches: u64,
    pub rows_scanned: u64,
    pub matches: u64,
}

/// Filters row batches down to rows whose identifier is in the map and
/// projects them to match records.
pub struct Matcher<'a> {
    map: &'a IdentifierMap,
    layout: ColumnLayout,
    stats: MatchStats,
}

impl<'a> Matcher<'a> {
    pub fn new(map: &'a IdentifierMap, layout: ColumnLayout) -> Self {
        Self {
            map,
            layout,
            stats: MatchStats::default(),
        }
    }

    pub fn stats(&self) -> MatchStats {
        self.stats
    }

    pub fn match_batch(&mut self, batch: &RecordBatch) -> Result<Vec<MatchRecord>> {
        self.stats.batches += 1;

        // 1) ragged exports: a batch without both columns is skipped, not an error
        if batch.num_columns() < self.layout.min_width() {
            self.stats.skipped_batches += 1;
            debug!(
                columns = batch.num_columns(),
                needed = self.layout.min_width(),
                rows = batch.num_rows(),
                "skipping batch without the required columns"
            );
            return Ok(Vec::new());
        }
        self.stats.rows_scanned += batch.num_rows() as u64;

        // 2) normalize both target columns the same way the reference was
        let ids = normalized(batch, self.layout.identifier)?;
        let values = normalized(batch, self.layout.value)?;

        // 3) keep rows whose identifier is a known key
        let map = self.map;
        let mask: BooleanArray = ids
            .iter()
            .map(|id| Some(id.is_some_and(|id| map.contains(id))))
            .collect();
        if mask.true_count() == 0 {
            return Ok(Vec::new());
        }
        let ids = filter(&ids, &mask).context("filtering identifier column")?;
        let values = filter(&values, &mask).context("filtering value column")?;
        let ids = downcast(ids.as_ref())?;
        let values = downcast(values.as_ref())?;

        // 4) project, resolving the label now
        let mut records = Vec::with_capacity(ids.len());
        for (value, id) in values.iter().zip(ids.iter()) {
            let Some(id) = id else { continue };
            let Some(label) = map.label(id) else { continue };
            records.push(MatchRecord::new(value.unwrap_or_default(), id, label));
        }

        self.stats.matches += records.len() as u64;
        trace!(rows = batch.num_rows(), matches = records.len(), "matched batch");
        Ok(records)
    }
}

fn normalized(batch: &RecordBatch, idx: usize) -> Result<StringArray> {
    let column = string_column(batch, idx)?;
    Ok(column.iter().map(|v| v.map(normalize_cell)).collect())
}

fn downcast(array: &dyn Array) -> Result<&StringArray> {
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .context("filtered column is not Utf8")
}
