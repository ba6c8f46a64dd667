// src/pipeline.rs
use anyhow::Result;
use serde::Serialize;
use std::{
    io::{Read, Seek},
    path::Path,
};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::RunError;
use crate::input::{Input, InputSet};
use crate::process::{
    aggregate::{Aggregate, Aggregator, Summary},
    chunk::{ChunkReader, ParseMode, ReadOptions, ReadStats},
    matcher::{ColumnLayout, MatchStats, Matcher},
    MatchRecord,
};
use crate::reference::{load_reference, IdentifierMap};

/// Reference entries echoed at debug level after loading.
const PREVIEW_ENTRIES: usize = 10;

/// What happened to one input.
#[derive(Debug)]
pub enum FileOutcome {
    Processed {
        name: String,
        records: Vec<MatchRecord>,
        mode: ParseMode,
        read: ReadStats,
        matched: MatchStats,
    },
    Failed {
        name: String,
        reason: String,
    },
}

impl FileOutcome {
    pub fn name(&self) -> &str {
        match self {
            FileOutcome::Processed { name, .. } | FileOutcome::Failed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Matched,
    NoMatches,
    Failed,
}

/// Per-file line of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub name: String,
    pub status: FileStatus,
    pub matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ParseMode>,
    pub discarded_rows: u64,
    pub skipped_batches: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&FileOutcome> for FileReport {
    fn from(outcome: &FileOutcome) -> Self {
        match outcome {
            FileOutcome::Processed {
                name,
                records,
                mode,
                read,
                matched,
            } => FileReport {
                name: name.clone(),
                status: if records.is_empty() {
                    FileStatus::NoMatches
                } else {
                    FileStatus::Matched
                },
                matches: records.len(),
                mode: Some(*mode),
                discarded_rows: read.discarded_rows,
                skipped_batches: matched.skipped_batches,
                reason: None,
            },
            FileOutcome::Failed { name, reason } => FileReport {
                name: name.clone(),
                status: FileStatus::Failed,
                matches: 0,
                mode: None,
                discarded_rows: 0,
                skipped_batches: 0,
                reason: Some(reason.clone()),
            },
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub reference_entries: usize,
    pub files: Vec<FileReport>,
    pub aggregate: Aggregate,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        self.aggregate
            .table()
            .map(|t| t.summary())
            .unwrap_or_default()
    }

    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count()
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    reference_entries: usize,
    files: &'a [FileReport],
    summary: Summary,
}

impl Serialize for RunReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportDocument {
            reference_entries: self.reference_entries,
            files: &self.files,
            summary: self.summary(),
        }
        .serialize(serializer)
    }
}

/// Processes inputs one at a time against a loaded identifier map.
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    map: &'a IdentifierMap,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RunConfig, map: &'a IdentifierMap) -> Self {
        Self { config, map }
    }

    /// Read, match and project one source. Never fails the run: any error is
    /// folded into [`FileOutcome::Failed`].
    #[tracing::instrument(level = "info", skip(self, source), fields(file = %name))]
    pub fn process_source<R: Read + Seek>(&self, name: &str, source: R) -> FileOutcome {
        match self.match_source(name, source) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(file = %name, error = %format!("{e:#}"), "failed to process file");
                FileOutcome::Failed {
                    name: name.to_string(),
                    reason: format!("{e:#}"),
                }
            }
        }
    }

    pub fn process_input(&self, input: &Input) -> FileOutcome {
        match input.open() {
            Ok(source) => self.process_source(input.name(), source),
            Err(e) => {
                error!(file = %input.name(), error = %format!("{e:#}"), "could not open file");
                FileOutcome::Failed {
                    name: input.name().to_string(),
                    reason: format!("{e:#}"),
                }
            }
        }
    }

    fn match_source<R: Read + Seek>(&self, name: &str, source: R) -> Result<FileOutcome> {
        let options = ReadOptions {
            skip_rows: self.config.skip_rows,
            chunk_size: self.config.chunk_size,
            columns: None,
        };
        let layout = ColumnLayout::from(self.config);
        let mut reader = ChunkReader::new(source, name, options);

        // a fresh matcher per pass so an abandoned pass leaves no trace
        let pass = reader.read_with(|batches| {
            let mut matcher = Matcher::new(self.map, layout);
            let mut records = Vec::new();
            for batch in batches {
                records.extend(matcher.match_batch(&batch)?);
            }
            Ok((records, matcher.stats()))
        })?;

        let (records, matched) = pass.output;
        if pass.mode == ParseMode::Lenient {
            warn!(file = %name, "parsed with lenient fallback");
        }
        if pass.stats.discarded_rows > 0 || matched.skipped_batches > 0 {
            debug!(
                file = %name,
                discarded_rows = pass.stats.discarded_rows,
                skipped_batches = matched.skipped_batches,
                "dropped malformed data"
            );
        }
        if records.is_empty() {
            info!(file = %name, "No matches");
        } else {
            info!(file = %name, matches = records.len(), "Found {} matches", records.len());
        }

        Ok(FileOutcome::Processed {
            name: name.to_string(),
            records,
            mode: pass.mode,
            read: pass.stats,
            matched,
        })
    }
}

/// Load the reference table, then process every input in order and
/// aggregate the matches.
///
/// Stops before touching any input when the reference table yields no
/// usable entries. Per-file failures are reported, not returned.
pub fn run(
    config: &RunConfig,
    reference_path: impl AsRef<Path>,
    inputs: &InputSet,
) -> Result<RunReport, RunError> {
    let reference_path = reference_path.as_ref();
    let load = load_reference(reference_path);
    let invalid = |reason: String| RunError::ReferenceInvalid {
        path: reference_path.display().to_string(),
        reason,
    };
    if let Some(diagnostic) = load.diagnostic {
        return Err(invalid(diagnostic));
    }
    if load.map.is_empty() {
        return Err(invalid("no valid identifier/label pairs".to_string()));
    }
    let map = load.map;
    info!(entries = map.len(), "identifier map ready");
    for (identifier, label) in map.iter().take(PREVIEW_ENTRIES) {
        debug!(%identifier, %label, "reference entry");
    }

    let pipeline = Pipeline::new(config, &map);
    let mut aggregator = Aggregator::new();
    let mut files = Vec::with_capacity(inputs.len());

    for input in inputs {
        let outcome = pipeline.process_input(input);
        files.push(FileReport::from(&outcome));
        if let FileOutcome::Processed { records, .. } = outcome {
            aggregator.push(records);
        }
    }

    let aggregate = aggregator.finish();
    match &aggregate {
        Aggregate::NoMatches => warn!(files = files.len(), "no matches found in any file"),
        Aggregate::Table(table) => info!(
            files = files.len(),
            records = table.len(),
            "aggregated results"
        ),
    }

    Ok(RunReport {
        reference_entries: map.len(),
        files,
        aggregate,
    })
}
