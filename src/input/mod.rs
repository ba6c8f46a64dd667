// src/input/mod.rs
pub mod zips;

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufReader, Cursor, Read, Seek},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::error::RunError;

/// Anything the chunk reader can rewind.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Debug, Clone)]
enum Source {
    Path(PathBuf),
    Memory(Vec<u8>),
}

/// One named delimited input.
#[derive(Debug, Clone)]
pub struct Input {
    name: String,
    source: Source,
}

impl Input {
    /// A file on disk, displayed by its file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: Source::Path(path),
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: Source::Memory(bytes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a fresh reader positioned at the start of the input.
    pub fn open(&self) -> Result<Box<dyn ReadSeek + '_>> {
        match &self.source {
            Source::Path(path) => {
                let file = File::open(path)
                    .with_context(|| format!("opening {}", path.display()))?;
                Ok(Box::new(BufReader::new(file)))
            }
            Source::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
        }
    }
}

/// The bounded, ordered list of inputs for one run.
#[derive(Debug, Clone)]
pub struct InputSet {
    inputs: Vec<Input>,
}

impl InputSet {
    /// Individual files. Rejected before anything is opened when there are
    /// none or more than `max`.
    pub fn from_paths<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
        max: usize,
    ) -> Result<Self, RunError> {
        let inputs: Vec<Input> = paths.into_iter().map(Input::from_path).collect();
        Self::bounded(inputs, max)
    }

    /// The eligible `.csv` entries of a ZIP archive on disk.
    pub fn from_zip(path: impl AsRef<Path>, max: usize) -> Result<Self, RunError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path).map_err(|e| RunError::ArchiveInvalid {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Self::from_zip_reader(BufReader::new(file), &name, max)
    }

    /// Like [`InputSet::from_zip`] for an archive already in hand.
    pub fn from_zip_reader<R: Read + Seek>(
        reader: R,
        name: &str,
        max: usize,
    ) -> Result<Self, RunError> {
        let invalid = |reason: String| RunError::ArchiveInvalid {
            name: name.to_string(),
            reason,
        };

        let entries = zips::extract_csv_entries(reader).map_err(|e| invalid(format!("{e:#}")))?;
        if entries.is_empty() {
            return Err(invalid("the archive contains no .csv files".to_string()));
        }
        if entries.len() > max {
            return Err(invalid(format!(
                "the archive contains {} .csv files; at most {} are allowed",
                entries.len(),
                max
            )));
        }
        info!(archive = %name, files = entries.len(), "found CSV files in archive");

        let inputs = entries
            .into_iter()
            .map(|(entry, bytes)| Input::from_bytes(entry, bytes))
            .collect();
        Ok(Self { inputs })
    }

    /// In-memory inputs, subject to the same bounds as files.
    pub fn from_inputs(inputs: Vec<Input>, max: usize) -> Result<Self, RunError> {
        Self::bounded(inputs, max)
    }

    fn bounded(inputs: Vec<Input>, max: usize) -> Result<Self, RunError> {
        if inputs.is_empty() {
            return Err(RunError::NoInputs);
        }
        if inputs.len() > max {
            return Err(RunError::TooManyInputs {
                found: inputs.len(),
                max,
            });
        }
        Ok(Self { inputs })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Input> {
        self.inputs.iter()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

impl<'a> IntoIterator for &'a InputSet {
    type Item = &'a Input;
    type IntoIter = std::slice::Iter<'a, Input>;

    fn into_iter(self) -> Self::IntoIter {
        self.inputs.iter()
    }
}
