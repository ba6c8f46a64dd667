// src/reference.rs
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::Path,
};
use tracing::{debug, info, warn};

use crate::process::{
    chunk::{ChunkReader, ReadOptions},
    normalize_cell, string_column,
};

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Normalized identifier → label lookup. Every key and value is non-empty
/// and is not the literal `nan` in any casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMap {
    entries: HashMap<String, String>,
}

impl IdentifierMap {
    /// Build from raw (identifier, label) cells. Pairs where either side is
    /// missing, blank or `nan` after normalization are dropped; a repeated
    /// identifier keeps the label of its last occurrence.
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Option<A>, Option<B>)>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for (id, label) in pairs {
            let (Some(id), Some(label)) = (id, label) else {
                continue;
            };
            let id = normalize_cell(id.as_ref());
            let label = normalize_cell(label.as_ref());
            if is_valid(&id) && is_valid(&label) {
                entries.insert(id, label);
            }
        }
        Self { entries }
    }

    pub fn label(&self, identifier: &str) -> Option<&str> {
        self.entries.get(identifier).map(String::as_str)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn is_valid(cell: &str) -> bool {
    !cell.is_empty() && !cell.eq_ignore_ascii_case("nan")
}

/// Result of loading a reference table. A load that could not produce a
/// usable table carries an empty map and a diagnostic; the caller decides
/// whether to stop.
#[derive(Debug, Default)]
pub struct ReferenceLoad {
    pub map: IdentifierMap,
    pub diagnostic: Option<String>,
}

impl ReferenceLoad {
    fn failed(diagnostic: String) -> Self {
        warn!("{}", diagnostic);
        Self {
            map: IdentifierMap::default(),
            diagnostic: Some(diagnostic),
        }
    }
}

/// Load column A (identifier) and column B (label) of a reference table.
/// No header row is assumed.
///
/// Spreadsheets are read from their first worksheet; anything else is read
/// as delimited text through the same resilient reader as the reports.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn load_reference(path: impl AsRef<Path>) -> ReferenceLoad {
    let path = path.as_ref();
    let rows = if is_spreadsheet(path) {
        read_spreadsheet(path)
    } else {
        read_delimited(path)
    };

    let (width, pairs) = match rows {
        Ok(rows) => rows,
        Err(err) => {
            return ReferenceLoad::failed(format!(
                "could not read reference table {}: {:#}",
                path.display(),
                err
            ))
        }
    };

    if width < 2 {
        return ReferenceLoad::failed(format!(
            "reference table {} must have at least 2 columns (identifier, label); found {}",
            path.display(),
            width
        ));
    }

    let map = IdentifierMap::from_pairs(pairs);
    info!(entries = map.len(), "loaded identifier map");
    ReferenceLoad {
        map,
        diagnostic: None,
    }
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

type Pairs = Vec<(Option<String>, Option<String>)>;

fn read_spreadsheet(path: &Path) -> Result<(usize, Pairs)> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| anyhow!("opening workbook {}: {}", path.display(), e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("workbook has no worksheet"))?
        .map_err(|e| anyhow!("reading first worksheet: {}", e))?;

    let width = range.width();
    debug!(rows = range.height(), width, "read worksheet");

    let pairs = range
        .rows()
        .map(|row| {
            (
                row.first().and_then(cell_text),
                row.get(1).and_then(cell_text),
            )
        })
        .collect();
    Ok((width, pairs))
}

/// Render a spreadsheet cell the way it reads on screen: integral floats
/// lose their `.0`, empty cells are missing.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Columns A and B of every record; anything past them is ignored, and a
/// record without a label is kept padded so validation can drop it.
fn read_delimited(path: &Path) -> Result<(usize, Pairs)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let options = ReadOptions {
        columns: Some(2),
        ..ReadOptions::default()
    };
    let mut reader = ChunkReader::new(BufReader::new(file), name, options);

    let pass = reader.read_with(|batches| {
        let mut pairs = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, 0)?;
            let labels = string_column(&batch, 1)?;
            pairs.extend(
                ids.iter()
                    .zip(labels.iter())
                    .map(|(id, label)| (id.map(str::to_string), label.map(str::to_string))),
            );
        }
        Ok(pairs)
    })?;

    Ok((pass.stats.widest, pass.output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn write_temp(suffix: &str, content: &[u8]) -> Result<tempfile::NamedTempFile> {
        let mut tmp = Builder::new().suffix(suffix).tempfile()?;
        tmp.write_all(content)?;
        tmp.flush()?;
        Ok(tmp)
    }

    #[test]
    fn keys_and_values_are_normalized_and_validated() {
        let map = IdentifierMap::from_pairs(vec![
            (Some("\u{a0}UC1 "), Some(" Alpha\u{a0}")),
            (Some("UC2"), Some("nan")),
            (Some("NaN"), Some("Beta")),
            (Some("  "), Some("Gamma")),
            (None, Some("Delta")),
            (Some("UC3"), None),
            (Some("UC4"), Some("Epsilon")),
        ]);

        assert_eq!(map.len(), 2);
        assert_eq!(map.label("UC1"), Some("Alpha"));
        assert_eq!(map.label("UC4"), Some("Epsilon"));
        for (k, v) in map.iter() {
            assert!(!k.is_empty() && !k.eq_ignore_ascii_case("nan"));
            assert!(!v.is_empty() && !v.eq_ignore_ascii_case("nan"));
        }
    }

    #[test]
    fn later_duplicate_identifier_wins() {
        let map = IdentifierMap::from_pairs(vec![
            (Some("UC1"), Some("Old")),
            (Some("UC1"), Some("New")),
        ]);
        assert_eq!(map.label("UC1"), Some("New"));
    }

    #[test]
    fn numeric_cells_render_without_trailing_zero() {
        assert_eq!(cell_text(&Data::Float(123.0)), Some("123".to_string()));
        assert_eq!(cell_text(&Data::Int(42)), Some("42".to_string()));
        assert_eq!(cell_text(&Data::String("UCx".into())), Some("UCx".to_string()));
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn loads_csv_reference_without_header() -> Result<()> {
        let tmp = write_temp(
            ".csv",
            b"UC1,Alpha,extra\nUC2,Beta,extra\nUC3,,extra\n,Nobody,extra\n",
        )?;
        let loaded = load_reference(tmp.path());
        assert!(loaded.diagnostic.is_none());
        assert_eq!(loaded.map.len(), 2);
        assert_eq!(loaded.map.label("UC2"), Some("Beta"));
        Ok(())
    }

    #[test]
    fn loads_semicolon_reference_with_latin1_names() -> Result<()> {
        let tmp = write_temp(".csv", b"UC1;Caf\xe9 TV\nUC2;Beta\n")?;
        let loaded = load_reference(tmp.path());
        assert!(loaded.diagnostic.is_none());
        assert_eq!(loaded.map.label("UC1"), Some("Café TV"));
        Ok(())
    }

    #[test]
    fn ragged_trailing_columns_keep_every_entry() -> Result<()> {
        let tmp = write_temp(".csv", b"UC1,Alpha\nUC2,Beta,note\nUC3,Gamma\nUC4\n")?;
        let loaded = load_reference(tmp.path());
        assert!(loaded.diagnostic.is_none());
        assert_eq!(loaded.map.len(), 3);
        assert_eq!(loaded.map.label("UC2"), Some("Beta"));
        assert_eq!(loaded.map.label("UC3"), Some("Gamma"));
        assert!(!loaded.map.contains("UC4"));
        Ok(())
    }

    #[test]
    fn single_column_reference_is_reported() -> Result<()> {
        let tmp = write_temp(".csv", b"UC1\nUC2\n")?;
        let loaded = load_reference(tmp.path());
        assert!(loaded.map.is_empty());
        let diag = loaded.diagnostic.expect("diagnostic");
        assert!(diag.contains("at least 2 columns"));
        Ok(())
    }

    #[test]
    fn unreadable_reference_is_reported_not_fatal() -> Result<()> {
        let tmp = write_temp(".xlsx", b"this is not a workbook")?;
        let loaded = load_reference(tmp.path());
        assert!(loaded.map.is_empty());
        assert!(loaded.diagnostic.is_some());

        let missing = load_reference("/definitely/not/here.csv");
        assert!(missing.map.is_empty());
        assert!(missing.diagnostic.is_some());
        Ok(())
    }
}
