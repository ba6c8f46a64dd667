// src/output.rs
use anyhow::{Context, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::process::aggregate::{ResultTable, HEADERS};

/// Default output file name for CSV results.
pub const DEFAULT_OUTPUT: &str = "channel_asset_mapping.csv";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Write `table` to `path` in `format`, replacing any existing file only once
/// the new one is complete.
pub fn write_table(table: &ResultTable, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(table, path),
        OutputFormat::Parquet => write_parquet(table, path),
    }
}

/// UTF-8 with BOM, comma separated, header row first.
pub fn write_csv_to<W: Write>(table: &ResultTable, mut out: W) -> Result<()> {
    out.write_all(UTF8_BOM).context("writing byte-order mark")?;
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(HEADERS).context("writing header row")?;
    for r in table.records() {
        wtr.write_record([&r.value, &r.identifier, &r.label])
            .context("writing result row")?;
    }
    wtr.flush().context("flushing CSV output")?;
    Ok(())
}

pub fn write_csv(table: &ResultTable, path: &Path) -> Result<()> {
    write_atomic(path, |file| write_csv_to(table, BufWriter::new(file)))?;
    info!(path = %path.display(), rows = table.len(), "wrote CSV results");
    Ok(())
}

/// Three non-null Utf8 columns, Snappy compressed.
pub fn write_parquet(table: &ResultTable, path: &Path) -> Result<()> {
    let batch = table.to_record_batch()?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    write_atomic(path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .context("creating Parquet writer")?;
        writer.write(&batch).context("writing Parquet batch")?;
        writer.close().context("closing Parquet writer")?;
        Ok(())
    })?;
    info!(path = %path.display(), rows = table.len(), "wrote Parquet results");
    Ok(())
}

/// Pretty-printed JSON with a trailing newline.
pub fn write_report<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    write_atomic(path, |file| {
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, report).context("serializing run report")?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    })?;
    info!(path = %path.display(), "wrote run report");
    Ok(())
}

/// Write to a hidden sibling temp file, then rename it over `path`.
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    let tmp = tmp_path(path);
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;

    if let Err(e) = write(file) {
        let _ = fs::remove_file(&tmp);
        return Err(e.context(format!("writing {}", path.display())));
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
