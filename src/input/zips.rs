// src/input/zips.rs
use anyhow::{Context, Result};
use std::io::{Read, Seek};
use tracing::{debug, trace};
use zip::ZipArchive;

const MACOS_METADATA_DIR: &str = "__MACOSX";

/// Read every eligible `.csv` entry of the archive into memory, in archive
/// order, as `(base name, bytes)`.
///
/// Directories, hidden files and anything whose path has a component
/// starting with `__MACOSX` are ignored.
pub fn extract_csv_entries<R: Read + Seek>(reader: R) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(reader).context("reading ZIP directory")?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("accessing ZIP entry #{}", i))?;
        if entry.is_dir() {
            continue;
        }

        let path = entry.name().to_string();
        let Some(base) = eligible_base_name(&path) else {
            trace!(entry = %path, "ignoring ZIP entry");
            continue;
        };

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("reading {} from ZIP", path))?;
        debug!(entry = %path, bytes = buf.len(), "extracted CSV");
        entries.push((base.to_string(), buf));
    }

    Ok(entries)
}

fn eligible_base_name(path: &str) -> Option<&str> {
    let mut components = path.split(['/', '\\']).filter(|c| !c.is_empty());
    if components.any(|c| c.starts_with(MACOS_METADATA_DIR)) {
        return None;
    }

    let base = path.rsplit(['/', '\\']).next().unwrap_or_default();
    if base.is_empty() || base.starts_with('.') {
        return None;
    }
    if !base.to_ascii_lowercase().ends_with(".csv") {
        return None;
    }
    Some(base)
}
