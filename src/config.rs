// src/config.rs
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};

/// Hard cap on the number of delimited inputs per run, whether passed as
/// files or found inside an archive.
pub const MAX_INPUT_FILES: usize = 12;

/// Rows per batch handed from the chunk reader to the matcher.
/// Lower it (e.g. 50_000) when memory is tight.
pub const DEFAULT_CHUNK_SIZE: usize = 200_000;

/// Column D of the raw report: the asset id.
pub const VALUE_COLUMN: usize = 3;

/// Column G of the raw report: the channel id.
pub const IDENTIFIER_COLUMN: usize = 6;

/// Static tunables for one run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub max_files: usize,
    pub chunk_size: usize,
    /// Leading records dropped from every delimited input (0 = no header).
    pub skip_rows: usize,
    pub value_column: usize,
    pub identifier_column: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_files: MAX_INPUT_FILES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_rows: 0,
            value_column: VALUE_COLUMN,
            identifier_column: IDENTIFIER_COLUMN,
        }
    }
}

impl RunConfig {
    /// Load a YAML config file. Keys left out keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: RunConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.chunk_size > 0, "chunk_size must be greater than zero");
        ensure!(self.max_files > 0, "max_files must be greater than zero");
        ensure!(
            self.value_column != self.identifier_column,
            "value_column and identifier_column must differ (both {})",
            self.value_column
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_report_layout() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.max_files, 12);
        assert_eq!(cfg.chunk_size, 200_000);
        assert_eq!(cfg.value_column, 3);
        assert_eq!(cfg.identifier_column, 6);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_only_given_keys() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "chunk_size: 50000\nskip_rows: 1")?;

        let cfg = RunConfig::from_yaml_file(tmp.path())?;
        assert_eq!(cfg.chunk_size, 50_000);
        assert_eq!(cfg.skip_rows, 1);
        assert_eq!(cfg.max_files, MAX_INPUT_FILES);
        Ok(())
    }

    #[test]
    fn rejects_zero_chunk_size() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "chunk_size: 0")?;
        assert!(RunConfig::from_yaml_file(tmp.path()).is_err());
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "chunksize: 10")?;
        assert!(RunConfig::from_yaml_file(tmp.path()).is_err());
        Ok(())
    }
}
