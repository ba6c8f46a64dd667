// src/process/chunk.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{ArrayRef, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use csv::{ByteRecord, ReaderBuilder};
use encoding_rs::WINDOWS_1252;
use serde::Serialize;
use std::{
    borrow::Cow,
    collections::VecDeque,
    fmt,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    iter::FusedIterator,
    sync::Arc,
};
use tracing::{debug, trace, warn};

use super::sniff::{sniff_delimiter, SAMPLE_BYTES};
use crate::config::DEFAULT_CHUNK_SIZE;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How a pass over a source tokenizes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Comma only, whole-stream parser, UTF-8 only. Quoted fields may span
    /// lines as long as the record keeps the established shape.
    Strict,
    /// Sniffed delimiter, one record per physical line, any byte sequence
    /// decodes (invalid UTF-8 is read as Windows-1252).
    Lenient,
}

impl ParseMode {
    /// Order in which passes are attempted.
    pub const ATTEMPTS: [ParseMode; 2] = [ParseMode::Strict, ParseMode::Lenient];
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseMode::Strict => f.write_str("strict"),
            ParseMode::Lenient => f.write_str("lenient"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Leading records dropped before the shape is fixed (0 = no header).
    pub skip_rows: usize,
    /// Maximum rows per batch.
    pub chunk_size: usize,
    /// Pad or truncate every record to exactly this many columns instead of
    /// letting the first well-formed record fix the shape. Nothing is
    /// discarded for being wide.
    pub columns: Option<usize>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            skip_rows: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            columns: None,
        }
    }
}

/// Row accounting for one completed pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    /// Records seen after the skipped header rows.
    pub rows: u64,
    /// Records dropped for being wider than the first record, or for
    /// broken quoting ahead of it.
    pub discarded_rows: u64,
    pub batches: u64,
    /// Field count of the widest record seen.
    pub widest: usize,
}

/// Output of the first pass that ran to the end without a fault.
#[derive(Debug)]
pub struct Pass<T> {
    pub output: T,
    pub mode: ParseMode,
    pub stats: ReadStats,
}

/// Streams a seekable delimited source as Arrow batches of nullable Utf8
/// columns (`c0`, `c1`, ...), retrying the whole source leniently when the
/// strict pass hits a structural fault.
pub struct ChunkReader<R> {
    source: R,
    name: String,
    options: ReadOptions,
}

impl<R: Read + Seek> ChunkReader<R> {
    pub fn new(source: R, name: impl Into<String>, options: ReadOptions) -> Self {
        Self {
            source,
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Rewind the source and start a fresh, single-use pass in `mode`.
    pub fn batches(&mut self, mode: ParseMode) -> Result<Batches<'_>> {
        self.rewind()?;
        let engine: Box<dyn RecordEngine + '_> = match mode {
            ParseMode::Strict => Box::new(StrictEngine::new(&mut self.source)),
            ParseMode::Lenient => {
                let delimiter = self.sniff()?;
                debug!(
                    file = %self.name,
                    delimiter = %(delimiter as char).escape_default(),
                    "sniffed delimiter"
                );
                Box::new(LenientEngine::new(&mut self.source, delimiter))
            }
        };
        Ok(Batches::new(engine, &self.name, mode, self.options))
    }

    /// Hand each pass to `consume` in [`ParseMode::ATTEMPTS`] order and keep
    /// the first one that reaches the end of the source cleanly.
    ///
    /// `consume` may have seen batches from a pass that later faulted; that
    /// pass's output is dropped and the source is re-read from the start.
    /// Errors returned by `consume` itself are not retried.
    pub fn read_with<T, F>(&mut self, mut consume: F) -> Result<Pass<T>>
    where
        F: FnMut(&mut Batches<'_>) -> Result<T>,
    {
        let name = self.name.clone();
        let mut last_fault = None;

        for mode in ParseMode::ATTEMPTS {
            let mut batches = match self.batches(mode) {
                Ok(batches) => batches,
                Err(fault) => {
                    warn!(file = %name, %mode, error = %fault, "could not start pass");
                    last_fault = Some(fault);
                    continue;
                }
            };

            let output = consume(&mut batches)?;

            match batches.finish() {
                Ok(stats) => {
                    debug!(
                        file = %name,
                        %mode,
                        rows = stats.rows,
                        discarded = stats.discarded_rows,
                        batches = stats.batches,
                        "pass complete"
                    );
                    return Ok(Pass {
                        output,
                        mode,
                        stats,
                    });
                }
                Err(fault) => {
                    warn!(
                        file = %name,
                        %mode,
                        error = %fault,
                        "pass abandoned, discarding its output"
                    );
                    drop(output);
                    last_fault = Some(fault);
                }
            }
        }

        let fault = last_fault.unwrap_or_else(|| anyhow!("no parse pass was attempted"));
        Err(fault.context(format!("{}: unparseable in strict and lenient mode", name)))
    }

    fn rewind(&mut self) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(0))
            .with_context(|| format!("rewinding {}", self.name))?;
        Ok(())
    }

    fn sniff(&mut self) -> Result<u8> {
        let mut sample = Vec::with_capacity(SAMPLE_BYTES);
        self.source
            .by_ref()
            .take(SAMPLE_BYTES as u64)
            .read_to_end(&mut sample)
            .with_context(|| format!("sampling {} for delimiter detection", self.name))?;
        self.rewind()?;
        Ok(sniff_delimiter(&sample))
    }
}

/// A single lazy pass over a source. Not restartable: once it returns
/// `None` it stays exhausted, and a fault ends it early.
pub struct Batches<'a> {
    engine: Box<dyn RecordEngine + 'a>,
    name: &'a str,
    mode: ParseMode,
    chunk_size: usize,
    to_skip: usize,
    fixed_width: bool,
    schema: Option<SchemaRef>,
    stats: ReadStats,
    fault: Option<anyhow::Error>,
    done: bool,
}

impl<'a> Batches<'a> {
    fn new(
        engine: Box<dyn RecordEngine + 'a>,
        name: &'a str,
        mode: ParseMode,
        options: ReadOptions,
    ) -> Self {
        let mut batches = Self {
            engine,
            name,
            mode,
            chunk_size: options.chunk_size.max(1),
            to_skip: options.skip_rows,
            fixed_width: options.columns.is_some(),
            schema: None,
            stats: ReadStats::default(),
            fault: None,
            done: false,
        };
        if let Some(width) = options.columns {
            batches.schema_for(width);
        }
        batches
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Drain whatever the consumer left unread, then report the pass.
    pub fn finish(mut self) -> Result<ReadStats> {
        self.by_ref().for_each(drop);
        match self.fault.take() {
            Some(fault) => Err(fault),
            None => Ok(self.stats),
        }
    }

    fn width(&self) -> Option<usize> {
        self.schema.as_ref().map(|s| s.fields().len())
    }

    fn schema_for(&mut self, width: usize) -> SchemaRef {
        self.schema
            .get_or_insert_with(|| {
                let fields: Vec<Field> = (0..width)
                    .map(|i| Field::new(format!("c{i}"), DataType::Utf8, true))
                    .collect();
                Arc::new(Schema::new(fields))
            })
            .clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let mut columns: Option<Vec<StringBuilder>> = None;
        let mut len = 0;

        while len < self.chunk_size {
            let Some(row) = self.engine.next_row()? else {
                break;
            };
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            self.stats.rows += 1;
            self.stats.widest = self.stats.widest.max(row.fields.len());

            // 1) the first well-formed record fixes the shape for the whole pass
            let width = match self.width() {
                Some(w) => w,
                None if row.damaged => {
                    if self.mode == ParseMode::Strict {
                        bail!(
                            "record {} swallows several lines into one field before the shape is known; quoting looks unbalanced",
                            self.stats.rows
                        );
                    }
                    self.stats.discarded_rows += 1;
                    debug!(
                        file = %self.name,
                        record = self.stats.rows,
                        "discarding damaged record ahead of the first well-formed one"
                    );
                    continue;
                }
                None => {
                    let w = row.fields.len();
                    self.schema_for(w);
                    w
                }
            };

            // 2) shape violations: wider rows go, narrower rows are padded
            if self.fixed_width {
                if self.mode == ParseMode::Strict && row.spans_lines && row.damaged {
                    bail!(
                        "record {} swallows several lines into one field; quoting looks unbalanced",
                        self.stats.rows
                    );
                }
            } else if row.fields.len() != width {
                if self.mode == ParseMode::Strict && row.spans_lines {
                    bail!(
                        "record {} spans several lines and has {} fields where {} were expected; quoting looks unbalanced",
                        self.stats.rows,
                        row.fields.len(),
                        width
                    );
                }
                if row.fields.len() > width {
                    self.stats.discarded_rows += 1;
                    trace!(
                        file = %self.name,
                        record = self.stats.rows,
                        fields = row.fields.len(),
                        expected = width,
                        "discarding wide record"
                    );
                    continue;
                }
            }

            // 3) append, padding missing trailing cells with nulls
            let builders = columns
                .get_or_insert_with(|| (0..width).map(|_| StringBuilder::new()).collect());
            let mut values = row.fields.into_iter();
            for builder in builders.iter_mut() {
                match values.next().flatten() {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            len += 1;
        }

        let Some(builders) = columns else {
            return Ok(None);
        };
        let width = builders.len();
        let arrays: Vec<ArrayRef> = builders
            .into_iter()
            .map(|mut b| Arc::new(b.finish()) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(self.schema_for(width), arrays)
            .with_context(|| format!("assembling batch {} of {}", self.stats.batches, self.name))?;
        self.stats.batches += 1;
        Ok(Some(batch))
    }
}

impl Iterator for Batches<'_> {
    type Item = RecordBatch;

    fn next(&mut self) -> Option<RecordBatch> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(batch),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(fault) => {
                self.fault = Some(fault);
                self.done = true;
                None
            }
        }
    }
}

impl FusedIterator for Batches<'_> {}

/// One decoded record; empty cells are `None`.
struct RawRow {
    fields: Vec<Option<String>>,
    spans_lines: bool,
    /// Quoting looks broken: a field holding a line break and a delimiter
    /// (strict), or an odd number of quotes on the line (lenient). Such a
    /// record never fixes the shape.
    damaged: bool,
}

trait RecordEngine {
    fn next_row(&mut self) -> Result<Option<RawRow>>;
}

struct StrictEngine<'a, R: Read> {
    rdr: csv::Reader<QuoteTally<&'a mut R>>,
    record: ByteRecord,
    first: bool,
}

/// Counts quote bytes as the parser pulls them in. An odd total at the end
/// of the stream means the input ended inside a quoted field.
struct QuoteTally<R> {
    inner: R,
    quotes: u64,
}

impl<R: Read> Read for QuoteTally<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.quotes += count_quotes(&buf[..n]);
        Ok(n)
    }
}

fn count_quotes(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b == b'"').count() as u64
}

impl<'a, R: Read> StrictEngine<'a, R> {
    fn new(source: &'a mut R) -> Self {
        let rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(b',')
            .from_reader(QuoteTally {
                inner: source,
                quotes: 0,
            });
        Self {
            rdr,
            record: ByteRecord::new(),
            first: true,
        }
    }
}

impl<R: Read> RecordEngine for StrictEngine<'_, R> {
    fn next_row(&mut self) -> Result<Option<RawRow>> {
        if !self
            .rdr
            .read_byte_record(&mut self.record)
            .context("reading record")?
        {
            if self.rdr.get_ref().quotes % 2 == 1 {
                bail!("input ends inside a quoted field");
            }
            return Ok(None);
        }
        let line = self.record.position().map_or(0, |p| p.line());
        let first = std::mem::replace(&mut self.first, false);

        let mut spans_lines = false;
        let mut damaged = false;
        let mut fields = Vec::with_capacity(self.record.len());
        for (idx, raw) in self.record.iter().enumerate() {
            let raw = if first && idx == 0 { strip_bom(raw) } else { raw };
            if raw.contains(&b'\n') || raw.contains(&b'\r') {
                spans_lines = true;
                damaged |= raw.contains(&b',');
            }
            let text = std::str::from_utf8(raw)
                .map_err(|e| anyhow!("invalid UTF-8 on line {line}, field {idx}: {e}"))?;
            fields.push(cell(text));
        }

        Ok(Some(RawRow {
            fields,
            spans_lines,
            damaged,
        }))
    }
}

struct LenientEngine<'a, R: Read> {
    lines: BufReader<&'a mut R>,
    line: Vec<u8>,
    line_no: u64,
    pending: VecDeque<ByteRecord>,
    line_damaged: bool,
    delimiter: u8,
}

impl<'a, R: Read> LenientEngine<'a, R> {
    fn new(source: &'a mut R, delimiter: u8) -> Self {
        Self {
            lines: BufReader::new(source),
            line: Vec::new(),
            line_no: 0,
            pending: VecDeque::new(),
            line_damaged: false,
            delimiter,
        }
    }
}

impl<R: Read> RecordEngine for LenientEngine<'_, R> {
    fn next_row(&mut self) -> Result<Option<RawRow>> {
        while self.pending.is_empty() {
            self.line.clear();
            let n = self
                .lines
                .read_until(b'\n', &mut self.line)
                .with_context(|| format!("reading line {}", self.line_no + 1))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let mut bytes = trim_line_end(&self.line);
            if self.line_no == 1 {
                bytes = strip_bom(bytes);
            }
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let records = parse_line(bytes, self.delimiter)
                .with_context(|| format!("tokenizing line {}", self.line_no))?;
            self.line_damaged = count_quotes(bytes) % 2 == 1;
            self.pending.extend(records);
        }

        let Some(record) = self.pending.pop_front() else {
            return Ok(None);
        };
        let fields = record
            .iter()
            .map(|raw| cell(&decode_lenient(raw)))
            .collect();
        Ok(Some(RawRow {
            fields,
            spans_lines: false,
            damaged: self.line_damaged,
        }))
    }
}

/// Tokenize one physical line on its own, so an unclosed quote cannot run
/// past the line end. A bare `\r` inside the line still ends a record.
pub(crate) fn parse_line(line: &[u8], delimiter: u8) -> csv::Result<Vec<ByteRecord>> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(line)
        .byte_records()
        .collect()
}

fn decode_lenient(raw: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(raw) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(raw).0,
    }
}

fn cell(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn strip_bom(raw: &[u8]) -> &[u8] {
    raw.strip_prefix(UTF8_BOM).unwrap_or(raw)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray};
    use std::io::{self, Cursor};
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,chanmap::process=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn reader(data: &[u8], chunk_size: usize) -> ChunkReader<Cursor<Vec<u8>>> {
        ChunkReader::new(
            Cursor::new(data.to_vec()),
            "test.csv",
            ReadOptions {
                skip_rows: 0,
                chunk_size,
                columns: None,
            },
        )
    }

    fn column(batch: &RecordBatch, idx: usize) -> Vec<Option<String>> {
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column")
            .iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    /// Collect one column across every batch of the winning pass.
    fn read_column(rdr: &mut ChunkReader<Cursor<Vec<u8>>>, idx: usize) -> Result<Pass<Vec<Option<String>>>> {
        rdr.read_with(|batches| {
            let mut out = Vec::new();
            for batch in batches {
                out.extend(column(&batch, idx));
            }
            Ok(out)
        })
    }

    #[test]
    fn clean_file_streams_in_chunks_strictly() -> Result<()> {
        init_test_logging();
        let data = b"a,b,c\n1,2,3\n4,5,6\n7,8,9\n10,11,12\n";
        let mut rdr = reader(data, 2);

        let pass = rdr.read_with(|batches| {
            Ok(batches
                .map(|b| (b.num_rows(), b.num_columns()))
                .collect::<Vec<_>>())
        })?;

        assert_eq!(pass.mode, ParseMode::Strict);
        assert_eq!(pass.output, vec![(2, 3), (2, 3), (1, 3)]);
        assert_eq!(pass.stats.rows, 5);
        assert_eq!(pass.stats.batches, 3);
        assert_eq!(pass.stats.discarded_rows, 0);
        Ok(())
    }

    #[test]
    fn wide_rows_are_discarded_and_short_rows_padded() -> Result<()> {
        let data = b"a,b,c\n1,2,3,EXTRA\n4,5\n6,,9\n";
        let mut rdr = reader(data, 100);

        let pass = rdr.read_with(|batches| Ok(batches.collect::<Vec<_>>()))?;
        assert_eq!(pass.mode, ParseMode::Strict);
        assert_eq!(pass.stats.discarded_rows, 1);

        let batch = &pass.output[0];
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(
            column(batch, 2),
            vec![Some("c".to_string()), None, Some("9".to_string())]
        );
        assert_eq!(
            column(batch, 1),
            vec![Some("b".to_string()), Some("5".to_string()), None]
        );
        Ok(())
    }

    #[test]
    fn fixed_column_count_pads_and_truncates_without_discarding() -> Result<()> {
        let data = b"UC1,Alpha\nUC2,Beta,note,more\nUC3\n";
        let mut rdr = ChunkReader::new(
            Cursor::new(data.to_vec()),
            "ref.csv",
            ReadOptions {
                columns: Some(2),
                ..ReadOptions::default()
            },
        );

        let pass = rdr.read_with(|batches| Ok(batches.collect::<Vec<_>>()))?;
        assert_eq!(pass.mode, ParseMode::Strict);
        assert_eq!(pass.stats.discarded_rows, 0);
        assert_eq!(pass.stats.widest, 4);

        let batch = &pass.output[0];
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(
            column(batch, 1),
            vec![Some("Alpha".to_string()), Some("Beta".to_string()), None]
        );
        Ok(())
    }

    #[test]
    fn skip_rows_drops_header_before_shape_is_fixed() -> Result<()> {
        let data = b"only,two\n1,2,3\n4,5,6\n";
        let mut rdr = ChunkReader::new(
            Cursor::new(data.to_vec()),
            "hdr.csv",
            ReadOptions {
                skip_rows: 1,
                chunk_size: 10,
                columns: None,
            },
        );
        let pass = read_column(&mut rdr, 2)?;
        assert_eq!(
            pass.output,
            vec![Some("3".to_string()), Some("6".to_string())]
        );
        assert_eq!(pass.stats.rows, 2);
        Ok(())
    }

    #[test]
    fn cells_are_kept_as_raw_strings() -> Result<()> {
        let data = b"007,1e3,\" padded \"\n";
        let mut rdr = reader(data, 10);
        let pass = rdr.read_with(|batches| Ok(batches.collect::<Vec<_>>()))?;
        let batch = &pass.output[0];
        assert_eq!(column(batch, 0), vec![Some("007".to_string())]);
        assert_eq!(column(batch, 1), vec![Some("1e3".to_string())]);
        assert_eq!(column(batch, 2), vec![Some(" padded ".to_string())]);
        Ok(())
    }

    #[test]
    fn multiline_quoted_field_with_right_shape_stays_strict() -> Result<()> {
        let data = b"a,\"line one\nline two\",c\nd,e,f\n";
        let mut rdr = reader(data, 10);
        let pass = read_column(&mut rdr, 1)?;
        assert_eq!(pass.mode, ParseMode::Strict);
        assert_eq!(
            pass.output,
            vec![
                Some("line one\nline two".to_string()),
                Some("e".to_string())
            ]
        );
        Ok(())
    }

    #[test]
    fn unbalanced_quote_falls_back_to_lenient() -> Result<()> {
        init_test_logging();
        let data = b"r,x,y,A1,z,w,UC1\nr,x,y,A2,z,w,UC2\nr,x,\"y,A3,z,w,UC3\nr,x,y,A4,z,w,UC4\n";
        let mut rdr = reader(data, 1);

        let pass = read_column(&mut rdr, 6)?;
        assert_eq!(pass.mode, ParseMode::Lenient);
        // the damaged line is padded, the line after it survives
        assert_eq!(
            pass.output,
            vec![
                Some("UC1".to_string()),
                Some("UC2".to_string()),
                None,
                Some("UC4".to_string())
            ]
        );
        Ok(())
    }

    #[test]
    fn damaged_first_record_does_not_fix_the_shape() -> Result<()> {
        let data = b"d,v,\"t,A1,x,y,UC1\nd,v,t,A2,x,y,UC1\nd,v,t,A3,x,y,UC1\n";
        let mut rdr = reader(data, 10);

        let pass = read_column(&mut rdr, 3)?;
        assert_eq!(pass.mode, ParseMode::Lenient);
        assert_eq!(
            pass.output,
            vec![Some("A2".to_string()), Some("A3".to_string())]
        );
        assert_eq!(pass.stats.discarded_rows, 1);
        Ok(())
    }

    #[test]
    fn quote_left_open_at_end_of_input_is_a_fault() -> Result<()> {
        // the last record keeps the right width, so only the open quote gives it away
        let data = b"a,b,c\nd,e,\"f\n";
        let mut rdr = reader(data, 10);

        let mut strict = rdr.batches(ParseMode::Strict)?;
        strict.by_ref().for_each(drop);
        assert!(strict.finish().is_err());

        let pass = read_column(&mut rdr, 2)?;
        assert_eq!(pass.mode, ParseMode::Lenient);
        assert_eq!(
            pass.output,
            vec![Some("c".to_string()), Some("f".to_string())]
        );
        Ok(())
    }

    #[test]
    fn invalid_utf8_falls_back_and_decodes_windows_1252() -> Result<()> {
        let data = b"id,name\n1,Caf\xe9\n2,Bar\n";
        let mut rdr = reader(data, 10);
        let pass = read_column(&mut rdr, 1)?;
        assert_eq!(pass.mode, ParseMode::Lenient);
        assert_eq!(
            pass.output,
            vec![
                Some("name".to_string()),
                Some("Café".to_string()),
                Some("Bar".to_string())
            ]
        );
        Ok(())
    }

    #[test]
    fn lenient_pass_sniffs_semicolons() -> Result<()> {
        let data = b"a;b;c\n1;2;\xff\n4;5;6\n";
        let mut rdr = reader(data, 10);
        let pass = read_column(&mut rdr, 1)?;
        assert_eq!(pass.mode, ParseMode::Lenient);
        assert_eq!(
            pass.output,
            vec![
                Some("b".to_string()),
                Some("2".to_string()),
                Some("5".to_string())
            ]
        );
        Ok(())
    }

    #[test]
    fn output_of_abandoned_pass_is_discarded() -> Result<()> {
        // strict yields two single-row batches before the fault on line 3
        let data = b"a,b\nc,d\ne,\xff\ng,h\n";
        let mut rdr = reader(data, 1);
        let mut passes = 0;

        let pass = rdr.read_with(|batches| {
            passes += 1;
            Ok(batches.map(|b| b.num_rows()).sum::<usize>())
        })?;

        assert_eq!(passes, 2);
        assert_eq!(pass.mode, ParseMode::Lenient);
        assert_eq!(pass.output, 4);
        Ok(())
    }

    #[test]
    fn bom_is_stripped_from_first_cell() -> Result<()> {
        let data = b"\xEF\xBB\xBFUC1,x\n";
        let mut rdr = reader(data, 10);
        let pass = read_column(&mut rdr, 0)?;
        assert_eq!(pass.output, vec![Some("UC1".to_string())]);
        Ok(())
    }

    #[test]
    fn empty_source_yields_no_batches() -> Result<()> {
        let mut rdr = reader(b"", 10);
        let pass = rdr.read_with(|batches| Ok(batches.count()))?;
        assert_eq!(pass.mode, ParseMode::Strict);
        assert_eq!(pass.output, 0);
        assert_eq!(pass.stats, ReadStats::default());
        Ok(())
    }

    #[test]
    fn batches_are_fused_and_single_use() -> Result<()> {
        let mut rdr = reader(b"1,2\n3,4\n", 1);
        let mut batches = rdr.batches(ParseMode::Strict)?;
        assert!(batches.next().is_some());
        assert!(batches.next().is_some());
        assert!(batches.next().is_none());
        assert!(batches.next().is_none());
        assert_eq!(batches.finish()?.rows, 2);
        Ok(())
    }

    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device went away"))
        }
    }

    impl Seek for BrokenSource {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn failure_in_both_modes_names_the_source() {
        let mut rdr = ChunkReader::new(BrokenSource, "broken.csv", ReadOptions::default());
        let err = rdr
            .read_with(|batches| Ok(batches.count()))
            .expect_err("both passes should fail");
        assert!(format!("{err:#}").contains("broken.csv"));
    }
}
