// src/process/reader.rs

use anyhow::{Context, Result};
use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use csv::ByteRecord;
use encoding_rs::Encoding;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::config::{LoaderConfig, RowPolicy};
use crate::error::IngestError;
use crate::process::{
    convert::{to_record_batch, ChunkBuffer},
    schema::{column_names, infer_schema, utf8_schema},
    utils::{cell, decode, strip_bom},
};

/// How to read one delimited text file.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// Lines to drop before the header line (0 when the header is first).
    pub skip_lines: usize,
    pub chunk_size: usize,
    pub row_policy: RowPolicy,
    pub infer_types: bool,
}

impl ReadOptions {
    pub fn from_config(cfg: &LoaderConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            delimiter: cfg.delimiter_byte(),
            encoding: cfg.text_encoding()?,
            skip_lines: 0,
            chunk_size: cfg.chunk_size,
            row_policy: cfg.row_policy,
            infer_types: cfg.infer_types,
        })
    }

    pub fn skipping(mut self, lines: usize) -> Self {
        self.skip_lines = lines;
        self
    }
}

/// Lazily yields `RecordBatch`es of at most `chunk_size` rows from a CSV file.
///
/// The column types are fixed by the first chunk; every later chunk is built
/// against that schema. The file handle lives as long as the reader. After the
/// first error the iterator is exhausted.
pub struct ChunkedTableReader {
    path: PathBuf,
    records: csv::Reader<BufReader<File>>,
    opts: ReadOptions,
    names: Vec<String>,
    schema: Option<SchemaRef>,
    /// Physical lines before the csv reader's line 1.
    line_offset: u64,
    rows_read: u64,
    rows_skipped: u64,
    cells_coerced: u64,
    chunks: usize,
    done: bool,
}

impl ChunkedTableReader {
    pub fn open(path: &Path, opts: ReadOptions) -> Result<Self> {
        if opts.chunk_size == 0 {
            return Err(IngestError::config("chunk_size must be at least 1").into());
        }

        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut input = BufReader::new(file);

        let mut discarded = Vec::new();
        for n in 0..opts.skip_lines {
            discarded.clear();
            let read = input
                .read_until(b'\n', &mut discarded)
                .with_context(|| format!("skipping preamble line {} of {}", n, path.display()))?;
            if read == 0 {
                break;
            }
        }

        let mut records = csv::ReaderBuilder::new()
            .delimiter(opts.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        let mut header = ByteRecord::new();
        let has_header = records
            .read_byte_record(&mut header)
            .with_context(|| format!("reading header of {}", path.display()))?;

        let names = if has_header {
            let raw: Vec<String> = header
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let field = if i == 0 { strip_bom(field) } else { field };
                    decode(opts.encoding, field)
                        .trim_start_matches('\u{feff}')
                        .to_string()
                })
                .collect();
            column_names(&raw)
        } else {
            Vec::new()
        };

        debug!(
            path = %path.display(),
            skip_lines = opts.skip_lines,
            columns = names.len(),
            "opened CSV"
        );

        Ok(Self {
            path: path.to_path_buf(),
            records,
            line_offset: opts.skip_lines as u64,
            opts,
            names,
            schema: None,
            rows_read: 0,
            rows_skipped: 0,
            cells_coerced: 0,
            chunks: 0,
            done: false,
        })
    }

    /// Column names after de-duplication; empty when the file has no records.
    pub fn header(&self) -> &[String] {
        &self.names
    }

    /// All-text schema derived from the header line, if there is one.
    pub fn header_schema(&self) -> Option<SchemaRef> {
        if self.names.is_empty() {
            None
        } else {
            Some(utf8_schema(&self.names))
        }
    }

    /// Schema fixed by the first chunk.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }

    pub fn cells_coerced(&self) -> u64 {
        self.cells_coerced
    }

    fn malformed(&self, line: u64, reason: String) -> anyhow::Error {
        anyhow::Error::new(IngestError::MalformedRow { line, reason })
            .context(format!("reading {}", self.path.display()))
    }

    /// Fit a record to the header width, or say why it cannot be.
    fn fit_row(&self, record: &ByteRecord) -> std::result::Result<Vec<Option<String>>, String> {
        let width = self.names.len();
        let mut cells: Vec<Option<String>> =
            record.iter().map(|f| cell(self.opts.encoding, f)).collect();

        if cells.len() > width {
            // trailing separators ("a;b;") add empty fields, which are harmless
            if cells[width..].iter().any(Option::is_some) {
                return Err(format!("expected {} fields, found {}", width, cells.len()));
            }
            cells.truncate(width);
        } else if cells.len() < width {
            if self.opts.row_policy == RowPolicy::Strict {
                return Err(format!("expected {} fields, found {}", width, cells.len()));
            }
            cells.resize(width, None);
        }
        Ok(cells)
    }

    fn next_chunk(&mut self) -> Result<Option<RecordBatch>> {
        if self.names.is_empty() {
            return Ok(None);
        }

        let mut buffer = ChunkBuffer::new(self.names.len(), self.opts.chunk_size.min(65_536));
        let mut record = ByteRecord::new();

        while buffer.len() < self.opts.chunk_size {
            match self.records.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {}
                Err(e) if !e.is_io_error() && self.opts.row_policy == RowPolicy::Permissive => {
                    warn!(path = %self.path.display(), error = %e, "skipping unparseable row");
                    self.rows_skipped += 1;
                    continue;
                }
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0) + self.line_offset;
                    return Err(self.malformed(line, e.to_string()));
                }
            }

            let line = record.position().map(|p| p.line()).unwrap_or(0) + self.line_offset;
            match self.fit_row(&record) {
                Ok(cells) => buffer.push_row(line, cells),
                Err(reason) if self.opts.row_policy == RowPolicy::Permissive => {
                    debug!(line, %reason, "skipping row");
                    self.rows_skipped += 1;
                }
                Err(reason) => return Err(self.malformed(line, reason)),
            }
        }

        if buffer.is_empty() {
            return Ok(None);
        }

        let schema = match &self.schema {
            Some(s) => s.clone(),
            None => {
                let s = if self.opts.infer_types {
                    infer_schema(&self.names, &buffer.columns)
                } else {
                    utf8_schema(&self.names)
                };
                self.schema = Some(s.clone());
                s
            }
        };

        let converted = to_record_batch(&buffer, &schema, self.opts.row_policy)
            .with_context(|| format!("converting chunk {} of {}", self.chunks, self.path.display()))?;

        self.rows_read += buffer.len() as u64;
        self.cells_coerced += converted.coerced;
        self.chunks += 1;
        debug!(chunk = self.chunks - 1, rows = buffer.len(), "read chunk");

        Ok(Some(converted.batch))
    }
}

impl Iterator for ChunkedTableReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                if self.rows_skipped > 0 || self.cells_coerced > 0 {
                    warn!(
                        path = %self.path.display(),
                        skipped = self.rows_skipped,
                        coerced = self.cells_coerced,
                        "finished with tolerated malformed rows"
                    );
                }
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for ChunkedTableReader {}
