// src/process/writer.rs

use anyhow::{Context, Result};
use arrow::{
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel},
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::IngestError;

/// Column used when a source produced neither rows nor a header.
pub const EMPTY_PLACEHOLDER_COLUMN: &str = "_empty";

/// Parquet writer settings shared by every raw artifact.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub compression: Compression,
    pub dictionary: bool,
}

impl WriterOptions {
    pub fn new(codec: &str, level: i32, dictionary: bool) -> Result<Self> {
        Ok(Self {
            compression: parse_compression(codec, level)?,
            dictionary,
        })
    }

    pub fn from_config(cfg: &LoaderConfig) -> Result<Self> {
        Self::new(&cfg.compression, cfg.compression_level, cfg.dictionary)
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_dictionary_enabled(self.dictionary)
            .build()
    }
}

/// Map a codec name and level onto parquet's `Compression`.
pub fn parse_compression(codec: &str, level: i32) -> Result<Compression> {
    let bad_level = |e: parquet::errors::ParquetError| {
        IngestError::config(format!("compression level {level} for {codec}: {e}"))
    };
    let unsigned = || {
        u32::try_from(level)
            .map_err(|_| IngestError::config(format!("compression level {level} must be >= 0")))
    };

    let compression = match codec.trim().to_ascii_lowercase().as_str() {
        "zstd" => Compression::ZSTD(ZstdLevel::try_new(level).map_err(bad_level)?),
        "gzip" => Compression::GZIP(GzipLevel::try_new(unsigned()?).map_err(bad_level)?),
        "brotli" => Compression::BROTLI(BrotliLevel::try_new(unsigned()?).map_err(bad_level)?),
        "snappy" => Compression::SNAPPY,
        "lz4" => Compression::LZ4,
        "lz4_raw" => Compression::LZ4_RAW,
        "none" | "uncompressed" => Compression::UNCOMPRESSED,
        other => {
            return Err(IngestError::config(format!("unknown compression codec '{other}'")).into())
        }
    };
    Ok(compression)
}

/// What ended up on disk.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: u64,
    pub batches: usize,
    pub bytes: u64,
    pub schema: SchemaRef,
}

fn describe(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Streams batches into a single Parquet file.
///
/// The first batch fixes the schema; a later batch with different fields is
/// a `SchemaMismatch`. Data goes to `<name>.tmp` next to the destination and
/// is renamed into place by [`finish`](Self::finish). A writer dropped before
/// `finish` (error, panic, early return) removes its temp file, so a failed
/// write leaves nothing behind.
pub struct ColumnarStreamWriter {
    out_path: PathBuf,
    tmp_path: PathBuf,
    props: WriterProperties,
    writer: Option<ArrowWriter<File>>,
    schema: Option<SchemaRef>,
    rows: u64,
    batches: usize,
}

impl ColumnarStreamWriter {
    pub fn new(out_path: impl Into<PathBuf>, options: &WriterOptions) -> Self {
        let out_path = out_path.into();
        let tmp_path = tmp_path_for(&out_path);
        Self {
            out_path,
            tmp_path,
            props: options.properties(),
            writer: None,
            schema: None,
            rows: 0,
            batches: 0,
        }
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    fn open(&mut self, schema: SchemaRef) -> Result<()> {
        let file = File::create(&self.tmp_path)
            .with_context(|| format!("creating {}", self.tmp_path.display()))?;
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(self.props.clone()))
            .context("initializing Parquet writer")?;
        debug!(path = %self.out_path.display(), schema = %describe(&schema), "opened Parquet writer");
        self.writer = Some(writer);
        self.schema = Some(schema);
        Ok(())
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let mismatch = self
            .schema
            .as_ref()
            .filter(|expected| expected.fields() != batch.schema().fields())
            .map(|expected| describe(expected));
        if let Some(expected) = mismatch {
            return Err(IngestError::SchemaMismatch {
                batch: self.batches,
                expected,
                found: describe(&batch.schema()),
            }
            .into());
        }
        if self.schema.is_none() {
            self.open(batch.schema())?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer
                .write(batch)
                .with_context(|| format!("writing batch {} to Parquet", self.batches))?;
        }
        self.rows += batch.num_rows() as u64;
        self.batches += 1;
        Ok(())
    }

    /// Close the file and move it into place. With no batches written, a
    /// zero-row file is produced using `empty_schema`, or a single
    /// `_empty` text column when that is `None`.
    pub fn finish(mut self, empty_schema: Option<SchemaRef>) -> Result<WriteSummary> {
        if self.writer.is_none() {
            let schema = empty_schema.unwrap_or_else(placeholder_schema);
            warn!(path = %self.out_path.display(), "no rows to write; creating empty artifact");
            self.open(schema)?;
        }

        if let Some(writer) = self.writer.take() {
            writer.close().context("closing Parquet writer")?;
        }
        fs::rename(&self.tmp_path, &self.out_path).with_context(|| {
            format!(
                "moving {} to {}",
                self.tmp_path.display(),
                self.out_path.display()
            )
        })?;

        let bytes = fs::metadata(&self.out_path)
            .context("getting file metadata")?
            .len();
        let schema = self.schema.clone().unwrap_or_else(placeholder_schema);
        info!(
            path = %self.out_path.display(),
            rows = self.rows,
            batches = self.batches,
            bytes,
            "wrote Parquet"
        );

        Ok(WriteSummary {
            path: self.out_path.clone(),
            rows: self.rows,
            batches: self.batches,
            bytes,
            schema,
        })
    }
}

impl Drop for ColumnarStreamWriter {
    fn drop(&mut self) {
        // Still open only when finish() did not complete.
        drop(self.writer.take());
        if self.tmp_path.exists() {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                warn!(path = %self.tmp_path.display(), error = %e, "failed to remove partial output");
            } else {
                debug!(path = %self.tmp_path.display(), "removed partial output");
            }
        }
    }
}

fn tmp_path_for(out_path: &Path) -> PathBuf {
    let name = out_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    out_path.with_file_name(format!("{name}.tmp"))
}

fn placeholder_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        EMPTY_PLACEHOLDER_COLUMN,
        DataType::Utf8,
        true,
    )]))
}

/// Drain `batches` into one Parquet file at `out_path`. The first error from
/// the iterator or the writer aborts and leaves no file.
pub fn write_batches<I>(
    batches: I,
    out_path: &Path,
    options: &WriterOptions,
    empty_schema: Option<SchemaRef>,
) -> Result<WriteSummary>
where
    I: IntoIterator<Item = Result<RecordBatch>>,
{
    let mut writer = ColumnarStreamWriter::new(out_path, options);
    for batch in batches {
        writer.write(&batch?)?;
    }
    writer.finish(empty_schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::inspect::{read_batches, ArtifactSummary};
    use arrow::array::{Int64Array, StringArray};

    fn schema_a() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("CP", DataType::Int64, true),
            Field::new("Municipio", DataType::Utf8, true),
        ]))
    }

    fn batch(cps: &[i64], names: &[&str]) -> RecordBatch {
        RecordBatch::try_new(
            schema_a(),
            vec![
                Arc::new(Int64Array::from(cps.to_vec())),
                Arc::new(StringArray::from(names.to_vec())),
            ],
        )
        .unwrap()
    }

    fn opts() -> WriterOptions {
        WriterOptions::new("zstd", 3, true).unwrap()
    }

    #[test]
    fn round_trips_batches_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("a.parquet");
        let batches = vec![
            Ok(batch(&[1, 2], &["a", "b"])),
            Ok(batch(&[3], &["c"])),
            Ok(batch(&[4, 5, 6], &["d", "e", "f"])),
        ];
        let summary = write_batches(batches, &out, &opts(), None)?;
        assert_eq!(summary.rows, 6);
        assert_eq!(summary.batches, 3);
        assert!(!tmp_path_for(&out).exists());

        let read = read_batches(&out)?;
        let cps: Vec<i64> = read
            .iter()
            .flat_map(|b| {
                b.column(0)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .unwrap()
                    .values()
                    .to_vec()
            })
            .collect();
        assert_eq!(cps, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(read[0].schema().fields(), schema_a().fields());
        Ok(())
    }

    #[test]
    fn schema_mismatch_is_fatal_and_leaves_no_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("m.parquet");
        let wider = Arc::new(Schema::new(vec![
            Field::new("CP", DataType::Int64, true),
            Field::new("Municipio", DataType::Utf8, true),
            Field::new("extra", DataType::Utf8, true),
        ]));
        let second = RecordBatch::try_new(
            wider,
            vec![
                Arc::new(Int64Array::from(vec![3])),
                Arc::new(StringArray::from(vec!["c"])),
                Arc::new(StringArray::from(vec!["x"])),
            ],
        )?;

        let err = write_batches(vec![Ok(batch(&[1], &["a"])), Ok(second)], &out, &opts(), None)
            .unwrap_err();
        match err.downcast_ref::<IngestError>() {
            Some(IngestError::SchemaMismatch { batch, .. }) => assert_eq!(*batch, 1),
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
        assert!(!out.exists());
        assert!(!tmp_path_for(&out).exists());
        Ok(())
    }

    #[test]
    fn upstream_error_removes_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("e.parquet");
        let batches = vec![Ok(batch(&[1], &["a"])), Err(anyhow::anyhow!("boom"))];
        assert!(write_batches(batches, &out, &opts(), None).is_err());
        assert!(!out.exists());
        assert!(!tmp_path_for(&out).exists());
        Ok(())
    }

    #[test]
    fn empty_stream_writes_zero_row_file() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let out = dir.path().join("placeholder.parquet");
        let summary = write_batches(Vec::new(), &out, &opts(), None)?;
        assert_eq!(summary.rows, 0);
        let info = ArtifactSummary::read(&out)?;
        assert_eq!(info.rows, 0);
        assert_eq!(info.columns[0].0, EMPTY_PLACEHOLDER_COLUMN);

        let out = dir.path().join("header.parquet");
        write_batches(Vec::new(), &out, &opts(), Some(schema_a()))?;
        let info = ArtifactSummary::read(&out)?;
        assert_eq!(info.rows, 0);
        assert_eq!(info.columns.len(), 2);
        Ok(())
    }

    #[test]
    fn uses_configured_codec() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("c.parquet");
        write_batches(vec![Ok(batch(&[1], &["a"]))], &out, &opts(), None)?;
        let info = ArtifactSummary::read(&out)?;
        assert!(info.codecs.iter().all(|c| c.starts_with("ZSTD")));
        Ok(())
    }

    fn dictionary_encoded_columns(path: &Path) -> Result<Vec<bool>> {
        use parquet::basic::Encoding;
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let reader = SerializedFileReader::new(File::open(path)?)?;
        let rg = reader.metadata().row_group(0);
        Ok((0..rg.num_columns())
            .map(|i| {
                rg.column(i).encodings().iter().any(|e| {
                    matches!(e, Encoding::RLE_DICTIONARY | Encoding::PLAIN_DICTIONARY)
                })
            })
            .collect())
    }

    #[test]
    fn dictionary_setting_controls_column_encoding() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cps: Vec<i64> = (0..200).map(|i| 28000 + i % 3).collect();
        let names: Vec<&str> = (0..200).map(|i| if i % 2 == 0 { "MADRID" } else { "GETAFE" }).collect();

        let on = dir.path().join("dict.parquet");
        write_batches(vec![Ok(batch(&cps, &names))], &on, &opts(), None)?;
        assert_eq!(dictionary_encoded_columns(&on)?, vec![true, true]);

        let off = dir.path().join("plain.parquet");
        let plain = WriterOptions::new("zstd", 3, false)?;
        write_batches(vec![Ok(batch(&cps, &names))], &off, &plain, None)?;
        assert_eq!(dictionary_encoded_columns(&off)?, vec![false, false]);
        Ok(())
    }

    #[test]
    fn rejects_unknown_codec_and_bad_level() {
        assert!(parse_compression("zip", 1).is_err());
        assert!(parse_compression("zstd", 99).is_err());
        assert!(parse_compression("gzip", -1).is_err());
        assert!(matches!(parse_compression("SNAPPY", 0), Ok(Compression::SNAPPY)));
    }
}
