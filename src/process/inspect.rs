use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use parquet::{
    arrow::arrow_reader::ParquetRecordBatchReaderBuilder,
    file::reader::{FileReader, SerializedFileReader},
};
use std::{collections::BTreeSet, fs::File, path::Path};

/// Metadata of a raw artifact, enough to check what downstream readers rely on.
#[derive(Debug, Clone)]
pub struct ArtifactSummary {
    pub rows: i64,
    pub row_groups: usize,
    pub bytes: u64,
    /// `(name, arrow type)` in file order.
    pub columns: Vec<(String, String)>,
    /// Distinct codecs across all column chunks, e.g. `ZSTD(ZstdLevel(1))`.
    pub codecs: BTreeSet<String>,
}

impl ArtifactSummary {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let reader = SerializedFileReader::new(file)
            .with_context(|| format!("reading Parquet footer of {}", path.display()))?;
        let meta = reader.metadata();

        let mut codecs = BTreeSet::new();
        for rg in meta.row_groups() {
            for col in rg.columns() {
                codecs.insert(format!("{:?}", col.compression()));
            }
        }

        let builder = ParquetRecordBatchReaderBuilder::try_new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )?;
        let columns = builder
            .schema()
            .fields()
            .iter()
            .map(|f| (f.name().clone(), f.data_type().to_string()))
            .collect();

        Ok(Self {
            rows: meta.file_metadata().num_rows(),
            row_groups: meta.num_row_groups(),
            bytes: std::fs::metadata(path)?.len(),
            columns,
            codecs,
        })
    }
}

/// Read a whole artifact back. Meant for tests and small files.
pub fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading batches from {}", path.display()))
}

pub fn count_rows(path: &Path) -> Result<usize> {
    Ok(read_batches(path)?.iter().map(|b| b.num_rows()).sum())
}
