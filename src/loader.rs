// src/loader.rs

use anyhow::{Context, Result};
use std::{collections::BTreeMap, fs, io, path::PathBuf, time::Instant};
use tracing::{debug, info, instrument};

use crate::config::{DataPaths, LoaderConfig};
use crate::error::IngestError;
use crate::process::{
    write_batches, ChunkedTableReader, HeaderLocator, ReadOptions, WriterOptions,
};
use crate::source::{ReadStrategy, Selector, Source, SourceDescriptor};

/// Outcome of building one raw artifact.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub source: Source,
    pub path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
    /// Lines skipped before the header (0 for simple sources).
    pub header_index: usize,
    pub rows_skipped: u64,
    pub cells_coerced: u64,
}

/// Converts the source CSVs into `<out>/raw/*_RAW.parquet`, one source at a
/// time. Each output is removed and rewritten from scratch on every build.
///
/// Two processes building the same source at once will clobber each other;
/// nothing here locks the output path.
pub struct RawLoader {
    config: LoaderConfig,
    paths: DataPaths,
    read_opts: ReadOptions,
    writer_opts: WriterOptions,
    locator: HeaderLocator,
}

impl RawLoader {
    pub fn new(config: LoaderConfig, paths: DataPaths) -> Result<Self> {
        let read_opts = ReadOptions::from_config(&config)?;
        let writer_opts = WriterOptions::from_config(&config)?;
        let locator =
            HeaderLocator::new(&config.header, read_opts.delimiter, read_opts.encoding)?;
        Ok(Self {
            config,
            paths,
            read_opts,
            writer_opts,
            locator,
        })
    }

    /// Loader with config and directories taken from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(LoaderConfig::load(None)?, DataPaths::from_env())
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn descriptor(&self, source: Source) -> SourceDescriptor {
        SourceDescriptor::new(
            source,
            &self.paths,
            self.read_opts.delimiter,
            self.read_opts.encoding,
        )
    }

    fn open_reader(&self, desc: &SourceDescriptor) -> Result<(ChunkedTableReader, usize)> {
        let header_index = match desc.strategy {
            ReadStrategy::Simple => 0,
            ReadStrategy::DetectHeader => {
                let idx = self.locator.locate_path(&desc.input)?;
                info!(source = %desc.source, header_index = idx, "located header");
                idx
            }
        };
        let opts = ReadOptions {
            delimiter: desc.delimiter,
            encoding: desc.encoding,
            ..self.read_opts.clone()
        }
        .skipping(header_index);
        let reader = ChunkedTableReader::open(&desc.input, opts)?;
        Ok((reader, header_index))
    }

    /// Rebuild the raw artifact of one source.
    #[instrument(level = "info", skip_all, fields(source = %source))]
    pub fn build(&self, source: Source) -> Result<RawOutput> {
        let start = Instant::now();
        let desc = self.descriptor(source);

        fs::create_dir_all(desc.output_dir())
            .with_context(|| format!("creating {}", desc.output_dir().display()))?;
        remove_stale(&desc.output)?;

        if !desc.input.is_file() {
            return Err(IngestError::MissingInput {
                source_name: source.name().to_string(),
                path: desc.input.clone(),
            }
            .into());
        }

        let (mut reader, header_index) = self
            .open_reader(&desc)
            .with_context(|| format!("opening {source} input"))?;
        let empty_schema = reader.header_schema();

        let summary = write_batches(
            reader.by_ref(),
            &desc.output,
            &self.writer_opts,
            empty_schema,
        )
        .with_context(|| format!("building {source} raw artifact"))?;

        info!(
            rows = summary.rows,
            bytes = summary.bytes,
            skipped = reader.rows_skipped(),
            elapsed = ?start.elapsed(),
            "built raw artifact"
        );

        Ok(RawOutput {
            source,
            path: summary.path,
            rows: summary.rows,
            bytes: summary.bytes,
            header_index,
            rows_skipped: reader.rows_skipped(),
            cells_coerced: reader.cells_coerced(),
        })
    }

    pub fn build_renta_raw(&self) -> Result<PathBuf> {
        self.build(Source::Renta).map(|o| o.path)
    }

    pub fn build_delitos_raw(&self) -> Result<PathBuf> {
        self.build(Source::Delitos).map(|o| o.path)
    }

    pub fn build_contact_raw(&self) -> Result<PathBuf> {
        self.build(Source::Contact).map(|o| o.path)
    }

    /// Build every selected source in order. The first failure is returned
    /// as-is; sources after it are not attempted.
    pub fn run(&self, selector: Selector) -> Result<BTreeMap<Source, PathBuf>> {
        let raw_dir = self.paths.raw_dir();
        fs::create_dir_all(&raw_dir)
            .with_context(|| format!("creating raw directory {}", raw_dir.display()))?;

        let mut outputs = BTreeMap::new();
        for source in selector.sources() {
            let out = self.build(source)?;
            outputs.insert(source, out.path);
        }
        info!(count = outputs.len(), "raw load complete");
        Ok(outputs)
    }
}

/// Remove a previous artifact; a missing file is fine.
fn remove_stale(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed previous artifact");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

/// Build every source with configuration from the environment.
pub fn load_all_raw() -> Result<BTreeMap<Source, PathBuf>> {
    RawLoader::from_env()?.run(Selector::All)
}
