// src/source.rs

use serde::{Serialize, Serializer};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::config::DataPaths;
use crate::error::IngestError;

/// The three open-data sources the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    /// Household income per municipality.
    Renta,
    /// Crime rates per municipality; the CSV carries a metadata preamble.
    Delitos,
    /// Call-center contact log.
    Contact,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Renta, Source::Delitos, Source::Contact];

    pub fn name(self) -> &'static str {
        match self {
            Source::Renta => "renta",
            Source::Delitos => "delitos",
            Source::Contact => "contact",
        }
    }

    pub fn input_file_name(self) -> &'static str {
        match self {
            Source::Renta => "renta_por_hogar.csv",
            Source::Delitos => "delitos_por_municipio.csv",
            Source::Contact => "contac_center_data.csv",
        }
    }

    pub fn raw_file_name(self) -> &'static str {
        match self {
            Source::Renta => "renta_RAW.parquet",
            Source::Delitos => "delitos_RAW.parquet",
            Source::Contact => "contact_RAW.parquet",
        }
    }

    pub fn strategy(self) -> ReadStrategy {
        match self {
            Source::Delitos => ReadStrategy::DetectHeader,
            Source::Renta | Source::Contact => ReadStrategy::Simple,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "renta" | "income" => Ok(Source::Renta),
            "delitos" | "crime" => Ok(Source::Delitos),
            "contact" => Ok(Source::Contact),
            other => Err(IngestError::config(format!("unknown source '{other}'"))),
        }
    }
}

// Serialized by name so the run result prints as {"renta": "...", ...}.
impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// How the header line of a source is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// The header is the first line.
    Simple,
    /// The header sits below a preamble and must be located first.
    DetectHeader,
}

/// Which sources a run should (re)build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selector {
    #[default]
    All,
    Only(Source),
}

impl Selector {
    pub fn sources(self) -> Vec<Source> {
        match self {
            Selector::All => Source::ALL.to_vec(),
            Selector::Only(source) => vec![source],
        }
    }
}

impl FromStr for Selector {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Selector::All)
        } else {
            s.parse().map(Selector::Only)
        }
    }
}

/// Where one source comes from and goes to, and how to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub source: Source,
    pub input: PathBuf,
    pub output: PathBuf,
    pub delimiter: u8,
    pub encoding: &'static encoding_rs::Encoding,
    pub strategy: ReadStrategy,
}

impl SourceDescriptor {
    pub fn new(
        source: Source,
        paths: &DataPaths,
        delimiter: u8,
        encoding: &'static encoding_rs::Encoding,
    ) -> Self {
        Self {
            source,
            input: paths.input_dir.join(source.input_file_name()),
            output: paths.raw_dir().join(source.raw_file_name()),
            delimiter,
            encoding,
            strategy: source.strategy(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        self.output.parent().unwrap_or_else(|| Path::new("."))
    }
}
