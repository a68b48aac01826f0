// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::IngestError;

pub const DEFAULT_CHUNK_SIZE: usize = 200_000;
pub const DEFAULT_COMPRESSION: &str = "zstd";
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 7;
pub const DEFAULT_MAX_HEADER_SCAN: usize = 300;

/// What to do with rows that do not fit the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowPolicy {
    /// Abort the source on the first malformed row.
    #[default]
    #[serde(alias = "error")]
    Strict,
    /// Pad short rows, skip long or unparseable rows, null out bad cells.
    #[serde(alias = "skip")]
    Permissive,
}

impl std::str::FromStr for RowPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "error" => Ok(RowPolicy::Strict),
            "permissive" | "skip" => Ok(RowPolicy::Permissive),
            other => Err(IngestError::config(format!("unknown row policy '{other}'"))),
        }
    }
}

/// A named set of patterns; a header line must match at least one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordGroup {
    pub name: String,
    pub patterns: Vec<String>,
}

impl KeywordGroup {
    pub fn new(name: &str, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Heuristics used to find a header line below a metadata preamble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderRules {
    pub max_scan: usize,
    /// Delimiters required, together with every keyword group, for a strict match.
    pub strict_delimiters: usize,
    /// Delimiters required for the fallback "looks tabular" match.
    pub fallback_delimiters: usize,
    pub comment_prefixes: Vec<String>,
    pub keyword_groups: Vec<KeywordGroup>,
}

impl Default for HeaderRules {
    fn default() -> Self {
        Self {
            max_scan: DEFAULT_MAX_HEADER_SCAN,
            strict_delimiters: 3,
            fallback_delimiters: 2,
            comment_prefixes: vec!["#".to_string()],
            keyword_groups: vec![
                KeywordGroup::new("municipio", &["municipio", "municipality"]),
                KeywordGroup::new(
                    "periodo",
                    &["periodo", "año", "anio", "year", r"\b(19|20)\d{2}\b"],
                ),
            ],
        }
    }
}

/// Everything the raw loader needs besides file locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub chunk_size: usize,
    pub compression: String,
    pub compression_level: i32,
    pub dictionary: bool,
    pub delimiter: char,
    /// WHATWG encoding label, e.g. `latin1` or `utf-8`.
    pub encoding: String,
    pub row_policy: RowPolicy,
    /// Type columns as Int64/Float64 from the first chunk. Off by default:
    /// the resulting types depend on `chunk_size`, and raw artifacts keep the
    /// source text as-is.
    pub infer_types: bool,
    pub header: HeaderRules,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: DEFAULT_COMPRESSION.to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            dictionary: true,
            delimiter: ';',
            encoding: "latin1".to_string(),
            row_policy: RowPolicy::Strict,
            infer_types: false,
            header: HeaderRules::default(),
        }
    }
}

impl LoaderConfig {
    /// Read a YAML config file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: LoaderConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded loader config");
        Ok(cfg)
    }

    /// Defaults, then the optional YAML file, then `RAW_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RAW_CHUNK_SIZE") {
            self.chunk_size = v
                .trim()
                .parse()
                .with_context(|| format!("RAW_CHUNK_SIZE is not a row count: {v:?}"))?;
        }
        if let Some(v) = lookup("RAW_COMPRESSION") {
            self.compression = v.trim().to_string();
        }
        if let Some(v) = lookup("RAW_COMPRESSION_LEVEL") {
            self.compression_level = v
                .trim()
                .parse()
                .with_context(|| format!("RAW_COMPRESSION_LEVEL is not an integer: {v:?}"))?;
        }
        if let Some(v) = lookup("RAW_HEADER_MAX_SCAN") {
            self.header.max_scan = v
                .trim()
                .parse()
                .with_context(|| format!("RAW_HEADER_MAX_SCAN is not a line count: {v:?}"))?;
        }
        if let Some(v) = lookup("RAW_ROW_POLICY") {
            self.row_policy = v.parse()?;
        }
        if let Some(v) = lookup("RAW_INFER_TYPES") {
            self.infer_types = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(IngestError::config(format!(
                        "RAW_INFER_TYPES is not a boolean: {v:?}"
                    ))
                    .into())
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::config("chunk_size must be at least 1"));
        }
        if !self.delimiter.is_ascii() {
            return Err(IngestError::config(format!(
                "delimiter {:?} is not a single-byte character",
                self.delimiter
            )));
        }
        self.text_encoding()?;
        Ok(())
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }

    /// Labels follow WHATWG, so `latin1`/`iso-8859-1` resolve to windows-1252.
    /// It matches ISO-8859-1 except 0x80-0x9F, which decode to printable
    /// characters (e.g. 0x80 is `€`) instead of C1 controls.
    pub fn text_encoding(&self) -> Result<&'static encoding_rs::Encoding, IngestError> {
        encoding_rs::Encoding::for_label(self.encoding.trim().as_bytes())
            .ok_or_else(|| IngestError::config(format!("unknown encoding '{}'", self.encoding)))
    }
}

/// Input/output directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl DataPaths {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// `DATA_IN_DIR` and `DATA_OUT_DIR` win; otherwise both hang off `DATA_DIR`
    /// (default `data`), with outputs under `DATA_DIR/output`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("DATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let input_dir = lookup("DATA_IN_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.clone());
        let output_dir = lookup("DATA_OUT_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("output"));
        Self {
            input_dir,
            output_dir,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.output_dir.join("raw")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LoaderConfig::default();
        assert_eq!(cfg.chunk_size, 200_000);
        assert_eq!(cfg.compression, "zstd");
        assert_eq!(cfg.compression_level, 7);
        assert_eq!(cfg.header.max_scan, 300);
        assert_eq!(cfg.delimiter, ';');
        assert_eq!(cfg.row_policy, RowPolicy::Strict);
        assert!(!cfg.infer_types);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn infer_types_is_opt_in_through_env() -> Result<()> {
        let mut cfg = LoaderConfig::default();
        cfg.apply_overrides(lookup_from(&[("RAW_INFER_TYPES", "true")]))?;
        assert!(cfg.infer_types);

        let err = cfg
            .apply_overrides(lookup_from(&[("RAW_INFER_TYPES", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("RAW_INFER_TYPES"));
        Ok(())
    }

    #[test]
    fn latin1_label_decodes_as_windows_1252() -> Result<()> {
        let enc = LoaderConfig::default().text_encoding()?;
        assert_eq!(enc, encoding_rs::WINDOWS_1252);
        let (text, _, had_errors) = enc.decode(b"ALCAL\xC1 \x80");
        assert!(!had_errors);
        assert_eq!(text, "ALCALÁ €");
        Ok(())
    }

    #[test]
    fn env_overrides_replace_defaults() -> Result<()> {
        let mut cfg = LoaderConfig::default();
        cfg.apply_overrides(lookup_from(&[
            ("RAW_CHUNK_SIZE", "5000"),
            ("RAW_COMPRESSION", "snappy"),
            ("RAW_COMPRESSION_LEVEL", "3"),
            ("RAW_HEADER_MAX_SCAN", "50"),
            ("RAW_ROW_POLICY", "skip"),
        ]))?;
        assert_eq!(cfg.chunk_size, 5000);
        assert_eq!(cfg.compression, "snappy");
        assert_eq!(cfg.compression_level, 3);
        assert_eq!(cfg.header.max_scan, 50);
        assert_eq!(cfg.row_policy, RowPolicy::Permissive);
        Ok(())
    }

    #[test]
    fn bad_override_is_reported() {
        let mut cfg = LoaderConfig::default();
        let err = cfg
            .apply_overrides(lookup_from(&[("RAW_CHUNK_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("RAW_CHUNK_SIZE"));
    }

    #[test]
    fn validate_rejects_zero_chunk_and_unknown_encoding() {
        let cfg = LoaderConfig {
            chunk_size: 0,
            ..LoaderConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));

        let cfg = LoaderConfig {
            encoding: "klingon".into(),
            ..LoaderConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn partial_yaml_keeps_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("loader.yaml");
        fs::write(
            &path,
            "chunk_size: 10\nrow_policy: permissive\nheader:\n  max_scan: 20\n",
        )?;
        let cfg = LoaderConfig::from_yaml_file(&path)?;
        assert_eq!(cfg.chunk_size, 10);
        assert_eq!(cfg.row_policy, RowPolicy::Permissive);
        assert_eq!(cfg.header.max_scan, 20);
        assert_eq!(cfg.header.fallback_delimiters, 2);
        assert_eq!(cfg.compression, "zstd");
        Ok(())
    }

    #[test]
    fn data_paths_follow_env_precedence() {
        let paths = DataPaths::from_lookup(lookup_from(&[]));
        assert_eq!(paths.input_dir, PathBuf::from("data"));
        assert_eq!(paths.raw_dir(), PathBuf::from("data/output/raw"));

        let paths = DataPaths::from_lookup(lookup_from(&[("DATA_DIR", "/srv/etl")]));
        assert_eq!(paths.input_dir, PathBuf::from("/srv/etl"));
        assert_eq!(paths.output_dir, PathBuf::from("/srv/etl/output"));

        let paths = DataPaths::from_lookup(lookup_from(&[
            ("DATA_DIR", "/srv/etl"),
            ("DATA_IN_DIR", "/in"),
            ("DATA_OUT_DIR", "/out"),
        ]));
        assert_eq!(paths.input_dir, PathBuf::from("/in"));
        assert_eq!(paths.raw_dir(), PathBuf::from("/out/raw"));
    }
}
