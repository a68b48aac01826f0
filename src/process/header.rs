// src/process/header.rs

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use regex::{RegexSet, RegexSetBuilder};
use std::{
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::Path,
};
use tracing::{debug, warn};

use crate::config::HeaderRules;
use crate::error::IngestError;
use crate::process::utils::{count_delimiters, decode_line};

/// Finds the real header line of a CSV that starts with free-form metadata,
/// e.g. the crime statistics export:
///
/// ```text
/// Balance de criminalidad 2020 - 1er trimestre
/// Unidades: Tasas
/// Notas adicionales
/// Municipio;2019;2020;2021      <- index 3
/// ```
///
/// A line is a strict match when it has at least `strict_delimiters`
/// delimiters and matches every keyword group. Without a strict match the
/// first line with `fallback_delimiters` delimiters wins, and failing that
/// index 0. Locating never fails on content.
#[derive(Debug, Clone)]
pub struct HeaderLocator {
    delimiter: u8,
    encoding: &'static Encoding,
    max_scan: usize,
    strict_delimiters: usize,
    fallback_delimiters: usize,
    comment_prefixes: Vec<String>,
    groups: Vec<(String, RegexSet)>,
}

impl HeaderLocator {
    pub fn new(rules: &HeaderRules, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let groups = rules
            .keyword_groups
            .iter()
            .map(|group| -> Result<(String, RegexSet)> {
                let set = RegexSetBuilder::new(&group.patterns)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        IngestError::config(format!("keyword group '{}': {}", group.name, e))
                    })?;
                Ok((group.name.clone(), set))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            delimiter,
            encoding,
            max_scan: rules.max_scan,
            strict_delimiters: rules.strict_delimiters,
            fallback_delimiters: rules.fallback_delimiters,
            comment_prefixes: rules.comment_prefixes.clone(),
            groups,
        })
    }

    /// Scan from the current position and return the header's line offset
    /// relative to it. The reader is seeked back to where it started.
    pub fn locate<R: BufRead + Seek>(&self, reader: &mut R) -> Result<usize> {
        let start = reader
            .stream_position()
            .context("reading stream position before header scan")?;
        let index = self.scan(reader);
        reader
            .seek(SeekFrom::Start(start))
            .context("restoring stream position after header scan")?;
        Ok(index)
    }

    pub fn locate_path(&self, path: &Path) -> Result<usize> {
        let file =
            File::open(path).with_context(|| format!("opening {} for header scan", path.display()))?;
        let mut reader = BufReader::new(file);
        self.locate(&mut reader)
    }

    fn scan<R: BufRead>(&self, reader: &mut R) -> usize {
        let mut fallback: Option<usize> = None;
        let mut buf = Vec::new();

        for index in 0..self.max_scan {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(line = index, error = %e, "header scan stopped on read error");
                    break;
                }
            }

            let line = decode_line(self.encoding, &buf);
            if line.is_empty() || self.is_comment(&line) {
                continue;
            }

            let delimiters = count_delimiters(&line, self.delimiter);
            if delimiters >= self.strict_delimiters && self.matches_all_groups(&line) {
                debug!(index, line = %line, "strict header match");
                return index;
            }
            if fallback.is_none() && delimiters >= self.fallback_delimiters {
                fallback = Some(index);
            }
        }

        match fallback {
            Some(index) => {
                debug!(index, "no strict header match; using first tabular line");
                index
            }
            None => {
                debug!(max_scan = self.max_scan, "no tabular line found; header defaults to 0");
                0
            }
        }
    }

    fn is_comment(&self, line: &str) -> bool {
        self.comment_prefixes
            .iter()
            .any(|p| !p.is_empty() && line.starts_with(p.as_str()))
    }

    fn matches_all_groups(&self, line: &str) -> bool {
        self.groups.iter().all(|(_, set)| set.is_match(line))
    }
}
