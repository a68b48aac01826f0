use anyhow::{anyhow, Result};
use arrow::{
    array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder},
    datatypes::{DataType, SchemaRef},
    record_batch::RecordBatch,
};
use std::{str::FromStr, sync::Arc};

use crate::config::RowPolicy;
use crate::error::IngestError;

/// Buffered string cells of one chunk, column-major, plus the source line of each row.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    pub columns: Vec<Vec<Option<String>>>,
    pub lines: Vec<u64>,
}

impl ChunkBuffer {
    pub fn new(width: usize, capacity: usize) -> Self {
        Self {
            columns: (0..width).map(|_| Vec::with_capacity(capacity)).collect(),
            lines: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append one row; `cells` must already have the buffer's width.
    pub fn push_row(&mut self, line: u64, cells: Vec<Option<String>>) {
        for (col, value) in self.columns.iter_mut().zip(cells) {
            col.push(value);
        }
        self.lines.push(line);
    }
}

/// Result of converting one chunk: the batch and how many cells were nulled.
pub struct Converted {
    pub batch: RecordBatch,
    pub coerced: u64,
}

/// Build a batch of `schema` from string cells. Cells that do not parse as
/// their column type fail under `Strict` and become null under `Permissive`.
pub fn to_record_batch(
    buffer: &ChunkBuffer,
    schema: &SchemaRef,
    policy: RowPolicy,
) -> Result<Converted> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    let mut coerced = 0u64;

    for (field, values) in schema.fields().iter().zip(&buffer.columns) {
        let array: ArrayRef = match field.data_type() {
            DataType::Int64 => {
                let mut b = Int64Builder::with_capacity(values.len());
                for (row, v) in values.iter().enumerate() {
                    let parsed = parse_cell::<i64>(v, field.name(), buffer.lines[row], policy)?;
                    if parsed.is_none() && v.is_some() {
                        coerced += 1;
                    }
                    b.append_option(parsed);
                }
                Arc::new(b.finish())
            }
            DataType::Float64 => {
                let mut b = Float64Builder::with_capacity(values.len());
                for (row, v) in values.iter().enumerate() {
                    let parsed = parse_cell::<f64>(v, field.name(), buffer.lines[row], policy)?;
                    if parsed.is_none() && v.is_some() {
                        coerced += 1;
                    }
                    b.append_option(parsed);
                }
                Arc::new(b.finish())
            }
            DataType::Utf8 => {
                let mut b = StringBuilder::with_capacity(values.len(), 0);
                for v in values {
                    b.append_option(v.as_deref());
                }
                Arc::new(b.finish())
            }
            other => return Err(anyhow!("unsupported column type {other} for {}", field.name())),
        };
        arrays.push(array);
    }

    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    Ok(Converted { batch, coerced })
}

fn parse_cell<T: FromStr>(
    value: &Option<String>,
    column: &str,
    line: u64,
    policy: RowPolicy,
) -> Result<Option<T>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(v) => Ok(Some(v)),
        Err(_) if policy == RowPolicy::Permissive => Ok(None),
        Err(_) => Err(IngestError::MalformedRow {
            line,
            reason: format!(
                "value {raw:?} in column '{column}' does not match the type fixed by the first chunk"
            ),
        }
        .into()),
    }
}
