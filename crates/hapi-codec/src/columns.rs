//! Columnar in-memory representation of decoded HAPI data.

use std::ops::Range;

use hapi_common::{HapiError, HapiResult};

use crate::layout::{FieldKind, FieldLayout};

/// Flat, row-major values of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Double(Vec<f64>),
    Integer(Vec<i32>),
    Text(Vec<String>),
}

impl ColumnValues {
    pub fn with_capacity(kind: FieldKind, capacity: usize) -> Self {
        match kind {
            FieldKind::Double => ColumnValues::Double(Vec::with_capacity(capacity)),
            FieldKind::Integer => ColumnValues::Integer(Vec::with_capacity(capacity)),
            FieldKind::Text => ColumnValues::Text(Vec::with_capacity(capacity)),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            ColumnValues::Double(_) => FieldKind::Double,
            ColumnValues::Integer(_) => FieldKind::Integer,
            ColumnValues::Text(_) => FieldKind::Text,
        }
    }

    /// Number of scalar values (records × repeat).
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Double(v) => v.len(),
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, range: Range<usize>) -> Self {
        match self {
            ColumnValues::Double(v) => ColumnValues::Double(v[range].to_vec()),
            ColumnValues::Integer(v) => ColumnValues::Integer(v[range].to_vec()),
            ColumnValues::Text(v) => ColumnValues::Text(v[range].to_vec()),
        }
    }

    fn append(&mut self, other: ColumnValues) -> HapiResult<()> {
        match (self, other) {
            (ColumnValues::Double(a), ColumnValues::Double(b)) => a.extend(b),
            (ColumnValues::Integer(a), ColumnValues::Integer(b)) => a.extend(b),
            (ColumnValues::Text(a), ColumnValues::Text(b)) => a.extend(b),
            (a, b) => {
                return Err(HapiError::Decode(format!(
                    "cannot append {:?} values to {:?} column",
                    b.kind(),
                    a.kind()
                )))
            }
        }
        Ok(())
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ColumnValues::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            ColumnValues::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            ColumnValues::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// One parameter's values across all records.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    /// Inner shape per record; empty for scalars.
    pub shape: Vec<usize>,
    /// Byte width of text elements. Storage detail, ignored by equality.
    pub width: Option<usize>,
    pub values: ColumnValues,
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.shape == other.shape && self.values == other.values
    }
}

impl Column {
    /// Values per record.
    pub fn repeat(&self) -> usize {
        self.shape.iter().product::<usize>().max(1)
    }

    /// Number of records.
    pub fn records(&self) -> usize {
        self.values.len() / self.repeat()
    }
}

/// Decoded data: one column per parameter, all with the same record count.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarResult {
    columns: Vec<Column>,
    len: usize,
}

impl ColumnarResult {
    /// Assemble columns, checking they agree on the record count.
    pub fn new(columns: Vec<Column>) -> HapiResult<Self> {
        let len = columns.first().map_or(0, Column::records);
        for column in &columns {
            if column.values.len() != len * column.repeat() {
                return Err(HapiError::Decode(format!(
                    "column '{}' has {} values, expected {}",
                    column.name,
                    column.values.len(),
                    len * column.repeat()
                )));
            }
        }
        Ok(Self { columns, len })
    }

    /// A result with the layout's columns and no records.
    pub fn empty(layout: &FieldLayout) -> Self {
        let columns = layout
            .fields()
            .iter()
            .map(|f| Column {
                name: f.name.clone(),
                shape: f.shape.clone(),
                width: f.width,
                values: ColumnValues::with_capacity(f.kind, 0),
            })
            .collect();
        Self { columns, len: 0 }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Timestamps of the leading time column.
    pub fn times(&self) -> Option<&[String]> {
        self.columns.first().and_then(|c| c.values.as_text())
    }

    /// Records in `range`.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let r = c.repeat();
                Column {
                    name: c.name.clone(),
                    shape: c.shape.clone(),
                    width: c.width,
                    values: c.values.slice(range.start * r..range.end * r),
                }
            })
            .collect();
        Self {
            columns,
            len: range.len(),
        }
    }

    /// Concatenate results with identical columns, in the given order.
    ///
    /// Text widths widen to the largest seen so the result stays fixed-width.
    pub fn concat(parts: Vec<ColumnarResult>) -> HapiResult<Self> {
        let mut parts = parts.into_iter();
        let Some(mut out) = parts.next() else {
            return Err(HapiError::Decode("nothing to concatenate".to_string()));
        };

        for part in parts {
            if part.names() != out.names() {
                return Err(HapiError::Decode(format!(
                    "column mismatch in concatenation: {:?} vs {:?}",
                    out.names(),
                    part.names()
                )));
            }
            out.len += part.len;
            for (dst, src) in out.columns.iter_mut().zip(part.columns) {
                if dst.shape != src.shape {
                    return Err(HapiError::Decode(format!(
                        "shape mismatch for '{}' in concatenation",
                        dst.name
                    )));
                }
                dst.width = match (dst.width, src.width) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                dst.values.append(src.values)?;
            }
        }
        Ok(out)
    }
}
