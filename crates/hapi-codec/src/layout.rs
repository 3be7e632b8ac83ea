//! Compile dataset metadata into a flat field layout.
//!
//! The layout records, for each parameter, where its values live in a CSV
//! row (column range) and in a binary record (byte range). Byte ranges
//! partition the record with no gaps, starting at offset zero.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hapi_common::{DatasetMetadata, HapiError, HapiResult, ParameterType};

/// Wire encoding of a data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Binary,
    Csv,
}

impl Encoding {
    /// Value of the `format` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Csv => "csv",
        }
    }

    /// File extension for raw cached responses.
    pub fn extension(&self) -> &'static str {
        match self {
            Encoding::Binary => "bin",
            Encoding::Csv => "csv",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = HapiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(Encoding::Binary),
            "csv" => Ok(Encoding::Csv),
            other => Err(HapiError::invalid_option(
                "format",
                format!("'{}' is not one of binary, csv", other),
            )),
        }
    }
}

/// How CSV text fields are sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Every text field declares its length; widths are known up front.
    Fast,
    /// Some text field has no declared length; widths are inferred from the
    /// data and normalized to the widest value seen.
    Slow,
}

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// 8-byte little-endian IEEE 754.
    Double,
    /// 4-byte little-endian two's complement.
    Integer,
    /// Fixed-width UTF-8 bytes (string and isotime parameters).
    Text,
}

impl FieldKind {
    fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldKind::Double => Some(8),
            FieldKind::Integer => Some(4),
            FieldKind::Text => None,
        }
    }
}

impl From<ParameterType> for FieldKind {
    fn from(kind: ParameterType) -> Self {
        match kind {
            ParameterType::Double => FieldKind::Double,
            ParameterType::Integer => FieldKind::Integer,
            ParameterType::String | ParameterType::Isotime => FieldKind::Text,
        }
    }
}

/// Input to [`FieldLayout::build`]: one field before offsets are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub name: String,
    pub kind: FieldKind,
    /// Inner shape per record; empty for scalars.
    pub shape: Vec<usize>,
    /// Byte width of one element; `None` for text of undeclared length.
    pub width: Option<usize>,
}

/// A field with its column and byte spans.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub shape: Vec<usize>,
    /// Values per record (product of `shape`, 1 for scalars).
    pub repeat: usize,
    pub width: Option<usize>,
    /// CSV columns holding this field.
    pub columns: Range<usize>,
    /// Bytes of a binary record holding this field, when widths are known.
    pub bytes: Option<Range<usize>>,
}

/// Ordered field layout shared by the decoders.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    fields: Vec<FieldSpec>,
    column_count: usize,
    record_width: Option<usize>,
}

impl FieldLayout {
    /// Assign column and byte spans to `entries`, in order.
    pub fn build(entries: Vec<FieldEntry>) -> Self {
        let mut fields = Vec::with_capacity(entries.len());
        let mut column = 0;
        let mut offset = Some(0usize);

        for entry in entries {
            let repeat = entry.shape.iter().product::<usize>().max(1);
            let bytes = match (offset, entry.width) {
                (Some(start), Some(width)) => Some(start..start + repeat * width),
                _ => None,
            };
            offset = bytes.as_ref().map(|b| b.end);

            fields.push(FieldSpec {
                name: entry.name,
                kind: entry.kind,
                shape: entry.shape,
                repeat,
                width: entry.width,
                columns: column..column + repeat,
                bytes,
            });
            column += repeat;
        }

        Self {
            fields,
            column_count: column,
            record_width: offset,
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of CSV columns per row.
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Bytes per binary record; `None` if any text width is undeclared.
    pub fn record_width(&self) -> Option<usize> {
        self.record_width
    }

    pub fn entries(&self) -> Vec<FieldEntry> {
        self.fields
            .iter()
            .map(|f| FieldEntry {
                name: f.name.clone(),
                kind: f.kind,
                shape: f.shape.clone(),
                width: f.width,
            })
            .collect()
    }
}

/// Compile the layout for `metadata` in the given encoding.
///
/// Binary records cannot be split without knowing every width, so a text
/// parameter lacking `length` is an error for binary. For CSV it selects
/// the slow decode strategy instead.
pub fn compile_layout(
    metadata: &DatasetMetadata,
    encoding: Encoding,
) -> HapiResult<(FieldLayout, DecodeStrategy)> {
    let mut strategy = DecodeStrategy::Fast;
    let mut entries = Vec::with_capacity(metadata.parameters.len());

    for param in &metadata.parameters {
        let kind = FieldKind::from(param.kind);
        let width = match kind.fixed_width() {
            Some(w) => Some(w),
            None => match param.length {
                Some(len) => Some(len),
                None if encoding == Encoding::Binary => {
                    return Err(HapiError::MissingLength(param.name.clone()));
                }
                None => {
                    strategy = DecodeStrategy::Slow;
                    None
                }
            },
        };

        entries.push(FieldEntry {
            name: param.name.clone(),
            kind,
            shape: param.shape(),
            width,
        });
    }

    if strategy == DecodeStrategy::Slow {
        debug!("Text parameter without declared length, using slow CSV decode");
    }

    Ok((FieldLayout::build(entries), strategy))
}
