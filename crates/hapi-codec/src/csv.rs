//! HAPI CSV encoding: one comma-delimited row per record, no header.
//!
//! Multi-element parameters are flattened into consecutive columns.

use csv::{ReaderBuilder, StringRecord};

use hapi_common::{HapiError, HapiResult};

use crate::columns::{Column, ColumnValues, ColumnarResult};
use crate::layout::{DecodeStrategy, FieldLayout, FieldSpec};

fn bad_value(row: u64, field: &FieldSpec, cell: &str) -> HapiError {
    HapiError::Decode(format!(
        "row {}: '{}' is not a valid {:?} for '{}'",
        row, cell, field.kind, field.name
    ))
}

/// Decode CSV rows into columns.
///
/// With [`DecodeStrategy::Fast`] every text value must fit its declared
/// length. With [`DecodeStrategy::Slow`] text widths are discovered from
/// the data and every text column is widened to its longest value.
pub fn decode_csv(
    data: &[u8],
    layout: &FieldLayout,
    strategy: DecodeStrategy,
) -> HapiResult<ColumnarResult> {
    let estimated_rows = data.iter().filter(|&&b| b == b'\n').count() + 1;
    let mut values: Vec<ColumnValues> = layout
        .fields()
        .iter()
        .map(|f| ColumnValues::with_capacity(f.kind, estimated_rows * f.repeat))
        .collect();
    let mut observed_width = vec![0usize; layout.fields().len()];

    // Flexible so a ragged row is reported with its line number below
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);
    let mut cells = StringRecord::new();

    while reader
        .read_record(&mut cells)
        .map_err(|e| HapiError::Decode(format!("malformed CSV response: {}", e)))?
    {
        let row = cells.position().map_or(0, |p| p.line());
        if cells.len() != layout.column_count() {
            return Err(HapiError::Decode(format!(
                "row {} has {} columns, expected {}",
                row,
                cells.len(),
                layout.column_count()
            )));
        }

        for ((field, column), width) in layout
            .fields()
            .iter()
            .zip(values.iter_mut())
            .zip(observed_width.iter_mut())
        {
            let field_cells = cells
                .iter()
                .skip(field.columns.start)
                .take(field.columns.len());
            for cell in field_cells {
                match column {
                    ColumnValues::Double(v) => {
                        let x = cell.trim().parse().map_err(|_| bad_value(row, field, cell))?;
                        v.push(x);
                    }
                    ColumnValues::Integer(v) => {
                        let x = cell.trim().parse().map_err(|_| bad_value(row, field, cell))?;
                        v.push(x);
                    }
                    ColumnValues::Text(v) => {
                        if strategy == DecodeStrategy::Fast {
                            if let Some(declared) = field.width.filter(|&w| cell.len() > w) {
                                return Err(HapiError::Decode(format!(
                                    "row {}: '{}' exceeds declared length {} of '{}'",
                                    row, cell, declared, field.name
                                )));
                            }
                        }
                        *width = (*width).max(cell.len());
                        v.push(cell.to_string());
                    }
                }
            }
        }
    }

    let columns = layout
        .fields()
        .iter()
        .zip(values)
        .zip(observed_width)
        .map(|((field, values), observed)| Column {
            name: field.name.clone(),
            shape: field.shape.clone(),
            width: match values {
                ColumnValues::Text(_) => Some(field.width.unwrap_or(observed.max(1))),
                _ => field.width,
            },
            values,
        })
        .collect();

    ColumnarResult::new(columns)
}
