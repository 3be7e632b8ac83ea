//! HAPI binary encoding: fixed-width little-endian records, no delimiters.

use hapi_common::{HapiError, HapiResult};

use crate::columns::{Column, ColumnValues, ColumnarResult};
use crate::layout::{FieldKind, FieldLayout, FieldSpec};

fn read_f64(b: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    f64::from_le_bytes(raw)
}

fn read_i32(b: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(b);
    i32::from_le_bytes(raw)
}

/// Text without its NUL padding. Trailing spaces are part of the value.
fn read_text(b: &[u8], field: &str) -> HapiResult<String> {
    let end = b.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&b[..end])
        .map(str::to_string)
        .map_err(|e| HapiError::Decode(format!("field '{}' is not valid UTF-8: {}", field, e)))
}

fn field_bytes(field: &FieldSpec) -> HapiResult<(std::ops::Range<usize>, usize)> {
    match (&field.bytes, field.width) {
        (Some(_), Some(0)) => Err(HapiError::Decode(format!(
            "field '{}' has zero width",
            field.name
        ))),
        (Some(bytes), Some(width)) => Ok((bytes.clone(), width)),
        _ => Err(HapiError::MissingLength(field.name.clone())),
    }
}

/// Decode binary records into columns.
///
/// Fails if `data` is not a whole number of records.
pub fn decode_binary(data: &[u8], layout: &FieldLayout) -> HapiResult<ColumnarResult> {
    let record_width = match layout.record_width() {
        Some(w) if w > 0 => w,
        Some(_) => return Err(HapiError::Decode("record width is zero".to_string())),
        None => {
            let field = layout.fields().iter().find(|f| f.bytes.is_none());
            return Err(HapiError::MissingLength(
                field.map_or_else(String::new, |f| f.name.clone()),
            ));
        }
    };

    if data.len() % record_width != 0 {
        return Err(HapiError::Decode(format!(
            "{} bytes is not a multiple of the {}-byte record width",
            data.len(),
            record_width
        )));
    }
    let records = data.len() / record_width;

    let mut columns = Vec::with_capacity(layout.fields().len());
    for field in layout.fields() {
        let (span, width) = field_bytes(field)?;
        let mut values = ColumnValues::with_capacity(field.kind, records * field.repeat);

        for record in data.chunks_exact(record_width) {
            let elements = record[span.clone()].chunks_exact(width);
            match &mut values {
                ColumnValues::Double(v) => v.extend(elements.map(read_f64)),
                ColumnValues::Integer(v) => v.extend(elements.map(read_i32)),
                ColumnValues::Text(v) => {
                    for element in elements {
                        v.push(read_text(element, &field.name)?);
                    }
                }
            }
        }

        columns.push(Column {
            name: field.name.clone(),
            shape: field.shape.clone(),
            width: field.width,
            values,
        });
    }

    ColumnarResult::new(columns)
}

/// Encode columns as binary records, NUL-padding text to its width.
pub fn encode_binary(result: &ColumnarResult) -> HapiResult<Vec<u8>> {
    let widths: Vec<usize> = result
        .columns()
        .iter()
        .map(|c| match c.values.kind() {
            FieldKind::Double => Ok(8),
            FieldKind::Integer => Ok(4),
            FieldKind::Text => c.width.ok_or_else(|| HapiError::MissingLength(c.name.clone())),
        })
        .collect::<HapiResult<_>>()?;

    let record_width: usize = result
        .columns()
        .iter()
        .zip(&widths)
        .map(|(c, w)| c.repeat() * w)
        .sum();

    let mut out = Vec::with_capacity(record_width * result.len());
    for row in 0..result.len() {
        for (column, &width) in result.columns().iter().zip(&widths) {
            let r = column.repeat();
            let range = row * r..(row + 1) * r;
            match &column.values {
                ColumnValues::Double(v) => {
                    for x in &v[range] {
                        out.extend_from_slice(&x.to_le_bytes());
                    }
                }
                ColumnValues::Integer(v) => {
                    for x in &v[range] {
                        out.extend_from_slice(&x.to_le_bytes());
                    }
                }
                ColumnValues::Text(v) => {
                    for s in &v[range] {
                        if s.len() > width {
                            return Err(HapiError::Decode(format!(
                                "value '{}' of '{}' exceeds width {}",
                                s, column.name, width
                            )));
                        }
                        out.extend_from_slice(s.as_bytes());
                        out.resize(out.len() + width - s.len(), 0);
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{FieldEntry, FieldLayout};

    fn layout() -> FieldLayout {
        FieldLayout::build(vec![
            FieldEntry {
                name: "Time".to_string(),
                kind: FieldKind::Text,
                shape: vec![],
                width: Some(5),
            },
            FieldEntry {
                name: "d".to_string(),
                kind: FieldKind::Double,
                shape: vec![2],
                width: Some(8),
            },
            FieldEntry {
                name: "i".to_string(),
                kind: FieldKind::Integer,
                shape: vec![],
                width: Some(4),
            },
        ])
    }

    fn record(time: &[u8; 5], d: [f64; 2], i: i32) -> Vec<u8> {
        let mut out = time.to_vec();
        out.extend_from_slice(&d[0].to_le_bytes());
        out.extend_from_slice(&d[1].to_le_bytes());
        out.extend_from_slice(&i.to_le_bytes());
        out
    }

    #[test]
    fn test_decode_records() {
        let mut data = record(b"t0\0\0\0", [1.5, -2.25], 7);
        data.extend(record(b"t1 \0\0", [f64::MAX, 0.1], -1));

        let result = decode_binary(&data, &layout()).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.times().unwrap(), &["t0".to_string(), "t1 ".to_string()]);
        assert_eq!(
            result.column("d").unwrap().values.as_f64().unwrap(),
            &[1.5, -2.25, f64::MAX, 0.1]
        );
        assert_eq!(result.column("i").unwrap().values.as_i32().unwrap(), &[7, -1]);
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let mut data = record(b"t0\0\0\0", [0.0, 0.0], 0);
        data.pop();
        assert!(matches!(decode_binary(&data, &layout()), Err(HapiError::Decode(_))));
    }

    #[test]
    fn test_decode_empty() {
        let result = decode_binary(&[], &layout()).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.names(), vec!["Time", "d", "i"]);
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let data = record(b"t0\0\0\0", [3.0, 4.0], 9);
        let result = decode_binary(&data, &layout()).unwrap();
        assert_eq!(encode_binary(&result).unwrap(), data);
    }

    #[test]
    fn test_undeclared_width_is_missing_length() {
        let layout = FieldLayout::build(vec![FieldEntry {
            name: "Time".to_string(),
            kind: FieldKind::Text,
            shape: vec![],
            width: None,
        }]);
        assert!(matches!(
            decode_binary(b"abc", &layout),
            Err(HapiError::MissingLength(ref n)) if n == "Time"
        ));
    }
}
