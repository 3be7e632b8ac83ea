//! Self-describing on-disk snapshot of a decoded result.
//!
//! Layout:
//!
//! ```text
//! 0..8     magic "HAPICOLS"
//! 8..12    header length, u32 little-endian
//! 12..     JSON header (version, record count, field entries)
//! ...      records in the HAPI binary encoding
//! ```
//!
//! Reusing the binary encoding keeps doubles bit-exact across a cache
//! round trip.

use serde::{Deserialize, Serialize};

use hapi_common::{HapiError, HapiResult};

use crate::binary::{decode_binary, encode_binary};
use crate::columns::ColumnarResult;
use crate::layout::{FieldEntry, FieldLayout};

const MAGIC: &[u8; 8] = b"HAPICOLS";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    version: u32,
    records: usize,
    fields: Vec<FieldEntry>,
}

/// Serialize a result to snapshot bytes.
pub fn write_snapshot(result: &ColumnarResult) -> HapiResult<Vec<u8>> {
    let header = Header {
        version: VERSION,
        records: result.len(),
        fields: result
            .columns()
            .iter()
            .map(|c| FieldEntry {
                name: c.name.clone(),
                kind: c.values.kind(),
                shape: c.shape.clone(),
                width: Some(match c.values.kind() {
                    crate::layout::FieldKind::Double => 8,
                    crate::layout::FieldKind::Integer => 4,
                    crate::layout::FieldKind::Text => c.width.unwrap_or(0),
                }),
            })
            .collect(),
    };
    let header = serde_json::to_vec(&header)?;
    let body = encode_binary(result)?;

    let header_len = u32::try_from(header.len())
        .map_err(|_| HapiError::Cache("snapshot header too large".to_string()))?;

    let mut out = Vec::with_capacity(12 + header.len() + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Read snapshot bytes back into a result.
pub fn read_snapshot(data: &[u8]) -> HapiResult<ColumnarResult> {
    if data.len() < 12 || &data[0..8] != MAGIC {
        return Err(HapiError::Cache("not a columnar snapshot".to_string()));
    }
    let header_len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let header_end = 12 + header_len;
    let header_bytes = data
        .get(12..header_end)
        .ok_or_else(|| HapiError::Cache("truncated snapshot header".to_string()))?;
    let header: Header = serde_json::from_slice(header_bytes)
        .map_err(|e| HapiError::Cache(format!("invalid snapshot header: {}", e)))?;

    if header.version != VERSION {
        return Err(HapiError::Cache(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }

    let layout = FieldLayout::build(header.fields);
    let body = &data[header_end..];
    if header.records == 0 {
        return Ok(ColumnarResult::empty(&layout));
    }

    let result = decode_binary(body, &layout)?;
    if result.len() != header.records {
        return Err(HapiError::Cache(format!(
            "snapshot holds {} records, header says {}",
            result.len(),
            header.records
        )));
    }
    Ok(result)
}
