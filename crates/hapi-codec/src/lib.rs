//! Decoding of HAPI data responses.
//!
//! A data response is decoded against a [`FieldLayout`] compiled once per
//! request from the dataset's parameter metadata. Both wire encodings (CSV
//! and fixed-width little-endian binary) decode into the same
//! [`ColumnarResult`], one typed column per parameter.

pub mod binary;
pub mod columns;
pub mod csv;
pub mod layout;
pub mod snapshot;

pub use binary::{decode_binary, encode_binary};
pub use columns::{Column, ColumnValues, ColumnarResult};
pub use csv::decode_csv;
pub use layout::{
    compile_layout, DecodeStrategy, Encoding, FieldEntry, FieldKind, FieldLayout, FieldSpec,
};
pub use snapshot::{read_snapshot, write_snapshot};

use hapi_common::HapiResult;

/// Decode a response body in the given encoding.
pub fn decode(
    body: &[u8],
    layout: &FieldLayout,
    encoding: Encoding,
    strategy: DecodeStrategy,
) -> HapiResult<ColumnarResult> {
    match encoding {
        Encoding::Binary => decode_binary(body, layout),
        Encoding::Csv => decode_csv(body, layout, strategy),
    }
}
