//! Common types shared by the HAPI codec and client crates.

pub mod duration;
pub mod error;
pub mod metadata;
pub mod time;

pub use duration::IsoDuration;
pub use error::{HapiError, HapiResult};
pub use metadata::{
    parse_parameter_list, Capabilities, Catalog, CatalogEntry, DatasetMetadata,
    ParameterDescriptor, ParameterType, Provenance, Status,
};
pub use time::{format_string, format_time, parse_time, parse_times, reformat, TimeFormat};
