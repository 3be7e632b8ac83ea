//! Client for HAPI (Heliophysics Application Programmer's Interface) servers.
//!
//! [`HapiClient::fetch`] requests a parameter subset of a dataset over a
//! time range and returns it as a [`ColumnarResult`] together with the
//! subset's [`DatasetMetadata`]. Responses are cached on disk, long ranges
//! can be split into chunks fetched sequentially or concurrently, and the
//! wire encoding is binary whenever the server offers it.
//!
//! ```ignore
//! use hapi_client::{HapiClient, HttpTransportConfig, RequestOptions};
//!
//! let client = HapiClient::http(HttpTransportConfig::default())?;
//! let opts = RequestOptions { use_cache: true, ..Default::default() };
//! let (data, meta) = client
//!     .fetch(server, "dataset1", "scalar,vector", "1970-01-01Z", "1970-01-02Z", &opts)
//!     .await?;
//! ```

pub mod cache;
pub mod chunking;
pub mod client;
pub mod options;
pub mod request;
pub mod transport;

pub use cache::{CacheLayout, RequestPaths};
pub use chunking::{ChunkInterval, ChunkUnit};
pub use client::HapiClient;
pub use options::{ChunkSize, RequestOptions, Transfer};
pub use request::DataRequest;
pub use transport::{HttpTransport, HttpTransportConfig, Transport};

pub use hapi_codec::{Column, ColumnValues, ColumnarResult, Encoding};
pub use hapi_common::{DatasetMetadata, HapiError, HapiResult};
