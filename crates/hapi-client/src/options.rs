//! Per-request options.
//!
//! Options form a closed set: unknown keys are rejected at load time and
//! inconsistent combinations are rejected by [`RequestOptions::validate`]
//! before any request is made.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hapi_codec::Encoding;
use hapi_common::{HapiError, HapiResult};

use crate::chunking::ChunkUnit;

/// Environment variable overriding the default cache directory.
pub const CACHE_DIR_ENV: &str = "HAPI_DATA";

/// Where a data response is held between download and decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transfer {
    /// Keep the response body in memory.
    #[default]
    Memory,
    /// Stream the response to the raw cache file and decode from disk.
    File,
}

/// Chunk size requested via `dt_chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSize {
    /// Pick the unit from the dataset cadence.
    #[serde(rename = "infer")]
    Infer,
    #[serde(rename = "PT1H")]
    Hour,
    #[serde(rename = "P1D")]
    Day,
    #[serde(rename = "P1M")]
    Month,
    #[serde(rename = "P1Y")]
    Year,
}

impl ChunkSize {
    /// The explicit unit, or `None` when it is to be inferred.
    pub fn unit(&self) -> Option<ChunkUnit> {
        match self {
            ChunkSize::Infer => None,
            ChunkSize::Hour => Some(ChunkUnit::Hour),
            ChunkSize::Day => Some(ChunkUnit::Day),
            ChunkSize::Month => Some(ChunkUnit::Month),
            ChunkSize::Year => Some(ChunkUnit::Year),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkSize::Infer => "infer",
            ChunkSize::Hour => "PT1H",
            ChunkSize::Day => "P1D",
            ChunkSize::Month => "P1M",
            ChunkSize::Year => "P1Y",
        }
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkSize {
    type Err = HapiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infer" => Ok(ChunkSize::Infer),
            "PT1H" => Ok(ChunkSize::Hour),
            "P1D" => Ok(ChunkSize::Day),
            "P1M" => Ok(ChunkSize::Month),
            "P1Y" => Ok(ChunkSize::Year),
            other => Err(HapiError::invalid_option(
                "dt_chunk",
                format!("'{}' is not one of infer, PT1H, P1D, P1M, P1Y", other),
            )),
        }
    }
}

/// Options controlling a single `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestOptions {
    /// Root of the on-disk cache
    pub cache_dir: PathBuf,
    /// Serve from the cache when a complete entry exists
    pub use_cache: bool,
    /// Write responses and decoded results to the cache
    pub write_cache: bool,
    /// Preferred wire encoding; binary falls back to CSV if unsupported
    pub format: Encoding,
    pub transfer: Transfer,
    /// Split the request into this many equal sub-intervals
    pub n_chunks: Option<usize>,
    /// Split the request on hour/day/month/year boundaries
    pub dt_chunk: Option<ChunkSize>,
    /// Fetch chunks concurrently
    pub parallel: bool,
    /// Maximum chunks in flight when `parallel` is set
    pub n_parallel: usize,
    /// Fraction of one inferred chunk unit below which no chunking happens
    pub chunk_threshold: f64,
    /// Records a cadence window must return before its estimate is trusted
    pub cadence_min_records: usize,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            use_cache: false,
            write_cache: true,
            format: Encoding::Binary,
            transfer: Transfer::Memory,
            n_chunks: None,
            dt_chunk: None,
            parallel: false,
            n_parallel: 5,
            chunk_threshold: 0.5,
            cadence_min_records: 10,
        }
    }
}

/// `$HAPI_DATA` if set, otherwise `hapi-data` under the system temp dir.
pub fn default_cache_dir() -> PathBuf {
    match std::env::var_os(CACHE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir().join("hapi-data"),
    }
}

impl RequestOptions {
    /// Parse options from YAML and validate them.
    pub fn from_yaml_str(content: &str) -> HapiResult<Self> {
        let options: RequestOptions = serde_yaml::from_str(content)
            .map_err(|e| HapiError::invalid_option("options", e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a YAML file and validate them.
    pub fn from_yaml_file(path: &Path) -> HapiResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let options = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), "Loaded request options");
        Ok(options)
    }

    /// Reject inconsistent or out-of-range options.
    pub fn validate(&self) -> HapiResult<()> {
        if self.n_parallel == 0 {
            return Err(HapiError::invalid_option("n_parallel", "must be at least 1"));
        }
        if self.n_chunks == Some(0) {
            return Err(HapiError::invalid_option("n_chunks", "must be at least 1"));
        }
        if self.n_chunks.is_some() && self.dt_chunk.is_some() {
            return Err(HapiError::invalid_option(
                "n_chunks",
                "cannot be combined with dt_chunk",
            ));
        }
        if !(self.chunk_threshold > 0.0 && self.chunk_threshold <= 1.0) {
            return Err(HapiError::invalid_option(
                "chunk_threshold",
                format!("{} is outside (0, 1]", self.chunk_threshold),
            ));
        }
        if self.cadence_min_records < 2 {
            return Err(HapiError::invalid_option(
                "cadence_min_records",
                "at least two records are needed to measure a cadence",
            ));
        }
        Ok(())
    }

    /// Whether any form of chunking was requested.
    pub fn chunking_requested(&self) -> bool {
        self.n_chunks.is_some() || self.dt_chunk.is_some()
    }
}
