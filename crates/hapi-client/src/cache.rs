//! On-disk cache of HAPI responses.
//!
//! ```text
//! <root>/<server-dir>/capabilities.json
//! <root>/<server-dir>/catalog.json
//! <root>/<server-dir>/<dataset>.json              full /info response
//! <root>/<server-dir>/<stem>.csv | <stem>.bin     raw data response
//! <root>/<server-dir>/<stem>.columns              decoded snapshot
//! <root>/<server-dir>/<stem>.json                 subset metadata + provenance
//! ```
//!
//! Entries are never invalidated. Writes go to a temporary file first and
//! are renamed into place, so readers never see a partial file; two
//! writers of the same key race and the last rename wins.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use hapi_codec::Encoding;
use hapi_common::HapiResult;

use crate::request::{server_dir, DataRequest};

/// Paths of the artifacts stored for one data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPaths {
    pub raw: PathBuf,
    pub snapshot: PathBuf,
    pub meta: PathBuf,
}

/// Path scheme of a cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_root(&self, server: &str) -> PathBuf {
        self.root.join(server_dir(server))
    }

    pub fn capabilities_path(&self, server: &str) -> PathBuf {
        self.server_root(server).join("capabilities.json")
    }

    pub fn catalog_path(&self, server: &str) -> PathBuf {
        self.server_root(server).join("catalog.json")
    }

    pub fn info_path(&self, server: &str, dataset: &str) -> PathBuf {
        self.server_root(server)
            .join(format!("{}.json", dataset.replace(['/', '\\'], "_")))
    }

    pub fn request_paths(&self, request: &DataRequest, encoding: Encoding) -> RequestPaths {
        let dir = self.server_root(&request.server);
        let stem = request.cache_stem();
        RequestPaths {
            raw: dir.join(format!("{}.{}", stem, encoding.extension())),
            snapshot: dir.join(format!("{}.columns", stem)),
            meta: dir.join(format!("{}.json", stem)),
        }
    }
}

/// Read a cache file, or `None` if it does not exist.
pub async fn read_if_present(path: &Path) -> HapiResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => {
            debug!(path = %path.display(), bytes = bytes.len(), "Cache hit");
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Cache miss");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a cache file via a temporary sibling and rename.
pub async fn write_file(path: &Path, bytes: &[u8]) -> HapiResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(path);
    fs::write(&partial, bytes).await?;
    fs::rename(&partial, path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote cache file");
    Ok(())
}

/// Temporary sibling used while a file is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
