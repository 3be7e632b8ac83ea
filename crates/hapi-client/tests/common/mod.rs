//! In-process HAPI server for hapi-client integration tests.
//!
//! Serves `/capabilities`, `/catalog`, `/info` and `/data` for the synthetic
//! datasets in `test_utils`, records every URL it is asked for, and can be
//! told to fail requests whose URL contains a given substring, either
//! outright or after part of a file download was written.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use hapi_client::{HapiClient, RequestOptions, Transport};
use hapi_common::{parse_parameter_list, parse_time, HapiError, HapiResult};
use test_utils::{
    capabilities, catalog, dataset, unknown_dataset, HAPI_VERSION, LEGACY_HAPI_VERSION,
};

pub const SERVER: &str = "http://hapi.test/hapi";

pub struct FakeServer {
    hapi_version: &'static str,
    formats: Vec<&'static str>,
    fail_matching: Option<String>,
    truncate_matching: Option<String>,
    requests: Mutex<Vec<String>>,
}

impl FakeServer {
    /// A current server offering CSV and binary.
    pub fn new() -> Self {
        Self {
            hapi_version: HAPI_VERSION,
            formats: vec!["csv", "binary"],
            fail_matching: None,
            truncate_matching: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A HAPI 2.0 server offering CSV only.
    pub fn legacy() -> Self {
        Self {
            hapi_version: LEGACY_HAPI_VERSION,
            formats: vec!["csv"],
            ..Self::new()
        }
    }

    /// Fail every request whose URL contains `pattern`.
    pub fn failing(mut self, pattern: &str) -> Self {
        self.fail_matching = Some(pattern.to_string());
        self
    }

    /// Cut file downloads whose URL contains `pattern` short with an error.
    pub fn truncating(mut self, pattern: &str) -> Self {
        self.truncate_matching = Some(pattern.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn data_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|url| url.contains("/data?"))
            .collect()
    }

    fn respond(&self, url: &str) -> HapiResult<Vec<u8>> {
        let rest = url
            .strip_prefix(SERVER)
            .ok_or_else(|| HapiError::transport(url, "unknown host"))?;
        let (endpoint, query) = rest.split_once('?').unwrap_or((rest, ""));
        let query: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let param = |v3: &str, v2: &str| {
            query
                .get(v3)
                .or_else(|| query.get(v2))
                .copied()
                .ok_or_else(|| HapiError::transport(url, format!("missing {}", v3)))
        };

        match endpoint {
            "/capabilities" => json(capabilities(self.hapi_version, &self.formats)),
            "/catalog" => json(catalog(self.hapi_version)),
            "/info" => {
                let id = param("dataset", "id")?;
                match dataset(id) {
                    Some(d) => json(d.info(self.hapi_version)),
                    None => json(unknown_dataset(self.hapi_version, id)),
                }
            }
            "/data" => {
                let id = param("dataset", "id")?;
                let d = dataset(id).ok_or_else(|| HapiError::transport(url, "HTTP 404"))?;
                let start = parse_time(param("start", "time.min")?)?;
                let stop = parse_time(param("stop", "time.max")?)?;
                let parameters = parse_parameter_list(query.get("parameters").unwrap_or(&""));
                let parameters: Vec<&str> = parameters.iter().map(String::as_str).collect();
                match query.get("format") {
                    Some(&"binary") => Ok(d.binary(&parameters, start, stop)),
                    _ => Ok(d.csv(&parameters, start, stop)),
                }
            }
            _ => Err(HapiError::transport(url, "HTTP 404")),
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn get_bytes(&self, url: &str) -> HapiResult<Bytes> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(pattern) = &self.fail_matching {
            if url.contains(pattern.as_str()) {
                return Err(HapiError::transport(url, "HTTP 503"));
            }
        }
        self.respond(url).map(Bytes::from)
    }

    async fn download_to(&self, url: &str, path: &Path) -> HapiResult<u64> {
        let body = self.get_bytes(url).await?;
        match &self.truncate_matching {
            Some(pattern) if url.contains(pattern.as_str()) => {
                std::fs::write(path, &body[..body.len() / 2])?;
                Err(HapiError::transport(url, "error reading body: connection reset"))
            }
            _ => {
                std::fs::write(path, &body)?;
                Ok(body.len() as u64)
            }
        }
    }
}

fn json(value: Value) -> HapiResult<Vec<u8>> {
    Ok(serde_json::to_vec(&value)?)
}

/// A client over `server`, which stays inspectable through the returned handle.
pub fn client(server: FakeServer) -> (HapiClient, Arc<FakeServer>) {
    let server = Arc::new(server);
    (HapiClient::new(server.clone()), server)
}

/// Options caching under `dir`.
pub fn options(dir: &Path) -> RequestOptions {
    RequestOptions {
        cache_dir: dir.to_path_buf(),
        ..Default::default()
    }
}
