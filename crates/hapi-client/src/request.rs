//! HAPI endpoint URLs and deterministic request identities.

use hapi_codec::Encoding;
use hapi_common::parse_parameter_list;

/// Parameter lists longer than this are replaced by a checksum in cache keys.
const MAX_KEY_PARAMETERS: usize = 64;

/// One data request: what to fetch and over which time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    /// Server base URL without a trailing slash.
    pub server: String,
    pub dataset: String,
    /// Requested parameter names in request order; empty means all.
    pub parameters: Vec<String>,
    pub start: String,
    pub stop: String,
}

impl DataRequest {
    pub fn new(server: &str, dataset: &str, parameters: &str, start: &str, stop: &str) -> Self {
        Self {
            server: normalize_server(server),
            dataset: dataset.to_string(),
            parameters: parse_parameter_list(parameters),
            start: start.trim().to_string(),
            stop: stop.trim().to_string(),
        }
    }

    /// Normalized, comma-joined parameter list.
    pub fn parameter_string(&self) -> String {
        self.parameters.join(",")
    }

    /// The same request over a different time range.
    pub fn with_range(&self, start: &str, stop: &str) -> Self {
        Self {
            start: start.to_string(),
            stop: stop.to_string(),
            ..self.clone()
        }
    }

    /// `/data` URL, using HAPI 2.x query names for servers older than 3.0.
    pub fn data_url(&self, hapi_major: u32, encoding: Encoding) -> String {
        let (dataset, start, stop) = query_names(hapi_major);
        let mut url = format!(
            "{}/data?{}={}&{}={}&{}={}",
            self.server, dataset, self.dataset, start, self.start, stop, self.stop
        );
        if !self.parameters.is_empty() {
            url.push_str("&parameters=");
            url.push_str(&self.parameter_string());
        }
        if encoding != Encoding::Csv {
            url.push_str("&format=");
            url.push_str(encoding.as_str());
        }
        url
    }

    /// File stem identifying this request in the cache.
    ///
    /// A pure function of dataset, normalized parameter list and time range.
    pub fn cache_stem(&self) -> String {
        let parameters = self.parameter_string();
        let parameters = if parameters.len() > MAX_KEY_PARAMETERS {
            format!("{:08x}", crc32fast::hash(parameters.as_bytes()))
        } else {
            parameters
        };
        format!(
            "{}_{}_{}_{}",
            sanitize(&self.dataset),
            sanitize(&parameters),
            compact_time(&self.start),
            compact_time(&self.stop)
        )
    }
}

fn query_names(hapi_major: u32) -> (&'static str, &'static str, &'static str) {
    if hapi_major >= 3 {
        ("dataset", "start", "stop")
    } else {
        ("id", "time.min", "time.max")
    }
}

/// `/info` URL for a dataset.
pub fn info_url(server: &str, dataset: &str, hapi_major: u32) -> String {
    let (name, _, _) = query_names(hapi_major);
    format!("{}/info?{}={}", normalize_server(server), name, dataset)
}

pub fn catalog_url(server: &str) -> String {
    format!("{}/catalog", normalize_server(server))
}

pub fn capabilities_url(server: &str) -> String {
    format!("{}/capabilities", normalize_server(server))
}

pub(crate) fn normalize_server(server: &str) -> String {
    server.trim().trim_end_matches('/').to_string()
}

/// Directory name for a server: the URL without its scheme, with
/// path and query punctuation replaced by `_`.
pub fn server_dir(server: &str) -> String {
    let server = normalize_server(server);
    let without_scheme = server
        .split_once("://")
        .map_or(server.as_str(), |(_, rest)| rest);
    sanitize(without_scheme)
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '?' | '&' | '=' | '*' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

fn compact_time(t: &str) -> String {
    t.chars().filter(|c| *c != '-' && *c != ':').collect()
}
