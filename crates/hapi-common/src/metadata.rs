//! HAPI `/info`, `/catalog` and `/capabilities` documents.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::duration::IsoDuration;
use crate::error::{HapiError, HapiResult};

/// HAPI status codes below this value indicate success.
const STATUS_ERROR_THRESHOLD: u32 = 1400;
const STATUS_UNKNOWN_DATASET: u32 = 1406;
const STATUS_UNKNOWN_PARAMETER: u32 = 1407;

/// Response status block present in every HAPI JSON response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

impl Status {
    fn check(status: Option<&Status>, what: &str) -> HapiResult<()> {
        match status {
            Some(s) if s.code == STATUS_UNKNOWN_DATASET => {
                Err(HapiError::UnknownDataset(s.message.clone()))
            }
            Some(s) if s.code == STATUS_UNKNOWN_PARAMETER => {
                Err(HapiError::UnknownParameter(s.message.clone()))
            }
            Some(s) if s.code >= STATUS_ERROR_THRESHOLD => Err(HapiError::Metadata(format!(
                "{} returned status {}: {}",
                what, s.code, s.message
            ))),
            _ => Ok(()),
        }
    }

    /// The error a HAPI error body reports, if `body` is one.
    ///
    /// Servers send these with a 4xx/5xx HTTP status, so transports check
    /// failed responses with this before falling back to the HTTP status.
    pub fn error_in(body: &[u8], what: &str) -> Option<HapiError> {
        let doc: Value = serde_json::from_slice(body).ok()?;
        let status = Status::deserialize(doc.get("status")?).ok()?;
        Status::check(Some(&status), what).err()
    }
}

/// Parse a HAPI JSON response, checking its status before its shape so an
/// error response surfaces as the server's error rather than a missing field.
fn parse_document<T: DeserializeOwned>(body: &[u8], what: &str) -> HapiResult<T> {
    let doc: Value = serde_json::from_slice(body)
        .map_err(|e| HapiError::Metadata(format!("malformed {} response: {}", what, e)))?;
    let status = doc
        .get("status")
        .and_then(|s| Status::deserialize(s).ok());
    Status::check(status.as_ref(), what)?;
    serde_json::from_value(doc)
        .map_err(|e| HapiError::Metadata(format!("malformed {} response: {}", what, e)))
}

/// Primitive type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Double,
    Integer,
    String,
    Isotime,
}

impl ParameterType {
    pub fn is_text(&self) -> bool {
        matches!(self, ParameterType::String | ParameterType::Isotime)
    }
}

/// One entry of the `parameters` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Vec<usize>>,
    /// Byte length for string and isotime parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParameterDescriptor {
    /// Number of values per record; absent `size` means one.
    pub fn repeat_count(&self) -> usize {
        self.size.as_ref().map_or(1, |dims| dims.iter().product())
    }

    /// Declared shape, with `[1]` and absent collapsing to scalar (`[]`).
    pub fn shape(&self) -> Vec<usize> {
        match self.size.as_deref() {
            None | Some([1]) => Vec::new(),
            Some(dims) => dims.to_vec(),
        }
    }

    /// Fill value as a number, when the server declares one.
    pub fn fill_value(&self) -> Option<f64> {
        match self.fill.as_ref()? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

/// Request provenance recorded on metadata returned from a data request.
///
/// Serialized with the `x_` prefix used by HAPI clients so it can live
/// beside the server's own keys without colliding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    #[serde(rename = "x_server", skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(rename = "x_dataset", skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(rename = "x_parameters", skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(rename = "x_time.min", skip_serializing_if = "Option::is_none")]
    pub time_min: Option<String>,
    #[serde(rename = "x_time.max", skip_serializing_if = "Option::is_none")]
    pub time_max: Option<String>,
    #[serde(rename = "x_requestDate", skip_serializing_if = "Option::is_none")]
    pub request_date: Option<String>,
    #[serde(rename = "x_requestUrl", skip_serializing_if = "Option::is_none")]
    pub request_url: Option<String>,
    #[serde(rename = "x_format", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "x_cacheDir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    #[serde(rename = "x_metaFile", skip_serializing_if = "Option::is_none")]
    pub meta_file: Option<String>,
    #[serde(rename = "x_dataFile", skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
    #[serde(rename = "x_dataFileParsed", skip_serializing_if = "Option::is_none")]
    pub data_file_parsed: Option<String>,
    #[serde(rename = "x_chunks", skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(rename = "x_fromCache", skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(rename = "x_downloadTime", skip_serializing_if = "Option::is_none")]
    pub download_time: Option<f64>,
    #[serde(rename = "x_readTime", skip_serializing_if = "Option::is_none")]
    pub read_time: Option<f64>,
    #[serde(rename = "x_totalTime", skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
}

/// Dataset description returned by the `/info` endpoint.
///
/// Parameter 0 is always the time parameter; names are unique; the order
/// of `parameters` is the column order of every data response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(rename = "HAPI", default, skip_serializing_if = "Option::is_none")]
    pub hapi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(rename = "startDate", default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(rename = "stopDate", default, skip_serializing_if = "Option::is_none")]
    pub stop_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<String>,
    #[serde(rename = "sampleStartDate", default, skip_serializing_if = "Option::is_none")]
    pub sample_start_date: Option<String>,
    #[serde(rename = "sampleStopDate", default, skip_serializing_if = "Option::is_none")]
    pub sample_stop_date: Option<String>,
    // Provenance must precede `extra` so its x_ keys are consumed first.
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DatasetMetadata {
    /// Parse and validate an `/info` response body.
    pub fn from_json(body: &[u8]) -> HapiResult<Self> {
        let meta: DatasetMetadata = parse_document(body, "info")?;
        meta.validate()?;
        Ok(meta)
    }

    /// Check the structural invariants of the parameter list.
    pub fn validate(&self) -> HapiResult<()> {
        let time = self
            .parameters
            .first()
            .ok_or_else(|| HapiError::Metadata("dataset declares no parameters".to_string()))?;
        if time.kind != ParameterType::Isotime {
            return Err(HapiError::Metadata(format!(
                "first parameter '{}' is not of type isotime",
                time.name
            )));
        }

        let mut seen = HashSet::new();
        for p in &self.parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(HapiError::Metadata(format!("duplicate parameter '{}'", p.name)));
            }
            if p.length == Some(0) {
                return Err(HapiError::Metadata(format!("parameter '{}' has length 0", p.name)));
            }
            if p.size.as_ref().is_some_and(|s| s.is_empty() || s.contains(&0)) {
                return Err(HapiError::Metadata(format!(
                    "parameter '{}' has an invalid size",
                    p.name
                )));
            }
        }
        Ok(())
    }

    /// The mandatory leading time parameter.
    pub fn time_parameter(&self) -> &ParameterDescriptor {
        &self.parameters[0]
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Major HAPI version; servers that omit it are treated as 3.x.
    pub fn hapi_major(&self) -> u32 {
        major_version(self.hapi.as_deref())
    }

    /// Declared cadence, if any.
    pub fn cadence(&self) -> HapiResult<Option<IsoDuration>> {
        self.cadence.as_deref().map(str::parse).transpose()
    }

    /// Restrict the metadata to `requested` parameters, keeping time first.
    ///
    /// An empty request selects every parameter; naming only the time
    /// parameter selects just it. The time parameter may be named only in
    /// first position. Non-time names must exist and appear in
    /// dataset order; the dataset never reorders on the caller's behalf.
    pub fn subset<S: AsRef<str>>(&self, requested: &[S]) -> HapiResult<DatasetMetadata> {
        if requested.is_empty() {
            return Ok(self.clone());
        }
        let time_name = self.time_parameter().name.as_str();

        let mut names: Vec<&str> = requested.iter().map(AsRef::as_ref).collect();
        if let Some(pos) = names.iter().position(|n| *n == time_name) {
            if pos != 0 {
                return Err(HapiError::ParameterOrder(format!(
                    "time parameter '{}' must be first, found at position {}",
                    time_name, pos
                )));
            }
            names.remove(0);
        }

        if let Some(missing) = names.iter().find(|n| self.parameter(n).is_none()) {
            return Err(HapiError::UnknownParameter((*missing).to_string()));
        }

        let kept: Vec<ParameterDescriptor> = self.parameters[1..]
            .iter()
            .filter(|p| names.contains(&p.name.as_str()))
            .cloned()
            .collect();
        let kept_names: Vec<&str> = kept.iter().map(|p| p.name.as_str()).collect();

        if kept_names != names {
            return Err(HapiError::ParameterOrder(format!(
                "requested '{}' but dataset order is '{}'",
                names.join(","),
                kept_names.join(",")
            )));
        }

        let mut parameters = Vec::with_capacity(kept.len() + 1);
        parameters.push(self.time_parameter().clone());
        parameters.extend(kept);

        Ok(DatasetMetadata {
            parameters,
            ..self.clone()
        })
    }
}

fn major_version(version: Option<&str>) -> u32 {
    version
        .and_then(|v| v.split('.').next())
        .and_then(|major| major.trim().parse().ok())
        .unwrap_or(3)
}

/// Split a comma-separated parameter string, dropping blanks.
pub fn parse_parameter_list(parameters: &str) -> Vec<String> {
    parameters
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// One dataset listed by the `/catalog` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Response of the `/catalog` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "HAPI", default, skip_serializing_if = "Option::is_none")]
    pub hapi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    pub catalog: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_json(body: &[u8]) -> HapiResult<Self> {
        parse_document(body, "catalog")
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.catalog.iter().any(|e| e.id == dataset)
    }
}

/// Response of the `/capabilities` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "HAPI", default, skip_serializing_if = "Option::is_none")]
    pub hapi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(rename = "outputFormats", default)]
    pub output_formats: Vec<String>,
}

impl Capabilities {
    pub fn from_json(body: &[u8]) -> HapiResult<Self> {
        parse_document(body, "capabilities")
    }

    /// Major HAPI version the server speaks.
    pub fn hapi_major(&self) -> u32 {
        major_version(self.hapi.as_deref())
    }

    pub fn supports(&self, format: &str) -> bool {
        self.output_formats.iter().any(|f| f == format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = r#"{
        "HAPI": "3.1",
        "status": {"code": 1200, "message": "OK"},
        "parameters": [
            {"name": "Time", "type": "isotime", "units": "UTC", "fill": null, "length": 24},
            {"name": "A", "type": "double", "units": "nT", "fill": "-1e31"},
            {"name": "B", "type": "integer", "units": null, "fill": "-999", "size": [1]},
            {"name": "C", "type": "double", "units": ["nT", "nT", "nT"], "fill": null, "size": [3]}
        ],
        "startDate": "1970-01-01Z",
        "stopDate": "2016-12-31Z",
        "cadence": "PT1S",
        "resourceURL": "http://example.org"
    }"#;

    fn info() -> DatasetMetadata {
        DatasetMetadata::from_json(INFO.as_bytes()).unwrap()
    }

    #[test]
    fn test_status_error_in_body() {
        let body = br#"{"HAPI":"3.1","status":{"code":1406,"message":"unknown dataset id x"}}"#;
        assert!(matches!(
            Status::error_in(body, "info"),
            Some(HapiError::UnknownDataset(_))
        ));
        let ok = br#"{"HAPI":"3.1","status":{"code":1200,"message":"OK"}}"#;
        assert!(Status::error_in(ok, "info").is_none());
        assert!(Status::error_in(b"<html>Not Found</html>", "info").is_none());
    }

    #[test]
    fn test_parse_info() {
        let meta = info();
        assert_eq!(meta.parameter_names(), vec!["Time", "A", "B", "C"]);
        assert_eq!(meta.hapi_major(), 3);
        assert_eq!(meta.parameters[3].repeat_count(), 3);
        assert_eq!(meta.parameters[2].shape(), Vec::<usize>::new());
        assert_eq!(meta.parameters[1].fill_value(), Some(-1e31));
        assert!(meta.extra.contains_key("resourceURL"));
        assert_eq!(meta.provenance, Provenance::default());
    }

    #[test]
    fn test_provenance_roundtrip_keeps_extra_separate() {
        let mut meta = info();
        meta.provenance.server = Some("http://server/hapi".to_string());
        meta.provenance.time_min = Some("1970-01-01Z".to_string());

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["x_server"], "http://server/hapi");
        assert_eq!(json["x_time.min"], "1970-01-01Z");

        let back: DatasetMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.provenance, meta.provenance);
        assert!(!back.extra.contains_key("x_server"));
    }

    #[test]
    fn test_info_error_status() {
        let body = br#"{"HAPI":"3.0","status":{"code":1406,"message":"unknown dataset id"}}"#;
        assert!(matches!(DatasetMetadata::from_json(body), Err(HapiError::UnknownDataset(_))));

        let body = br#"{"HAPI":"3.0","status":{"code":1500,"message":"internal error"},"parameters":[]}"#;
        assert!(matches!(DatasetMetadata::from_json(body), Err(HapiError::Metadata(_))));
    }

    #[test]
    fn test_validate_rejects_bad_layouts() {
        let mut meta = info();
        meta.parameters.swap(0, 1);
        assert!(meta.validate().is_err());

        let mut meta = info();
        meta.parameters[2].name = "A".to_string();
        assert!(meta.validate().is_err());

        let mut meta = info();
        meta.parameters[3].size = Some(vec![3, 0]);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_subset_in_order() {
        let sub = info().subset(&["A", "B"]).unwrap();
        assert_eq!(sub.parameter_names(), vec!["Time", "A", "B"]);
    }

    #[test]
    fn test_subset_wrong_order_fails() {
        let err = info().subset(&["B", "A"]).unwrap_err();
        assert!(matches!(err, HapiError::ParameterOrder(_)));
    }

    #[test]
    fn test_subset_unknown_parameter() {
        let err = info().subset(&["A", "Z"]).unwrap_err();
        assert!(matches!(err, HapiError::UnknownParameter(ref n) if n == "Z"));
    }

    #[test]
    fn test_subset_time_handling() {
        let meta = info();
        assert_eq!(meta.subset(&["Time", "C"]).unwrap().parameter_names(), vec!["Time", "C"]);
        assert_eq!(meta.subset(&["Time"]).unwrap().parameter_names(), vec!["Time"]);
        assert!(matches!(
            meta.subset(&["C", "Time"]),
            Err(HapiError::ParameterOrder(_))
        ));
        let none: [&str; 0] = [];
        assert_eq!(meta.subset(&none).unwrap(), meta);
    }

    #[test]
    fn test_parse_parameter_list() {
        assert_eq!(parse_parameter_list(" A, B ,,C"), vec!["A", "B", "C"]);
        assert!(parse_parameter_list("").is_empty());
    }

    #[test]
    fn test_capabilities_and_catalog() {
        let caps = Capabilities::from_json(
            br#"{"HAPI":"3.0","status":{"code":1200,"message":"OK"},"outputFormats":["csv","binary"]}"#,
        )
        .unwrap();
        assert!(caps.supports("binary"));
        assert_eq!(caps.hapi_major(), 3);
        assert!(!caps.supports("json"));

        let catalog = Catalog::from_json(
            br#"{"HAPI":"3.0","status":{"code":1200,"message":"OK"},"catalog":[{"id":"ds1"},{"id":"ds2","title":"Two"}]}"#,
        )
        .unwrap();
        assert!(catalog.contains("ds2"));
        assert!(!catalog.contains("ds3"));
    }
}
