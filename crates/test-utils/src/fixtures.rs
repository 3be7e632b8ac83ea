//! Canned HAPI JSON documents.

use serde_json::{json, Value};

use crate::generators::DATASETS;

/// HAPI version served by the default fake server.
pub const HAPI_VERSION: &str = "3.1";

/// HAPI version of the legacy fake server.
pub const LEGACY_HAPI_VERSION: &str = "2.0";

/// `/capabilities` response listing the given output formats.
pub fn capabilities(hapi_version: &str, formats: &[&str]) -> Value {
    json!({
        "HAPI": hapi_version,
        "status": {"code": 1200, "message": "OK"},
        "outputFormats": formats,
    })
}

/// `/catalog` response listing every synthetic dataset.
pub fn catalog(hapi_version: &str) -> Value {
    let entries: Vec<Value> = DATASETS
        .iter()
        .map(|d| json!({"id": d.id, "title": format!("Synthetic dataset {}", d.id)}))
        .collect();
    json!({
        "HAPI": hapi_version,
        "status": {"code": 1200, "message": "OK"},
        "catalog": entries,
    })
}

/// Error response for an unknown dataset.
pub fn unknown_dataset(hapi_version: &str, id: &str) -> Value {
    json!({
        "HAPI": hapi_version,
        "status": {"code": 1406, "message": format!("Bad request - unknown dataset id {}", id)},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lists_all_datasets() {
        let cat = catalog(HAPI_VERSION);
        assert_eq!(cat["catalog"].as_array().unwrap().len(), DATASETS.len());
        assert_eq!(cat["catalog"][0]["id"], "dataset1");
    }

    #[test]
    fn test_capabilities_formats() {
        let caps = capabilities(LEGACY_HAPI_VERSION, &["csv"]);
        assert_eq!(caps["outputFormats"], json!(["csv"]));
    }
}
