//! Synthetic HAPI datasets with predictable, verifiable records.
//!
//! Every record is a pure function of its index `k`, the number of cadence
//! steps since 1970-01-01T00:00:00Z. That makes any two responses for
//! overlapping time ranges agree exactly, which is what the chunking and
//! caching tests rely on.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

/// Byte length of the generated time strings (`1970-01-01T00:00:00.000Z`).
pub const TIME_LENGTH: usize = 24;

/// Byte length of the generated `label` strings.
pub const LABEL_LENGTH: usize = 3;

/// Parameters of every synthetic dataset, in declaration order.
pub const PARAMETERS: [&str; 5] = ["Time", "scalar", "scalarint", "vector", "label"];

/// A synthetic dataset definition.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticDataset {
    pub id: &'static str,
    /// Record spacing in seconds.
    pub cadence_secs: i64,
    /// Whether `/info` declares `cadence`.
    pub declare_cadence: bool,
    /// Whether `/info` declares `length` for string and isotime parameters.
    pub declare_lengths: bool,
}

/// One-second cadence, fully described.
pub const DATASET1: SyntheticDataset = SyntheticDataset {
    id: "dataset1",
    cadence_secs: 1,
    declare_cadence: true,
    declare_lengths: true,
};

/// One-minute cadence, fully described.
pub const MINUTELY: SyntheticDataset = SyntheticDataset {
    id: "minutely",
    cadence_secs: 60,
    declare_cadence: true,
    declare_lengths: true,
};

/// One-minute cadence with no declared `cadence`.
pub const NO_CADENCE: SyntheticDataset = SyntheticDataset {
    id: "nocadence",
    cadence_secs: 60,
    declare_cadence: false,
    declare_lengths: true,
};

/// One-minute cadence with no declared string lengths.
pub const NO_LENGTHS: SyntheticDataset = SyntheticDataset {
    id: "nolengths",
    cadence_secs: 60,
    declare_cadence: true,
    declare_lengths: false,
};

/// All synthetic datasets.
pub const DATASETS: [SyntheticDataset; 4] = [DATASET1, MINUTELY, NO_CADENCE, NO_LENGTHS];

/// Look up a synthetic dataset by id.
pub fn dataset(id: &str) -> Option<SyntheticDataset> {
    DATASETS.iter().copied().find(|d| d.id == id)
}

/// Time of record `k` at the given cadence.
pub fn record_time(k: i64, cadence_secs: i64) -> String {
    let t = Utc.timestamp_opt(0, 0).unwrap() + Duration::seconds(k * cadence_secs);
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Value of `scalar` for record `k`.
pub fn scalar_value(k: i64) -> f64 {
    (k % 1000) as f64 / 7.0
}

/// Value of `scalarint` for record `k`.
pub fn int_value(k: i64) -> i32 {
    (k % 100_000) as i32 - 50_000
}

/// Element `j` of `vector` for record `k`.
pub fn vector_value(k: i64, j: usize) -> f64 {
    ((k % 1000) as f64 + j as f64) * 0.1
}

/// Value of `label` for record `k`; always exactly [`LABEL_LENGTH`] bytes.
pub fn label_value(k: i64) -> String {
    format!("{:03}", k % 1000)
}

impl SyntheticDataset {
    /// The `/info` document for this dataset.
    pub fn info(&self, hapi_version: &str) -> Value {
        let mut time = json!({"name": "Time", "type": "isotime", "units": "UTC", "fill": null});
        let mut label = json!({"name": "label", "type": "string", "units": null, "fill": null});
        if self.declare_lengths {
            time["length"] = json!(TIME_LENGTH);
            label["length"] = json!(LABEL_LENGTH);
        }

        let mut info = json!({
            "HAPI": hapi_version,
            "status": {"code": 1200, "message": "OK"},
            "startDate": "1970-01-01T00:00:00Z",
            "stopDate": "1971-01-01T00:00:00Z",
            "parameters": [
                time,
                {"name": "scalar", "type": "double", "units": "nT", "fill": "-1e31"},
                {"name": "scalarint", "type": "integer", "units": null, "fill": "-99999"},
                {"name": "vector", "type": "double", "units": "nT", "fill": "-1e31", "size": [3]},
                label,
            ],
        });
        if self.declare_cadence {
            info["cadence"] = json!(format!("PT{}S", self.cadence_secs));
        }
        info
    }

    /// Record indices with `start <= t < stop`.
    pub fn record_indices(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> std::ops::Range<i64> {
        let first = ceil_div(start.timestamp(), self.cadence_secs);
        let end = ceil_div(stop.timestamp(), self.cadence_secs);
        first..end.max(first)
    }

    /// CSV body for the requested parameters (empty selects all).
    pub fn csv(&self, parameters: &[&str], start: DateTime<Utc>, stop: DateTime<Utc>) -> Vec<u8> {
        let selected = selection(parameters);
        let mut out = String::new();
        for k in self.record_indices(start, stop) {
            let mut cells = vec![record_time(k, self.cadence_secs)];
            for name in &selected {
                match *name {
                    "scalar" => cells.push(format!("{}", scalar_value(k))),
                    "scalarint" => cells.push(int_value(k).to_string()),
                    "vector" => cells.extend((0..3).map(|j| format!("{}", vector_value(k, j)))),
                    "label" => cells.push(label_value(k)),
                    _ => {}
                }
            }
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Binary body for the requested parameters (empty selects all).
    pub fn binary(&self, parameters: &[&str], start: DateTime<Utc>, stop: DateTime<Utc>) -> Vec<u8> {
        let selected = selection(parameters);
        let mut out = Vec::new();
        for k in self.record_indices(start, stop) {
            out.extend_from_slice(record_time(k, self.cadence_secs).as_bytes());
            for name in &selected {
                match *name {
                    "scalar" => out.extend_from_slice(&scalar_value(k).to_le_bytes()),
                    "scalarint" => out.extend_from_slice(&int_value(k).to_le_bytes()),
                    "vector" => {
                        for j in 0..3 {
                            out.extend_from_slice(&vector_value(k, j).to_le_bytes());
                        }
                    }
                    "label" => out.extend_from_slice(label_value(k).as_bytes()),
                    _ => {}
                }
            }
        }
        out
    }
}

/// Non-time parameters to emit, in dataset order.
fn selection(parameters: &[&str]) -> Vec<&'static str> {
    PARAMETERS[1..]
        .iter()
        .copied()
        .filter(|p| parameters.is_empty() || parameters.contains(p))
        .collect()
}

fn ceil_div(a: i64, b: i64) -> i64 {
    a.div_euclid(b) + i64::from(a.rem_euclid(b) != 0)
}
