//! Persisted on-disk records
//!
//! Two JSON files live in every partition's working directory:
//! `params.json`, the audit/resume record of the configured parameters, and
//! `run_log.json`, the durable record of one orchestration attempt.

use crate::recording::RecordingDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// File name of the persisted parameter record.
pub const PARAMS_FILE: &str = "params.json";

/// File name of the persisted run log.
pub const RUN_LOG_FILE: &str = "run_log.json";

/// Contents of `params.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsRecord {
    pub sorter_name: String,
    pub sorter_params: BTreeMap<String, Value>,
    pub recording: RecordingDescriptor,
}

/// Contents of `run_log.json`: one orchestration attempt for one partition.
/// Overwritten, not appended, on re-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub sorter_name: String,
    pub sorter_version: String,
    pub datetime: chrono::DateTime<chrono::Utc>,
    /// Wall-clock duration of the dispatch phase in seconds. Absent when the
    /// call failed before completing (or a failure was suppressed).
    pub run_time: Option<f64>,
    /// Lines captured from the external process's log file.
    pub runtime_trace: Vec<String>,
    pub error: bool,
    pub error_trace: Option<String>,
}
