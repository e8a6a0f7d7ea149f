//! The `firings.json` export contract
//!
//! Every generated launch script ends by writing a `firings.json` into the
//! working directory: a list of units, each with its spike train in sample
//! indices and an optional curation label. This module reads that file back
//! into a [`SortingResult`]; the tools' native result formats are never
//! decoded here.

use serde::Deserialize;
use serde_json::Value;
use spikerun_shared_types::{PARAMS_FILE, ParamsRecord, SortedUnit, SortingResult};
use spikerun_sorter_abstraction::{Result, SorterError};
use std::path::Path;

pub const FIRINGS_FILE: &str = "firings.json";

/// Curation label marking a unit worth keeping.
pub const GOOD_LABEL: &str = "good";

#[derive(Debug, Deserialize)]
struct FiringsFile {
    units: Vec<FiringsUnit>,
    #[serde(default)]
    sampling_frequency: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct FiringsUnit {
    unit_id: u32,
    spike_train: Vec<u64>,
    #[serde(default)]
    label: Option<String>,
}

/// Read a working directory's `firings.json`.
///
/// With `keep_good_only` every unit not labelled `"good"` is dropped;
/// surviving units keep their label as a `label` property.
pub fn read_firings(output_dir: &Path, keep_good_only: bool) -> Result<SortingResult> {
    let path = output_dir.join(FIRINGS_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        SorterError::ResultLoad(format!("no firings export in {}: {e}", output_dir.display()))
    })?;
    let file: FiringsFile = serde_json::from_str(&raw)
        .map_err(|e| SorterError::ResultLoad(format!("corrupt firings export: {e}")))?;

    let units = file
        .units
        .into_iter()
        .filter(|u| !keep_good_only || u.label.as_deref() == Some(GOOD_LABEL))
        .map(|u| {
            let mut unit = SortedUnit::new(u.unit_id, u.spike_train);
            if let Some(label) = u.label {
                unit.properties.insert("label".to_string(), label);
            }
            unit
        })
        .collect();

    let mut result = SortingResult::new(units);
    result.sampling_frequency = file.sampling_frequency;
    Ok(result)
}

/// The persisted `keep_good_only` option of this working directory, when the
/// orchestrator dumped one. Absent or unreadable params default to keeping
/// everything, which matches running an adapter standalone.
pub fn keep_good_only_from_params(output_dir: &Path) -> bool {
    std::fs::read_to_string(output_dir.join(PARAMS_FILE))
        .ok()
        .and_then(|raw| serde_json::from_str::<ParamsRecord>(&raw).ok())
        .and_then(|record| {
            record
                .sorter_params
                .get("keep_good_only")
                .and_then(Value::as_bool)
        })
        .unwrap_or(false)
}
