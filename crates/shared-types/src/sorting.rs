//! Sorting result model
//!
//! What comes back from an external sorter: a set of units, each with a
//! spike train in sample indices and free-form string properties. Multiple
//! per-partition results are combined with [`SortingResult::merge`].

use crate::recording::Epoch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property key holding a unit's id in its originating partition.
pub const SOURCE_UNIT_ID_PROPERTY: &str = "source_unit_id";

/// One sorted unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortedUnit {
    pub unit_id: u32,
    /// Spike times as sample indices, ascending.
    pub spike_train: Vec<u64>,
    pub properties: BTreeMap<String, String>,
}

impl SortedUnit {
    pub fn new(unit_id: u32, spike_train: Vec<u64>) -> Self {
        Self {
            unit_id,
            spike_train,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// The outcome of one sorting run (or a merge of several).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortingResult {
    pub units: Vec<SortedUnit>,
    pub sampling_frequency: Option<f32>,
    pub epochs: Vec<Epoch>,
    pub start_time: Option<f64>,
}

impl SortingResult {
    pub fn new(units: Vec<SortedUnit>) -> Self {
        Self {
            units,
            sampling_frequency: None,
            epochs: Vec::new(),
            start_time: None,
        }
    }

    pub fn unit_ids(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.unit_id).collect()
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Stamp a property onto every unit.
    pub fn set_property_on_all_units(&mut self, key: &str, value: &str) {
        for unit in &mut self.units {
            unit.properties.insert(key.to_string(), value.to_string());
        }
    }

    /// Merge per-partition results into one, in the order given.
    ///
    /// Unit ids are renumbered sequentially so the merged result never
    /// carries colliding ids; every unit keeps its original id in the
    /// [`SOURCE_UNIT_ID_PROPERTY`] property. Recording-level metadata
    /// (sampling frequency, epochs, start time) is left for the caller to
    /// stamp from the authoritative partition.
    pub fn merge(parts: Vec<SortingResult>) -> SortingResult {
        let mut units = Vec::new();
        let mut next_id = 0u32;
        for part in parts {
            for mut unit in part.units {
                unit.properties.insert(
                    SOURCE_UNIT_ID_PROPERTY.to_string(),
                    unit.unit_id.to_string(),
                );
                unit.unit_id = next_id;
                next_id += 1;
                units.push(unit);
            }
        }
        SortingResult::new(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_renumbers_units_and_keeps_source_ids() {
        let a = SortingResult::new(vec![SortedUnit::new(0, vec![1]), SortedUnit::new(1, vec![2])]);
        let b = SortingResult::new(vec![SortedUnit::new(0, vec![3])]);

        let merged = SortingResult::merge(vec![a, b]);
        assert_eq!(merged.unit_ids(), vec![0, 1, 2]);
        assert_eq!(merged.units[2].property(SOURCE_UNIT_ID_PROPERTY), Some("0"));
        assert_eq!(merged.units[2].spike_train, vec![3]);
    }

    #[test]
    fn properties_are_stamped_on_every_unit() {
        let mut result =
            SortingResult::new(vec![SortedUnit::new(0, vec![]), SortedUnit::new(1, vec![])]);
        result.set_property_on_all_units("group", "tetrode3");
        assert!(result.units.iter().all(|u| u.property("group") == Some("tetrode3")));
    }
}
