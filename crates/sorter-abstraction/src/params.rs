//! Sorter parameter schema and values
//!
//! Every adapter declares a fixed schema: the allowed option names, each
//! with a default value and an optional human description. Overrides are
//! validated against the schema at configuration time; unknown keys are
//! rejected before anything runs, and the rejection lists every bad key.

use crate::error::{Result, SorterError};
use serde_json::Value;
use std::collections::BTreeMap;

/// One schema entry: default value plus description.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub default: Value,
    pub description: Option<String>,
}

/// The fixed option schema one sorter type accepts.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    entries: BTreeMap<String, ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, default: impl Into<Value>, description: &str) -> Self {
        self.entries.insert(
            key.to_string(),
            ParamSpec {
                default: default.into(),
                description: Some(description.to_string()),
            },
        );
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Per-key descriptions, for reporting.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(k, spec)| spec.description.clone().map(|d| (k.clone(), d)))
            .collect()
    }

    /// A parameter set holding every default.
    pub fn defaults(&self) -> SorterParams {
        SorterParams {
            values: self
                .entries
                .iter()
                .map(|(k, spec)| (k.clone(), spec.default.clone()))
                .collect(),
        }
    }
}

/// A validated parameter set for one sorter type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SorterParams {
    values: BTreeMap<String, Value>,
}

impl SorterParams {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Whether the value is present and non-null.
    pub fn is_set(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    /// Unchecked write, used by adapters normalizing derived values during
    /// `prepare` (e.g. a computed batch size).
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Merge caller overrides after validating every key against the schema.
    ///
    /// On failure the parameter set is left unmodified and the error names
    /// all unknown keys, not just the first.
    pub fn update(
        &mut self,
        overrides: BTreeMap<String, Value>,
        schema: &ParamSchema,
    ) -> Result<()> {
        let bad_keys: Vec<&str> = overrides
            .keys()
            .map(String::as_str)
            .filter(|k| !schema.contains_key(k))
            .collect();
        if !bad_keys.is_empty() {
            return Err(SorterError::Configuration(format!(
                "bad parameters: {}",
                bad_keys.join(", ")
            )));
        }
        self.values.extend(overrides);
        Ok(())
    }

    /// The raw mapping, as persisted into `params.json`.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}
