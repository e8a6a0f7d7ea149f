//! Dataset partitioning
//!
//! Splits a recording into independent per-group views by an optional
//! grouping key. Without a key the whole recording is one partition.
//! Partitions are disjoint by channel membership and exhaustive.

use spikerun_shared_types::{GROUP_PROPERTY, Recording, RecordingView};
use spikerun_sorter_abstraction::{Result, SorterError};
use std::sync::Arc;
use tracing::warn;

/// Partition a recording, collecting the non-fatal warnings this emits.
pub fn partition_recording(
    recording: &Arc<Recording>,
    grouping_key: Option<&str>,
    warnings: &mut Vec<String>,
) -> Result<Vec<RecordingView>> {
    let views = match grouping_key {
        None => {
            if recording.has_channel_property(GROUP_PROPERTY)
                && recording.distinct_property_values(GROUP_PROPERTY).len() > 1
            {
                let message = format!(
                    "the recording contains several groups; to sort by group pass \
                     grouping_key=\"{GROUP_PROPERTY}\""
                );
                warn!("{}", message);
                warnings.push(message);
            }
            vec![RecordingView::full(Arc::clone(recording))]
        }
        Some(key) => {
            if !recording.has_channel_property(key) {
                return Err(SorterError::Configuration(format!(
                    "'{key}' is not one of the channel properties"
                )));
            }
            recording
                .distinct_property_values(key)
                .iter()
                .map(|value| RecordingView::by_property(Arc::clone(recording), key, value))
                .collect()
        }
    };
    Ok(views)
}

/// Synthesize placeholder coordinates on views that lack them. Some sorters
/// need locations even when the caller has none; this is a best-effort
/// fallback, never a silent one.
pub fn inject_missing_locations(views: &mut [RecordingView], warnings: &mut Vec<String>) {
    for (index, view) in views.iter_mut().enumerate() {
        if !view.has_locations() {
            let message =
                format!("no channel locations given for partition {index}, adding dummy locations");
            warn!("{}", message);
            warnings.push(message);
            view.inject_dummy_locations();
        }
    }
}
