//! Shared types for the spikerun workspace
//!
//! This crate holds the data model every other crate works against:
//! recordings and their partition views, sorting results, and the JSON
//! records persisted into partition working directories.

pub mod persist;
pub mod recording;
pub mod sorting;

pub use persist::{PARAMS_FILE, ParamsRecord, RUN_LOG_FILE, RunLog};
pub use recording::{
    Channel, Epoch, GROUP_PROPERTY, Recording, RecordingDescriptor, RecordingError,
    RecordingSnapshot, RecordingView, TraceSource,
};
pub use sorting::{SOURCE_UNIT_ID_PROPERTY, SortedUnit, SortingResult};
