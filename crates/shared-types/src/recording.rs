//! Recording data model
//!
//! A [`Recording`] describes one extracellular dataset: its channels, the
//! sampling frequency and where the raw traces live. Orchestration never
//! interprets the samples, it only needs channel metadata for partitioning
//! and the ability to hand each sorter a per-partition view of the traces.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Channel property name conventionally used for probe groups.
pub const GROUP_PROPERTY: &str = "group";

/// Errors raised by the recording model itself.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Invalid recording: {0}")]
    Invalid(String),

    #[error("In-memory traces cannot be transferred across worker boundaries")]
    NotTransferable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One recording channel with its spatial location and free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u32,
    /// 2D probe coordinates, when known.
    pub location: Option<[f32; 2]>,
    /// Named string properties (e.g. the probe group).
    pub properties: BTreeMap<String, String>,
}

impl Channel {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            location: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Where the raw samples live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceSource {
    /// Interleaved int16 little-endian frames on disk.
    Binary { path: PathBuf },
    /// Per-channel sample vectors held in memory. Cheap for tests, but such
    /// a recording cannot be snapshotted for parallel dispatch.
    InMemory { samples: Vec<Vec<i16>> },
}

/// A labelled interval annotation carried from recording to sorting result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub name: String,
    pub start_frame: u64,
    pub end_frame: u64,
}

/// A full extracellular recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub channels: Vec<Channel>,
    pub sampling_frequency: f32,
    pub traces: TraceSource,
    pub epochs: Vec<Epoch>,
    /// Time of the first sample, in seconds, when known.
    pub start_time: Option<f64>,
}

impl Recording {
    /// Recording backed by an interleaved int16 binary file.
    pub fn binary(
        path: impl Into<PathBuf>,
        num_channels: usize,
        sampling_frequency: f32,
    ) -> Self {
        Self {
            channels: (0..num_channels as u32).map(Channel::new).collect(),
            sampling_frequency,
            traces: TraceSource::Binary { path: path.into() },
            epochs: Vec::new(),
            start_time: None,
        }
    }

    /// Recording holding its samples in memory (one vector per channel).
    pub fn in_memory(samples: Vec<Vec<i16>>, sampling_frequency: f32) -> Self {
        let channels = (0..samples.len() as u32).map(Channel::new).collect();
        Self {
            channels,
            sampling_frequency,
            traces: TraceSource::InMemory { samples },
            epochs: Vec::new(),
            start_time: None,
        }
    }

    pub fn with_property(mut self, key: &str, values: &[&str]) -> Self {
        for (channel, value) in self.channels.iter_mut().zip(values) {
            channel
                .properties
                .insert(key.to_string(), (*value).to_string());
        }
        self
    }

    pub fn with_locations(mut self, locations: &[[f32; 2]]) -> Self {
        for (channel, location) in self.channels.iter_mut().zip(locations) {
            channel.location = Some(*location);
        }
        self
    }

    pub fn with_epochs(mut self, epochs: Vec<Epoch>) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// True when every channel has a 2D location.
    pub fn has_locations(&self) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c.location.is_some())
    }

    /// True when every channel carries the given property.
    pub fn has_channel_property(&self, key: &str) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c.property(key).is_some())
    }

    /// Distinct values of a channel property, in sorted order.
    pub fn distinct_property_values(&self, key: &str) -> Vec<String> {
        self.channels
            .iter()
            .filter_map(|c| c.property(key))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn validate(&self) -> Result<(), RecordingError> {
        if self.channels.is_empty() {
            return Err(RecordingError::Invalid("recording has no channels".into()));
        }
        if self.sampling_frequency <= 0.0 {
            return Err(RecordingError::Invalid(format!(
                "sampling frequency must be positive, got {}",
                self.sampling_frequency
            )));
        }
        if let TraceSource::InMemory { samples } = &self.traces {
            if samples.len() != self.channels.len() {
                return Err(RecordingError::Invalid(format!(
                    "{} channels declared but {} trace vectors given",
                    self.channels.len(),
                    samples.len()
                )));
            }
        }
        Ok(())
    }
}

/// Descriptor persisted into `params.json` next to the sorter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingDescriptor {
    pub channel_ids: Vec<u32>,
    pub sampling_frequency: f32,
    pub trace_kind: String,
    pub trace_path: Option<PathBuf>,
    pub group: Option<String>,
}

/// Serializable hand-off of a partition view across a worker boundary.
///
/// Only file-backed views can be snapshotted; this is the explicit
/// "transferable" capability parallel dispatch checks up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSnapshot {
    pub trace_path: PathBuf,
    pub source_num_channels: usize,
    pub channel_indices: Vec<usize>,
    pub channels: Vec<Channel>,
    pub sampling_frequency: f32,
    pub epochs: Vec<Epoch>,
    pub start_time: Option<f64>,
    pub group_value: Option<String>,
}

/// A read-only view over a subset of a recording's channels.
///
/// Views own a copy of their channel metadata, so synthesizing placeholder
/// locations on a view never mutates the borrowed source recording.
#[derive(Debug, Clone)]
pub struct RecordingView {
    source: Arc<Recording>,
    channel_indices: Vec<usize>,
    channels: Vec<Channel>,
    group_value: Option<String>,
}

impl RecordingView {
    /// View covering the whole recording.
    pub fn full(source: Arc<Recording>) -> Self {
        let channels = source.channels.clone();
        let channel_indices = (0..channels.len()).collect();
        Self {
            source,
            channel_indices,
            channels,
            group_value: None,
        }
    }

    /// View over the channels whose `key` property equals `value`.
    pub fn by_property(source: Arc<Recording>, key: &str, value: &str) -> Self {
        let mut channel_indices = Vec::new();
        let mut channels = Vec::new();
        for (index, channel) in source.channels.iter().enumerate() {
            if channel.property(key) == Some(value) {
                channel_indices.push(index);
                channels.push(channel.clone());
            }
        }
        Self {
            source,
            channel_indices,
            channels,
            group_value: Some(value.to_string()),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_ids(&self) -> Vec<u32> {
        self.channels.iter().map(|c| c.id).collect()
    }

    pub fn sampling_frequency(&self) -> f32 {
        self.source.sampling_frequency
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.source.epochs
    }

    pub fn start_time(&self) -> Option<f64> {
        self.source.start_time
    }

    /// The grouping-key value this view was split on, if any.
    pub fn group_value(&self) -> Option<&str> {
        self.group_value.as_deref()
    }

    pub fn has_locations(&self) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c.location.is_some())
    }

    /// Channel locations, present once real or placeholder coordinates exist.
    pub fn locations(&self) -> Option<Vec<[f32; 2]>> {
        self.channels
            .iter()
            .map(|c| c.location)
            .collect::<Option<Vec<_>>>()
    }

    /// Synthesize a linear placeholder layout `(0, i)` for channels without
    /// coordinates. Affects only this view, never the source recording.
    pub fn inject_dummy_locations(&mut self) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            if channel.location.is_none() {
                channel.location = Some([0.0, i as f32]);
            }
        }
    }

    /// Whether this view can be snapshotted for transfer to a worker task.
    pub fn is_transferable(&self) -> bool {
        matches!(self.source.traces, TraceSource::Binary { .. })
    }

    /// Explicit snapshot operation for parallel dispatch.
    pub fn snapshot(&self) -> Result<RecordingSnapshot, RecordingError> {
        let TraceSource::Binary { path } = &self.source.traces else {
            return Err(RecordingError::NotTransferable);
        };
        Ok(RecordingSnapshot {
            trace_path: path.clone(),
            source_num_channels: self.source.num_channels(),
            channel_indices: self.channel_indices.clone(),
            channels: self.channels.clone(),
            sampling_frequency: self.source.sampling_frequency,
            epochs: self.source.epochs.clone(),
            start_time: self.source.start_time,
            group_value: self.group_value.clone(),
        })
    }

    /// Rebuild a view on the receiving side of a worker boundary.
    pub fn from_snapshot(snapshot: RecordingSnapshot) -> Self {
        let mut source = Recording::binary(
            snapshot.trace_path,
            snapshot.source_num_channels,
            snapshot.sampling_frequency,
        );
        source.epochs = snapshot.epochs;
        source.start_time = snapshot.start_time;
        Self {
            source: Arc::new(source),
            channel_indices: snapshot.channel_indices,
            channels: snapshot.channels,
            group_value: snapshot.group_value,
        }
    }

    /// Descriptor recorded into `params.json` for audit/resume purposes.
    pub fn descriptor(&self) -> RecordingDescriptor {
        let (trace_kind, trace_path) = match &self.source.traces {
            TraceSource::Binary { path } => ("binary".to_string(), Some(path.clone())),
            TraceSource::InMemory { .. } => ("in_memory".to_string(), None),
        };
        RecordingDescriptor {
            channel_ids: self.channel_ids(),
            sampling_frequency: self.source.sampling_frequency,
            trace_kind,
            trace_path,
            group: self.group_value.clone(),
        }
    }

    /// Write this view's traces as interleaved int16 little-endian frames.
    ///
    /// This is what sorter adapters call from `prepare` to lay the raw data
    /// down in the format the external tool expects.
    pub async fn write_binary(&self, path: &Path) -> Result<(), RecordingError> {
        let bytes = match &self.source.traces {
            TraceSource::InMemory { samples } => {
                let num_frames = samples.first().map_or(0, Vec::len);
                let mut out = Vec::with_capacity(num_frames * self.channel_indices.len() * 2);
                for frame in 0..num_frames {
                    for &index in &self.channel_indices {
                        out.extend_from_slice(&samples[index][frame].to_le_bytes());
                    }
                }
                out
            }
            TraceSource::Binary { path: source_path } => {
                let raw = tokio::fs::read(source_path).await?;
                let src_channels = self.source.num_channels();
                let frame_bytes = src_channels * 2;
                let num_frames = raw.len() / frame_bytes;
                let mut out = Vec::with_capacity(num_frames * self.channel_indices.len() * 2);
                for frame in 0..num_frames {
                    let base = frame * frame_bytes;
                    for &index in &self.channel_indices {
                        let offset = base + index * 2;
                        out.extend_from_slice(&raw[offset..offset + 2]);
                    }
                }
                out
            }
        };
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}
