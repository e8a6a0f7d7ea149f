//! Sorter adapter contract
//!
//! Every external sorting tool plugs into the orchestrator by implementing
//! [`SorterAdapter`]: prepare inputs, launch the process, report whether the
//! tool is installed, and parse its results back out of the working
//! directory. The adapter's internals (MATLAB scripts, CLI flags) are its
//! own business.

use crate::error::Result;
use crate::params::{ParamSchema, SorterParams};
use async_trait::async_trait;
use spikerun_shared_types::{RecordingView, SortingResult};
use std::path::Path;

/// Concurrency backends an adapter may tolerate. Task dispatch inside one
/// process is the only backend implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelCompat {
    /// Concurrent launches as tasks inside one process.
    pub tasks: bool,
}

impl Default for ParallelCompat {
    fn default() -> Self {
        Self { tasks: true }
    }
}

/// Capability flags an adapter declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SorterCapabilities {
    /// Hard requirement for real channel coordinates.
    pub requires_locations: bool,
    pub parallel: ParallelCompat,
}

/// The fixed hook contract for one external sorting tool.
#[async_trait]
pub trait SorterAdapter: Send + Sync {
    /// Short identifier, used for directories, log files and reporting.
    fn name(&self) -> &'static str;

    /// Human description of the tool.
    fn description(&self) -> &'static str {
        ""
    }

    /// How to install the tool, shown when it is missing.
    fn installation_help(&self) -> &'static str {
        ""
    }

    fn is_installed(&self) -> bool;

    /// Version string of the installed tool, `"unknown"` when undetectable.
    fn version(&self) -> String {
        "unknown".to_string()
    }

    fn capabilities(&self) -> SorterCapabilities;

    /// Declared option schema: allowed keys, defaults, descriptions.
    fn param_schema(&self) -> ParamSchema;

    /// Name of the line-oriented log file `launch` leaves in the working
    /// directory.
    fn log_file_name(&self) -> String {
        format!("{}.log", self.name())
    }

    /// Write whatever files the external tool needs into `output_dir`.
    /// May normalize derived parameter values; the orchestrator re-persists
    /// the parameter set afterwards.
    async fn prepare(
        &self,
        view: &RecordingView,
        params: &mut SorterParams,
        output_dir: &Path,
    ) -> Result<()>;

    /// Spawn the external process and block until it exits. Must fail on a
    /// non-zero exit status.
    async fn launch(&self, view: &RecordingView, output_dir: &Path) -> Result<()>;

    /// Load the sorting result back out of a working directory. Fails when
    /// the result files are absent or corrupt.
    fn parse_results(&self, output_dir: &Path) -> Result<SortingResult>;
}
