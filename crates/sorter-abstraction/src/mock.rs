//! Mock sorter adapter for tests
//!
//! Behaves like a very fast external sorter: `launch` writes a couple of
//! log lines and a result file, `parse_results` reads it back. Failure modes
//! are switchable so orchestrator tests can exercise every error path.

use crate::adapter::{SorterAdapter, SorterCapabilities};
use crate::error::{Result, SorterError};
use crate::params::{ParamSchema, SorterParams};
use async_trait::async_trait;
use serde_json::Value;
use spikerun_shared_types::{RecordingView, SortedUnit, SortingResult};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;

/// Result file the mock leaves in the working directory.
pub const MOCK_RESULT_FILE: &str = "mock_result.json";

#[derive(Debug)]
pub struct MockSorter {
    installed: bool,
    capabilities: SorterCapabilities,
    fail_prepare: bool,
    fail_launch: bool,
    units_per_partition: u32,
    prepare_calls: AtomicUsize,
    launch_calls: AtomicUsize,
}

impl Default for MockSorter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSorter {
    pub fn new() -> Self {
        Self {
            installed: true,
            capabilities: SorterCapabilities::default(),
            fail_prepare: false,
            fail_launch: false,
            units_per_partition: 1,
            prepare_calls: AtomicUsize::new(0),
            launch_calls: AtomicUsize::new(0),
        }
    }

    pub fn not_installed(mut self) -> Self {
        self.installed = false;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn with_units(mut self, units_per_partition: u32) -> Self {
        self.units_per_partition = units_per_partition;
        self
    }

    pub fn requiring_locations(mut self) -> Self {
        self.capabilities.requires_locations = true;
        self
    }

    pub fn serial_only(mut self) -> Self {
        self.capabilities.parallel.tasks = false;
        self
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn launch_calls(&self) -> usize {
        self.launch_calls.load(Ordering::SeqCst)
    }

    async fn append_log(&self, output_dir: &Path, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join(self.log_file_name()))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl SorterAdapter for MockSorter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn description(&self) -> &'static str {
        "In-process fake sorter used by the test suite"
    }

    fn installation_help(&self) -> &'static str {
        "The mock sorter is always available unless a test disabled it"
    }

    fn is_installed(&self) -> bool {
        self.installed
    }

    fn version(&self) -> String {
        "0.0.0-mock".to_string()
    }

    fn capabilities(&self) -> SorterCapabilities {
        self.capabilities
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .with("detect_threshold", 5.0, "Threshold for spike detection")
            .with("batch_size", Value::Null, "Batch size (computed when unset)")
            .with("keep_good_only", false, "If true only 'good' units are returned")
    }

    async fn prepare(
        &self,
        _view: &RecordingView,
        params: &mut SorterParams,
        output_dir: &Path,
    ) -> Result<()> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare {
            return Err(SorterError::execution(
                "mock prepare failed",
                &output_dir.join(self.log_file_name()),
            ));
        }
        // Derived-value normalization, as a real adapter would do.
        if !params.is_set("batch_size") {
            params.set("batch_size", 4096);
        }
        Ok(())
    }

    async fn launch(&self, view: &RecordingView, output_dir: &Path) -> Result<()> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);
        self.append_log(output_dir, "sorting started").await?;

        if self.fail_launch {
            self.append_log(output_dir, "mock sorter crashed").await?;
            return Err(SorterError::execution(
                "mock returned a non-zero exit code",
                &output_dir.join(self.log_file_name()),
            ));
        }

        let units: Vec<SortedUnit> = (0..self.units_per_partition)
            .map(|i| SortedUnit::new(i, vec![u64::from(i + 1) * 10]))
            .collect();
        let mut result = SortingResult::new(units);
        result.sampling_frequency = Some(view.sampling_frequency());
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| SorterError::ResultLoad(e.to_string()))?;
        tokio::fs::write(output_dir.join(MOCK_RESULT_FILE), json).await?;

        self.append_log(output_dir, "sorting finished").await?;
        Ok(())
    }

    fn parse_results(&self, output_dir: &Path) -> Result<SortingResult> {
        let path = output_dir.join(MOCK_RESULT_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            SorterError::ResultLoad(format!("no result in {}: {}", output_dir.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| SorterError::ResultLoad(format!("corrupt result file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikerun_shared_types::Recording;
    use std::sync::Arc;

    fn view() -> RecordingView {
        RecordingView::full(Arc::new(Recording::in_memory(
            vec![vec![0i16; 8]; 2],
            30_000.0,
        )))
    }

    #[tokio::test]
    async fn launch_then_parse_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sorter = MockSorter::new().with_units(3);

        sorter.launch(&view(), dir.path()).await.unwrap();
        let result = sorter.parse_results(dir.path()).unwrap();
        assert_eq!(result.num_units(), 3);
        assert_eq!(sorter.launch_calls(), 1);
    }

    #[tokio::test]
    async fn failing_launch_still_leaves_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sorter = MockSorter::new().failing_launch();

        let err = sorter.launch(&view(), dir.path()).await.unwrap_err();
        assert!(matches!(err, SorterError::Execution { .. }));

        let log = std::fs::read_to_string(dir.path().join("mock.log")).unwrap();
        assert!(log.contains("mock sorter crashed"));
    }

    #[test]
    fn parse_without_launch_is_a_result_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MockSorter::new().parse_results(dir.path()).unwrap_err();
        assert!(matches!(err, SorterError::ResultLoad(_)));
    }

    #[tokio::test]
    async fn prepare_normalizes_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let sorter = MockSorter::new();
        let mut params = sorter.param_schema().defaults();
        sorter.prepare(&view(), &mut params, dir.path()).await.unwrap();
        assert_eq!(params.get_u64("batch_size"), Some(4096));
    }
}
