//! Sorter lifecycle orchestration
//!
//! [`SorterOrchestrator`] owns the full lifecycle: partitioning a recording
//! into independent groups, preparing per-partition working directories,
//! invoking the external sorter serially or in parallel across partitions,
//! persisting timing/log/error state, and aggregating per-partition results
//! into one unified result.

use crate::job::{JobStatus, SortJob};
use crate::partition::{inject_missing_locations, partition_recording};
use crate::persist::{harvest_log_lines, write_params, write_run_log};
use chrono::Utc;
use serde_json::Value;
use spikerun_shared_types::{ParamsRecord, Recording, RecordingView, RunLog, SortingResult};
use spikerun_sorter_abstraction::{
    ParamSchema, Result, SorterAdapter, SorterError, SorterParams, error::unwritable,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Construction-time settings of one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base output location. Partition working directories are nested under
    /// it by partition index when the recording is split.
    pub output_dir: PathBuf,
    /// Channel property to partition by. `None` sorts the whole recording
    /// as one partition.
    pub grouping_key: Option<String>,
    /// Delete partition working directories after `get_result`.
    pub delete_output_folders: bool,
}

impl OrchestratorConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            grouping_key: None,
            delete_output_folders: false,
        }
    }

    pub fn with_grouping_key(mut self, key: &str) -> Self {
        self.grouping_key = Some(key.to_string());
        self
    }

    pub fn with_delete_output_folders(mut self) -> Self {
        self.delete_output_folders = true;
        self
    }
}

/// Per-call settings of one `run()`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Propagate the first launch failure (default) or record it in the run
    /// log and return without a duration.
    pub raise_on_error: bool,
    /// Dispatch one concurrent task per partition.
    pub parallel: bool,
    /// Worker pool bound; defaults to the available parallelism.
    pub max_workers: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            raise_on_error: true,
            parallel: false,
            max_workers: None,
        }
    }
}

impl RunOptions {
    pub fn parallel(max_workers: Option<usize>) -> Self {
        Self {
            parallel: true,
            max_workers,
            ..Self::default()
        }
    }

    pub fn no_raise(mut self) -> Self {
        self.raise_on_error = false;
        self
    }
}

/// Orchestrates one sorter over one (possibly partitioned) recording.
///
/// Not derivable: the adapter is a trait object.
pub struct SorterOrchestrator {
    adapter: Arc<dyn SorterAdapter>,
    config: OrchestratorConfig,
    schema: ParamSchema,
    params: SorterParams,
    views: Vec<RecordingView>,
    output_dirs: Vec<PathBuf>,
    jobs: Vec<SortJob>,
    warnings: Vec<String>,
}

impl std::fmt::Debug for SorterOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SorterOrchestrator")
            .field("sorter", &self.adapter.name())
            .field("config", &self.config)
            .field("num_partitions", &self.views.len())
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl SorterOrchestrator {
    /// Partition the recording and prepare per-partition working state.
    ///
    /// Fails with an installation error when the adapter's tool is missing
    /// or a working directory cannot be created, and with a configuration
    /// error when the grouping key is unknown or the adapter requires real
    /// channel locations the recording never supplies.
    pub fn new(
        adapter: Arc<dyn SorterAdapter>,
        recording: Recording,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        recording.validate()?;

        if !adapter.is_installed() {
            return Err(SorterError::Installation(format!(
                "the sorter {} is not installed. {}",
                adapter.name(),
                adapter.installation_help()
            )));
        }
        if adapter.capabilities().requires_locations && !recording.has_locations() {
            return Err(SorterError::Configuration(format!(
                "channel locations are required for {}; add them to the recording \
                 before sorting",
                adapter.name()
            )));
        }

        let recording = Arc::new(recording);
        let mut warnings = Vec::new();
        let mut views =
            partition_recording(&recording, config.grouping_key.as_deref(), &mut warnings)?;
        inject_missing_locations(&mut views, &mut warnings);

        let output_dirs: Vec<PathBuf> = if views.len() == 1 {
            vec![config.output_dir.clone()]
        } else {
            (0..views.len())
                .map(|i| config.output_dir.join(i.to_string()))
                .collect()
        };
        for dir in &output_dirs {
            std::fs::create_dir_all(dir).map_err(|e| unwritable(dir, &e))?;
        }

        let schema = adapter.param_schema();
        let params = schema.defaults();

        Ok(Self {
            adapter,
            config,
            schema,
            params,
            views,
            output_dirs,
            jobs: Vec::new(),
            warnings,
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.views.len()
    }

    pub fn output_dirs(&self) -> &[PathBuf] {
        &self.output_dirs
    }

    pub fn params(&self) -> &SorterParams {
        &self.params
    }

    /// Per-key parameter descriptions, as declared by the adapter.
    pub fn param_descriptions(&self) -> BTreeMap<String, String> {
        self.schema.descriptions()
    }

    /// Jobs of the most recent `run()` call.
    pub fn jobs(&self) -> &[SortJob] {
        &self.jobs
    }

    /// Non-fatal warnings emitted so far, in order.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Validate and merge parameter overrides, then persist the cumulative
    /// mapping to every partition's working directory.
    pub async fn set_params(&mut self, overrides: BTreeMap<String, Value>) -> Result<()> {
        self.params.update(overrides, &self.schema)?;
        self.dump_params().await
    }

    async fn dump_params(&self) -> Result<()> {
        for (view, dir) in self.views.iter().zip(&self.output_dirs) {
            let record = ParamsRecord {
                sorter_name: self.adapter.name().to_string(),
                sorter_params: self.params.values().clone(),
                recording: view.descriptor(),
            };
            write_params(dir, &record).await?;
        }
        Ok(())
    }

    /// Execute one sort job per partition.
    ///
    /// Returns the wall-clock duration of the dispatch phase, or `None` when
    /// a launch failure was suppressed by `raise_on_error = false`.
    pub async fn run(&mut self, options: &RunOptions) -> Result<Option<Duration>> {
        let adapter = Arc::clone(&self.adapter);

        // Fresh jobs for this attempt; nothing is reused across runs.
        self.jobs = self
            .views
            .iter()
            .enumerate()
            .map(|(i, view)| SortJob::new(i, view.clone(), self.output_dirs[i].clone()))
            .collect();

        // Prepare phase: always serial, in partition-index order. Any
        // failure aborts the call before any execution begins.
        for i in 0..self.jobs.len() {
            let view = self.jobs[i].view.clone();
            let dir = self.jobs[i].output_dir.clone();
            adapter.prepare(&view, &mut self.params, &dir).await?;
            self.jobs[i].mark_prepared()?;
        }

        // Re-persist: prepare may have normalized derived values.
        self.dump_params().await?;

        if options.parallel {
            if !adapter.capabilities().parallel.tasks {
                return Err(SorterError::Configuration(format!(
                    "{} is not compatible with task-parallel dispatch",
                    adapter.name()
                )));
            }
            if self.jobs.len() > 1 && !self.views.iter().all(RecordingView::is_transferable) {
                return Err(SorterError::Configuration(
                    "recording views are not transferable and can't be processed in \
                     parallel; use parallel=false"
                        .to_string(),
                ));
            }
        }

        let started = Utc::now();
        let version = adapter.version();
        let t0 = Instant::now();

        let mut first_failure: Option<usize> = None;
        if options.parallel && self.jobs.len() > 1 {
            first_failure = self.dispatch_parallel(options).await?;
        } else {
            // Serial dispatch shares one fault boundary: the first failure
            // stops the loop, later jobs stay Prepared.
            for i in 0..self.jobs.len() {
                self.jobs[i].mark_running()?;
                let view = self.jobs[i].view.clone();
                let dir = self.jobs[i].output_dir.clone();
                match adapter.launch(&view, &dir).await {
                    Ok(()) => self.jobs[i].mark_succeeded()?,
                    Err(err) => {
                        self.jobs[i].mark_failed(&err)?;
                        first_failure = Some(i);
                        break;
                    }
                }
            }
        }

        let run_time = if first_failure.is_none() {
            Some(t0.elapsed())
        } else {
            None
        };

        // Log harvesting: always serial, always runs, even on failure.
        let log_file_name = adapter.log_file_name();
        for job in &self.jobs {
            let runtime_trace = harvest_log_lines(&job.output_dir, &log_file_name).await;
            let log = RunLog {
                sorter_name: adapter.name().to_string(),
                sorter_version: version.clone(),
                datetime: started,
                run_time: run_time.map(|d| d.as_secs_f64()),
                runtime_trace,
                error: job.status() == JobStatus::Failed,
                error_trace: job.error.as_ref().map(|f| f.message.clone()),
            };
            write_run_log(&job.output_dir, &log).await?;
        }

        match first_failure {
            None => {
                if let Some(elapsed) = run_time {
                    info!("{} run time {:.2}s", adapter.name(), elapsed.as_secs_f64());
                }
                Ok(run_time)
            }
            Some(index) => {
                let log_path = self.output_dirs[index].join(&log_file_name);
                let message = match &self.jobs[index].error {
                    Some(failure) => format!("partition {index}: {}", failure.message),
                    None => format!("partition {index} failed"),
                };
                if options.raise_on_error {
                    Err(SorterError::execution(message, &log_path))
                } else {
                    let warning =
                        format!("{message}; runtime trace kept in {}", log_path.display());
                    warn!("{}", warning);
                    self.warnings.push(warning);
                    Ok(None)
                }
            }
        }
    }

    /// One task per partition, bounded by the worker pool. Each task gets a
    /// snapshot of its view; completions arrive in no particular order.
    async fn dispatch_parallel(&mut self, options: &RunOptions) -> Result<Option<usize>> {
        let max_workers = options.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        });
        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut tasks: JoinSet<(usize, Result<()>)> = JoinSet::new();

        for i in 0..self.jobs.len() {
            self.jobs[i].mark_running()?;
            let adapter = Arc::clone(&self.adapter);
            let semaphore = Arc::clone(&semaphore);
            let snapshot = self.jobs[i].view.snapshot()?;
            let dir = self.jobs[i].output_dir.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let view = RecordingView::from_snapshot(snapshot);
                (i, adapter.launch(&view, &dir).await)
            });
        }

        let mut first_failure: Option<usize> = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| {
                SorterError::execution(
                    format!("sorter worker task failed: {e}"),
                    &self.config.output_dir,
                )
            })?;
            match outcome {
                Ok(()) => self.jobs[index].mark_succeeded()?,
                Err(err) => {
                    self.jobs[index].mark_failed(&err)?;
                    first_failure = Some(first_failure.map_or(index, |f| f.min(index)));
                }
            }
        }
        Ok(first_failure)
    }

    /// Parse every partition's working directory, keeping partition order.
    /// A parse failure either aborts the call or, with
    /// `raise_on_error = false`, is logged and that partition omitted.
    pub fn get_result_list(&mut self, raise_on_error: bool) -> Result<Vec<(usize, SortingResult)>> {
        let mut results = Vec::new();
        for (index, dir) in self.output_dirs.iter().enumerate() {
            match self.adapter.parse_results(dir) {
                Ok(result) => results.push((index, result)),
                Err(err) if raise_on_error => {
                    return Err(SorterError::ResultLoad(format!(
                        "failed to load sorting output {index}: {err}"
                    )));
                }
                Err(err) => {
                    let warning = format!("sorting output {index} could not be loaded: {err}");
                    warn!("{}", warning);
                    self.warnings.push(warning);
                }
            }
        }
        Ok(results)
    }

    /// Assemble the final sorting result.
    ///
    /// One partition: its result unchanged. Several: every parsed result is
    /// stamped with its partition's grouping value, then merged in partition
    /// order. Partition 0's sampling rate, epochs and timing are the
    /// authoritative values for the whole recording.
    pub fn get_result(&mut self, raise_on_error: bool) -> Result<SortingResult> {
        let mut parsed = self.get_result_list(raise_on_error)?;
        if parsed.is_empty() {
            return Err(SorterError::ResultLoad(
                "none of the sorting outputs could be loaded".to_string(),
            ));
        }

        let mut result = if self.views.len() == 1 {
            parsed.remove(0).1
        } else {
            let grouping_key = self.config.grouping_key.clone();
            let mut tagged = Vec::with_capacity(parsed.len());
            for (index, mut part) in parsed {
                if let (Some(key), Some(value)) =
                    (grouping_key.as_deref(), self.views[index].group_value())
                {
                    part.set_property_on_all_units(key, value);
                }
                tagged.push(part);
            }
            SortingResult::merge(tagged)
        };

        let first = &self.views[0];
        result.sampling_frequency = Some(first.sampling_frequency());
        result.epochs = first.epochs().to_vec();
        result.start_time = first.start_time();

        if self.config.delete_output_folders {
            for dir in &self.output_dirs {
                info!("Removing {}", dir.display());
                // Best effort: the result is already in memory.
                let _ = std::fs::remove_dir_all(dir);
            }
        }

        Ok(result)
    }
}
