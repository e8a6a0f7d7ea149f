//! Sort job state machine
//!
//! One [`SortJob`] pairs a dataset partition with its working directory and
//! tracks the attempt through `Pending → Prepared → Running → {Succeeded,
//! Failed}`. Transitions are validated and monotonic; terminal states are
//! final. Jobs are created fresh for every `run()` call, never reused.

use chrono::{DateTime, Utc};
use spikerun_shared_types::RecordingView;
use spikerun_sorter_abstraction::{ErrorKind, SorterError};
use std::path::PathBuf;

/// Run status of one sort job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Prepared,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    fn can_transition_to(self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Pending, Prepared) | (Prepared, Running) | (Running, Succeeded) | (Running, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Prepared => "Prepared",
            JobStatus::Running => "Running",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Error detail recorded on a failed job.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// One (partition, working-directory) pair to be sorted.
#[derive(Debug, Clone)]
pub struct SortJob {
    pub partition_index: usize,
    pub view: RecordingView,
    pub output_dir: PathBuf,
    status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<JobFailure>,
}

impl SortJob {
    pub fn new(partition_index: usize, view: RecordingView, output_dir: PathBuf) -> Self {
        Self {
            partition_index,
            view,
            output_dir,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn mark_prepared(&mut self) -> Result<(), SorterError> {
        self.transition_to(JobStatus::Prepared)
    }

    pub fn mark_running(&mut self) -> Result<(), SorterError> {
        self.transition_to(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_succeeded(&mut self) -> Result<(), SorterError> {
        self.transition_to(JobStatus::Succeeded)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &SorterError) -> Result<(), SorterError> {
        self.transition_to(JobStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(JobFailure {
            kind: error.kind(),
            message: error.to_string(),
        });
        Ok(())
    }

    fn transition_to(&mut self, target: JobStatus) -> Result<(), SorterError> {
        if !self.status.can_transition_to(target) {
            return Err(SorterError::Configuration(format!(
                "invalid job transition {} -> {} for partition {}",
                self.status, target, self.partition_index
            )));
        }
        self.status = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikerun_shared_types::Recording;
    use std::sync::Arc;

    fn job() -> SortJob {
        let recording = Arc::new(Recording::in_memory(vec![vec![0i16; 4]; 2], 30_000.0));
        SortJob::new(0, RecordingView::full(recording), PathBuf::from("/tmp/x"))
    }

    #[test]
    fn happy_path_advances_monotonically() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        job.mark_prepared().unwrap();
        job.mark_running().unwrap();
        assert!(job.started_at.is_some());
        job.mark_succeeded().unwrap();
        assert!(job.status().is_terminal());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        job.mark_prepared().unwrap();
        job.mark_running().unwrap();
        job.mark_failed(&SorterError::execution("boom", std::path::Path::new("x.log")))
            .unwrap();
        assert!(job.mark_running().is_err());
        assert!(job.mark_succeeded().is_err());
        let failure = job.error.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::Execution);
    }

    #[test]
    fn cannot_run_before_prepare() {
        let mut job = job();
        assert!(job.mark_running().is_err());
    }
}
