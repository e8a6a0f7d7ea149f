//! Spike-sorter lifecycle orchestration
//!
//! This crate turns one recording and one sorter adapter into sorted units:
//! - partitioning by an optional grouping key, one working directory per
//!   partition
//! - parameter validation and double persistence (`params.json`)
//! - serial or bounded-parallel dispatch of the external tool, with one
//!   fault boundary per call and durable `run_log.json` records
//! - result parsing and tag-then-merge aggregation

pub mod job;
pub mod orchestrator;
pub mod partition;
pub mod persist;

pub use job::{JobFailure, JobStatus, SortJob};
pub use orchestrator::{OrchestratorConfig, RunOptions, SorterOrchestrator};
