//! Sorter adapter abstraction
//!
//! This crate defines the contract between the orchestrator and external
//! spike-sorting tools:
//! - the [`SorterAdapter`] hook trait and its capability flags
//! - parameter schemas with configuration-time validation
//! - the error taxonomy shared across the workspace
//! - a shell-script process runner with log capture
//! - a mock adapter for tests

pub mod adapter;
pub mod error;
pub mod mock;
pub mod params;
pub mod shell;

pub use adapter::{ParallelCompat, SorterAdapter, SorterCapabilities};
pub use error::{ErrorKind, Result, SorterError};
pub use mock::{MOCK_RESULT_FILE, MockSorter};
pub use params::{ParamSchema, ParamSpec, SorterParams};
pub use shell::ShellRunner;
