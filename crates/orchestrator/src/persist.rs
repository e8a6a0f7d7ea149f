//! Working-directory persistence
//!
//! Reads and writes the durable per-partition records: `params.json`,
//! `run_log.json`, and the harvested lines of the external tool's log file.

use spikerun_shared_types::{PARAMS_FILE, ParamsRecord, RUN_LOG_FILE, RunLog};
use spikerun_sorter_abstraction::{Result, SorterError};
use std::path::Path;
use tokio::io::AsyncBufReadExt;

pub async fn write_params(output_dir: &Path, record: &ParamsRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| SorterError::Configuration(format!("unserializable params: {e}")))?;
    tokio::fs::write(output_dir.join(PARAMS_FILE), json).await?;
    Ok(())
}

pub async fn read_params(output_dir: &Path) -> Result<ParamsRecord> {
    let raw = tokio::fs::read_to_string(output_dir.join(PARAMS_FILE)).await?;
    serde_json::from_str(&raw)
        .map_err(|e| SorterError::ResultLoad(format!("corrupt {PARAMS_FILE}: {e}")))
}

pub async fn write_run_log(output_dir: &Path, log: &RunLog) -> Result<()> {
    let json = serde_json::to_string_pretty(log)
        .map_err(|e| SorterError::Configuration(format!("unserializable run log: {e}")))?;
    tokio::fs::write(output_dir.join(RUN_LOG_FILE), json).await?;
    Ok(())
}

pub async fn read_run_log(output_dir: &Path) -> Result<RunLog> {
    let raw = tokio::fs::read_to_string(output_dir.join(RUN_LOG_FILE)).await?;
    serde_json::from_str(&raw)
        .map_err(|e| SorterError::ResultLoad(format!("corrupt {RUN_LOG_FILE}: {e}")))
}

/// Read back the external tool's log file, one trimmed line per entry.
/// An absent file is an empty trace, not an error.
pub async fn harvest_log_lines(output_dir: &Path, log_file_name: &str) -> Vec<String> {
    let path = output_dir.join(log_file_name);
    let Ok(file) = tokio::fs::File::open(&path).await else {
        return Vec::new();
    };
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut trace = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        trace.push(line.trim_end().to_string());
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn run_log_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog {
            sorter_name: "mock".to_string(),
            sorter_version: "1.0".to_string(),
            datetime: Utc::now(),
            run_time: Some(1.25),
            runtime_trace: vec!["a".to_string(), "b".to_string()],
            error: false,
            error_trace: None,
        };
        write_run_log(dir.path(), &log).await.unwrap();
        let restored = read_run_log(dir.path()).await.unwrap();
        assert_eq!(restored.run_time, Some(1.25));
        assert_eq!(restored.runtime_trace, log.runtime_trace);
        assert!(!restored.error);
    }

    #[tokio::test]
    async fn absent_log_file_harvests_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lines = harvest_log_lines(dir.path(), "missing.log").await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn log_lines_are_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("tool.log"), "one  \ntwo\n")
            .await
            .unwrap();
        let lines = harvest_log_lines(dir.path(), "tool.log").await;
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }
}
