//! Shell script process runner
//!
//! Adapters launch their external tool through a [`ShellRunner`]: the
//! composed script is written next to the tool's inputs, spawned, and its
//! output streamed line-by-line into the per-partition log file. The runner
//! returns the exit status; interpreting it is the adapter's job.

use crate::error::{Result, SorterError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Runs one shell script and captures its output.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    script_path: PathBuf,
    log_path: PathBuf,
}

impl ShellRunner {
    /// Runner writing `run_<name>.sh` and the given log file into
    /// `output_dir`.
    pub fn new(output_dir: &Path, name: &str, log_file_name: &str) -> Self {
        Self {
            script_path: output_dir.join(format!("run_{name}.sh")),
            log_path: output_dir.join(log_file_name),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Write the script, spawn it, stream stdout/stderr to the log file and
    /// wait for exit. Returns the exit code (-1 when killed by a signal).
    pub async fn run(&self, script_body: &str) -> Result<i32> {
        let script = if script_body.starts_with("#!") {
            script_body.to_string()
        } else {
            format!("#!/bin/bash\n{script_body}")
        };
        tokio::fs::write(&self.script_path, script).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.script_path, std::fs::Permissions::from_mode(0o755))
                .await?;
        }

        info!("Spawning {}", self.script_path.display());

        let mut child = tokio::process::Command::new("bash")
            .arg(&self.script_path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn {}: {}", self.script_path.display(), e);
                SorterError::Io(e)
            })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(forward_lines(stdout, line_tx.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, line_tx));

        let mut log_file = tokio::fs::File::create(&self.log_path).await?;
        while let Some(line) = line_rx.recv().await {
            debug!("{}", line);
            log_file.write_all(line.as_bytes()).await?;
            log_file.write_all(b"\n").await?;
        }
        log_file.flush().await?;

        let status = child.wait().await?;
        // Reader tasks finished once the channel drained.
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        Ok(status.code().unwrap_or(-1))
    }
}

async fn forward_lines<R>(reader: Option<R>, tx: mpsc::UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(dir.path(), "echo", "echo.log");

        let code = runner.run("echo line one\necho line two >&2\n").await.unwrap();
        assert_eq!(code, 0);

        let log = tokio::fs::read_to_string(runner.log_path()).await.unwrap();
        assert!(log.contains("line one"));
        assert!(log.contains("line two"));
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(dir.path(), "fail", "fail.log");
        let code = runner.run("exit 7\n").await.unwrap();
        assert_eq!(code, 7);
    }
}
