//! Execution of the rac utility with an enforced deadline.
//!
//! Every query the exporter makes goes through [`CommandRunner::run`], which
//! spawns rac asynchronously and races a timer against process completion.
//! A hung rac process is killed, never leaked, and never blocks the caller
//! past the configured timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::rac::parser;

/// Failure modes of rac interaction.
///
/// None of these are fatal for the exporter; the owning collector logs,
/// clears its series and retries on the next cycle.
#[derive(Debug, Error)]
pub enum RacError {
    /// rac exited non-zero or could not be spawned.
    #[error("rac execution failed: {stderr}")]
    Execution { stderr: String },

    /// rac did not finish before the deadline and was killed.
    #[error("rac timed out after {timeout:?} (args: {args:?})")]
    Timeout { timeout: Duration, args: Vec<String> },

    /// The cluster id or the infobase registry is not available yet.
    #[error("cluster resolution failed: {0}")]
    Resolution(String),

    /// No credentials configured for an infobase that requires them.
    #[error("missing credentials for infobase {0}")]
    Credentials(String),
}

/// Executes the rac binary with a hard per-call timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// Runs rac with the given arguments and returns raw stdout bytes.
    ///
    /// On timeout the child is killed before the error is returned; an
    /// exporter cycle must not leave rac processes behind.
    pub async fn run(&self, args: &[String]) -> Result<Vec<u8>, RacError> {
        debug!(rac = %self.path.display(), ?args, "invoking rac");

        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RacError::Execution {
                stderr: format!("failed to spawn {}: {}", self.path.display(), e),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| RacError::Execution {
                stderr: format!("failed to collect rac output: {}", e),
            })?,
            Err(_) => {
                // kill_on_drop reaps the child once the future is dropped.
                warn!(?args, timeout = ?self.timeout, "rac call exceeded deadline, killing");
                return Err(RacError::Timeout {
                    timeout: self.timeout,
                    args: args.to_vec(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RacError::Execution { stderr });
        }

        Ok(output.stdout)
    }

    /// Runs rac and parses its output into records.
    pub async fn run_parsed(&self, args: &[String]) -> Result<Vec<parser::Record>, RacError> {
        let stdout = self.run(args).await?;
        Ok(parser::parse_records(&stdout))
    }
}
