//! Test oracle backed by an external command.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::{RemediateError, Result, TestResult};
use crate::metrics::METRICS;

use super::parse::{parse_output, OutputFormat};
use super::TestOracle;

/// Default oracle budget: ten minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Configuration for the command oracle (`[oracle]` in `remediate.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Command to execute; the first element is the executable.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    pub format: OutputFormat,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            format: OutputFormat::Auto,
        }
    }
}

/// Runs `command` in `workdir` and parses its output.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    config: OracleConfig,
    workdir: PathBuf,
}

impl CommandOracle {
    pub fn new(config: OracleConfig, workdir: impl Into<PathBuf>) -> Result<Self> {
        if config.command.is_empty() {
            return Err(RemediateError::Config(
                "oracle command must not be empty".to_string(),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(RemediateError::Config(
                "oracle timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            workdir: workdir.into(),
        })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }
}

/// Put `cmd` in its own process group so a terminal interrupt reaches only
/// the orchestrator, which then stops between units.
pub(crate) fn own_process_group(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

type Captured = Arc<Mutex<Vec<u8>>>;

/// Copy `pipe` into a shared buffer as it arrives, so output written before
/// a timeout is still available.
fn capture<R>(pipe: Option<R>) -> (Captured, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf: Captured = Arc::default();
    let sink = Arc::clone(&buf);
    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buf, task)
}

async fn captured_text(buf: &Captured) -> String {
    String::from_utf8_lossy(&buf.lock().await).into_owned()
}

#[async_trait]
impl TestOracle for CommandOracle {
    async fn run(&self) -> Result<TestResult> {
        let start = Instant::now();
        let exe = &self.config.command[0];
        let args = &self.config.command[1..];
        METRICS.inc_oracle_runs();

        let mut child = own_process_group(
            Command::new(exe)
                .args(args)
                .current_dir(&self.workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true),
        )
        .spawn()
        .map_err(|e| RemediateError::Collaborator(format!("failed to spawn {exe}: {e}")))?;

        let (stdout_buf, mut stdout_task) = capture(child.stdout.take());
        let (stderr_buf, mut stderr_task) = capture(child.stderr.take());

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await?;
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
            Ok::<_, std::io::Error>(status)
        })
        .await;

        let status = match finished {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    command = %self.config.command.join(" "),
                    timeout_secs = self.config.timeout_secs,
                    "test oracle timed out"
                );
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "failed to kill timed-out oracle");
                }
                stdout_task.abort();
                stderr_task.abort();
                let raw_output = format!(
                    "{}\n{}\n`{}` timed out after {}s",
                    captured_text(&stdout_buf).await,
                    captured_text(&stderr_buf).await,
                    self.config.command.join(" "),
                    self.config.timeout_secs
                );
                return Ok(TestResult::timed_out(self.config.timeout_secs, raw_output));
            }
        };

        let stdout = captured_text(&stdout_buf).await;
        let stderr = captured_text(&stderr_buf).await;
        let mut result = parse_output(
            self.config.format,
            status.success(),
            status.code(),
            &stdout,
            &stderr,
        );
        result.duration_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            passed = result.passed,
            total = result.total,
            failed = result.failed.len(),
            duration_ms = result.duration_ms,
            "test oracle finished"
        );
        Ok(result)
    }
}
