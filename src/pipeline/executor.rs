//! Execution of external build tools.

use crate::error::HarnessError;
use crate::runtime::locator::Tool;
use crate::runtime::log::{KernelLog, LogLevel};
use anyhow::{Context, Result};
use core::future::Future;
use core::pin::Pin;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A fully resolved tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Writes stdout to this file instead of the kernel log.
    pub stdout_to: Option<PathBuf>,
    pub timeout: Duration,
}

impl ToolRequest {
    /// Returns the value of the first `Key:value` argument with `key`.
    pub fn keyed_arg(&self, key: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| {
            arg.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }
}

pub trait ToolExecutor: Send + Sync {
    fn execute<'a>(&'a self, request: ToolRequest, log: &'a KernelLog) -> ToolFuture<'a>;
}

/// Runs tools as child processes.
///
/// Output lines go to the kernel log (stderr at error level). The child is
/// killed when the request's timeout elapses or the future is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToolExecutor;

impl ToolExecutor for ProcessToolExecutor {
    fn execute<'a>(&'a self, request: ToolRequest, log: &'a KernelLog) -> ToolFuture<'a> {
        Box::pin(run_process(request, log))
    }
}

async fn run_process(request: ToolRequest, log: &KernelLog) -> Result<()> {
    let tool = request.tool.to_string();
    tracing::debug!(
        tool = %tool,
        program = %request.program.display(),
        args = ?request.args,
        cwd = %request.working_dir.display(),
        "spawning tool"
    );

    let mut child = Command::new(&request.program)
        .args(&request.args)
        .current_dir(&request.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| HarnessError::process_failure(&tool, format!("failed to start: {err}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_to = request.stdout_to.clone();

    let outcome = tokio::time::timeout(request.timeout, async {
        let stdout_pump = async {
            match (stdout, stdout_to) {
                (Some(mut out), Some(path)) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    tokio::io::copy(&mut out, &mut file)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    file.flush().await?;
                    Ok::<(), anyhow::Error>(())
                }
                (Some(out), None) => pump_lines(out, log, LogLevel::Info).await,
                (None, _) => Ok(()),
            }
        };
        let stderr_pump = async {
            match stderr {
                Some(err) => pump_lines(err, log, LogLevel::Error).await,
                None => Ok(()),
            }
        };
        let (stdout_res, stderr_res, status) = tokio::join!(stdout_pump, stderr_pump, child.wait());
        stdout_res
            .and(stderr_res)
            .and_then(|()| status.map_err(anyhow::Error::from))
    })
    .await;

    let status = match outcome {
        Ok(status) => status.with_context(|| format!("waiting for '{tool}'"))?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(HarnessError::process_failure(
                tool,
                format!("timed out after {:?}", request.timeout),
            )
            .into());
        }
    };

    if !status.success() {
        return Err(HarnessError::process_failure(tool, format!("exited with {status}")).into());
    }
    Ok(())
}

async fn pump_lines<R>(reader: R, log: &KernelLog, level: LogLevel) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        log.record(level, line);
    }
    Ok(())
}
