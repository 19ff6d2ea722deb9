//! Named, timed units of work.

use crate::runtime::log::KernelLog;
use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};

/// Runs `work` as the task `name`.
///
/// `running task` is logged before the work starts and `done running task`
/// with the elapsed time after it ends, whether it succeeded, failed, or was
/// dropped mid-flight. The work's error is returned untouched and nothing is
/// retried.
pub async fn run_task<T, F>(name: &str, log: &KernelLog, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    log.info(format!("running task '{name}'"));
    let timer = TaskTimer::start(name, log);

    let outcome = work.await;
    if let Err(err) = &outcome {
        tracing::debug!(task = name, error = %err, "task failed");
    }

    drop(timer);
    outcome
}

/// Emits the closing task line when dropped.
struct TaskTimer<'a> {
    name: &'a str,
    log: &'a KernelLog,
    started: Instant,
}

impl<'a> TaskTimer<'a> {
    fn start(name: &'a str, log: &'a KernelLog) -> Self {
        Self {
            name,
            log,
            started: Instant::now(),
        }
    }
}

impl Drop for TaskTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.log.info(format!(
            "done running task '{}', took {}",
            self.name,
            format_elapsed(elapsed)
        ));
    }
}

/// Renders a duration as `hh:mm:ss.fff`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
