//! Lifecycle of a single kernel run: build, boot, wait for a verdict, tear down.

use crate::error::HarnessError;
use crate::host::{DebugTransport, EmulatorHost, HostLauncher, LaunchedHost};
use crate::pipeline::BuildPipeline;
use crate::runtime::config::{EngineConfig, KernelSpec, RunConfiguration};
use crate::runtime::log::KernelLog;
use crate::runtime::task::{format_elapsed, run_task};
use crate::runtime::telemetry::SweepTelemetry;
use crate::session::state::RunState;
use crate::session::DebugSession;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Fallback interval between run-state checks while waiting for a verdict.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pause after teardown so the emulator can release its files.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

pub struct RunSupervisor {
    config: Arc<EngineConfig>,
    pipeline: BuildPipeline,
    launcher: Arc<dyn HostLauncher>,
    telemetry: Arc<SweepTelemetry>,
    shutdown: CancellationToken,
}

impl RunSupervisor {
    pub fn new(
        config: Arc<EngineConfig>,
        pipeline: BuildPipeline,
        launcher: Arc<dyn HostLauncher>,
        telemetry: Arc<SweepTelemetry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            pipeline,
            launcher,
            telemetry,
            shutdown,
        }
    }

    /// Builds and boots `kernel`, returning whether it reported success.
    ///
    /// A run that ends through a kernel fault or a lost connection returns
    /// `Ok(false)`. Build failures, host failures and the run deadline are
    /// errors.
    pub async fn execute(
        &self,
        kernel: &KernelSpec,
        working_dir: &Path,
        configuration: RunConfiguration,
        log: &KernelLog,
    ) -> Result<bool> {
        log.info(format!("Starting kernel '{}'", kernel.name));
        let started = Instant::now();

        let image = self
            .pipeline
            .build(kernel, working_dir, configuration, log)
            .await?;

        let passed = run_task("RunISO", log, async {
            let launched = self
                .launcher
                .launch(configuration.run_target, &image, log)
                .with_context(|| format!("failed to launch {} host", configuration.run_target))?;
            self.supervise(launched, log).await
        })
        .await?;

        log.info(format!(
            "Done running kernel '{}'. Took {}.",
            kernel.name,
            format_elapsed(started.elapsed())
        ));
        Ok(passed)
    }

    async fn supervise(&self, launched: LaunchedHost, log: &KernelLog) -> Result<bool> {
        let mut guard = HostGuard::new(launched);
        let session = Arc::new(DebugSession::new(log.clone(), self.config.run_with_gdb()));
        let state = session.state().clone();

        // Commands can arrive as soon as the transport is connected.
        state.begin();
        guard
            .transport()
            .connect(session)
            .context("failed to connect debug transport")?;

        guard
            .host()
            .start()
            .await
            .context("failed to start emulator host")?;

        let outcome = self.wait_for_verdict(&state, log).await;
        guard.release().await;
        outcome
    }

    async fn wait_for_verdict(&self, state: &RunState, log: &KernelLog) -> Result<bool> {
        let allowed = self.config.allowed_in_kernel();
        let deadline = tokio::time::Instant::now() + allowed;
        let finished = state.finished();

        while state.is_running() {
            if self.shutdown.is_cancelled() {
                state.error();
                log.warn("Execution cancelled; stopping kernel");
                bail!("kernel run cancelled");
            }

            if tokio::time::Instant::now() >= deadline {
                if state.time_out() {
                    self.telemetry.record_timeout();
                    log.error(format!("Timeout exceeded after {allowed:?}"));
                    return Err(HarnessError::Timeout { allowed }.into());
                }
                // A verdict landed at the deadline.
                break;
            }

            tokio::select! {
                _ = finished.cancelled() => {}
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        tracing::debug!(
            kernel = log.kernel(),
            phase = %state.phase(),
            assertions = state.assertion_count(),
            "kernel run finished"
        );
        Ok(state.succeeded())
    }
}

/// Stops the host and disposes the transport exactly once, on every path.
struct HostGuard {
    host: Box<dyn EmulatorHost>,
    transport: Box<dyn DebugTransport>,
    released: bool,
}

impl HostGuard {
    fn new(launched: LaunchedHost) -> Self {
        Self {
            host: launched.host,
            transport: launched.transport,
            released: false,
        }
    }

    fn host(&mut self) -> &mut dyn EmulatorHost {
        self.host.as_mut()
    }

    fn transport(&mut self) -> &mut dyn DebugTransport {
        self.transport.as_mut()
    }

    fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.host.stop();
        self.transport.dispose();
    }

    async fn release(mut self) {
        self.teardown();
        tokio::time::sleep(SETTLE_DELAY).await;
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        self.teardown();
    }
}
