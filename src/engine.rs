use crate::host::HostLauncher;
use crate::pipeline::executor::{ProcessToolExecutor, ToolExecutor};
use crate::pipeline::BuildPipeline;
use crate::report::{KernelTestResult, TestReport};
use crate::runtime::config::{EngineConfig, KernelSpec, RunConfiguration};
use crate::runtime::locator::{user_kit_from_env, LayoutToolLocator, ToolLocator};
use crate::runtime::log::{replay, KernelLog};
use crate::runtime::telemetry::{SweepSnapshot, SweepTelemetry};
use crate::supervisor::RunSupervisor;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Runs every configured kernel under every run configuration and collects
/// the results.
pub struct Engine {
    config: Arc<EngineConfig>,
    supervisor: RunSupervisor,
    telemetry: Arc<SweepTelemetry>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        locator: Arc<dyn ToolLocator>,
        executor: Arc<dyn ToolExecutor>,
        launcher: Arc<dyn HostLauncher>,
    ) -> Self {
        let config = Arc::new(config);
        let telemetry = Arc::new(SweepTelemetry::default());
        let shutdown = CancellationToken::new();
        let pipeline = BuildPipeline::new(config.clone(), locator, executor, telemetry.clone());
        let supervisor = RunSupervisor::new(
            config.clone(),
            pipeline,
            launcher,
            telemetry.clone(),
            shutdown.clone(),
        );
        Self {
            config,
            supervisor,
            telemetry,
            shutdown,
        }
    }

    /// Engine wired to real processes, with tools discovered from the
    /// executable's location and `KERNEL_HARNESS_USER_KIT`.
    pub fn with_default_tools(config: EngineConfig, launcher: Arc<dyn HostLauncher>) -> Result<Self> {
        let exe = std::env::current_exe().context("failed to resolve current executable")?;
        let start = exe
            .parent()
            .context("current executable has no parent directory")?;
        let locator = LayoutToolLocator::discover(start, user_kit_from_env()?);
        Ok(Self::new(
            config,
            Arc::new(locator),
            Arc::new(ProcessToolExecutor),
            launcher,
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cancelling this token stops the sweep; the running kernel is torn down
    /// and no further kernels start.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> SweepSnapshot {
        self.telemetry.snapshot()
    }

    pub async fn execute(&self) -> Result<TestReport> {
        let mut report = TestReport::default();
        tracing::info!("Start executing");

        'sweep: for configuration in self.config.run_configurations() {
            tracing::info!("Start configuration. {configuration}");

            let kernels = self.config.kernels();
            for (idx, kernel) in kernels.iter().enumerate() {
                if self.shutdown.is_cancelled() {
                    tracing::warn!("execution cancelled; remaining kernels are not run");
                    break 'sweep;
                }

                let result = self.run_kernel(kernel, configuration).await?;
                let passed = result.passed;
                self.telemetry.record_kernel(passed);

                if !passed && self.config.stop_on_first_failure() {
                    replay(&kernel.name, &result.captured_log);
                    report.push(result);
                    self.telemetry
                        .record_skipped((kernels.len() - idx - 1) as u64);
                    break;
                }
                report.push(result);
            }

            tracing::info!("End configuration. {configuration}");
        }

        tracing::info!(
            "Done executing: {} test(s) passed, {} test(s) failed.",
            report.passed_count(),
            report.failed_count()
        );
        self.telemetry.log_snapshot();
        Ok(report)
    }

    /// Like [`Engine::execute`], but Ctrl-C (SIGINT) cancels the sweep.
    pub async fn run_until_ctrl_c(&self) -> Result<TestReport> {
        let shutdown = self.shutdown.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; cancelling execution");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let outcome = self.execute().await;
        listener.abort();
        outcome
    }

    async fn run_kernel(
        &self,
        kernel: &KernelSpec,
        configuration: RunConfiguration,
    ) -> Result<KernelTestResult> {
        let working_dir = self.config.working_directory_base().join(&kernel.name);
        prepare_working_dir(&working_dir).await?;

        let log = KernelLog::new(&kernel.name);
        let mut result = KernelTestResult::new(&kernel.name, configuration);

        match self
            .supervisor
            .execute(kernel, &working_dir, configuration, &log)
            .await
        {
            Ok(passed) => result.passed = passed,
            Err(err) => log.error(format!("Exception occurred: {err:#}")),
        }

        result.captured_log = log.events();
        Ok(result)
    }
}

/// Deletes and recreates `dir` so no artifact of an earlier run survives.
async fn prepare_working_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to clear {}", dir.display()));
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))
}
