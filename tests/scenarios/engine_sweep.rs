use std::sync::Arc;

use anyhow::Result;
use kernel_harness::cli;
use kernel_harness::{Engine, EngineConfig, ImageFormat, RunTarget, TestReport, Tool};

use crate::support::helpers::{
    capture_tracing, config_builder, init_tracing, log_contains, outcomes, passing_script,
    single_target,
};
use crate::support::mock_host::ScriptedLauncher;
use crate::support::mock_tools::{FixtureKit, RecordingExecutor};

struct Sweep {
    _kit: FixtureKit,
    executor: Arc<RecordingExecutor>,
    launcher: ScriptedLauncher,
    engine: Engine,
}

fn sweep(config: EngineConfig, executor: RecordingExecutor, launcher: ScriptedLauncher) -> Sweep {
    init_tracing();
    let kit = FixtureKit::new();
    let executor = Arc::new(executor);
    let engine = Engine::new(
        config,
        Arc::new(kit.locator()),
        executor.clone(),
        Arc::new(launcher.clone()),
    );
    Sweep {
        _kit: kit,
        executor,
        launcher,
        engine,
    }
}

fn all_passing(kernels: &[&str]) -> ScriptedLauncher {
    kernels
        .iter()
        .fold(ScriptedLauncher::new(), |launcher, kernel| {
            launcher.script(kernel, passing_script(2))
        })
}

#[tokio::test]
async fn passing_kernels_run_in_order() -> Result<()> {
    let base = tempfile::tempdir()?;
    let kernels = ["BoxingTests", "SimpleWriteLine"];
    let sweep = sweep(
        single_target(base.path(), &kernels),
        RecordingExecutor::new(),
        all_passing(&kernels),
    );

    let report = sweep.engine.execute().await?;

    assert_eq!(
        outcomes(&report),
        vec![
            ("BoxingTests".to_owned(), RunTarget::Bochs, true),
            ("SimpleWriteLine".to_owned(), RunTarget::Bochs, true),
        ]
    );
    assert!(report.all_passed());

    let first = &report.kernel_results()[0];
    assert!(first.configuration.is_elf);
    assert!(log_contains(first, "running task 'IL2CPU'"));
    assert!(log_contains(first, "Test completed"));
    assert!(!log_contains(first, "SimpleWriteLine"));

    let working_dir = base.path().join("WorkingDirectory").join("SimpleWriteLine");
    assert!(working_dir.join("Kernel.iso").is_file());

    let snapshot = sweep.engine.telemetry();
    assert_eq!(snapshot.kernels_passed, 2);
    assert_eq!(snapshot.kernels_failed, 0);
    Ok(())
}

#[tokio::test]
async fn compile_failure_skips_the_rest_of_its_configuration_only() -> Result<()> {
    let base = tempfile::tempdir()?;
    let kernels = ["BoxingTests", "SimpleWriteLine", "VGACompilerCrash"];
    let config = config_builder(base.path(), &kernels)
        .run_target(RunTarget::Bochs)
        .run_target(RunTarget::VMware)
        .build()?;
    let sweep = sweep(
        config,
        RecordingExecutor::new().fail_when(Tool::Il2Cpu, "SimpleWriteLine.dll"),
        all_passing(&kernels),
    );

    let report = sweep.engine.execute().await?;

    assert_eq!(
        outcomes(&report),
        vec![
            ("BoxingTests".to_owned(), RunTarget::Bochs, true),
            ("SimpleWriteLine".to_owned(), RunTarget::Bochs, false),
            ("BoxingTests".to_owned(), RunTarget::VMware, true),
            ("SimpleWriteLine".to_owned(), RunTarget::VMware, false),
        ]
    );

    let failed = &report.kernel_results()[1];
    assert!(log_contains(failed, "Exception occurred"));
    assert!(log_contains(failed, "error running process 'IL2CPU'"));
    assert!(log_contains(failed, "done running task 'IL2CPU'"));

    assert!(sweep.executor.tools_for("VGACompilerCrash").is_empty());
    assert!(sweep
        .launcher
        .launched_kernels()
        .iter()
        .all(|(kernel, _)| kernel == "BoxingTests"));

    let snapshot = sweep.engine.telemetry();
    assert_eq!(snapshot.kernels_passed, 2);
    assert_eq!(snapshot.kernels_failed, 2);
    assert_eq!(snapshot.kernels_skipped, 2);
    Ok(())
}

#[tokio::test]
async fn failed_kernel_log_is_replayed_to_the_primary_sink() -> Result<()> {
    let base = tempfile::tempdir()?;
    let kernels = ["BoxingTests", "SimpleWriteLine"];
    let sweep = sweep(
        single_target(base.path(), &kernels),
        RecordingExecutor::new().fail_when(Tool::Il2Cpu, "SimpleWriteLine.dll"),
        all_passing(&kernels),
    );

    let (output, _guard) = capture_tracing();
    let report = sweep.engine.execute().await?;
    assert_eq!(report.failed_count(), 1);

    // Once while running, once more from the replay.
    let exception = output.lines_containing("Exception occurred");
    assert_eq!(exception.len(), 2, "{exception:#?}");
    assert!(exception.iter().all(|line| line.contains("SimpleWriteLine")));
    let compile_started: Vec<_> = output
        .lines_containing("running task 'IL2CPU'")
        .into_iter()
        .filter(|line| line.contains("SimpleWriteLine") && !line.contains("done running"))
        .collect();
    assert_eq!(compile_started.len(), 2, "{compile_started:#?}");

    // Passing kernels are not replayed.
    assert_eq!(output.lines_containing("Test completed").len(), 1);
    Ok(())
}

#[tokio::test]
async fn nothing_is_replayed_when_fail_fast_is_off() -> Result<()> {
    let base = tempfile::tempdir()?;
    let kernels = ["BoxingTests", "SimpleWriteLine"];
    let config = config_builder(base.path(), &kernels)
        .run_target(RunTarget::Bochs)
        .stop_on_first_failure(false)
        .build()?;
    let sweep = sweep(
        config,
        RecordingExecutor::new().fail_when(Tool::Il2Cpu, "SimpleWriteLine.dll"),
        all_passing(&kernels),
    );

    let (output, _guard) = capture_tracing();
    let report = sweep.engine.execute().await?;
    assert_eq!(report.failed_count(), 1);
    assert_eq!(output.lines_containing("Exception occurred").len(), 1);
    Ok(())
}

#[tokio::test]
async fn sweep_continues_past_failures_when_fail_fast_is_off() -> Result<()> {
    let base = tempfile::tempdir()?;
    let kernels = ["BoxingTests", "SimpleWriteLine", "VGACompilerCrash"];
    let config = config_builder(base.path(), &kernels)
        .run_target(RunTarget::Bochs)
        .stop_on_first_failure(false)
        .build()?;
    let launcher = all_passing(&kernels).fail_launch_for("BoxingTests");
    let sweep = sweep(config, RecordingExecutor::new(), launcher);

    let report = sweep.engine.execute().await?;

    assert_eq!(report.passed_count(), 2);
    assert_eq!(report.failed_count(), 1);
    assert!(log_contains(&report.kernel_results()[0], "not installed"));
    assert_eq!(sweep.engine.telemetry().kernels_skipped, 0);
    Ok(())
}

#[tokio::test]
async fn every_image_format_is_swept_per_target() -> Result<()> {
    let base = tempfile::tempdir()?;
    let config = config_builder(base.path(), &["BoxingTests"])
        .run_target(RunTarget::HyperV)
        .image_formats([ImageFormat::Elf, ImageFormat::Flat])
        .build()?;
    let sweep = sweep(config, RecordingExecutor::new(), all_passing(&["BoxingTests"]));

    let report = sweep.engine.execute().await?;

    let formats: Vec<bool> = report
        .kernel_results()
        .iter()
        .map(|result| result.configuration.is_elf)
        .collect();
    assert_eq!(formats, vec![true, false]);
    assert!(report.all_passed());
    assert_eq!(
        sweep
            .executor
            .tools()
            .iter()
            .filter(|tool| **tool == Tool::Ld)
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn cancelled_engine_starts_no_kernel() -> Result<()> {
    let base = tempfile::tempdir()?;
    let sweep = sweep(
        single_target(base.path(), &["BoxingTests"]),
        RecordingExecutor::new(),
        all_passing(&["BoxingTests"]),
    );

    sweep.engine.cancellation_token().cancel();
    let report = sweep.engine.execute().await?;

    assert!(report.kernel_results().is_empty());
    assert!(sweep.executor.tools().is_empty());
    Ok(())
}

#[tokio::test]
async fn finished_report_round_trips_through_disk() -> Result<()> {
    let base = tempfile::tempdir()?;
    let sweep = sweep(
        single_target(base.path(), &["BoxingTests"]),
        RecordingExecutor::new(),
        all_passing(&["BoxingTests"]),
    );
    let report = sweep.engine.execute().await?;

    let path = cli::report_path(vec![base
        .path()
        .join("out")
        .join(cli::REPORT_FILE_NAME)
        .display()
        .to_string()])?;
    cli::finish(&report, &path).await;

    let loaded = TestReport::load_from_file(&path).await?;
    assert_eq!(loaded, report);
    assert_eq!(loaded.passed_count(), 1);
    Ok(())
}
