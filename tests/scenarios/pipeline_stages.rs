use std::fs;
use std::sync::Arc;

use anyhow::Result;
use kernel_harness::{
    find_harness_error, BuildPipeline, EngineConfig, HarnessError, KernelLog, KernelPackage,
    KernelSpec, RunConfiguration, RunTarget, SweepTelemetry, Tool,
};

use crate::support::helpers::{config_builder, init_tracing};
use crate::support::mock_tools::{FixtureKit, RecordingExecutor};

struct Fixture {
    kit: FixtureKit,
    work: tempfile::TempDir,
    executor: Arc<RecordingExecutor>,
    telemetry: Arc<SweepTelemetry>,
    pipeline: BuildPipeline,
}

fn fixture(config: EngineConfig, executor: RecordingExecutor) -> Fixture {
    init_tracing();
    let kit = FixtureKit::new();
    let executor = Arc::new(executor);
    let telemetry = Arc::new(SweepTelemetry::default());
    let pipeline = BuildPipeline::new(
        Arc::new(config),
        Arc::new(kit.locator()),
        executor.clone(),
        telemetry.clone(),
    );
    Fixture {
        kit,
        work: tempfile::tempdir().unwrap(),
        executor,
        telemetry,
        pipeline,
    }
}

fn default_config(base: &std::path::Path) -> EngineConfig {
    config_builder(base, &["BoxingTests"])
        .run_target(RunTarget::HyperV)
        .build()
        .unwrap()
}

fn kernel() -> KernelSpec {
    KernelSpec::new("BoxingTests", "/kernels/BoxingTests.dll")
}

#[tokio::test]
async fn elf_build_links_and_extracts_symbols() -> Result<()> {
    let base = tempfile::tempdir()?;
    let fx = fixture(default_config(base.path()), RecordingExecutor::new());
    let log = KernelLog::new("BoxingTests");
    let configuration = RunConfiguration {
        is_elf: true,
        run_target: RunTarget::HyperV,
    };

    let image = fx
        .pipeline
        .build(&kernel(), fx.work.path(), configuration, &log)
        .await?;

    assert_eq!(
        fx.executor.tools(),
        vec![Tool::Il2Cpu, Tool::Nasm, Tool::Ld, Tool::ObjDump, Tool::IsoMaker]
    );

    let work = fx.work.path();
    let requests = fx.executor.requests();
    let ld = &requests[2];
    let object = work.join("Kernel.obj").display().to_string();
    let temp_object = work.join("Kernel.o").display().to_string();
    assert_eq!(
        ld.args,
        vec![
            "-Ttext",
            "0x2000000",
            "-Tdata",
            "0x1000000",
            "-e",
            "Kernel_Start",
            "-o",
            object.as_str(),
            temp_object.as_str(),
        ]
    );
    assert_eq!(requests[1].keyed_arg("IsELF"), Some("True"));
    assert_eq!(requests[3].args[..2], ["--wide".to_owned(), "--syms".to_owned()]);

    assert!(work.join("Kernel.o").is_file());
    assert_eq!(image.map.as_deref(), Some(work.join("Kernel.map").as_path()));
    assert!(work.join("Kernel.map").is_file());
    assert_eq!(image.iso, work.join("Kernel.iso"));
    assert_eq!(image.disk, work.join("Harddisk.vhdx"));
    assert_eq!(fs::read(&image.disk)?, b"vhdx");

    let started: Vec<String> = log
        .events()
        .into_iter()
        .filter_map(|event| {
            event
                .message
                .strip_prefix("running task '")
                .map(|rest| rest.trim_end_matches('\'').to_owned())
        })
        .collect();
    assert_eq!(
        started,
        vec!["IL2CPU", "Nasm", "Ld", "ExtractMapFromElfFile", "StageDisk", "MakeISO"]
    );
    assert_eq!(fx.telemetry.snapshot().tasks_run, 6);
    Ok(())
}

#[tokio::test]
async fn flat_build_skips_link_and_symbol_stages() -> Result<()> {
    let base = tempfile::tempdir()?;
    let fx = fixture(default_config(base.path()), RecordingExecutor::new());
    let log = KernelLog::new("BoxingTests");
    let configuration = RunConfiguration {
        is_elf: false,
        run_target: RunTarget::VMware,
    };

    let image = fx
        .pipeline
        .build(&kernel(), fx.work.path(), configuration, &log)
        .await?;

    assert_eq!(
        fx.executor.tools(),
        vec![Tool::Il2Cpu, Tool::Nasm, Tool::IsoMaker]
    );
    assert_eq!(fx.executor.requests()[1].keyed_arg("IsELF"), Some("False"));
    assert!(image.map.is_none());
    assert!(!fx.work.path().join("Kernel.o").exists());
    assert_eq!(image.disk, fx.work.path().join("Harddisk.vmdk"));
    assert!(!log.contains("running task 'Ld'"));
    Ok(())
}

#[tokio::test]
async fn x86_platform_preprocesses_before_compiling() -> Result<()> {
    let base = tempfile::tempdir()?;
    let config = config_builder(base.path(), &["BoxingTests"])
        .run_target(RunTarget::Bochs)
        .kernel_package(KernelPackage::X86)
        .build()?;
    let fx = fixture(config, RecordingExecutor::new());
    let log = KernelLog::new("BoxingTests");

    fx.pipeline
        .build(
            &kernel(),
            fx.work.path(),
            RunConfiguration {
                is_elf: false,
                run_target: RunTarget::Bochs,
            },
            &log,
        )
        .await?;

    let requests = fx.executor.requests();
    assert_eq!(requests[0].tool, Tool::TheRingMaster);
    assert_eq!(requests[0].args, vec!["/kernels/BoxingTests.dll"]);
    assert_eq!(requests[1].keyed_arg("KernelPkg"), Some("X86"));
    assert!(requests[0].program.starts_with(fx.kit.path()));
    Ok(())
}

#[tokio::test]
async fn first_failing_stage_aborts_the_build() -> Result<()> {
    let base = tempfile::tempdir()?;
    let fx = fixture(
        default_config(base.path()),
        RecordingExecutor::new().fail_when(Tool::Nasm, "Kernel.asm"),
    );
    let log = KernelLog::new("BoxingTests");

    let err = fx
        .pipeline
        .build(
            &kernel(),
            fx.work.path(),
            RunConfiguration {
                is_elf: true,
                run_target: RunTarget::HyperV,
            },
            &log,
        )
        .await
        .expect_err("assembler failure must abort the build");

    assert!(matches!(
        find_harness_error(&err),
        Some(HarnessError::ProcessFailure { tool, .. }) if tool == "NASM"
    ));
    assert_eq!(fx.executor.tools(), vec![Tool::Il2Cpu, Tool::Nasm]);
    assert!(log.contains("done running task 'Nasm'"));
    assert!(!fx.work.path().join("Harddisk.vhdx").exists());

    let snapshot = fx.telemetry.snapshot();
    assert_eq!(snapshot.tasks_run, 2);
    assert_eq!(snapshot.tasks_failed, 1);
    Ok(())
}

#[tokio::test]
async fn missing_iso_is_reported_as_missing_artifact() -> Result<()> {
    let base = tempfile::tempdir()?;
    let fx = fixture(
        default_config(base.path()),
        RecordingExecutor::new().without_output(Tool::IsoMaker),
    );
    let log = KernelLog::new("BoxingTests");

    let err = fx
        .pipeline
        .build(
            &kernel(),
            fx.work.path(),
            RunConfiguration {
                is_elf: false,
                run_target: RunTarget::Bochs,
            },
            &log,
        )
        .await
        .expect_err("missing ISO must fail the build");

    match find_harness_error(&err) {
        Some(HarnessError::MissingArtifact { path }) => {
            assert_eq!(path, &fx.work.path().join("Kernel.iso"))
        }
        other => panic!("expected missing artifact, got {other:?}"),
    }
    Ok(())
}
