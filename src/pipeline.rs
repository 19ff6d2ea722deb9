//! Build pipeline: turns a kernel assembly into a bootable image.
//!
//! Stages run in a fixed order, each wrapped by [`run_task`]:
//!
//! 1. `TheRingMaster` (X86 platform only)
//! 2. `IL2CPU` compile to `Kernel.asm`
//! 3. `Nasm` assemble to `Kernel.obj`
//! 4. `Ld` and `ExtractMapFromElfFile` (ELF images only)
//! 5. `StageDisk` copy of the target's disk template
//! 6. `MakeISO` packaging to `Kernel.iso`
//!
//! The first failing stage aborts the build; nothing is cleaned up.

pub mod executor;
pub mod references;

use crate::error::HarnessError;
use crate::host::BootImage;
use crate::runtime::config::{EngineConfig, KernelPackage, KernelSpec, RunConfiguration, RunTarget};
use crate::runtime::locator::{Tool, ToolLocator};
use crate::runtime::log::KernelLog;
use crate::runtime::task::run_task;
use crate::runtime::telemetry::SweepTelemetry;
use anyhow::{Context, Result};
use executor::{ToolExecutor, ToolRequest};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ASSEMBLY_FILE: &str = "Kernel.asm";
pub const OBJECT_FILE: &str = "Kernel.obj";
pub const TEMP_OBJECT_FILE: &str = "Kernel.o";
pub const MAP_FILE: &str = "Kernel.map";
pub const ISO_FILE: &str = "Kernel.iso";

const LD_TEXT_ADDRESS: &str = "0x2000000";
const LD_DATA_ADDRESS: &str = "0x1000000";
const LD_ENTRY_POINT: &str = "Kernel_Start";

/// File names of the pipeline's outputs inside one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifacts {
    pub assembly: PathBuf,
    pub object: PathBuf,
    pub temp_object: PathBuf,
    pub map: PathBuf,
    pub iso: PathBuf,
}

impl BuildArtifacts {
    pub fn in_dir(working_dir: &Path) -> Self {
        Self {
            assembly: working_dir.join(ASSEMBLY_FILE),
            object: working_dir.join(OBJECT_FILE),
            temp_object: working_dir.join(TEMP_OBJECT_FILE),
            map: working_dir.join(MAP_FILE),
            iso: working_dir.join(ISO_FILE),
        }
    }
}

/// Disk image name the host expects in the working directory for `target`.
pub fn staged_disk_name(target: RunTarget) -> &'static str {
    match target {
        RunTarget::HyperV => "Harddisk.vhdx",
        RunTarget::Bochs | RunTarget::VMware => "Harddisk.vmdk",
    }
}

pub struct BuildPipeline {
    config: Arc<EngineConfig>,
    locator: Arc<dyn ToolLocator>,
    executor: Arc<dyn ToolExecutor>,
    telemetry: Arc<SweepTelemetry>,
}

impl BuildPipeline {
    pub fn new(
        config: Arc<EngineConfig>,
        locator: Arc<dyn ToolLocator>,
        executor: Arc<dyn ToolExecutor>,
        telemetry: Arc<SweepTelemetry>,
    ) -> Self {
        Self {
            config,
            locator,
            executor,
            telemetry,
        }
    }

    /// Runs every stage for `kernel` inside `working_dir`.
    pub async fn build(
        &self,
        kernel: &KernelSpec,
        working_dir: &Path,
        configuration: RunConfiguration,
        log: &KernelLog,
    ) -> Result<BootImage> {
        let artifacts = BuildArtifacts::in_dir(working_dir);

        if self.config.kernel_package() == KernelPackage::X86 {
            self.stage("TheRingMaster", log, self.ring_master(kernel, working_dir, log))
                .await?;
        }

        self.stage("IL2CPU", log, self.compile(kernel, &artifacts, working_dir, log))
            .await?;
        self.stage(
            "Nasm",
            log,
            self.assemble(&artifacts, configuration.is_elf, working_dir, log),
        )
        .await?;

        let map = if configuration.is_elf {
            tokio::fs::rename(&artifacts.object, &artifacts.temp_object)
                .await
                .with_context(|| {
                    format!(
                        "failed to move {} to {}",
                        artifacts.object.display(),
                        artifacts.temp_object.display()
                    )
                })?;

            self.stage("Ld", log, self.link(&artifacts, working_dir, log))
                .await?;
            self.stage(
                "ExtractMapFromElfFile",
                log,
                self.extract_map(&artifacts, working_dir, log),
            )
            .await?;
            Some(artifacts.map.clone())
        } else {
            None
        };

        let disk = self
            .stage(
                "StageDisk",
                log,
                self.stage_disk(configuration.run_target, working_dir),
            )
            .await?;

        self.stage("MakeISO", log, self.make_iso(&artifacts, working_dir, log))
            .await?;

        Ok(BootImage {
            iso: artifacts.iso,
            disk,
            working_dir: working_dir.to_path_buf(),
            map,
        })
    }

    async fn stage<T, F>(&self, name: &str, log: &KernelLog, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = run_task(name, log, work).await;
        self.telemetry.record_task(outcome.is_ok());
        outcome
    }

    fn request(&self, tool: Tool, args: Vec<String>, working_dir: &Path) -> Result<ToolRequest> {
        let invocation = self.locator.locate(tool)?;
        let mut full_args = invocation.leading_args;
        full_args.extend(args);
        Ok(ToolRequest {
            tool,
            program: invocation.program,
            args: full_args,
            working_dir: invocation
                .working_dir
                .unwrap_or_else(|| working_dir.to_path_buf()),
            stdout_to: None,
            timeout: self.config.tool_timeout(),
        })
    }

    async fn ring_master(&self, kernel: &KernelSpec, working_dir: &Path, log: &KernelLog) -> Result<()> {
        let request = self.request(
            Tool::TheRingMaster,
            vec![kernel.path.display().to_string()],
            working_dir,
        )?;
        self.executor.execute(request, log).await
    }

    async fn compile(
        &self,
        kernel: &KernelSpec,
        artifacts: &BuildArtifacts,
        working_dir: &Path,
        log: &KernelLog,
    ) -> Result<()> {
        let args = self.compiler_args(kernel, &artifacts.assembly)?;
        let request = self.request(Tool::Il2Cpu, args, working_dir)?;
        self.executor.execute(request, log).await
    }

    /// Compiler arguments for `kernel`, ending with one `References:` entry
    /// per referenced assembly (the kernel itself first).
    pub fn compiler_args(&self, kernel: &KernelSpec, output: &Path) -> Result<Vec<String>> {
        let config = &self.config;
        let mut args = vec![
            format!("KernelPkg:{}", config.kernel_package().compiler_name()),
            "EnableDebug:True".to_owned(),
            format!(
                "EnableStackCorruptionDetection:{}",
                dotnet_bool(config.enable_stack_corruption_checks())
            ),
            format!(
                "StackCorruptionDetectionLevel:{}",
                config.stack_corruption_detection_level()
            ),
            "DebugMode:Source".to_owned(),
            format!("TraceAssemblies:{}", config.trace_assemblies()),
            "DebugCom:1".to_owned(),
            format!("OutputFilename:{}", output.display()),
            "EnableLogging:True".to_owned(),
            "EmitDebugSymbols:True".to_owned(),
            "IgnoreDebugStubAttribute:False".to_owned(),
        ];

        args.push(format!("References:{}", kernel.path.display()));
        for name in references::reference_set(config.kernel_package()) {
            let library = self
                .locator
                .reference_library(name)
                .with_context(|| format!("resolving reference {name}"))?;
            args.push(format!("References:{}", library.display()));
        }

        Ok(args)
    }

    async fn assemble(
        &self,
        artifacts: &BuildArtifacts,
        is_elf: bool,
        working_dir: &Path,
        log: &KernelLog,
    ) -> Result<()> {
        let assembler = self.locator.assembler_binary()?;
        let args = vec![
            format!("ExePath:{}", assembler.display()),
            format!("InputFile:{}", artifacts.assembly.display()),
            format!("OutputFile:{}", artifacts.object.display()),
            format!("IsELF:{}", dotnet_bool(is_elf)),
        ];
        let request = self.request(Tool::Nasm, args, working_dir)?;
        self.executor.execute(request, log).await
    }

    async fn link(&self, artifacts: &BuildArtifacts, working_dir: &Path, log: &KernelLog) -> Result<()> {
        let args = vec![
            "-Ttext".to_owned(),
            LD_TEXT_ADDRESS.to_owned(),
            "-Tdata".to_owned(),
            LD_DATA_ADDRESS.to_owned(),
            "-e".to_owned(),
            LD_ENTRY_POINT.to_owned(),
            "-o".to_owned(),
            forward_slashes(&artifacts.object),
            forward_slashes(&artifacts.temp_object),
        ];
        let request = self.request(Tool::Ld, args, working_dir)?;
        self.executor.execute(request, log).await
    }

    async fn extract_map(
        &self,
        artifacts: &BuildArtifacts,
        working_dir: &Path,
        log: &KernelLog,
    ) -> Result<()> {
        match tokio::fs::remove_file(&artifacts.map).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove stale {}", artifacts.map.display()))
            }
        }

        let args = vec![
            "--wide".to_owned(),
            "--syms".to_owned(),
            artifacts.object.display().to_string(),
        ];
        let mut request = self.request(Tool::ObjDump, args, working_dir)?;
        request.stdout_to = Some(artifacts.map.clone());
        self.executor.execute(request, log).await
    }

    async fn stage_disk(&self, target: RunTarget, working_dir: &Path) -> Result<PathBuf> {
        let template = self.locator.disk_template(target)?;
        let staged = working_dir.join(staged_disk_name(target));
        tokio::fs::copy(&template, &staged).await.with_context(|| {
            format!(
                "failed to copy disk template {} to {}",
                template.display(),
                staged.display()
            )
        })?;
        Ok(staged)
    }

    async fn make_iso(&self, artifacts: &BuildArtifacts, working_dir: &Path, log: &KernelLog) -> Result<()> {
        let args = vec![
            artifacts.object.display().to_string(),
            artifacts.iso.display().to_string(),
        ];
        let request = self.request(Tool::IsoMaker, args, working_dir)?;
        self.executor.execute(request, log).await?;

        if !tokio::fs::try_exists(&artifacts.iso).await.unwrap_or(false) {
            return Err(HarnessError::MissingArtifact {
                path: artifacts.iso.clone(),
            }
            .into());
        }
        Ok(())
    }
}

fn dotnet_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn forward_slashes(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}
