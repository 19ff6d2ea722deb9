//! Resolution of external tools and template files.
//!
//! Tools are looked up in two tiers: a development checkout (the tools are
//! run from source through `dotnet run`) and, failing that, the packaged
//! user kit. The pipeline only sees the [`ToolLocator`] trait.

use crate::runtime::config::RunTarget;
use anyhow::{bail, Context, Result};
use std::env::consts::EXE_SUFFIX;
use std::fmt;
use std::path::{Path, PathBuf};

/// Logical external tools used by the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    TheRingMaster,
    Il2Cpu,
    Nasm,
    Ld,
    ObjDump,
    IsoMaker,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tool::TheRingMaster => "TheRingMaster",
            Tool::Il2Cpu => "IL2CPU",
            Tool::Nasm => "NASM",
            Tool::Ld => "ld",
            Tool::ObjDump => "objdump",
            Tool::IsoMaker => "IsoMaker",
        };
        f.write_str(name)
    }
}

/// How to start a resolved tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    /// `None` runs the tool in the kernel's working directory.
    pub working_dir: Option<PathBuf>,
    /// Arguments placed before the stage's own arguments.
    pub leading_args: Vec<String>,
}

impl ToolInvocation {
    fn packaged(program: PathBuf, working_dir: Option<PathBuf>) -> Self {
        Self {
            program,
            working_dir,
            leading_args: Vec::new(),
        }
    }

    fn dotnet_run(project_dir: PathBuf, extra: &[&str]) -> Self {
        let mut leading_args = vec!["run".to_owned()];
        leading_args.extend(extra.iter().map(|arg| (*arg).to_owned()));
        Self {
            program: PathBuf::from("dotnet"),
            working_dir: Some(project_dir),
            leading_args,
        }
    }
}

pub trait ToolLocator: Send + Sync {
    fn locate(&self, tool: Tool) -> Result<ToolInvocation>;

    /// Path of the raw assembler binary wrapped by [`Tool::Nasm`].
    fn assembler_binary(&self) -> Result<PathBuf>;

    /// Path of a support library passed to the compiler as a reference.
    fn reference_library(&self, name: &str) -> Result<PathBuf>;

    /// Template disk image booted alongside the kernel for `target`.
    fn disk_template(&self, target: RunTarget) -> Result<PathBuf>;
}

/// Two-tier locator over a development checkout and a user kit.
#[derive(Debug, Clone)]
pub struct LayoutToolLocator {
    dev_root: Option<PathBuf>,
    user_kit: PathBuf,
}

impl LayoutToolLocator {
    pub fn new(dev_root: Option<PathBuf>, user_kit: impl Into<PathBuf>) -> Self {
        Self {
            dev_root,
            user_kit: user_kit.into(),
        }
    }

    /// Walks up from `start` looking for a checkout (a directory with a
    /// `source` child); falls back to the user kit alone when none is found.
    pub fn discover(start: &Path, user_kit: impl Into<PathBuf>) -> Self {
        let dev_root = start
            .ancestors()
            .find(|dir| dir.join("source").is_dir())
            .map(Path::to_path_buf);
        Self::new(dev_root, user_kit)
    }

    pub fn dev_root(&self) -> Option<&Path> {
        self.dev_root.as_deref()
    }

    fn build_dir(&self) -> PathBuf {
        self.user_kit.join("Build")
    }

    fn dev_dir(&self, relative: &[&str]) -> Option<PathBuf> {
        let mut dir = self.dev_root.clone()?;
        for part in relative {
            dir.push(part);
        }
        dir.is_dir().then_some(dir)
    }

    fn packaged_exe(&self, dir: &[&str], name: &str) -> PathBuf {
        let mut path = self.build_dir();
        for part in dir {
            path.push(part);
        }
        path.join(format!("{name}{EXE_SUFFIX}"))
    }

    fn packaged_dir(&self, dir: &str) -> PathBuf {
        self.build_dir().join(dir)
    }
}

impl ToolLocator for LayoutToolLocator {
    fn locate(&self, tool: Tool) -> Result<ToolInvocation> {
        let invocation = match tool {
            Tool::TheRingMaster => match self.dev_dir(&["source", "TheRingMaster"]) {
                Some(dir) => ToolInvocation::dotnet_run(dir, &["--no-build"]),
                None => ToolInvocation::packaged(
                    self.packaged_exe(&["TheRingMaster"], "TheRingMaster"),
                    Some(self.packaged_dir("TheRingMaster")),
                ),
            },
            Tool::Il2Cpu => match self.dev_dir(&["..", "IL2CPU", "source", "IL2CPU"]) {
                Some(dir) => ToolInvocation::dotnet_run(dir, &["--no-build", "--"]),
                None => ToolInvocation::packaged(
                    self.packaged_exe(&["IL2CPU"], "IL2CPU"),
                    Some(self.packaged_dir("IL2CPU")),
                ),
            },
            Tool::Nasm => match self.dev_dir(&["Tools", "NASM"]) {
                Some(dir) => ToolInvocation::dotnet_run(dir, &["--"]),
                None => {
                    let dir = self.packaged_dir("NASM");
                    if !dir.is_dir() {
                        bail!("NASM path not found (looked in {})", dir.display());
                    }
                    ToolInvocation::packaged(self.packaged_exe(&["NASM"], "NASM"), Some(dir))
                }
            },
            Tool::Ld => ToolInvocation::packaged(self.packaged_exe(&["tools", "cygwin"], "ld"), None),
            Tool::ObjDump => {
                ToolInvocation::packaged(self.packaged_exe(&["tools", "cygwin"], "objdump"), None)
            }
            Tool::IsoMaker => ToolInvocation::packaged(
                self.packaged_exe(&["IsoMaker"], "IsoMaker"),
                None,
            ),
        };

        tracing::debug!(
            tool = %tool,
            program = %invocation.program.display(),
            "resolved tool"
        );
        Ok(invocation)
    }

    fn assembler_binary(&self) -> Result<PathBuf> {
        let base = self
            .dev_dir(&["Tools", "NASM"])
            .and(self.dev_root.clone())
            .unwrap_or_else(|| self.user_kit.clone());
        Ok(base
            .join("Build")
            .join("Tools")
            .join("NAsm")
            .join(format!("nasm{EXE_SUFFIX}")))
    }

    fn reference_library(&self, name: &str) -> Result<PathBuf> {
        if name.trim().is_empty() {
            bail!("reference library name cannot be empty");
        }
        Ok(self.build_dir().join("Kernel").join(format!("{name}.dll")))
    }

    fn disk_template(&self, target: RunTarget) -> Result<PathBuf> {
        let path = match target {
            RunTarget::HyperV => self.build_dir().join("HyperV").join("Filesystem.vhdx"),
            RunTarget::Bochs | RunTarget::VMware => self
                .build_dir()
                .join("VMware")
                .join("Workstation")
                .join("Filesystem.vmdk"),
        };
        Ok(path)
    }
}

/// Reads the user kit location from `KERNEL_HARNESS_USER_KIT`.
pub fn user_kit_from_env() -> Result<PathBuf> {
    std::env::var_os("KERNEL_HARNESS_USER_KIT")
        .map(PathBuf::from)
        .context("KERNEL_HARNESS_USER_KIT is not set")
}
