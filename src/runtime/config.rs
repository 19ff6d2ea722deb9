use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const DEFAULT_ALLOWED_SECONDS_IN_KERNEL: u64 = 1_800;
const WORKING_DIRECTORY_NAME: &str = "WorkingDirectory";

/// Emulator backend used to boot an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunTarget {
    Bochs,
    VMware,
    HyperV,
}

impl fmt::Display for RunTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunTarget::Bochs => "Bochs",
            RunTarget::VMware => "VMware",
            RunTarget::HyperV => "HyperV",
        };
        f.write_str(name)
    }
}

/// Layout the assembler emits for the kernel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Elf,
    Flat,
}

/// One point of the configuration sweep: image format paired with a run target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub is_elf: bool,
    pub run_target: RunTarget,
}

impl fmt::Display for RunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IsELF = {}, Target = {}", self.is_elf, self.run_target)
    }
}

/// Kernel platform package handed to the compiler; selects the reference set
/// and whether the pre-link preprocessing stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelPackage {
    X86,
    #[default]
    Core,
}

impl KernelPackage {
    /// Value passed as `KernelPkg:` on the compiler command line.
    pub fn compiler_name(&self) -> &'static str {
        match self {
            KernelPackage::X86 => "X86",
            KernelPackage::Core => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TraceAssemblies {
    All,
    Cosmos,
    #[default]
    User,
}

impl fmt::Display for TraceAssemblies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StackCorruptionDetectionLevel {
    AllInstructions,
    #[default]
    MethodFooters,
}

impl fmt::Display for StackCorruptionDetectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A kernel program under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    pub name: String,
    pub path: PathBuf,
}

impl KernelSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Settings for one engine execution.
///
/// Construct through [`EngineConfig::builder`] or [`EngineConfig::new`]; both
/// validate before handing out an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    kernels: Vec<KernelSpec>,
    run_targets: Vec<RunTarget>,
    image_formats: Vec<ImageFormat>,
    kernel_package: KernelPackage,
    allowed_in_kernel: Duration,
    tool_timeout: Duration,
    enable_stack_corruption_checks: bool,
    stack_corruption_detection_level: StackCorruptionDetectionLevel,
    trace_assemblies: TraceAssemblies,
    run_with_gdb: bool,
    working_directory_base: PathBuf,
    stop_on_first_failure: bool,
}

pub struct EngineConfigParams {
    pub kernels: Vec<KernelSpec>,
    pub run_targets: Vec<RunTarget>,
    pub image_formats: Vec<ImageFormat>,
    pub kernel_package: KernelPackage,
    pub allowed_in_kernel: Duration,
    pub tool_timeout: Duration,
    pub enable_stack_corruption_checks: bool,
    pub stack_corruption_detection_level: StackCorruptionDetectionLevel,
    pub trace_assemblies: TraceAssemblies,
    pub run_with_gdb: bool,
    pub working_directory_base: PathBuf,
    pub stop_on_first_failure: bool,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn new(params: EngineConfigParams) -> Result<Self> {
        let EngineConfigParams {
            kernels,
            run_targets,
            image_formats,
            kernel_package,
            allowed_in_kernel,
            tool_timeout,
            enable_stack_corruption_checks,
            stack_corruption_detection_level,
            trace_assemblies,
            run_with_gdb,
            working_directory_base,
            stop_on_first_failure,
        } = params;

        let config = Self {
            kernels: kernels
                .into_iter()
                .map(|kernel| KernelSpec::new(kernel.name.trim(), kernel.path))
                .collect(),
            run_targets,
            image_formats,
            kernel_package,
            allowed_in_kernel,
            tool_timeout,
            enable_stack_corruption_checks,
            stack_corruption_detection_level,
            trace_assemblies,
            run_with_gdb,
            working_directory_base,
            stop_on_first_failure,
        };

        config.validate()?;
        Ok(config)
    }

    /// Kernels to run, in execution order.
    pub fn kernels(&self) -> &[KernelSpec] {
        &self.kernels
    }

    pub fn run_targets(&self) -> &[RunTarget] {
        &self.run_targets
    }

    pub fn image_formats(&self) -> &[ImageFormat] {
        &self.image_formats
    }

    pub fn kernel_package(&self) -> KernelPackage {
        self.kernel_package
    }

    /// Wall-clock budget for one booted kernel to report a verdict.
    pub fn allowed_in_kernel(&self) -> Duration {
        self.allowed_in_kernel
    }

    /// Hard limit for a single external tool invocation.
    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    pub fn enable_stack_corruption_checks(&self) -> bool {
        self.enable_stack_corruption_checks
    }

    pub fn stack_corruption_detection_level(&self) -> StackCorruptionDetectionLevel {
        self.stack_corruption_detection_level
    }

    pub fn trace_assemblies(&self) -> TraceAssemblies {
        self.trace_assemblies
    }

    /// When set, interrupt notifications from the debug stub are logged.
    pub fn run_with_gdb(&self) -> bool {
        self.run_with_gdb
    }

    pub fn working_directory_base(&self) -> &Path {
        &self.working_directory_base
    }

    /// Skip the remaining kernels of a configuration once one has failed.
    pub fn stop_on_first_failure(&self) -> bool {
        self.stop_on_first_failure
    }

    /// Expands run targets and image formats into the configuration sweep.
    pub fn run_configurations(&self) -> Vec<RunConfiguration> {
        self.run_targets
            .iter()
            .flat_map(|&run_target| {
                self.image_formats.iter().map(move |format| RunConfiguration {
                    is_elf: *format == ImageFormat::Elf,
                    run_target,
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.kernels.is_empty() {
            bail!("kernels must contain at least one kernel");
        }

        if let Some(kernel) = self.kernels.iter().find(|kernel| kernel.name.is_empty()) {
            bail!(
                "kernel names cannot be empty (path {})",
                kernel.path.display()
            );
        }

        // Each kernel's working directory is wiped before its run, so the
        // name must stay a single directory directly under the base.
        if let Some(kernel) = self
            .kernels
            .iter()
            .find(|kernel| !is_single_normal_component(&kernel.name))
        {
            bail!(
                "kernel name '{}' must be a plain directory name",
                kernel.name
            );
        }

        if self.run_targets.is_empty() {
            bail!("no run targets were specified");
        }

        if self.image_formats.is_empty() {
            bail!("image_formats must contain at least one format");
        }

        if self.allowed_in_kernel.is_zero() {
            bail!("allowed_in_kernel must be greater than 0");
        }

        if self.tool_timeout.is_zero() {
            bail!("tool_timeout must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct EngineConfigBuilder {
    kernels: Vec<KernelSpec>,
    run_targets: Vec<RunTarget>,
    image_formats: Option<Vec<ImageFormat>>,
    kernel_package: Option<KernelPackage>,
    allowed_in_kernel: Option<Duration>,
    tool_timeout: Option<Duration>,
    enable_stack_corruption_checks: Option<bool>,
    stack_corruption_detection_level: Option<StackCorruptionDetectionLevel>,
    trace_assemblies: Option<TraceAssemblies>,
    run_with_gdb: Option<bool>,
    working_directory_base: Option<PathBuf>,
    stop_on_first_failure: Option<bool>,
}

impl EngineConfigBuilder {
    pub fn kernel(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.kernels.push(KernelSpec::new(name, path));
        self
    }

    pub fn run_target(mut self, target: RunTarget) -> Self {
        if !self.run_targets.contains(&target) {
            self.run_targets.push(target);
        }
        self
    }

    pub fn image_formats(mut self, formats: impl IntoIterator<Item = ImageFormat>) -> Self {
        self.image_formats = Some(formats.into_iter().collect());
        self
    }

    pub fn kernel_package(mut self, package: KernelPackage) -> Self {
        self.kernel_package = Some(package);
        self
    }

    pub fn allowed_in_kernel(mut self, allowed: Duration) -> Self {
        self.allowed_in_kernel = Some(allowed);
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn enable_stack_corruption_checks(mut self, enabled: bool) -> Self {
        self.enable_stack_corruption_checks = Some(enabled);
        self
    }

    pub fn stack_corruption_detection_level(
        mut self,
        level: StackCorruptionDetectionLevel,
    ) -> Self {
        self.stack_corruption_detection_level = Some(level);
        self
    }

    pub fn trace_assemblies(mut self, level: TraceAssemblies) -> Self {
        self.trace_assemblies = Some(level);
        self
    }

    pub fn run_with_gdb(mut self, enabled: bool) -> Self {
        self.run_with_gdb = Some(enabled);
        self
    }

    pub fn working_directory_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.working_directory_base = Some(base.into());
        self
    }

    pub fn stop_on_first_failure(mut self, enabled: bool) -> Self {
        self.stop_on_first_failure = Some(enabled);
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let allowed_in_kernel = self
            .allowed_in_kernel
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_ALLOWED_SECONDS_IN_KERNEL));
        let working_directory_base = match self.working_directory_base {
            Some(base) => base,
            None => default_working_directory_base()
                .context("working_directory_base is required when the executable path is unknown")?,
        };

        let params = EngineConfigParams {
            kernels: self.kernels,
            run_targets: self.run_targets,
            image_formats: self.image_formats.unwrap_or_else(|| vec![ImageFormat::Elf]),
            kernel_package: self.kernel_package.unwrap_or_default(),
            allowed_in_kernel,
            tool_timeout: self.tool_timeout.unwrap_or(allowed_in_kernel),
            enable_stack_corruption_checks: self.enable_stack_corruption_checks.unwrap_or(true),
            stack_corruption_detection_level: self
                .stack_corruption_detection_level
                .unwrap_or_default(),
            trace_assemblies: self.trace_assemblies.unwrap_or_default(),
            run_with_gdb: self.run_with_gdb.unwrap_or(false),
            working_directory_base,
            stop_on_first_failure: self.stop_on_first_failure.unwrap_or(true),
        };

        EngineConfig::new(params)
    }
}

fn is_single_normal_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

/// `WorkingDirectory` next to the running executable.
pub fn default_working_directory_base() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let dir = exe
        .parent()
        .context("current executable has no parent directory")?;
    Ok(dir.join(WORKING_DIRECTORY_NAME))
}
