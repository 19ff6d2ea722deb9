use std::path::PathBuf;
use std::time::Duration;

/// Typed failures raised by the harness. Everything else travels as a plain
/// [`anyhow::Error`] with context attached along the way.
#[derive(Debug)]
pub enum HarnessError {
    /// An external tool exited non-zero, timed out, or could not be spawned.
    ProcessFailure { tool: String, reason: String },
    /// The kernel did not report a verdict before the allowed duration ran out.
    Timeout { allowed: Duration },
    /// A stage finished but the artifact it should have produced is missing.
    MissingArtifact { path: PathBuf },
    /// A core dump shorter than the register block or not word aligned.
    MalformedCoreDump { len: usize },
}

impl HarnessError {
    pub fn process_failure(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessFailure {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error was caused by the kernel run deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }
}

impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessError::ProcessFailure { tool, reason } => {
                write!(f, "error running process '{tool}': {reason}")
            }
            HarnessError::Timeout { allowed } => {
                write!(f, "timeout exceeded: kernel still running after {allowed:?}")
            }
            HarnessError::MissingArtifact { path } => {
                write!(f, "expected artifact {} was not produced", path.display())
            }
            HarnessError::MalformedCoreDump { len } => {
                write!(f, "malformed core dump of {len} bytes")
            }
        }
    }
}

impl std::error::Error for HarnessError {}

/// Finds a [`HarnessError`] anywhere in an `anyhow` chain.
pub fn find_harness_error(err: &anyhow::Error) -> Option<&HarnessError> {
    err.chain().find_map(|cause| cause.downcast_ref::<HarnessError>())
}
