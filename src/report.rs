use crate::runtime::config::RunConfiguration;
use crate::runtime::log::LogEvent;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of one kernel under one run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelTestResult {
    pub kernel_name: String,
    pub configuration: RunConfiguration,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub captured_log: Vec<LogEvent>,
}

impl KernelTestResult {
    pub fn new(kernel_name: impl Into<String>, configuration: RunConfiguration) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            configuration,
            passed: false,
            captured_log: Vec::new(),
        }
    }
}

/// Results of one engine execution, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    kernel_results: Vec<KernelTestResult>,
}

impl TestReport {
    pub fn push(&mut self, result: KernelTestResult) {
        self.kernel_results.push(result);
    }

    pub fn kernel_results(&self) -> &[KernelTestResult] {
        &self.kernel_results
    }

    pub fn passed_count(&self) -> usize {
        self.kernel_results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.kernel_results.len() - self.passed_count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    /// Writes the report as pretty-printed JSON, creating parent directories.
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(self).context("failed to serialize test report")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write test report to {}", path.display()))
    }

    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read test report {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse test report {}", path.display()))
    }
}
