//! Process entry helpers for a test-runner binary.

use crate::engine::Engine;
use crate::report::TestReport;
use crate::runtime::config::default_working_directory_base;
use crate::runtime::telemetry::init_tracing;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

pub const REPORT_FILE_NAME: &str = "TestRunnerLog.json";

/// Report location: the single positional argument when given, otherwise
/// `TestRunnerLog.json` in the default working directory base.
///
/// `args` excludes the program name.
pub fn report_path<I>(args: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let first = args.next();
    if args.next().is_some() {
        bail!("expected at most one argument: the report output path");
    }

    match first {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(default_working_directory_base()?.join(REPORT_FILE_NAME)),
    }
}

/// Logs the pass/fail counts, then writes the report. A failed write is
/// logged, not returned, so the counts are never lost.
pub async fn finish(report: &TestReport, path: &Path) {
    tracing::info!(
        passed = report.passed_count(),
        failed = report.failed_count(),
        "{} test(s) passed, {} test(s) failed",
        report.passed_count(),
        report.failed_count()
    );

    match report.save_to_file(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "test report written"),
        Err(err) => {
            let error = format!("{err:#}");
            tracing::error!(path = %path.display(), error = %error, "failed to write test report");
        }
    }
}

/// Full process flow: tracing, sweep (Ctrl-C aware), report.
pub async fn run<I>(engine: &Engine, args: I) -> Result<TestReport>
where
    I: IntoIterator<Item = String>,
{
    init_tracing();
    let path = report_path(args)?;
    let report = engine.run_until_ctrl_c().await?;
    finish(&report, &path).await;
    Ok(report)
}
