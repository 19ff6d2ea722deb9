use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Counters accumulated over one configuration sweep.
#[derive(Default, Debug)]
pub struct SweepTelemetry {
    kernels_passed: AtomicU64,
    kernels_failed: AtomicU64,
    kernels_skipped: AtomicU64,
    tasks_run: AtomicU64,
    tasks_failed: AtomicU64,
    timeouts: AtomicU64,
}

impl SweepTelemetry {
    pub fn record_kernel(&self, passed: bool) {
        if passed {
            self.kernels_passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.kernels_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.kernels_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_task(&self, succeeded: bool) {
        self.tasks_run.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            kernels_passed: self.kernels_passed.load(Ordering::Relaxed),
            kernels_failed: self.kernels_failed.load(Ordering::Relaxed),
            kernels_skipped: self.kernels_skipped.load(Ordering::Relaxed),
            tasks_run: self.tasks_run.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "kernel_harness::metrics",
            passed = snapshot.kernels_passed,
            failed = snapshot.kernels_failed,
            skipped = snapshot.kernels_skipped,
            tasks_run = snapshot.tasks_run,
            tasks_failed = snapshot.tasks_failed,
            timeouts = snapshot.timeouts,
            "sweep metrics snapshot"
        );
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub kernels_passed: u64,
    pub kernels_failed: u64,
    pub kernels_skipped: u64,
    pub tasks_run: u64,
    pub tasks_failed: u64,
    pub timeouts: u64,
}
