//! Per-kernel log capture.
//!
//! Every kernel run gets its own [`KernelLog`]. Lines written through it are
//! forwarded to `tracing` immediately and also recorded, so the aggregator can
//! attach them to the kernel's result and replay them when the run fails.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Severity of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Milliseconds since the capture was opened.
    pub offset_ms: u64,
    pub level: LogLevel,
    pub message: String,
}

/// Cloneable handle that records log lines for a single kernel run.
#[derive(Debug, Clone)]
pub struct KernelLog {
    inner: Arc<KernelLogInner>,
}

#[derive(Debug)]
struct KernelLogInner {
    kernel: String,
    opened_at: Instant,
    events: Mutex<Vec<LogEvent>>,
}

macro_rules! emit_at_level {
    ($level:expr, $kernel:expr, $message:expr) => {
        match $level {
            LogLevel::Debug => tracing::debug!(kernel = %$kernel, "{}", $message),
            LogLevel::Info => tracing::info!(kernel = %$kernel, "{}", $message),
            LogLevel::Warn => tracing::warn!(kernel = %$kernel, "{}", $message),
            LogLevel::Error => tracing::error!(kernel = %$kernel, "{}", $message),
        }
    };
}

impl KernelLog {
    pub fn new(kernel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(KernelLogInner {
                kernel: kernel.into(),
                opened_at: Instant::now(),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn kernel(&self) -> &str {
        &self.inner.kernel
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    pub fn record(&self, level: LogLevel, message: String) {
        emit_at_level!(level, self.inner.kernel, message);

        let offset_ms = self.inner.opened_at.elapsed().as_millis() as u64;
        self.lock().push(LogEvent {
            offset_ms,
            level,
            message,
        });
    }

    /// Copy of everything captured so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.lock().clone()
    }

    /// Returns `true` if any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|event| event.message.contains(needle))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEvent>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.inner
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Re-emits previously captured lines to the primary `tracing` sink.
pub fn replay(kernel: &str, events: &[LogEvent]) {
    for event in events {
        emit_at_level!(event.level, kernel, event.message);
    }
}
