use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one kernel run. Terminal phases are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunPhase {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    TimedOut = 4,
    Errored = 5,
}

impl RunPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunPhase::Running,
            2 => RunPhase::Completed,
            3 => RunPhase::Failed,
            4 => RunPhase::TimedOut,
            5 => RunPhase::Errored,
            _ => RunPhase::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunPhase::Idle | RunPhase::Running)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Run state shared between the transport's callback context and the
/// supervisor. One instance per kernel run; dispatch only touches atomics
/// and the completion token.
#[derive(Clone, Debug, Default)]
pub struct RunState {
    inner: Arc<RunStateInner>,
}

#[derive(Debug, Default)]
struct RunStateInner {
    phase: AtomicU8,
    succeeded: AtomicBool,
    assertion_count: AtomicU64,
    finished: CancellationToken,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters `Running`. Only an idle state can begin, so the verdict and
    /// assertion count are still cleared; returns `false` otherwise.
    pub fn begin(&self) -> bool {
        self.inner
            .phase
            .compare_exchange(
                RunPhase::Idle as u8,
                RunPhase::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    /// Derived from the phase alone, so a verdict can never leave a
    /// finished run looking live.
    pub fn is_running(&self) -> bool {
        self.phase() == RunPhase::Running
    }

    /// Only meaningful once the run is no longer running.
    pub fn succeeded(&self) -> bool {
        self.inner.succeeded.load(Ordering::SeqCst)
    }

    pub fn assertion_count(&self) -> u64 {
        self.inner.assertion_count.load(Ordering::SeqCst)
    }

    pub fn record_assertion(&self) -> u64 {
        self.inner.assertion_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Token cancelled when the run reaches a terminal phase.
    pub fn finished(&self) -> CancellationToken {
        self.inner.finished.clone()
    }

    pub fn complete(&self) -> bool {
        self.finish(RunPhase::Completed)
    }

    pub fn fail(&self) -> bool {
        self.finish(RunPhase::Failed)
    }

    pub fn error(&self) -> bool {
        self.finish(RunPhase::Errored)
    }

    pub fn time_out(&self) -> bool {
        self.finish(RunPhase::TimedOut)
    }

    /// Moves `Running` to `terminal`. Returns `false` if the run was not
    /// running, in which case nothing changes.
    fn finish(&self, terminal: RunPhase) -> bool {
        debug_assert!(terminal.is_terminal());

        if self
            .inner
            .phase
            .compare_exchange(
                RunPhase::Running as u8,
                terminal as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        if terminal == RunPhase::Completed {
            self.inner.succeeded.store(true, Ordering::SeqCst);
        }
        self.inner.finished.cancel();
        true
    }
}
