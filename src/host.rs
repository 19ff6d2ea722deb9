//! Seams to the emulator and the debug-stub transport.
//!
//! The harness never talks to an emulator process or a serial pipe directly.
//! A [`HostLauncher`] hands back a host plus its transport for one boot image,
//! and the debug session is plugged into the transport as a [`CommandSink`].

use crate::runtime::config::RunTarget;
use crate::runtime::log::KernelLog;
use crate::session::command::{DebugCommand, HostCommand};
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;
use std::path::PathBuf;
use std::sync::Arc;

pub type HostFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Receives every decoded command from the transport.
///
/// `dispatch` is called from the transport's own context, concurrently with
/// the supervisor, and must not block. A returned command is a reply the
/// transport sends back to the stub.
pub trait CommandSink: Send + Sync + 'static {
    fn dispatch(&self, command: DebugCommand) -> Option<HostCommand>;
}

/// Packetized channel to the debug stub inside the booted kernel.
pub trait DebugTransport: Send {
    /// Routes every inbound command to `sink` from now on. Replies returned
    /// by [`CommandSink::dispatch`] are written back to the stub by the
    /// transport itself.
    fn connect(&mut self, sink: Arc<dyn CommandSink>) -> Result<()>;

    /// Closes the channel. Called exactly once, on every exit path.
    fn dispose(&mut self);
}

/// A running emulator instance.
pub trait EmulatorHost: Send {
    fn start(&mut self) -> HostFuture<'_>;

    /// Stops the emulator. Must be safe to call after a failed `start`.
    fn stop(&mut self);
}

/// Everything the host needs to boot a built kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    pub iso: PathBuf,
    pub disk: PathBuf,
    pub working_dir: PathBuf,
    /// Symbol map, only produced for ELF builds.
    pub map: Option<PathBuf>,
}

/// Host and transport created together for a single boot.
pub struct LaunchedHost {
    pub host: Box<dyn EmulatorHost>,
    pub transport: Box<dyn DebugTransport>,
}

pub trait HostLauncher: Send + Sync {
    fn launch(&self, target: RunTarget, image: &BootImage, log: &KernelLog)
        -> Result<LaunchedHost>;
}
