pub mod cli;
pub mod engine;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod report;
pub mod runtime;
pub mod session;
pub mod supervisor;

pub use engine::Engine;
pub use error::{find_harness_error, HarnessError};
pub use host::{BootImage, CommandSink, DebugTransport, EmulatorHost, HostLauncher, LaunchedHost};
pub use pipeline::executor::{ProcessToolExecutor, ToolExecutor, ToolRequest};
pub use pipeline::BuildPipeline;
pub use report::{KernelTestResult, TestReport};
pub use runtime::config::{
    EngineConfig, EngineConfigBuilder, EngineConfigParams, ImageFormat, KernelPackage, KernelSpec,
    RunConfiguration, RunTarget,
};
pub use runtime::locator::{LayoutToolLocator, Tool, ToolInvocation, ToolLocator};
pub use runtime::log::{KernelLog, LogEvent, LogLevel};
pub use runtime::task::run_task;
pub use runtime::telemetry::{init_tracing, SweepSnapshot, SweepTelemetry};
pub use session::command::{DebugCommand, HostCommand, NumericValue, TestChannelCommand};
pub use session::state::{RunPhase, RunState};
pub use session::DebugSession;
pub use supervisor::RunSupervisor;
