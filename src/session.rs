//! Debug session: turns the command stream of the booted kernel into a verdict.

pub mod command;
pub mod core_dump;
pub mod state;

use crate::host::CommandSink;
use crate::runtime::log::KernelLog;
use command::{DebugCommand, HostCommand, TestChannelCommand, NOISE_CHANNEL, TEST_CHANNEL};
use core_dump::CoreDumpImage;
use state::RunState;

/// Protocol handler for one kernel run.
#[derive(Debug, Clone)]
pub struct DebugSession {
    state: RunState,
    log: KernelLog,
    run_with_gdb: bool,
}

impl DebugSession {
    pub fn new(log: KernelLog, run_with_gdb: bool) -> Self {
        Self {
            state: RunState::new(),
            log,
            run_with_gdb,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Marks the run as started. Commands dispatched before this are logged
    /// but cannot produce a verdict.
    pub fn begin(&self) -> bool {
        self.state.begin()
    }

    fn on_channel(&self, channel: u8, command: u8) {
        if channel == NOISE_CHANNEL {
            return;
        }

        if channel != TEST_CHANNEL {
            self.log.info(format!(
                "ChannelPacketReceived, Channel = {channel}, Command = {command}"
            ));
            return;
        }

        match TestChannelCommand::from_code(command) {
            Some(TestChannelCommand::TestCompleted) => {
                if self.state.complete() {
                    self.log.info("Test completed");
                }
            }
            Some(TestChannelCommand::TestFailed) => {
                if self.state.fail() {
                    self.log.error("Test failed");
                }
            }
            Some(TestChannelCommand::AssertionSucceeded) => {
                let count = self.state.record_assertion();
                tracing::trace!(kernel = self.log.kernel(), count, "assertion succeeded");
            }
            None => {
                self.log.info(format!(
                    "ChannelPacketReceived, Channel = {channel}, Command = {command}"
                ));
            }
        }
    }

    fn on_core_dump(&self, bytes: &[u8]) {
        match CoreDumpImage::parse(bytes) {
            Ok(image) => {
                self.log.info("Core dump:");
                for line in image.register_lines() {
                    self.log.info(line);
                }
                for line in image.stack_lines() {
                    self.log.info(line);
                }
            }
            Err(err) => self.log.error(err.to_string()),
        }
    }

    fn abort(&self, message: String) {
        self.log.error(message);
        self.state.error();
    }
}

impl CommandSink for DebugSession {
    fn dispatch(&self, command: DebugCommand) -> Option<HostCommand> {
        match command {
            DebugCommand::Started => {
                self.log.info("DC: Started");
                return Some(HostCommand::BatchEnd);
            }
            DebugCommand::Text(text) => self.log.info(format!("Text from kernel: {text}")),
            DebugCommand::Number(value) => {
                self.log.info(format!("Number from kernel: {value}"))
            }
            DebugCommand::MessageBox(text) => {
                self.log.info(format!("MessageBox from kernel: {text}"))
            }
            DebugCommand::KernelPanic(code) => {
                self.log.error(format!("Kernel panic! Number = {code}"))
            }
            DebugCommand::StackCorruption(address) => {
                self.abort(format!("Stackcorruption occurred at: 0x{address:08X}"))
            }
            DebugCommand::StackOverflow(address) => {
                self.abort(format!("Stack overflow occurred at: 0x{address:08X}"))
            }
            DebugCommand::NullReference(address) => self.abort(format!(
                "Null Reference Exception occurred at: 0x{address:08X}"
            )),
            DebugCommand::CoreDump(bytes) => self.on_core_dump(&bytes),
            DebugCommand::Channel {
                channel, command, ..
            } => self.on_channel(channel, command),
            DebugCommand::ConnectionLost(reason) => {
                self.abort(format!("DC: Connection lost. {reason}").trim_end().to_owned())
            }
            DebugCommand::ProtocolError(reason) => {
                self.abort(format!("DC Error. {reason}").trim_end().to_owned())
            }
            DebugCommand::Interrupt(code) => {
                if self.run_with_gdb {
                    self.log.info(format!("Interrupt {code} occurred"));
                }
            }
            DebugCommand::Trace(_) | DebugCommand::Break(_) => {}
        }
        None
    }
}
