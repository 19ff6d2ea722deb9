//! Commands exchanged with the debug stub, already decoded by the transport.

use std::fmt;

/// Channel the debug stub uses for chatter that carries no information for tests.
pub const NOISE_CHANNEL: u8 = 129;
/// Channel carrying test verdicts and assertion notifications.
pub const TEST_CHANNEL: u8 = 193;

/// Sub-codes on [`TEST_CHANNEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TestChannelCommand {
    TestCompleted = 0,
    TestFailed = 1,
    AssertionSucceeded = 2,
}

impl TestChannelCommand {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::TestCompleted),
            1 => Some(Self::TestFailed),
            2 => Some(Self::AssertionSucceeded),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Numeric diagnostic sent by the kernel, tagged with its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericValue::U8(value) => write!(f, "0x{value:02X}"),
            NumericValue::U16(value) => write!(f, "0x{value:04X}"),
            NumericValue::U32(value) => write!(f, "0x{value:08X}"),
            NumericValue::U64(value) => write!(f, "0x{value:016X}"),
        }
    }
}

/// Everything the debug stub can send to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    /// The stub finished its own initialisation and waits for the host.
    Started,
    Text(String),
    Number(NumericValue),
    MessageBox(String),
    KernelPanic(u32),
    StackCorruption(u32),
    StackOverflow(u32),
    NullReference(u32),
    CoreDump(Vec<u8>),
    Channel {
        channel: u8,
        command: u8,
        payload: Vec<u8>,
    },
    ConnectionLost(String),
    ProtocolError(String),
    Interrupt(u32),
    Trace(u32),
    Break(u32),
}

impl DebugCommand {
    /// Convenience constructor for a test-channel packet without payload.
    pub fn test_channel(command: TestChannelCommand) -> Self {
        DebugCommand::Channel {
            channel: TEST_CHANNEL,
            command: command.code(),
            payload: Vec::new(),
        }
    }
}

/// Commands the host sends back to the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Ends the (empty) initial breakpoint batch so the kernel keeps running.
    BatchEnd,
}
