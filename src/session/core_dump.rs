//! Read-only view over a core dump sent by the debug stub.
//!
//! Layout: nine little-endian 32-bit registers (EAX, EBX, ECX, EDX, EDI, ESI,
//! EBP, ESP, EIP) followed by any number of little-endian 32-bit call-stack
//! addresses.

use crate::error::HarnessError;

pub const REGISTER_NAMES: [&str; 9] = ["EAX", "EBX", "ECX", "EDX", "EDI", "ESI", "EBP", "ESP", "EIP"];
pub const REGISTER_BLOCK_LEN: usize = REGISTER_NAMES.len() * WORD_LEN;
pub const ADDRESSES_PER_LINE: usize = 3;

const WORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreDumpImage<'a> {
    registers: [u32; 9],
    stack: &'a [u8],
}

impl<'a> CoreDumpImage<'a> {
    /// Parses `bytes`; rejects buffers shorter than the register block or
    /// with a call stack that is not a whole number of words.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, HarnessError> {
        if bytes.len() < REGISTER_BLOCK_LEN {
            return Err(HarnessError::MalformedCoreDump { len: bytes.len() });
        }

        let (block, stack) = bytes.split_at(REGISTER_BLOCK_LEN);
        if stack.len() % WORD_LEN != 0 {
            return Err(HarnessError::MalformedCoreDump { len: bytes.len() });
        }

        let mut registers = [0u32; 9];
        for (slot, word) in registers.iter_mut().zip(block.chunks_exact(WORD_LEN)) {
            *slot = read_word(word);
        }

        Ok(Self { registers, stack })
    }

    pub fn registers(&self) -> &[u32; 9] {
        &self.registers
    }

    pub fn register(&self, name: &str) -> Option<u32> {
        REGISTER_NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .map(|idx| self.registers[idx])
    }

    pub fn call_stack(&self) -> impl Iterator<Item = u32> + 'a {
        self.stack.chunks_exact(WORD_LEN).map(read_word)
    }

    /// One `NAME = 0xXXXXXXXX` line per register, in dump order.
    pub fn register_lines(&self) -> Vec<String> {
        REGISTER_NAMES
            .iter()
            .zip(self.registers.iter())
            .map(|(name, value)| format!("{name} = 0x{value:08X}"))
            .collect()
    }

    /// Call-stack addresses, at most [`ADDRESSES_PER_LINE`] per line.
    pub fn stack_lines(&self) -> Vec<String> {
        let addresses: Vec<String> = self
            .call_stack()
            .map(|address| format!("0x{address:08X}"))
            .collect();
        addresses
            .chunks(ADDRESSES_PER_LINE)
            .map(|group| group.join(" "))
            .collect()
    }
}

fn read_word(word: &[u8]) -> u32 {
    let mut buf = [0u8; WORD_LEN];
    buf.copy_from_slice(word);
    u32::from_le_bytes(buf)
}
