//! This module contains the pipeline that turns a textual disassembly listing
//! into the control-flow graph explored by the virtual machine.
//!
//! The stages run in order:
//!
//! 1. [`normalizer`] rewrites the raw listing into one canonical line per
//!    instruction, with decimal addresses and arrow-marked operands.
//! 2. [`tokenizer`] splits the canonical lines into tokens and assembles them
//!    into [`Instruction`]s.
//! 3. [`cfg`] partitions the instructions into basic blocks.
//!
//! [`dispatch`] recovers the entry block of each public function from the
//! instructions of the selector dispatcher.

pub mod cfg;
pub mod dispatch;
pub mod normalizer;
pub mod tokenizer;

use std::fmt::{Display, Formatter};

use ethnum::U256;

use crate::opcode::Opcode;

/// A single instruction of the program under analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    /// The offset of the instruction in the bytecode.
    pub address: u64,

    pub opcode: Opcode,

    /// The operand of a `PUSH`, which is zero for `PUSH0`.
    pub immediate: Option<U256>,
}

impl Instruction {
    /// Constructs a new instruction.
    #[must_use]
    pub fn new(address: u64, opcode: Opcode, immediate: Option<U256>) -> Self {
        Self {
            address,
            opcode,
            immediate,
        }
    }

    /// Gets the address of the instruction that follows this one in the
    /// bytecode.
    #[must_use]
    pub fn next_address(&self) -> u64 {
        self.address + self.opcode.width()
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.immediate {
            Some(value) => write!(f, "{} {} {value:#x}", self.address, self.opcode),
            None => write!(f, "{} {}", self.address, self.opcode),
        }
    }
}

/// Renders `lines` of assembly (a mnemonic with an optional hex operand) as a
/// disassembly listing, assigning each instruction its bytecode offset.
///
/// This is what [`crate::listing!`] expands to.
#[must_use]
pub fn render_listing(lines: &[&str]) -> String {
    let mut address = 0u64;
    let mut rendered = String::new();
    for line in lines {
        let mnemonic = line.split_whitespace().next().unwrap_or_default();
        rendered.push_str(&format!("{address:05x}: {line}\n"));
        address += Opcode::from_mnemonic(mnemonic).width();
    }
    rendered
}

/// Builds a disassembly listing from assembly lines.
///
/// ```
/// let listing = token_defect_explorer::listing!["PUSH1 0x01", "PUSH1 0x02", "ADD", "STOP"];
/// assert!(listing.starts_with("00000: PUSH1 0x01\n00002: PUSH1 0x02\n00004: ADD"));
/// ```
#[macro_export]
macro_rules! listing {
    ($($line:expr),* $(,)?) => {
        $crate::disassembly::render_listing(&[$($line),*])
    };
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{disassembly::Instruction, opcode::Opcode};

    #[test]
    fn listings_get_bytecode_offsets() {
        let listing = crate::listing!["PUSH2 0x0102", "JUMPDEST", "STOP"];
        assert_eq!(listing, "00000: PUSH2 0x0102\n00003: JUMPDEST\n00004: STOP\n");
    }

    #[test]
    fn instructions_know_their_successor() {
        let push = Instruction::new(10, Opcode::Push(2), Some(U256::new(0x0102)));
        assert_eq!(push.next_address(), 13);
        assert_eq!(push.to_string(), "10 PUSH2 0x102");
    }
}
