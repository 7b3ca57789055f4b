//! This module recovers the entry blocks of public functions from the
//! selector dispatcher at the start of a contract.

use std::collections::BTreeMap;

use ethnum::U256;

use crate::{disassembly::Instruction, opcode::Opcode};

/// Maps the entry block of each function found in the dispatcher to its
/// four-byte selector, rendered as eight lowercase hex digits.
///
/// The dispatcher compares the selector from the call data against each
/// function's selector in turn, so every function contributes the sequence
/// `PUSH4 <selector>; EQ; PUSHn <entry>`. Any other instruction in between
/// resets the match.
#[must_use]
pub fn entry_points(instructions: &[Instruction]) -> BTreeMap<u64, String> {
    let mut entries = BTreeMap::new();
    let mut selector = None;
    let mut matched_eq = false;

    for instruction in instructions {
        match (&instruction.opcode, selector, matched_eq) {
            (Opcode::Push(4), None, false) => selector = instruction.immediate,
            (Opcode::Eq, Some(_), false) => matched_eq = true,
            (Opcode::Push(_), Some(sel), true) => {
                let entry = instruction.immediate.and_then(|dest| u64::try_from(dest).ok());
                if let Some(entry) = entry {
                    entries.insert(entry, format_selector(sel));
                }
                selector = None;
                matched_eq = false;
            }
            _ => {
                selector = None;
                matched_eq = false;
            }
        }
    }

    entries
}

/// Renders a selector as exactly eight lowercase hex digits.
fn format_selector(selector: U256) -> String {
    format!("{:08x}", selector.as_u32())
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        disassembly::{dispatch::entry_points, Instruction},
        opcode::Opcode,
    };

    fn push(address: u64, width: u8, value: u128) -> Instruction {
        Instruction::new(address, Opcode::Push(width), Some(U256::new(value)))
    }

    #[test]
    fn finds_dispatcher_entries() {
        let instructions = vec![
            Instruction::new(0, Opcode::Dup(1), None),
            push(1, 4, 0x23b8_72dd),
            Instruction::new(6, Opcode::Eq, None),
            push(7, 2, 0x0040),
            Instruction::new(10, Opcode::JumpI, None),
            Instruction::new(11, Opcode::Dup(1), None),
            push(12, 4, 0x0000_00ff),
            Instruction::new(17, Opcode::Eq, None),
            push(18, 1, 0x60),
        ];

        let entries = entry_points(&instructions);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get(&0x40).map(String::as_str), Some("23b872dd"));
        assert_eq!(entries.get(&0x60).map(String::as_str), Some("000000ff"));
    }

    #[test]
    fn interruptions_reset_the_match() {
        let instructions = vec![
            push(0, 4, 0x23b8_72dd),
            Instruction::new(5, Opcode::Dup(1), None),
            Instruction::new(6, Opcode::Eq, None),
            push(7, 2, 0x0040),
        ];

        assert!(entry_points(&instructions).is_empty());
    }
}
