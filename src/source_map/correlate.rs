//! This module relates the compiler's assembly positions to the instructions
//! of the listing, giving each instruction the source range it came from.

use std::collections::BTreeMap;

use ethnum::U256;

use crate::{
    disassembly::Instruction,
    error::{
        container::Locatable,
        disassembly::{Error, Result},
    },
    opcode::Opcode,
    source_map::{AsmPosition, SourceRange},
};

/// Walks `positions` alongside `instructions`, mapping the address of each
/// instruction to the source range of the position entry it consumes.
///
/// Entries named `tag*` are jump labels with no instruction and are skipped. A
/// [`None`] entry separates the code of nested contracts: it is consumed and
/// leaves the current instruction without a range.
///
/// # Errors
///
/// Returns [`Err`] if an entry does not describe the instruction it lines up
/// with, which means the source map belongs to a different program.
pub fn correlate(
    positions: &[Option<AsmPosition>],
    instructions: &[Instruction],
) -> Result<BTreeMap<u64, SourceRange>> {
    let mut ranges = BTreeMap::new();
    let mut entries = positions.iter();

    'instructions: for instruction in instructions {
        for entry in entries.by_ref() {
            let Some(position) = entry else {
                continue 'instructions;
            };
            if position.name.starts_with("tag") {
                continue;
            }

            check_entry(position, instruction).locate(instruction.address)?;
            ranges.insert(instruction.address, position.range());
            continue 'instructions;
        }
        break;
    }

    Ok(ranges)
}

/// Checks that `position` describes `instruction`.
fn check_entry(
    position: &AsmPosition,
    instruction: &Instruction,
) -> std::result::Result<(), Error> {
    let matches = if instruction.opcode.is_push() {
        match position.name.as_str() {
            "PUSH" => position
                .value
                .as_deref()
                .and_then(|v| U256::from_str_radix(v.trim_start_matches("0x"), 16).ok())
                .zip(instruction.immediate)
                .is_some_and(|(expected, found)| expected == found),
            other => other.starts_with("PUSH"),
        }
    } else {
        let named = Opcode::from_mnemonic(&position.name);
        named == instruction.opcode
            || (named == Opcode::Invalid && instruction.opcode == Opcode::AssertFail)
    };

    if matches {
        Ok(())
    } else {
        Err(Error::SourceMapMismatch {
            expected: match &position.value {
                Some(value) => format!("{} {value}", position.name),
                None => position.name.clone(),
            },
            found:    instruction.to_string(),
        })
    }
}
