//! This module contains the tokenizer, which splits normalized listing lines
//! into tokens and assembles those tokens into [`Instruction`]s.

use ethnum::U256;

use crate::{
    constant::PUSH_OPCODE_MAX_BYTES,
    disassembly::{normalizer::OPERAND_MARKER, Instruction},
    error::{
        container::Locatable,
        disassembly::{Error, Result},
    },
    opcode::Opcode,
};

/// The tokens of a normalized listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Address(u64),
    Mnemonic(Opcode),
    Arrow,
    Operand(U256),
    Newline,
}

/// Splits the normalized `lines` into tokens, ending every line with a
/// [`Token::Newline`].
///
/// # Errors
///
/// Returns [`Err`] if an address is not a decimal number, or if an operand is
/// not hexadecimal or does not fit in a word.
pub fn tokenize(lines: &[String]) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let mut words = line.split_whitespace();
        let address = words
            .next()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::MalformedAddress {
                    line: index,
                    text: line.clone(),
                }
                .locate(index as u64)
            })?;
        tokens.push(Token::Address(address));

        let mut mnemonic = String::new();
        for word in words {
            if word == OPERAND_MARKER {
                tokens.push(Token::Arrow);
            } else if mnemonic.is_empty() {
                mnemonic = word.to_string();
                tokens.push(Token::Mnemonic(Opcode::from_mnemonic(word)));
            } else {
                tokens.push(Token::Operand(parse_operand(&mnemonic, word).locate(address)?));
            }
        }

        tokens.push(Token::Newline);
    }

    Ok(tokens)
}

/// Parses the hexadecimal `operand` of the instruction `mnemonic`.
fn parse_operand(mnemonic: &str, operand: &str) -> std::result::Result<U256, Error> {
    let digits = operand.strip_prefix("0x").unwrap_or(operand);
    if digits.len() > usize::from(PUSH_OPCODE_MAX_BYTES) * 2 {
        return Err(Error::OperandTooWide {
            mnemonic:  mnemonic.to_string(),
            max_bytes: PUSH_OPCODE_MAX_BYTES,
        });
    }

    U256::from_str_radix(digits, 16).map_err(|_| Error::InvalidOperand {
        mnemonic: mnemonic.to_string(),
        operand:  operand.to_string(),
    })
}

/// Assembles `tokens` into the instructions of the program.
///
/// Every `PUSH` gets an immediate, which is zero for `PUSH0` and for pushes
/// that were listed without an operand. Operands of other instructions are
/// annotations and are dropped.
///
/// # Errors
///
/// Returns [`Err`] if the tokens hold no instructions, or if the instruction
/// addresses do not strictly increase.
pub fn parse_instructions(tokens: &[Token]) -> Result<Vec<Instruction>> {
    let mut instructions: Vec<Instruction> = Vec::new();
    let mut address = None;
    let mut opcode = None;
    let mut operand = None;

    for token in tokens {
        match token {
            Token::Address(value) => address = Some(*value),
            Token::Mnemonic(op) => opcode = Some(op.clone()),
            Token::Arrow => {}
            Token::Operand(value) => operand = Some(*value),
            Token::Newline => {
                if let (Some(address), Some(opcode)) = (address.take(), opcode.take()) {
                    if let Some(previous) = instructions.last() {
                        if address <= previous.address {
                            return Err(Error::NonMonotonicAddress {
                                previous: previous.address,
                                address,
                            }
                            .locate(address));
                        }
                    }
                    let immediate = opcode.is_push().then(|| operand.unwrap_or(U256::ZERO));
                    instructions.push(Instruction::new(address, opcode, immediate));
                }
                operand = None;
            }
        }
    }

    if instructions.is_empty() {
        return Err(Error::EmptyListing.locate(0));
    }

    Ok(instructions)
}
