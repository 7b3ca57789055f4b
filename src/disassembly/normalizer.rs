//! This module contains the normalizer, which rewrites a raw disassembly
//! listing into the canonical line format that the tokenizer consumes.
//!
//! # Input Format
//!
//! The listing has one instruction per line, as a hexadecimal address followed
//! by a colon, the mnemonic and an optional hexadecimal operand:
//!
//! ```text
//! 00000: PUSH1 0x80
//! 00002: PUSH1 0x40
//! 00004: MSTORE
//! ```
//!
//! The first line may instead be a header holding the hex-encoded bytecode
//! that the listing was produced from, which is recognised by not containing a
//! colon.
//!
//! # Output Format
//!
//! Each instruction becomes `<decimal address> <MNEMONIC>`, with any operand
//! following an explicit `=>` marker.

use crate::error::{
    container::Locatable,
    disassembly::{Error, Result},
};

/// The marker placed between a mnemonic and its operand.
pub const OPERAND_MARKER: &str = "=>";

/// A listing that has been rewritten into canonical lines.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NormalizedListing {
    /// The bytecode from the header line, if the listing had one.
    pub code: Option<Vec<u8>>,

    /// The canonical instruction lines, in listing order.
    pub lines: Vec<String>,
}

/// Normalizes the raw disassembly `listing`.
///
/// # Errors
///
/// Returns [`Err`] if a line does not begin with a hexadecimal address, or if
/// the header line is not valid hex. Errors are located at the (zero-based)
/// line on which they occurred, as no program counter is known yet.
pub fn normalize(listing: &str) -> Result<NormalizedListing> {
    let mut normalized = NormalizedListing::default();

    for (index, raw_line) in listing.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if index == 0 && !line.contains(':') {
            normalized.code = Some(decode_header(line).locate(index as u64)?);
            continue;
        }

        normalized.lines.push(normalize_line(index, line)?);
    }

    Ok(normalized)
}

/// Decodes the bytecode held by a header line.
fn decode_header(line: &str) -> std::result::Result<Vec<u8>, Error> {
    let digits = line.strip_prefix("0x").unwrap_or(line);
    hex::decode(digits).map_err(|e| Error::InvalidHeader(e.to_string()))
}

/// Rewrites the single instruction `line` found at `index` in the listing.
fn normalize_line(index: usize, line: &str) -> Result<String> {
    let stripped = line.replace(':', "");
    let parts: Vec<&str> = stripped.split_whitespace().collect();

    let address = parts
        .first()
        .and_then(|text| u64::from_str_radix(text, 16).ok())
        .ok_or_else(|| {
            Error::MalformedAddress {
                line: index,
                text: line.to_string(),
            }
            .locate(index as u64)
        })?;

    match parts.as_slice() {
        [_, body @ .., operand] if !body.is_empty() && is_hex_literal(operand) => {
            let operand = operand.strip_prefix("0x").unwrap_or(operand);
            Ok(format!("{address} {} {OPERAND_MARKER} 0x{operand}", body.join(" ")))
        }
        [_, body @ ..] => Ok(format!("{address} {}", body.join(" ")).trim_end().to_string()),
        [] => Ok(address.to_string()),
    }
}

/// Checks whether `text` reads as a hexadecimal number, with or without the
/// `0x` prefix.
fn is_hex_literal(text: &str) -> bool {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::normalizer::normalize,
        error::disassembly::Error,
    };

    #[test]
    fn rewrites_addresses_and_marks_operands() -> anyhow::Result<()> {
        let normalized = normalize("0000a: PUSH2 0x0102\n0000d: JUMPDEST\n")?;
        assert_eq!(normalized.lines, vec!["10 PUSH2 => 0x0102", "13 JUMPDEST"]);
        assert_eq!(normalized.code, None);

        Ok(())
    }

    #[test]
    fn operands_without_prefix_get_one() -> anyhow::Result<()> {
        let normalized = normalize("00000: PUSH1 80")?;
        assert_eq!(normalized.lines, vec!["0 PUSH1 => 0x80"]);

        Ok(())
    }

    #[test]
    fn reads_the_bytecode_header() -> anyhow::Result<()> {
        let normalized = normalize("6001600201\n00000: PUSH1 0x01\n\n00002: PUSH1 0x02\n")?;
        assert_eq!(normalized.code, Some(vec![0x60, 0x01, 0x60, 0x02, 0x01]));
        assert_eq!(normalized.lines.len(), 2);

        Ok(())
    }

    #[test]
    fn rejects_lines_without_an_address() {
        let result = normalize("00000: STOP\nnonsense: ADD");
        let error = result.expect_err("Malformed line was accepted");
        assert_eq!(error.location, 1);
        assert!(matches!(error.payload, Error::MalformedAddress { line: 1, .. }));
    }
}
