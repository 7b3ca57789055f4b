//! This module contains the error type that pertains to turning a disassembly
//! listing into the control-flow graph.

use thiserror::Error;

use crate::error::container;

/// Errors that occur while normalizing, tokenizing and partitioning a
/// disassembly listing, or while correlating it with a source map.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Line {line} does not start with a hexadecimal address: {text:?}")]
    MalformedAddress { line: usize, text: String },

    #[error("The `{mnemonic}` instruction has an operand {operand:?} that is not hexadecimal")]
    InvalidOperand { mnemonic: String, operand: String },

    #[error("The `{mnemonic}` instruction has an operand wider than {max_bytes} bytes")]
    OperandTooWide { mnemonic: String, max_bytes: u8 },

    #[error("The listing contained no instructions")]
    EmptyListing,

    #[error("Instruction addresses must increase but {address} follows {previous}")]
    NonMonotonicAddress { previous: u64, address: u64 },

    #[error("Source map entry `{expected}` does not match the instruction `{found}`")]
    SourceMapMismatch { expected: String, found: String },

    #[error("The header line could not be decoded as bytecode: {_0}")]
    InvalidHeader(String),
}

/// A disassembly error with an associated program counter.
pub type LocatedError = container::Located<Error>;

/// The result type for functions that may return disassembly errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, pc: u64) -> Self::Located {
        container::Located {
            location: pc,
            payload:  self,
        }
    }
}
