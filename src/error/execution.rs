//! This module contains errors pertaining to the symbolic execution of the
//! disassembled program.

use thiserror::Error;

use crate::error::container;

/// Errors that occur while the explorer interprets instructions.
///
/// Apart from [`Error::UnknownInstruction`] in strict mode, these errors end
/// only the path that raised them.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Instruction needs {required} stack items but only {available} are present")]
    StackUnderflow { required: usize, available: usize },

    #[error("Maximum stack depth exceeded with request for {requested:?} frames")]
    StackDepthExceeded { requested: usize },

    #[error("Jump target does not resolve to a literal")]
    UnresolvedJump,

    #[error("Jump target {target} does not fit in a program counter")]
    JumpTargetTooLarge { target: String },

    #[error("Encountered the unknown instruction `{mnemonic}`")]
    UnknownInstruction { mnemonic: String },

    #[error("No basic block starts at {target}")]
    NonExistentBlock { target: u64 },

    #[error("The conditional block at {block} has no fall-through successor")]
    MissingFallThrough { block: u64 },

    #[error("The block at {block} ended without a resolved jump target")]
    MissingJumpTarget { block: u64 },

    #[error("The global deadline was reached")]
    Timeout,

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,
}

impl Error {
    /// Checks whether the error must end the whole run rather than just the
    /// path on which it occurred.
    #[must_use]
    pub fn is_run_fatal(&self, strict_instructions: bool) -> bool {
        match self {
            Self::Timeout | Self::StoppedByWatchdog => true,
            Self::UnknownInstruction { .. } => strict_instructions,
            _ => false,
        }
    }

    /// Checks whether the error is one of the cancellation errors.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Timeout | Self::StoppedByWatchdog)
    }
}

/// An execution error with an associated program counter.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation of errors during
/// execution.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
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
