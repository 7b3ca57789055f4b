//! This module contains the error type returned by the detector, and the
//! subsystem errors that it wraps.
//!
//! Subsystems return their own located errors. The detector converts them into
//! [`Errors`] of the general [`Error`] as they cross its interface.

pub mod container;
pub mod disassembly;
pub mod execution;

use thiserror::Error;

/// The result type of the detector's interface.
pub type Result<T> = std::result::Result<T, Errors>;

/// The errors that can end an analysis.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The listing could not be turned into a control-flow graph, or the
    /// source map does not describe it.
    #[error(transparent)]
    Disassembly(#[from] disassembly::Error),

    /// Exploration failed in a way that ends the whole run.
    #[error(transparent)]
    Execution(#[from] execution::Error),
}

impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, pc: u64) -> Self::Located {
        container::Located {
            location: pc,
            payload:  self,
        }
    }
}

/// An interface error raised at a program counter.
pub type LocatedError = container::Located<Error>;

/// The errors returned from the detector's interface.
pub type Errors = container::Errors<LocatedError>;

impl From<disassembly::LocatedError> for LocatedError {
    fn from(value: disassembly::LocatedError) -> Self {
        value.map(Error::from)
    }
}

impl From<disassembly::LocatedError> for Errors {
    fn from(value: disassembly::LocatedError) -> Self {
        LocatedError::from(value).into()
    }
}

impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        value.map(Error::from)
    }
}

impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        LocatedError::from(value).into()
    }
}
