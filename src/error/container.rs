//! This module contains the generic error containers: a payload pinned to the
//! program counter of the instruction that raised it, and an ordered
//! collection of such payloads.

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// An error raised by the instruction at `location`.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    pub location: u64,
    pub payload:  E,
}

impl<E> Located<E>
where
    E: Clone,
{
    /// Converts the payload with `convert`, keeping the location.
    pub fn map<F>(self, convert: impl FnOnce(E) -> F) -> Located<F>
    where
        F: Clone,
    {
        Located {
            location: self.location,
            payload:  convert(self.payload),
        }
    }
}

/// Renders as `[0x002a]: <payload>`.
impl<E> Display for Located<E>
where
    E: Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#06x}]: {}", self.location, self.payload)
    }
}

/// Things that can be pinned to a program counter.
pub trait Locatable
where
    Self: Sized,
{
    type Located;

    /// Pins `self` to the instruction at `pc`.
    fn locate(self, pc: u64) -> Self::Located;
}

impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, pc: u64) -> Self::Located {
        self.map_err(|payload| Located {
            location: pc,
            payload,
        })
    }
}

/// An ordered collection of errors.
///
/// Located errors are kept sorted by program counter, with errors raised at
/// the same instruction in the order they were added.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Errors<E> {
    payloads: Vec<E>,
}

impl<E> Errors<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            payloads: Vec::new(),
        }
    }

    #[must_use]
    pub fn payloads(&self) -> &[E] {
        &self.payloads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl<E> Errors<Located<E>>
where
    E: std::error::Error + Clone,
{
    /// Records `payload` as raised by the instruction at `pc`.
    pub fn add_located(&mut self, pc: u64, payload: E) {
        let at = self.payloads.partition_point(|e| e.location <= pc);
        self.payloads.insert(
            at,
            Located {
                location: pc,
                payload,
            },
        );
    }
}

impl<E> Default for Errors<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single error becomes a container holding just that error.
impl<E> From<E> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: E) -> Self {
        Self {
            payloads: vec![value],
        }
    }
}

/// Renders a header with the number of errors, then one error per line.
impl<E> Display for Errors<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.payloads.len() {
            0 => write!(f, "Encountered no errors"),
            count => {
                writeln!(f, "Encountered {count} errors:")?;
                self.payloads.iter().try_for_each(|error| writeln!(f, "{error}"))
            }
        }
    }
}
