//! This module contains the representation of the values that the symbolic
//! virtual machine operates on.
//!
//! A value is either a concrete 256-bit word or a bit-vector expression in the
//! solver's term language. Concrete values are lifted into expressions on
//! demand, and expressions that simplify to a numeral are demoted back to
//! concrete words so that later instructions can take the cheap path.

use std::fmt::{Display, Formatter};

use ethnum::U256;
use z3::{
    ast::{Ast, Bool, BV},
    Context,
};

use crate::constant::WORD_SIZE_BITS;

/// A value on the stack, in memory or in storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value<'ctx> {
    /// A fully-known 256-bit word.
    Concrete(U256),

    /// A 256-bit expression over the symbolic inputs of the program.
    Symbolic(BV<'ctx>),
}

impl<'ctx> Value<'ctx> {
    /// Constructs a value from an expression, simplifying it and demoting it to
    /// a concrete word where it turns out to be a numeral.
    #[must_use]
    pub fn from_bv(expression: &BV<'ctx>) -> Self {
        let simplified = expression.simplify();
        match u256_from_bv(&simplified) {
            Some(word) => Self::Concrete(word),
            None => Self::Symbolic(simplified),
        }
    }

    /// Constructs a concrete value from a machine-sized integer.
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::Concrete(U256::from(value))
    }

    /// Constructs the concrete value that represents the provided boolean.
    #[must_use]
    pub fn from_flag(flag: bool) -> Self {
        Self::Concrete(if flag { U256::ONE } else { U256::ZERO })
    }

    /// Gets the concrete word if the value is known.
    #[must_use]
    pub fn as_concrete(&self) -> Option<U256> {
        match self {
            Self::Concrete(word) => Some(*word),
            Self::Symbolic(_) => None,
        }
    }

    /// Checks whether the value is an expression rather than a known word.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::Symbolic(_))
    }

    /// Gets the value as a 256-bit solver expression.
    #[must_use]
    pub fn to_bv(&self, ctx: &'ctx Context) -> BV<'ctx> {
        match self {
            Self::Concrete(word) => bv_from_u256(ctx, *word),
            Self::Symbolic(expression) => expression.clone(),
        }
    }

    /// Gets the solver proposition that the value is non-zero.
    #[must_use]
    pub fn is_nonzero(&self, ctx: &'ctx Context) -> Bool<'ctx> {
        match self {
            Self::Concrete(word) => Bool::from_bool(ctx, *word != U256::ZERO),
            Self::Symbolic(expression) => expression
                ._eq(&BV::from_u64(ctx, 0, WORD_SIZE_BITS))
                .not(),
        }
    }

    /// Gets the key under which the value is used to index memory or storage.
    #[must_use]
    pub fn key(&self) -> Key {
        match self {
            Self::Concrete(word) => Key::Concrete(*word),
            Self::Symbolic(expression) => Key::Symbolic(expression.to_string()),
        }
    }
}

impl<'ctx> From<U256> for Value<'ctx> {
    fn from(value: U256) -> Self {
        Self::Concrete(value)
    }
}

impl<'ctx> From<BV<'ctx>> for Value<'ctx> {
    fn from(value: BV<'ctx>) -> Self {
        Self::from_bv(&value)
    }
}

impl<'ctx> Display for Value<'ctx> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concrete(word) => write!(f, "{word}"),
            Self::Symbolic(expression) => write!(f, "{expression}"),
        }
    }
}

/// The key of a memory cell or storage slot.
///
/// Symbolic locations are keyed by the textual form of their simplified
/// expression, so two writes through the same expression hit the same cell.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Key {
    Concrete(U256),
    Symbolic(String),
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concrete(word) => write!(f, "{word}"),
            Self::Symbolic(text) => write!(f, "{text}"),
        }
    }
}

/// Builds the 256-bit numeral for `value`.
#[must_use]
pub fn bv_from_u256(ctx: &Context, value: U256) -> BV<'_> {
    if let Ok(small) = u64::try_from(value) {
        return BV::from_u64(ctx, small, WORD_SIZE_BITS);
    }

    let (high, low) = value.into_words();
    #[allow(clippy::cast_possible_truncation)]
    let limbs = [
        (high >> 64) as u64,
        high as u64,
        (low >> 64) as u64,
        low as u64,
    ];
    let mut result = BV::from_u64(ctx, limbs[0], 64);
    for limb in &limbs[1..] {
        result = result.concat(&BV::from_u64(ctx, *limb, 64));
    }
    result
}

/// Reads a bit-vector numeral back into a word, returning [`None`] if the
/// expression is not a numeral.
#[must_use]
pub fn u256_from_bv(expression: &BV<'_>) -> Option<U256> {
    if let Some(small) = expression.as_u64() {
        return Some(U256::from(small));
    }

    let text = expression.to_string();
    if let Some(digits) = text.strip_prefix("#x") {
        U256::from_str_radix(digits, 16).ok()
    } else if let Some(digits) = text.strip_prefix("#b") {
        U256::from_str_radix(digits, 2).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;
    use z3::{ast::BV, Config, Context};

    use crate::vm::value::{bv_from_u256, u256_from_bv, Key, Value};

    #[test]
    fn wide_numerals_survive_the_solver() {
        let ctx = Context::new(&Config::new());
        let word = U256::from_words(0xdead_beef, 0x1234_5678_9abc_def0);
        let expression = bv_from_u256(&ctx, word);

        assert_eq!(expression.get_size(), 256);
        assert_eq!(u256_from_bv(&expression.simplify()), Some(word));
    }

    #[test]
    fn numerals_are_demoted_to_concrete_values() {
        let ctx = Context::new(&Config::new());
        let sum = BV::from_u64(&ctx, 1, 256).bvadd(&BV::from_u64(&ctx, 2, 256));

        assert_eq!(Value::from_bv(&sum), Value::from_u64(3));
    }

    #[test]
    fn expressions_stay_symbolic() {
        let ctx = Context::new(&Config::new());
        let var = BV::new_const(&ctx, "Is", 256);
        let value = Value::from_bv(&var);

        assert!(value.is_symbolic());
        assert_eq!(value.key(), Key::Symbolic("Is".into()));
        assert_eq!(value.as_concrete(), None);
    }
}
