//! Opcodes that perform comparisons, bitwise logic and shifts on the EVM.
//!
//! Comparisons push `1` when they hold and `0` otherwise. On symbolic operands
//! this becomes an `ite` over the comparison, which the explorer later turns
//! back into a branch condition.

use ethnum::U256;
use z3::ast::{Ast, BV};

use crate::{
    constant::{WORD_SIZE_BITS, WORD_SIZE_BYTES},
    vm::{value::Value, Machine, Step},
};

/// The `LT` opcode performs an unsigned less-than comparison.
///
/// # Semantics
///
/// | Stack Index | Input | Output  |
/// | :---------: | :---: | :-----: |
/// | 1           | `a`   | `a < b` |
/// | 2           | `b`   |         |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn lt(m: &mut Machine<'_, '_>) -> Step<()> {
    m.compare(|a, b| a < b, BV::bvult)
}

/// The `GT` opcode performs an unsigned greater-than comparison.
///
/// # Semantics
///
/// | Stack Index | Input | Output  |
/// | :---------: | :---: | :-----: |
/// | 1           | `a`   | `a > b` |
/// | 2           | `b`   |         |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn gt(m: &mut Machine<'_, '_>) -> Step<()> {
    m.compare(|a, b| a > b, BV::bvugt)
}

/// The `SLT` opcode performs a signed less-than comparison.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn slt(m: &mut Machine<'_, '_>) -> Step<()> {
    m.compare(|a, b| a.as_i256() < b.as_i256(), BV::bvslt)
}

/// The `SGT` opcode performs a signed greater-than comparison.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sgt(m: &mut Machine<'_, '_>) -> Step<()> {
    m.compare(|a, b| a.as_i256() > b.as_i256(), BV::bvsgt)
}

/// The `EQ` opcode checks its operands for equality.
///
/// # Semantics
///
/// | Stack Index | Input | Output   |
/// | :---------: | :---: | :------: |
/// | 1           | `a`   | `a == b` |
/// | 2           | `b`   |          |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn eq(m: &mut Machine<'_, '_>) -> Step<()> {
    m.compare(|a, b| a == b, |a, b| a._eq(b))
}

/// The `ISZERO` opcode checks whether its operand is zero.
///
/// # Semantics
///
/// | Stack Index | Input | Output   |
/// | :---------: | :---: | :------: |
/// | 1           | `a`   | `a == 0` |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn is_zero(m: &mut Machine<'_, '_>) -> Step<()> {
    let [a] = m.pop()?;
    let result = match a.as_concrete() {
        Some(word) => Value::from_flag(word == U256::ZERO),
        None => {
            let is_zero = m.lift(&a)._eq(&m.word(U256::ZERO));
            Value::from_bv(&m.flag(&is_zero))
        }
    };
    m.push(result)
}

/// The `AND` opcode performs bitwise conjunction.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn and(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(|a, b| a & b, BV::bvand)
}

/// The `OR` opcode performs bitwise disjunction.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn or(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(|a, b| a | b, BV::bvor)
}

/// The `XOR` opcode performs bitwise exclusive disjunction.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn xor(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(|a, b| a ^ b, BV::bvxor)
}

/// The `NOT` opcode performs bitwise negation.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn not(m: &mut Machine<'_, '_>) -> Step<()> {
    let [a] = m.pop()?;
    let result = match a.as_concrete() {
        Some(word) => Value::Concrete(!word),
        None => Value::from_bv(&m.lift(&a).bvnot()),
    };
    m.push(result)
}

/// The `BYTE` opcode extracts a single byte from a word, counting from the
/// most significant byte.
///
/// # Semantics
///
/// | Stack Index | Input | Output                                    |
/// | :---------: | :---: | :---------------------------------------: |
/// | 1           | `i`   | `if i < 32 then (x >> (248 - 8i)) & 0xff` |
/// | 2           | `x`   |                                           |
///
/// An index of 32 or more yields zero.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn byte(m: &mut Machine<'_, '_>) -> Step<()> {
    let [index, word] = m.pop()?;
    if let (Some(index), Some(word)) = (index.as_concrete(), word.as_concrete()) {
        return m.push(byte_of(index, word));
    }

    let (index, word) = (m.lift(&index), m.lift(&word));
    let last_byte = U256::from(WORD_SIZE_BYTES as u64 - 1);
    let shift = m.word(last_byte).bvsub(&index).bvmul(&m.word(U256::new(8)));
    let extracted = word.bvlshr(&shift).bvand(&m.word(U256::new(0xff)));
    let in_range = index.bvult(&m.word(U256::from(WORD_SIZE_BYTES as u64)));
    let result = in_range.ite(&extracted, &m.word(U256::ZERO));
    m.push(Value::from_bv(&result))
}

/// The `SHL` opcode shifts left, filling with zeroes.
///
/// # Semantics
///
/// | Stack Index | Input   | Output                       |
/// | :---------: | :-----: | :--------------------------: |
/// | 1           | `shift` | `(value << shift) % 2**256`  |
/// | 2           | `value` |                              |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn shl(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(
        |shift, value| match small_shift(shift) {
            Some(shift) => value << shift,
            None => U256::ZERO,
        },
        |shift, value| value.bvshl(shift),
    )
}

/// The `SHR` opcode performs a logical right shift.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn shr(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(
        |shift, value| match small_shift(shift) {
            Some(shift) => value >> shift,
            None => U256::ZERO,
        },
        |shift, value| value.bvlshr(shift),
    )
}

/// The `SAR` opcode performs an arithmetic right shift, filling with the sign
/// bit.
///
/// # Semantics
///
/// | Stack Index | Input   | Output            |
/// | :---------: | :-----: | :---------------: |
/// | 1           | `shift` | `value >> shift`  |
/// | 2           | `value` |                   |
///
/// Shifting by 256 or more yields `0` for non-negative values and `-1` for
/// negative ones.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sar(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(
        |shift, value| {
            let signed = value.as_i256();
            match small_shift(shift) {
                Some(shift) => (signed >> shift).as_u256(),
                None if signed.is_negative() => U256::MAX,
                None => U256::ZERO,
            }
        },
        |shift, value| value.bvashr(shift),
    )
}

/// Gets `shift` as a machine integer if it shifts by less than a word.
fn small_shift(shift: U256) -> Option<u32> {
    (shift < U256::from(WORD_SIZE_BITS)).then(|| shift.as_u32())
}

fn byte_of(index: U256, word: U256) -> U256 {
    let bytes = WORD_SIZE_BYTES as u32;
    if index >= U256::from(bytes) {
        return U256::ZERO;
    }
    (word >> ((bytes - 1 - index.as_u32()) * 8)) & U256::new(0xff)
}
