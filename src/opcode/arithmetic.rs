//! Opcodes that perform arithmetic operations on the EVM.
//!
//! All arithmetic is modulo `2**256`. The signed variants reinterpret their
//! operands as two's-complement words, and every division or modulo by zero
//! yields zero.

use ethnum::U256;
use z3::ast::{Ast, BV};

use crate::{
    constant::WORD_SIZE_BITS,
    vm::{value::Value, Machine, Step},
};

/// The `ADD` opcode performs addition.
///
/// # Semantics
///
/// | Stack Index | Input | Output             |
/// | :---------: | :---: | :----------------: |
/// | 1           | `a`   | `(a + b) % 2**256` |
/// | 2           | `b`   |                    |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn add(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(U256::wrapping_add, BV::bvadd)
}

/// The `MUL` opcode performs multiplication.
///
/// # Semantics
///
/// | Stack Index | Input | Output             |
/// | :---------: | :---: | :----------------: |
/// | 1           | `a`   | `(a * b) % 2**256` |
/// | 2           | `b`   |                    |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn mul(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(U256::wrapping_mul, BV::bvmul)
}

/// The `SUB` opcode performs subtraction.
///
/// # Semantics
///
/// | Stack Index | Input | Output             |
/// | :---------: | :---: | :----------------: |
/// | 1           | `a`   | `(a - b) % 2**256` |
/// | 2           | `b`   |                    |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sub(m: &mut Machine<'_, '_>) -> Step<()> {
    m.binary(U256::wrapping_sub, BV::bvsub)
}

/// The `DIV` opcode performs unsigned integer division.
///
/// # Semantics
///
/// | Stack Index | Input | Output                           |
/// | :---------: | :---: | :------------------------------: |
/// | 1           | `a`   | `if b == 0 then 0 else (a // b)` |
/// | 2           | `b`   |                                  |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn div(m: &mut Machine<'_, '_>) -> Step<()> {
    divide(m, |a, b| a / b, BV::bvudiv)
}

/// The `SDIV` opcode performs signed integer division.
///
/// # Semantics
///
/// | Stack Index | Input | Output                           |
/// | :---------: | :---: | :------------------------------: |
/// | 1           | `a`   | `if b == 0 then 0 else (a // b)` |
/// | 2           | `b`   |                                  |
///
/// Dividing the most negative word by `-1` overflows back to the most
/// negative word.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sdiv(m: &mut Machine<'_, '_>) -> Step<()> {
    divide(
        m,
        |a, b| a.as_i256().wrapping_div(b.as_i256()).as_u256(),
        BV::bvsdiv,
    )
}

/// The `MOD` opcode computes the unsigned remainder.
///
/// # Semantics
///
/// | Stack Index | Input | Output                          |
/// | :---------: | :---: | :-----------------------------: |
/// | 1           | `a`   | `if b == 0 then 0 else (a % b)` |
/// | 2           | `b`   |                                 |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn modulo(m: &mut Machine<'_, '_>) -> Step<()> {
    divide(m, |a, b| a % b, BV::bvurem)
}

/// The `SMOD` opcode computes the signed remainder, whose sign follows the
/// dividend.
///
/// # Semantics
///
/// | Stack Index | Input | Output                          |
/// | :---------: | :---: | :-----------------------------: |
/// | 1           | `a`   | `if b == 0 then 0 else (a % b)` |
/// | 2           | `b`   |                                 |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn smod(m: &mut Machine<'_, '_>) -> Step<()> {
    divide(
        m,
        |a, b| a.as_i256().wrapping_rem(b.as_i256()).as_u256(),
        BV::bvsrem,
    )
}

/// The `ADDMOD` opcode performs modulo addition without intermediate
/// overflow.
///
/// # Semantics
///
/// | Stack Index | Input | Output                              |
/// | :---------: | :---: | :---------------------------------: |
/// | 1           | `a`   | `if N == 0 then 0 else (a + b) % N` |
/// | 2           | `b`   |                                     |
/// | 3           | `N`   |                                     |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn add_mod(m: &mut Machine<'_, '_>) -> Step<()> {
    let [a, b, n] = m.pop()?;
    if let (Some(a), Some(b), Some(n)) = (a.as_concrete(), b.as_concrete(), n.as_concrete()) {
        return m.push(add_mod_words(a, b, n));
    }

    let n = m.lift(&n);
    let (a, b) = (m.lift(&a).zero_ext(1), m.lift(&b).zero_ext(1));
    let sum = a
        .bvadd(&b)
        .bvurem(&n.zero_ext(1))
        .extract(WORD_SIZE_BITS - 1, 0);
    let result = guard_zero_divisor(m, &n, &sum);
    m.push(result)
}

/// The `MULMOD` opcode performs modulo multiplication without intermediate
/// overflow.
///
/// # Semantics
///
/// | Stack Index | Input | Output                              |
/// | :---------: | :---: | :---------------------------------: |
/// | 1           | `a`   | `if N == 0 then 0 else (a * b) % N` |
/// | 2           | `b`   |                                     |
/// | 3           | `N`   |                                     |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn mul_mod(m: &mut Machine<'_, '_>) -> Step<()> {
    let [a, b, n] = m.pop()?;
    if let (Some(a), Some(b), Some(n)) = (a.as_concrete(), b.as_concrete(), n.as_concrete()) {
        return m.push(mul_mod_words(a, b, n));
    }

    let n = m.lift(&n);
    let (a, b) = (
        m.lift(&a).zero_ext(WORD_SIZE_BITS),
        m.lift(&b).zero_ext(WORD_SIZE_BITS),
    );
    let product = a
        .bvmul(&b)
        .bvurem(&n.zero_ext(WORD_SIZE_BITS))
        .extract(WORD_SIZE_BITS - 1, 0);
    let result = guard_zero_divisor(m, &n, &product);
    m.push(result)
}

/// The `EXP` opcode performs exponentiation.
///
/// # Semantics
///
/// | Stack Index | Input      | Output                           |
/// | :---------: | :--------: | :------------------------------: |
/// | 1           | `base`     | `(base ** exponent) % 2**256`    |
/// | 2           | `exponent` |                                  |
///
/// A symbolic exponent has no closed form, so it yields a fresh variable.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn exp(m: &mut Machine<'_, '_>) -> Step<()> {
    let [base, exponent] = m.pop()?;
    let result = match (base.as_concrete(), exponent.as_concrete()) {
        (Some(base), Some(exponent)) => Value::Concrete(pow_words(base, exponent)),
        (None, Some(mut exponent)) => {
            let mut base = m.lift(&base);
            let mut result = m.word(U256::ONE);
            while exponent != U256::ZERO {
                if exponent & U256::ONE == U256::ONE {
                    result = result.bvmul(&base);
                }
                exponent >>= 1u32;
                if exponent != U256::ZERO {
                    base = base.bvmul(&base);
                }
            }
            Value::from_bv(&result)
        }
        _ => m.fresh(),
    };
    m.push(result)
}

/// The `SIGNEXTEND` opcode extends the sign of a two's-complement number of
/// `b + 1` bytes to the full word.
///
/// # Semantics
///
/// | Stack Index | Input | Output                              |
/// | :---------: | :---: | :---------------------------------: |
/// | 1           | `b`   | `x` with bit `8b + 7` copied upward |
/// | 2           | `x`   |                                     |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sign_extend(m: &mut Machine<'_, '_>) -> Step<()> {
    let [index, value] = m.pop()?;
    let Some(index) = index.as_concrete() else {
        let result = m.fresh();
        return m.push(result);
    };
    if index >= U256::new(31) {
        return m.push(value);
    }

    let bit = index.as_u32() * 8 + 7;
    let result = match value.as_concrete() {
        Some(word) => Value::Concrete(sign_extend_word(word, bit)),
        None => Value::from_bv(
            &m.lift(&value)
                .extract(bit, 0)
                .sign_ext(WORD_SIZE_BITS - 1 - bit),
        ),
    };
    m.push(result)
}

/// Executes a division-like operation whose result is zero when the divisor
/// is zero.
fn divide<'ctx>(
    m: &mut Machine<'_, 'ctx>,
    concrete: impl FnOnce(U256, U256) -> U256,
    symbolic: impl FnOnce(&BV<'ctx>, &BV<'ctx>) -> BV<'ctx>,
) -> Step<()> {
    let [a, b] = m.pop()?;
    if let (Some(a), Some(b)) = (a.as_concrete(), b.as_concrete()) {
        let result = if b == U256::ZERO { U256::ZERO } else { concrete(a, b) };
        return m.push(result);
    }

    let (a, b) = (m.lift(&a), m.lift(&b));
    let quotient = symbolic(&a, &b);
    let result = guard_zero_divisor(m, &b, &quotient);
    m.push(result)
}

/// Makes `result` zero wherever `divisor` is zero, or outright if the path
/// forces the divisor to be zero.
fn guard_zero_divisor<'ctx>(
    m: &Machine<'_, 'ctx>,
    divisor: &BV<'ctx>,
    result: &BV<'ctx>,
) -> Value<'ctx> {
    let zero = m.word(U256::ZERO);
    let divisor_is_zero = divisor._eq(&zero);
    if m.proves(&divisor_is_zero) {
        return Value::Concrete(U256::ZERO);
    }
    Value::from_bv(&divisor_is_zero.ite(&zero, result))
}

fn add_mod_words(a: U256, b: U256, n: U256) -> U256 {
    if n == U256::ZERO {
        return U256::ZERO;
    }
    add_reduced(a % n, b % n, n)
}

/// Adds two words that are already reduced modulo `n`.
fn add_reduced(x: U256, y: U256, n: U256) -> U256 {
    let (sum, overflowed) = x.overflowing_add(y);
    if overflowed || sum >= n {
        sum.wrapping_sub(n)
    } else {
        sum
    }
}

fn mul_mod_words(a: U256, b: U256, n: U256) -> U256 {
    if n == U256::ZERO {
        return U256::ZERO;
    }
    let base = a % n;
    let mut result = U256::ZERO;
    for bit in (0..WORD_SIZE_BITS).rev() {
        result = add_reduced(result, result, n);
        if (b >> bit) & U256::ONE == U256::ONE {
            result = add_reduced(result, base, n);
        }
    }
    result
}

fn pow_words(mut base: U256, mut exponent: U256) -> U256 {
    let mut result = U256::ONE;
    while exponent != U256::ZERO {
        if exponent & U256::ONE == U256::ONE {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exponent >>= 1u32;
    }
    result
}

fn sign_extend_word(word: U256, bit: u32) -> U256 {
    let low_mask = (U256::ONE << (bit + 1)) - U256::ONE;
    if word & (U256::ONE << bit) == U256::ZERO {
        word & low_mask
    } else {
        word | !low_mask
    }
}
