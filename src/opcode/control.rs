//! Opcodes that perform control(-flow) operations on the EVM.
//!
//! The handlers for `JUMP` and `JUMPI` do not move the program counter
//! themselves. They resolve the target, record the edge on the graph, and tell
//! the explorer where control goes through a [`Flow`].

use ethnum::U256;
use z3::ast::Ast;

use crate::{
    error::execution::Error,
    vm::{
        value::{u256_from_bv, Value},
        Flow,
        Machine,
        Step,
    },
};

/// The `STOP` opcode halts execution, exiting the current call context.
///
/// # Errors
///
/// Never fails.
pub fn stop(_m: &mut Machine<'_, '_>) -> Step<()> {
    Ok(())
}

/// The `JUMP` opcode moves control to the destination on top of the stack.
///
/// # Semantics
///
/// | Stack Index | Input     | Output |
/// | :---------: | :-------: | :----: |
/// | 1           | `counter` |        |
///
/// # Errors
///
/// Returns [`Err`] if the stack is empty, or if `counter` does not resolve to
/// the start of a block.
pub fn jump<'ctx>(m: &mut Machine<'_, 'ctx>) -> Step<Flow<'ctx>> {
    let [target] = m.pop()?;
    let target = resolve_target(m, &target)?;
    Ok(Flow::Jump(target))
}

/// The `JUMPI` opcode moves control to the destination on top of the stack if
/// the condition below it is non-zero, and falls through otherwise.
///
/// # Semantics
///
/// | Stack Index | Input       | Output |
/// | :---------: | :---------: | :----: |
/// | 1           | `counter`   |        |
/// | 2           | `condition` |        |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack, or if
/// `counter` does not resolve to the start of a block.
pub fn jumpi<'ctx>(m: &mut Machine<'_, 'ctx>) -> Step<Flow<'ctx>> {
    let [target, flag] = m.pop()?;
    let target = resolve_target(m, &target)?;
    let condition = flag.is_nonzero(m.z3()).simplify();
    Ok(Flow::Branch { target, condition })
}

/// Resolves the destination of a jump to a literal program counter, recording
/// it as the jump target of the current block.
fn resolve_target(m: &mut Machine<'_, '_>, target: &Value<'_>) -> Step<u64> {
    let word = match target {
        Value::Concrete(word) => *word,
        Value::Symbolic(expression) => {
            u256_from_bv(&expression.simplify()).ok_or(Error::UnresolvedJump)?
        }
    };
    let target = u64::try_from(word).map_err(|_| Error::JumpTargetTooLarge {
        target: word.to_string(),
    })?;

    if m.ctx.cfg.block(target).is_none() {
        return Err(Error::NonExistentBlock { target });
    }
    m.ctx.cfg.resolve_jump(m.block, target);
    Ok(target)
}

/// The `JUMPDEST` opcode marks a valid destination for a jump, and does
/// nothing.
///
/// # Errors
///
/// Never fails.
pub fn jump_dest(_m: &mut Machine<'_, '_>) -> Step<()> {
    Ok(())
}

/// The `PC` opcode gets the address of the instruction being executed.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn pc(m: &mut Machine<'_, '_>) -> Step<()> {
    let pc = Value::Concrete(U256::from(m.pc));
    m.push(pc)
}

/// The `RETURN` opcode halts execution, returning output data.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `size`   |        |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn return_(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<2>()?;
    Ok(())
}

/// The `REVERT` opcode halts execution, reverting state changes but returning
/// output data.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn revert(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<2>()?;
    Ok(())
}

/// The `INVALID` and `ASSERTFAIL` opcodes end the path without touching the
/// state.
///
/// # Errors
///
/// Never fails.
pub fn invalid(_m: &mut Machine<'_, '_>) -> Step<()> {
    Ok(())
}
