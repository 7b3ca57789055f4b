//! Opcodes that deal with accessing and manipulating memory, storage, call
//! data and the stack.
//!
//! Memory is modelled as described on [`crate::vm::state::memory::Memory`].
//! Whenever an access may reach past the high-water mark, the mark is raised
//! to cover it, but only when the program can observe the mark through
//! `MSIZE`.

use ethnum::U256;
use z3::ast::BV;

use crate::{
    constant::{BYTE_BUFFER_MAX_OFFSET, CODE_COPY_MAX_BYTES, WORD_SIZE_BYTES},
    vm::{
        state::environment::Environment,
        value::{Key, Value},
        Machine,
        Step,
    },
};

/// The operators at which a source snippet is cut to find the variable that a
/// storage load reads.
const SNIPPET_OPERATORS: &[char] = &['-', '+', '*', '/', '%', '|', '&', '^', '!', '>', '<', '='];

/// The `CALLDATALOAD` opcode gets the input data for the current environment.
///
/// # Semantics
///
/// | Stack Index | Input    | Output                               |
/// | :---------: | :------: | :----------------------------------: |
/// | 1           | `offset` | `calldata[offset:offset+32]`         |
///
/// When the source says which parameter of the current function occupies the
/// word, the variable is named after that parameter. Otherwise it gets the
/// next call-data name. The first three loads of a function are remembered as
/// the `from`, `to` and token arguments of a transfer.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn call_data_load(m: &mut Machine<'_, '_>) -> Step<()> {
    let [offset] = m.pop()?;
    let name = match parameter_name(m, &offset) {
        Some(name) => name,
        None => m.ctx.names.data(),
    };
    let value = m.bind(&name);
    m.ctx.tracker.on_calldata_load(&value);
    m.push(value)
}

/// Gets the name of the parameter loaded from call data at `offset`, learning
/// it as a name that later snippets may refer to.
fn parameter_name(m: &mut Machine<'_, '_>, offset: &Value<'_>) -> Option<String> {
    let offset = small_word(offset)?;
    if !m.source_code()?.starts_with("function") {
        return None;
    }

    let function = m.ctx.tracker.context().name.clone();
    let position = offset.checked_sub(4)? / WORD_SIZE_BYTES as u64;
    let source = m.ctx.source.as_mut()?;
    let name = source.parameter_at(&function, position)?.to_string();
    source.learn(name.clone());
    Some(name)
}

/// The `CALLDATASIZE` opcode gets the size of the input data in the current
/// environment.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn call_data_size(m: &mut Machine<'_, '_>) -> Step<()> {
    let name = m.ctx.names.data_size();
    let size = m.bind(&name);
    m.push(size)
}

/// The `CALLDATACOPY` opcode copies the input data in the current environment
/// to memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `destOffset` |        |
/// | 2           | `offset`     |        |
/// | 3           | `size`       |        |
///
/// The copy is not modelled, and memory is left as it was.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn call_data_copy(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<3>()?;
    Ok(())
}

/// The `CODESIZE` opcode gets the size of the code running in the current
/// environment.
///
/// This is only known when the listing came with the bytecode.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn code_size(m: &mut Machine<'_, '_>) -> Step<()> {
    let size = match m.ctx.code.as_ref().map(|code| code.len()) {
        Some(len) => Value::from_u64(len as u64),
        None => {
            let name = m.ctx.names.code_size(Environment::RECEIVER);
            m.bind(&name)
        }
    };
    m.push(size)
}

/// The `CODECOPY` opcode copies the code running in the current environment
/// to memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `destOffset` |        |
/// | 2           | `offset`     |        |
/// | 3           | `size`       |        |
///
/// When the bytecode is known and all operands are concrete, the bytes are
/// copied. Otherwise the destination holds a variable naming the chunk of
/// code.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn code_copy(m: &mut Machine<'_, '_>) -> Step<()> {
    let [dest, offset, size] = m.pop()?;
    let copied = match (small_word(&dest), small_word(&offset), small_word(&size)) {
        (Some(dest), Some(offset), Some(size)) => m
            .ctx
            .code
            .as_ref()
            .and_then(|code| code_slice(code, offset, size))
            .map(|chunk| (dest, chunk)),
        _ => None,
    };

    match copied {
        Some((dest, chunk)) => write_chunk(m, dest, &chunk),
        None => {
            let name = m.ctx.names.code(Environment::RECEIVER, &offset, &size);
            let chunk = m.bind(&name);
            overwrite(m, &dest, &size, chunk);
        }
    }
    Ok(())
}

/// Gets `size` bytes of `code` from `offset`, padded with zeroes past its end,
/// as long as the copy is small enough to be worth making.
fn code_slice(code: &[u8], offset: u64, size: u64) -> Option<Vec<u8>> {
    let size = usize::try_from(size).ok().filter(|s| *s <= CODE_COPY_MAX_BYTES)?;
    let offset = usize::try_from(offset).ok()?;
    let chunk = (0..size)
        .map(|i| offset.checked_add(i).and_then(|at| code.get(at)).copied().unwrap_or(0))
        .collect();
    Some(chunk)
}

/// Writes the concrete `data` to memory at `dest`.
fn write_chunk(m: &mut Machine<'_, '_>, dest: u64, data: &[u8]) {
    let end = U256::from(dest) + U256::from(data.len() as u64);
    cover(m, &Value::Concrete(end));

    for (index, bytes) in data.chunks(WORD_SIZE_BYTES).enumerate() {
        let mut word = [0u8; WORD_SIZE_BYTES];
        word[..bytes.len()].copy_from_slice(bytes);
        let at = U256::from(dest) + U256::from((index * WORD_SIZE_BYTES) as u64);
        m.state
            .memory
            .store(Key::Concrete(at), Value::Concrete(U256::from_be_bytes(word)));
    }

    if let Ok(dest) = usize::try_from(dest) {
        if dest.saturating_add(data.len()) <= BYTE_BUFFER_MAX_OFFSET {
            m.state.memory.write_raw_bytes(dest, data);
        }
    }
}

/// Replaces what is known about the memory range of `size` bytes at `dest`
/// with a single cell holding `value`.
fn overwrite<'ctx>(
    m: &mut Machine<'_, 'ctx>,
    dest: &Value<'ctx>,
    size: &Value<'ctx>,
    value: Value<'ctx>,
) {
    let end = match (dest.as_concrete(), size.as_concrete()) {
        (Some(dest), Some(size)) => Value::Concrete(dest.saturating_add(size)),
        _ => Value::from_bv(&m.lift(dest).bvadd(&m.lift(size))),
    };
    cover(m, &end);
    m.state.memory.forget_cells();
    m.state.memory.store(dest.key(), value);
}

/// The `EXTCODESIZE` opcode gets the size of an account's code.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn ext_code_size(m: &mut Machine<'_, '_>) -> Step<()> {
    let [address] = m.pop()?;
    let name = m.ctx.names.code_size(&address);
    let size = m.bind(&name);
    m.push(size)
}

/// The `EXTCODECOPY` opcode copies an account's code to memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `address`    |        |
/// | 2           | `destOffset` |        |
/// | 3           | `offset`     |        |
/// | 4           | `size`       |        |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn ext_code_copy(m: &mut Machine<'_, '_>) -> Step<()> {
    let [address, dest, offset, size] = m.pop()?;
    let name = m.ctx.names.code(&address, &offset, &size);
    let chunk = m.bind(&name);
    overwrite(m, &dest, &size, chunk);
    Ok(())
}

/// The `RETURNDATASIZE` opcode gets the size of the output data from the
/// previous call, which is always a fresh variable.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn return_data_size(m: &mut Machine<'_, '_>) -> Step<()> {
    let size = m.fresh();
    m.push(size)
}

/// The `RETURNDATACOPY` opcode copies the output data from the previous call
/// to memory. The copy is not modelled.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn return_data_copy(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<3>()?;
    Ok(())
}

/// The `POP` opcode removes an item from the stack.
///
/// # Errors
///
/// Returns [`Err`] if the stack is empty.
pub fn pop(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<1>()?;
    Ok(())
}

/// The `MLOAD` opcode loads a word from memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output                     |
/// | :---------: | :------: | :------------------------: |
/// | 1           | `offset` | `memory[offset:offset+32]` |
///
/// A cell that nothing was stored to yields the variable `mem_<offset>`,
/// which then becomes the content of the cell.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn mload(m: &mut Machine<'_, '_>) -> Step<()> {
    let [offset] = m.pop()?;
    let key = offset.key();
    let end = word_end(m, &offset);
    cover(m, &end);

    let value = match m.state.memory.load(&key) {
        Some(value) => value.clone(),
        None => {
            let name = m.ctx.names.memory(&key);
            let value = m.bind(&name);
            m.state.memory.store(key, value.clone());
            value
        }
    };
    m.push(value)
}

/// The `MSTORE` opcode stores a word to memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `value`  |        |
///
/// A store through a symbolic offset may overwrite any cell, so every known
/// cell is forgotten.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn mstore(m: &mut Machine<'_, '_>) -> Step<()> {
    let [offset, value] = m.pop()?;
    m.state.features.on_mstore(offset.as_concrete());
    let end = word_end(m, &offset);
    cover(m, &end);

    match small_word(&offset).and_then(|o| usize::try_from(o).ok()) {
        Some(at) if at.saturating_add(WORD_SIZE_BYTES) <= BYTE_BUFFER_MAX_OFFSET => {
            m.state.memory.write_word_bytes(at, &value);
        }
        _ if offset.is_symbolic() => m.state.memory.forget_cells(),
        _ => {}
    }

    m.state.memory.store(offset.key(), value);
    Ok(())
}

/// The `MSTORE8` opcode stores the low byte of a word to memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `value`  |        |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn mstore8(m: &mut Machine<'_, '_>) -> Step<()> {
    let [offset, value] = m.pop()?;
    let low_byte = match value.as_concrete() {
        Some(word) => Value::Concrete(word & U256::new(0xff)),
        None => Value::from_bv(&m.lift(&value).bvand(&m.word(U256::new(0xff)))),
    };

    let end = match offset.as_concrete() {
        Some(at) => Value::Concrete(at.saturating_add(U256::ONE)),
        None => Value::from_bv(&m.lift(&offset).bvadd(&m.word(U256::ONE))),
    };
    cover(m, &end);

    let at = small_word(&offset).and_then(|o| usize::try_from(o).ok());
    match (at, low_byte.as_concrete()) {
        (Some(at), Some(byte)) if at < BYTE_BUFFER_MAX_OFFSET => {
            m.state.memory.write_raw_bytes(at, &[byte.as_u8()]);
        }
        _ if offset.is_symbolic() => m.state.memory.forget_cells(),
        _ => {}
    }

    m.state.memory.store(offset.key(), low_byte);
    Ok(())
}

/// The `SLOAD` opcode loads a word from storage.
///
/// # Semantics
///
/// | Stack Index | Input | Output           |
/// | :---------: | :---: | :--------------: |
/// | 1           | `key` | `storage[key]`   |
///
/// The first load of a slot binds a variable for its prior content, named
/// after the slot and, when the source says so, the state variable it holds.
/// Later loads on the path see that variable or whatever was stored since.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sload(m: &mut Machine<'_, '_>) -> Step<()> {
    let [slot] = m.pop()?;
    let key = slot.key();

    let value = match m.state.storage.load(&key) {
        Some(value) => value.clone(),
        None => {
            let variable = m.source_code().and_then(|snippet| {
                let read = snippet.split(SNIPPET_OPERATORS).next().unwrap_or_default().trim();
                m.ctx.source.as_ref()?.parameter_or_state_var(read)
            });
            let name = m.ctx.names.store(&key, variable.as_deref());
            let value = m.bind(&name);
            m.state.storage.store(key, value.clone());
            value
        }
    };

    m.state.features.on_sload(&value);
    m.push(value)
}

/// The `SSTORE` opcode stores a word to storage.
///
/// # Semantics
///
/// | Stack Index | Input   | Output |
/// | :---------: | :-----: | :----: |
/// | 1           | `key`   |        |
/// | 2           | `value` |        |
///
/// The write marks the current function as having mutated storage, and every
/// external call made earlier on the path as having been followed by a change
/// of state.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sstore(m: &mut Machine<'_, '_>) -> Step<()> {
    let [slot, value] = m.pop()?;
    m.state.storage.store(slot.key(), value);
    m.ctx.tracker.on_sstore();
    m.state.features.on_sstore();
    Ok(())
}

/// The `MSIZE` opcode gets the size of active memory in bytes.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn msize(m: &mut Machine<'_, '_>) -> Step<()> {
    let word = U256::from(WORD_SIZE_BYTES as u64);
    let size = match m.state.memory.high_water().as_concrete() {
        Some(words) => Value::Concrete(words.wrapping_mul(word)),
        None => {
            let words = m.lift(m.state.memory.high_water());
            Value::from_bv(&words.bvmul(&m.word(word)))
        }
    };
    m.push(size)
}

/// The `PUSHn` opcodes push their immediate onto the stack.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn push(m: &mut Machine<'_, '_>, immediate: Option<U256>) -> Step<()> {
    m.push(Value::Concrete(immediate.unwrap_or_default()))
}

/// The `DUPn` opcodes duplicate the `n`th stack item onto the top of the
/// stack.
///
/// # Errors
///
/// Returns [`Err`] if the stack holds fewer than `n` items or is full.
pub fn dup(m: &mut Machine<'_, '_>, n: u8) -> Step<()> {
    m.state.stack.dup(usize::from(n).saturating_sub(1))
}

/// The `SWAPn` opcodes swap the top of the stack with the item `n` below it.
///
/// # Errors
///
/// Returns [`Err`] if the stack holds `n` or fewer items.
pub fn swap(m: &mut Machine<'_, '_>, n: u8) -> Step<()> {
    m.state.stack.swap(usize::from(n))?;
    let exposed = m.state.stack.read(1).cloned();
    m.state.features.on_swap(exposed.as_ref());
    Ok(())
}

/// Reads `value` as a word that fits into a machine integer.
fn small_word(value: &Value<'_>) -> Option<u64> {
    u64::try_from(value.as_concrete()?).ok()
}

/// Gets the end of the word in memory at `offset`.
fn word_end<'ctx>(m: &Machine<'_, 'ctx>, offset: &Value<'ctx>) -> Value<'ctx> {
    let size = U256::from(WORD_SIZE_BYTES as u64);
    match offset.as_concrete() {
        Some(at) => Value::Concrete(at.saturating_add(size)),
        None => Value::from_bv(&m.lift(offset).bvadd(&m.word(size))),
    }
}

/// Raises the high-water mark of memory to cover everything before the byte
/// offset `end`.
///
/// A symbolic mark or end only grows when the solver allows it to, and only
/// when the program reads the mark.
fn cover<'ctx>(m: &mut Machine<'_, 'ctx>, end: &Value<'ctx>) {
    if let Some(end) = end.as_concrete() {
        if m.state.memory.cover_concrete(end) {
            return;
        }
    }
    if !m.ctx.tracks_msize {
        return;
    }

    let word = m.word(U256::from(WORD_SIZE_BYTES as u64));
    let needed: BV<'ctx> = m.lift(end).bvudiv(&word).bvadd(&m.word(U256::ONE));
    let current = m.lift(m.state.memory.high_water());
    let grows = current.bvult(&needed);
    if m.feasible(&grows) {
        let raised = Value::from_bv(&grows.ite(&needed, &current));
        m.state.memory.set_high_water(raised);
    }
}
