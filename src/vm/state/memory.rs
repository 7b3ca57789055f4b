//! This module contains the definition of the virtual machine's memory.

use std::{collections::HashMap, fmt::Write as _, rc::Rc};

use ethnum::U256;
use z3::ast::Ast;

use crate::{
    constant::{BYTE_SIZE_BITS, WORD_SIZE_BYTES},
    vm::value::{Key, Value},
};

/// The contents of a single byte of the memory buffer.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ByteCell {
    Known(u8),

    /// A byte of a symbolic word, kept as the text of its simplified
    /// extraction.
    Expr(Rc<str>),
}

/// A representation of the transient memory of the symbolic virtual machine.
///
/// Memory is kept twice:
///
/// - A sparse map of logical 32-byte cells, keyed by the (possibly symbolic)
///   offset that they were stored at. Loads and stores go through this map.
/// - A byte buffer that only ever grows, written by stores to concrete
///   offsets. It exists so that hashing a concrete range can be keyed on the
///   exact content of that range.
///
/// The high-water mark (in words) is tracked alongside both, and may be
/// symbolic once a store to a symbolic offset has happened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Memory<'ctx> {
    words: Rc<HashMap<Key, Value<'ctx>>>,
    bytes: Rc<Vec<ByteCell>>,
    high_water: Value<'ctx>,
}

impl<'ctx> Memory<'ctx> {
    /// Constructs a new memory container that currently stores no data.
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: Rc::default(),
            bytes: Rc::default(),
            high_water: Value::from_u64(0),
        }
    }

    /// Loads the logical cell stored at `key`, if any.
    #[must_use]
    pub fn load(&self, key: &Key) -> Option<&Value<'ctx>> {
        self.words.get(key)
    }

    /// Stores `value` in the logical cell at `key`, replacing what was there.
    pub fn store(&mut self, key: Key, value: Value<'ctx>) {
        Rc::make_mut(&mut self.words).insert(key, value);
    }

    /// Forgets every logical cell.
    ///
    /// Used when a store goes through a symbolic offset, at which point any
    /// existing cell may have been overwritten.
    pub fn forget_cells(&mut self) {
        Rc::make_mut(&mut self.words).clear();
    }

    /// Writes the 32 bytes of `value` to the byte buffer at `offset`, growing
    /// the buffer to a whole number of words as needed.
    pub fn write_word_bytes(&mut self, offset: usize, value: &Value<'ctx>) {
        let cells: Vec<ByteCell> = match value {
            Value::Concrete(word) => {
                word.to_be_bytes().iter().map(|b| ByteCell::Known(*b)).collect()
            }
            Value::Symbolic(expression) => (0..WORD_SIZE_BYTES)
                .map(|i| {
                    #[allow(clippy::cast_possible_truncation)]
                    let low = ((WORD_SIZE_BYTES - 1 - i) as u32) * BYTE_SIZE_BITS;
                    let byte = expression.extract(low + BYTE_SIZE_BITS - 1, low).simplify();
                    ByteCell::Expr(byte.to_string().into())
                })
                .collect(),
        };
        self.write_cells(offset, &cells);
    }

    /// Writes raw `data` to the byte buffer at `offset`.
    pub fn write_raw_bytes(&mut self, offset: usize, data: &[u8]) {
        let cells: Vec<ByteCell> = data.iter().map(|b| ByteCell::Known(*b)).collect();
        self.write_cells(offset, &cells);
    }

    fn write_cells(&mut self, offset: usize, cells: &[ByteCell]) {
        let Some(end) = offset.checked_add(cells.len()) else {
            return;
        };
        let bytes = Rc::make_mut(&mut self.bytes);
        let required = end.div_ceil(WORD_SIZE_BYTES) * WORD_SIZE_BYTES;
        if bytes.len() < required {
            bytes.resize(required, ByteCell::Known(0));
        }
        bytes[offset..end].clone_from_slice(cells);
    }

    /// Renders the content of the byte range starting at `offset` as text.
    ///
    /// The range is clamped to the written part of the buffer, so reading
    /// past the end yields the bytes that do exist.
    #[must_use]
    pub fn content_of(&self, offset: usize, length: usize) -> String {
        let start = offset.min(self.bytes.len());
        let end = offset.saturating_add(length).min(self.bytes.len());
        self.bytes[start..end].iter().fold(String::new(), |mut text, cell| {
            match cell {
                ByteCell::Known(b) => {
                    let _ = write!(text, "{b},");
                }
                ByteCell::Expr(e) => {
                    let _ = write!(text, "({e}),");
                }
            }
            text
        })
    }

    /// Gets the high-water mark of memory, in words.
    #[must_use]
    pub fn high_water(&self) -> &Value<'ctx> {
        &self.high_water
    }

    /// Sets the high-water mark of memory, in words.
    pub fn set_high_water(&mut self, value: Value<'ctx>) {
        self.high_water = value;
    }

    /// Raises a concrete high-water mark to cover the byte range ending at
    /// `end`, returning `false` if the current mark is symbolic.
    pub fn cover_concrete(&mut self, end: U256) -> bool {
        let Some(current) = self.high_water.as_concrete() else {
            return false;
        };
        let word = U256::from(WORD_SIZE_BYTES as u64);
        let needed = end / word + U256::from(u8::from(end % word != U256::ZERO));
        if needed > current {
            self.high_water = Value::Concrete(needed);
        }
        true
    }

    /// Gets the number of bytes in the byte buffer.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl<'ctx> Default for Memory<'ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;
    use z3::{ast::BV, Config, Context};

    use crate::vm::{
        state::memory::Memory,
        value::{Key, Value},
    };

    #[test]
    fn stores_and_loads_cells() {
        let mut memory = Memory::new();
        memory.store(Key::Concrete(U256::new(0x40)), Value::from_u64(0x80));
        assert_eq!(
            memory.load(&Key::Concrete(U256::new(0x40))),
            Some(&Value::from_u64(0x80))
        );

        memory.forget_cells();
        assert_eq!(memory.load(&Key::Concrete(U256::new(0x40))), None);
    }

    #[test]
    fn byte_buffer_grows_in_words() {
        let mut memory = Memory::new();
        memory.write_word_bytes(0x21, &Value::from_u64(7));
        assert_eq!(memory.byte_len(), 0x60);
    }

    #[test]
    fn identical_content_renders_identically() {
        let ctx = Context::new(&Config::new());
        let owner = Value::from_bv(&BV::new_const(&ctx, "Is", 256));

        let mut left = Memory::new();
        left.write_word_bytes(0, &owner);
        left.write_word_bytes(32, &Value::from_u64(3));

        let mut right = Memory::new();
        right.write_word_bytes(0, &owner);
        right.write_word_bytes(32, &Value::from_u64(3));
        assert_eq!(left.content_of(0, 64), right.content_of(0, 64));

        right.write_word_bytes(32, &Value::from_u64(4));
        assert_ne!(left.content_of(0, 64), right.content_of(0, 64));
    }

    #[test]
    fn concrete_high_water_rounds_up_to_words() {
        let mut memory = Memory::new();
        assert!(memory.cover_concrete(U256::new(0x41)));
        assert_eq!(memory.high_water(), &Value::from_u64(3));

        memory.cover_concrete(U256::new(0x20));
        assert_eq!(memory.high_water(), &Value::from_u64(3));
    }
}
