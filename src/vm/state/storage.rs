//! This module contains the definition of the virtual machine's storage
//! container.

use std::{collections::HashMap, rc::Rc};

use crate::vm::value::{Key, Value};

/// A representation of the persistent storage of the contract under analysis.
///
/// Storage on a real EVM is a word-addressed word array where every slot
/// starts at zero. Here the contract's prior storage is unknown, so slots are
/// only present once they have been written or loaded, and the first load of
/// a slot binds a fresh variable for its prior content.
///
/// Slots are keyed by [`Key`], which makes a write through a symbolic slot
/// expression visible to a later read through the same expression.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Storage<'ctx> {
    slots: Rc<HashMap<Key, Value<'ctx>>>,
}

impl<'ctx> Storage<'ctx> {
    /// Creates a new, empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the value in the slot at `key`, if it is known.
    #[must_use]
    pub fn load(&self, key: &Key) -> Option<&Value<'ctx>> {
        self.slots.get(key)
    }

    /// Stores `value` in the slot at `key`.
    pub fn store(&mut self, key: Key, value: Value<'ctx>) {
        Rc::make_mut(&mut self.slots).insert(key, value);
    }

    /// Gets the number of slots that are known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Checks whether no slot is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
