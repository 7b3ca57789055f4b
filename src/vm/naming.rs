//! This module contains the generator for the names of symbolic variables.
//!
//! Names are what relates variables across paths: the first load of a storage
//! slot binds `Ia_store-<slot>-<name>` on every path that loads it, so the
//! defect trackers can recognise it by name in the solver's assertions.
//! Counter-based names are unique across the whole analysis.

use std::fmt::Display;

/// The prefix of variables that hold the prior content of a storage slot.
pub const STORE_VARIABLE_PREFIX: &str = "Ia_store";

/// A generator of variable names, shared by every path of an analysis.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VariableNames {
    data_count: usize,
    count:      usize,
}

impl VariableNames {
    /// Creates a new generator whose counters start at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names a word of call data.
    pub fn data(&mut self) -> String {
        self.data_count += 1;
        format!("Id_{}", self.data_count)
    }

    /// Names the size of the call data.
    #[must_use]
    pub fn data_size(&self) -> String {
        "Id_size".into()
    }

    /// Names the content of memory at `address` when nothing is known to be
    /// stored there.
    #[must_use]
    pub fn memory(&self, address: impl Display) -> String {
        format!("mem_{address}")
    }

    /// Names an otherwise unconstrained value.
    pub fn arbitrary(&mut self) -> String {
        self.count += 1;
        format!("some_var_{}", self.count)
    }

    /// Names an unknown account.
    pub fn arbitrary_address(&mut self) -> String {
        self.count += 1;
        format!("some_address_{}", self.count)
    }

    /// Names the prior content of the storage slot at `position`, optionally
    /// tagged with the source-level name of the variable it holds.
    #[must_use]
    pub fn store(&self, position: impl Display, name: Option<&str>) -> String {
        format!("{STORE_VARIABLE_PREFIX}-{position}-{}", name.unwrap_or_default())
    }

    /// Names the remaining gas.
    pub fn gas(&mut self) -> String {
        self.count += 1;
        format!("gas_{}", self.count)
    }

    /// Names the balance of an account.
    pub fn balance(&mut self) -> String {
        self.count += 1;
        format!("balance_{}", self.count)
    }

    /// Names a chunk of the code of `address`.
    #[must_use]
    pub fn code(&self, address: impl Display, from: impl Display, length: impl Display) -> String {
        format!("code_{address}_{from}_{length}")
    }

    /// Names the size of the code of `address`.
    #[must_use]
    pub fn code_size(&self, address: impl Display) -> String {
        format!("code_size_{address}")
    }

    /// Names the hash of a block.
    #[must_use]
    pub fn block_hash(&self) -> String {
        "IH_blockhash".into()
    }
}

#[cfg(test)]
mod test {
    use crate::vm::naming::VariableNames;

    #[test]
    fn counters_are_shared_between_families() {
        let mut names = VariableNames::new();
        assert_eq!(names.arbitrary(), "some_var_1");
        assert_eq!(names.gas(), "gas_2");
        assert_eq!(names.arbitrary_address(), "some_address_3");
        assert_eq!(names.data(), "Id_1");
        assert_eq!(names.data(), "Id_2");
    }

    #[test]
    fn store_names_carry_the_source_name() {
        let names = VariableNames::new();
        assert_eq!(names.store(0, Some("_owner")), "Ia_store-0-_owner");
        assert_eq!(names.store("Is", None), "Ia_store-Is-");
    }
}
