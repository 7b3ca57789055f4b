//! This module contains the interface to the source map, the collaborator that
//! relates program counters back to the contract's source and its ABI.
//!
//! Building a source map needs a compiler, so the library only consumes one.
//! [`StaticSourceMap`] is an in-memory implementation that can be described in
//! JSON, and [`SourceView`] combines any map with the program counters that
//! [`correlate`] recovers from the compiler's assembly positions.

pub mod correlate;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    rc::Rc,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use correlate::correlate;

/// Words that can lead a source snippet without naming a variable.
const SNIPPET_KEYWORDS: [&str; 4] = ["return", "delete", "emit", "new"];

/// A half-open range of character offsets into the source content.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SourceRange {
    pub begin: usize,
    pub end:   usize,
}

/// One entry of the assembly that the compiler emits alongside the bytecode.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AsmPosition {
    /// The assembly item, such as `PUSH`, `tag` or a mnemonic.
    pub name: String,

    /// The operand of the item, in hex for pushes.
    #[serde(default)]
    pub value: Option<String>,

    pub begin: usize,
    pub end:   usize,
}

impl AsmPosition {
    /// Gets the source range covered by the entry.
    #[must_use]
    pub fn range(&self) -> SourceRange {
        SourceRange {
            begin: self.begin,
            end:   self.end,
        }
    }
}

/// A parameter of a public function.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,

    /// The index of the call-data word that holds the parameter.
    pub position: u64,
}

/// The read-only view of the contract's source that the explorer consumes.
pub trait SourceMap
where
    Self: Debug,
{
    /// Gets the source snippet that the instruction at `pc` was compiled from.
    fn source_code(&self, pc: u64) -> Option<&str>;

    /// Gets the map from four-byte selectors to full function signatures.
    fn sig_to_func(&self) -> &BTreeMap<String, String>;

    /// Gets the parameters of each function, keyed by its short name.
    fn func_name_to_params(&self) -> &BTreeMap<String, Vec<Parameter>>;

    /// Gets the source snippets of internal function calls.
    ///
    /// These are carried through from the source-map document for callers
    /// that want them. The explorer itself does not consult them.
    fn func_call_names(&self) -> &[String];

    /// Gets the names of the contract's state variables.
    fn state_variable_names(&self) -> &[String];

    /// Gets the names of the functions that emit a `Transfer` event.
    fn target_functions(&self) -> &[String];

    /// Gets the full text of the source.
    fn source_content(&self) -> &str;

    /// Gets the compiler's assembly positions, with [`None`] separating the
    /// code of nested contracts.
    fn asm_positions(&self) -> &[Option<AsmPosition>] {
        &[]
    }

    /// Gets the expression by which the contract returns its owner, if it
    /// could be found.
    fn owner_return_expression(&self) -> Option<&str> {
        None
    }

    /// Returns `text` if the first identifier in it is a state variable.
    fn get_parameter_or_state_var(&self, text: &str) -> Option<String> {
        let first = first_identifier(text)?;
        self.state_variable_names()
            .iter()
            .any(|name| name == first)
            .then(|| text.to_string())
    }
}

/// Gets the first identifier in `text` that is not a keyword.
#[must_use]
pub fn first_identifier(text: &str) -> Option<&str> {
    let Ok(pattern) = Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*") else {
        return None;
    };
    pattern
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|word| !SNIPPET_KEYWORDS.contains(word))
}

/// A source map held entirely in memory.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct StaticSourceMap {
    pub content:                 String,
    pub instruction_ranges:      BTreeMap<u64, SourceRange>,
    pub asm_positions:           Vec<Option<AsmPosition>>,
    pub sig_to_func:             BTreeMap<String, String>,
    pub func_name_to_params:     BTreeMap<String, Vec<Parameter>>,
    pub func_call_names:         Vec<String>,
    pub state_variable_names:    Vec<String>,
    pub target_functions:        Vec<String>,
    pub owner_return_expression: Option<String>,
}

impl StaticSourceMap {
    /// Reads a source map from its JSON description.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `json` does not describe a source map.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Wraps the map into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn SourceMap> {
        Rc::new(self)
    }
}

impl SourceMap for StaticSourceMap {
    fn source_code(&self, pc: u64) -> Option<&str> {
        let range = self.instruction_ranges.get(&pc)?;
        self.content.get(range.begin..range.end)
    }

    fn sig_to_func(&self) -> &BTreeMap<String, String> {
        &self.sig_to_func
    }

    fn func_name_to_params(&self) -> &BTreeMap<String, Vec<Parameter>> {
        &self.func_name_to_params
    }

    fn func_call_names(&self) -> &[String] {
        &self.func_call_names
    }

    fn state_variable_names(&self) -> &[String] {
        &self.state_variable_names
    }

    fn target_functions(&self) -> &[String] {
        &self.target_functions
    }

    fn source_content(&self) -> &str {
        &self.content
    }

    fn asm_positions(&self) -> &[Option<AsmPosition>] {
        &self.asm_positions
    }

    fn owner_return_expression(&self) -> Option<&str> {
        self.owner_return_expression.as_deref()
    }
}

/// A source map together with what the analysis has learned about the program
/// it describes.
#[derive(Clone, Debug)]
pub struct SourceView {
    map:     Rc<dyn SourceMap>,
    ranges:  BTreeMap<u64, SourceRange>,
    learned: BTreeSet<String>,
}

impl SourceView {
    /// Creates a view of `map` in which the instructions at the keys of
    /// `ranges` come from the associated source ranges.
    #[must_use]
    pub fn new(map: Rc<dyn SourceMap>, ranges: BTreeMap<u64, SourceRange>) -> Self {
        Self {
            map,
            ranges,
            learned: BTreeSet::new(),
        }
    }

    /// Gets the underlying map.
    #[must_use]
    pub fn map(&self) -> &dyn SourceMap {
        self.map.as_ref()
    }

    /// Gets the source snippet for the instruction at `pc`, preferring the
    /// correlated ranges.
    #[must_use]
    pub fn source_code(&self, pc: u64) -> Option<&str> {
        match self.ranges.get(&pc) {
            Some(range) => self.map.source_content().get(range.begin..range.end),
            None => self.map.source_code(pc),
        }
    }

    /// Records that `name` names a value the analysis has bound, so that
    /// snippets starting with it are treated like state variables.
    pub fn learn(&mut self, name: impl Into<String>) {
        self.learned.insert(name.into());
    }

    /// Returns `text` if its first identifier is a state variable or a learned
    /// name.
    #[must_use]
    pub fn parameter_or_state_var(&self, text: &str) -> Option<String> {
        if let Some(found) = self.map.get_parameter_or_state_var(text) {
            return Some(found);
        }
        let first = first_identifier(text)?;
        self.learned.contains(first).then(|| text.to_string())
    }

    /// Gets the short name of the parameter that occupies call-data word
    /// `position` of the function called `function`.
    #[must_use]
    pub fn parameter_at(&self, function: &str, position: u64) -> Option<&str> {
        self.map
            .func_name_to_params()
            .get(function)?
            .iter()
            .find(|p| p.position == position)
            .map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use crate::source_map::{first_identifier, SourceMap, SourceRange, SourceView, StaticSourceMap};

    fn token_map() -> anyhow::Result<StaticSourceMap> {
        let json = r#"{
            "content": "function transferFrom(address from) { return _owner; }",
            "instruction_ranges": { "7": { "begin": 38, "end": 51 } },
            "state_variable_names": ["_owner", "balances"],
            "func_name_to_params": { "transferFrom": [{ "name": "from", "position": 0 }] },
            "func_call_names": ["return _owner"]
        }"#;
        Ok(StaticSourceMap::from_json(json)?)
    }

    #[test]
    fn reads_snippets_by_program_counter() -> anyhow::Result<()> {
        let map = token_map()?;
        assert_eq!(map.source_code(7), Some("return _owner"));
        assert_eq!(map.source_code(8), None);
        assert!(map.sig_to_func().is_empty());
        assert_eq!(map.func_call_names(), ["return _owner".to_string()]);

        Ok(())
    }

    #[test]
    fn recognises_state_variables() -> anyhow::Result<()> {
        let map = token_map()?;
        assert_eq!(
            map.get_parameter_or_state_var("balances[from]"),
            Some("balances[from]".to_string())
        );
        assert_eq!(map.get_parameter_or_state_var("return _owner"), Some("return _owner".into()));
        assert_eq!(map.get_parameter_or_state_var("amount"), None);
        assert_eq!(first_identifier("  1 + 2"), None);

        Ok(())
    }

    #[test]
    fn views_prefer_correlated_ranges_and_learn_names() -> anyhow::Result<()> {
        let mut ranges = BTreeMap::new();
        ranges.insert(3, SourceRange { begin: 0, end: 8 });
        let mut view = SourceView::new(token_map()?.in_rc(), ranges);

        assert_eq!(view.source_code(3), Some("function"));
        assert_eq!(view.source_code(7), Some("return _owner"));
        assert_eq!(view.parameter_at("transferFrom", 0), Some("from"));

        assert_eq!(view.parameter_or_state_var("from"), None);
        view.learn("from");
        assert_eq!(view.parameter_or_state_var("from"), Some("from".into()));

        Ok(())
    }
}
