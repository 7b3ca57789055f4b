//! This module contains the textual heuristics that recognise well-known token
//! implementations from the source snippets of the instructions being run.
//!
//! The heuristics compare snippets against fixed literals, which only works
//! for the exact source text of the libraries they were written for. They sit
//! behind [`PatternMatcher`] so that a structural matcher can replace them.

use std::{fmt::Debug, rc::Rc};

use crate::constant::DEFAULT_OWNER_RETURN_EXPRESSION;

/// The snippets by which `ERC721A` compares the sender with the token owner.
const ERC721A_OWNERSHIP_CHECKS: [&str; 2] = [
    "result := or(eq(msgSender, owner), eq(msgSender, approvedAddress))",
    "result := or(eq(msgSender, from), eq(msgSender, approvedAddress))",
];

/// Snippets after which the stack top is the token owner, besides the
/// contract's own owner-returning expression.
const OWNER_CAPTURES: [&str; 2] = ["prevOwnership.addr", "return packed"];

/// The guard that the `ERC721Pausable` extension places on transfers.
const PAUSABLE_GUARD: &str = r#"require(!paused(), "ERC721Pausable: token transfer while paused")"#;

/// The name that marks a contract as pausable.
const PAUSABLE_CONTRACT: &str = "ERC721Pausable";

/// A dynamically dispatched [`PatternMatcher`] instance.
pub type DynPatternMatcher = Rc<dyn PatternMatcher>;

/// The interface to the heuristics that classify source snippets.
pub trait PatternMatcher
where
    Self: Debug,
{
    /// Checks whether the value on top of the stack after running the snippet
    /// is the owner of the token being moved.
    #[must_use]
    fn captures_owner(&self, snippet: &str) -> bool;

    /// Checks whether the snippet is the inline ownership check of `ERC721A`.
    #[must_use]
    fn is_erc721a_ownership_check(&self, snippet: &str) -> bool;

    /// Checks whether the snippet is the pause guard on transfers.
    #[must_use]
    fn is_pausable_guard(&self, snippet: &str) -> bool;

    /// Checks whether the whole source is that of a pausable contract.
    #[must_use]
    fn marks_pausable_contract(&self, source: &str) -> bool;
}

/// The default matcher, which compares snippets with literal text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LiteralPatterns {
    owner_return_expression: String,
}

impl LiteralPatterns {
    /// Creates a matcher that recognises `owner_return_expression` as the
    /// contract's way of returning its owner, falling back to `return owner`.
    #[must_use]
    pub fn new(owner_return_expression: Option<&str>) -> Self {
        let owner_return_expression = owner_return_expression
            .unwrap_or(DEFAULT_OWNER_RETURN_EXPRESSION)
            .to_string();
        Self {
            owner_return_expression,
        }
    }

    /// Wraps the matcher into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynPatternMatcher {
        Rc::new(self)
    }
}

impl Default for LiteralPatterns {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PatternMatcher for LiteralPatterns {
    fn captures_owner(&self, snippet: &str) -> bool {
        snippet == self.owner_return_expression || OWNER_CAPTURES.contains(&snippet)
    }

    fn is_erc721a_ownership_check(&self, snippet: &str) -> bool {
        ERC721A_OWNERSHIP_CHECKS.contains(&snippet)
    }

    fn is_pausable_guard(&self, snippet: &str) -> bool {
        snippet == PAUSABLE_GUARD
    }

    fn marks_pausable_contract(&self, source: &str) -> bool {
        source.contains(PAUSABLE_CONTRACT)
    }
}

#[cfg(test)]
mod test {
    use crate::pattern::{LiteralPatterns, PatternMatcher};

    #[test]
    fn owner_expression_defaults_to_return_owner() {
        let patterns = LiteralPatterns::default();
        assert!(patterns.captures_owner("return owner"));
        assert!(patterns.captures_owner("prevOwnership.addr"));
        assert!(!patterns.captures_owner("return _owners[tokenId]"));

        let custom = LiteralPatterns::new(Some("return _owners[tokenId]"));
        assert!(custom.captures_owner("return _owners[tokenId]"));
        assert!(!custom.captures_owner("return owner"));
    }

    #[test]
    fn recognises_library_snippets() {
        let patterns = LiteralPatterns::default();
        assert!(patterns.is_erc721a_ownership_check(
            "result := or(eq(msgSender, from), eq(msgSender, approvedAddress))"
        ));
        assert!(patterns.is_pausable_guard(
            r#"require(!paused(), "ERC721Pausable: token transfer while paused")"#
        ));
        assert!(patterns.marks_pausable_contract("contract Token is ERC721Pausable {}"));
        assert!(!patterns.marks_pausable_contract("contract Token is ERC721 {}"));
    }
}
