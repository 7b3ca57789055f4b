//! This module contains the tracker that raises the defect signals from what
//! the explorer observes.
//!
//! Unlike the feature records, the tracker's context is shared by every path
//! of an analysis. It is keyed on the function being explored and resets when
//! the explorer enters a block belonging to a different function.

use std::{collections::VecDeque, rc::Rc};

use log::debug;
use regex::Regex;
use z3::{
    ast::{Ast, Dynamic},
    DeclKind,
};

use crate::{
    constant::{
        ADDRESS_WIDTH_BITS,
        EMPTY_TRANSFER_TAG,
        TRANSFER_EVENT_TOPIC,
        TRANSFER_SHAPES,
    },
    defect::{DefectKind, Findings, SignalStatus},
    opcode::Opcode,
    pattern::PatternMatcher,
    vm::{
        naming::STORE_VARIABLE_PREFIX,
        solver::{constant_names, SolverSession},
        state::{environment::Environment, stack::Stack},
        value::Value,
    },
};

/// What is known about the function currently being explored.
#[derive(Clone, Debug, Default)]
pub struct FunctionContext<'ctx> {
    /// The short name of the function.
    pub name: String,

    /// The full signature of the function, used in signal entries.
    pub signature: String,

    /// The number of call-data words loaded so far.
    pub count: usize,

    pub from:     Option<Value<'ctx>>,
    pub to:       Option<Value<'ctx>>,
    pub token_id: Option<Value<'ctx>>,

    /// The owner of the token, captured after the owner-returning expression.
    pub owner: Option<Value<'ctx>>,

    /// Whether storage has been written since the function was entered.
    pub storage_mutated: bool,

    pub erc721a_load:   bool,
    pub pausable_guard: bool,
}

/// The observer that raises the three defect signals.
#[derive(Clone, Debug, Default)]
pub struct DefectTracker<'ctx> {
    context:   FunctionContext<'ctx>,
    findings:  Findings,
    run_start: usize,
}

impl<'ctx> DefectTracker<'ctx> {
    /// Creates a tracker that has observed nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the context of the function being explored.
    #[must_use]
    pub fn context(&self) -> &FunctionContext<'ctx> {
        &self.context
    }

    /// Gets the signals raised so far.
    #[must_use]
    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    /// Records that a block of the function `name` with the full `signature`
    /// is being entered, returning `true` if this changed the function.
    pub fn enter_function(&mut self, name: &str, signature: &str) -> bool {
        let changed = self.context.name != name;
        if changed {
            debug!("Entering function {signature}");
            self.context.count = 0;
            self.context.storage_mutated = false;
            self.context.name = name.to_string();
        }
        if self.context.signature != signature {
            self.context.signature = signature.to_string();
        }
        changed
    }

    /// Observes `instruction` before it is executed on a path whose stack is
    /// `stack`, raising the signals that a `Transfer` event can trigger.
    pub fn observe(
        &mut self,
        solver: &Rc<SolverSession<'ctx>>,
        opcode: &Opcode,
        stack: &Stack<'ctx>,
    ) {
        if opcode != &Opcode::Log(4) {
            return;
        }
        let is_transfer = stack
            .read(2)
            .and_then(Value::as_concrete)
            .is_some_and(|topic| topic == TRANSFER_EVENT_TOPIC);
        if !is_transfer {
            return;
        }

        let signature = self.context.signature.clone();
        if !self.context.storage_mutated {
            debug!("{signature} emits Transfer without writing storage");
            self.findings
                .empty_transfer_event
                .add(format!("{signature}:{EMPTY_TRANSFER_TAG}"));
            return;
        }

        for variable in privileged_variables(solver) {
            self.findings
                .privileged_address
                .add(format!("{signature}:{variable}"));
        }

        if !TRANSFER_SHAPES.iter().any(|shape| signature.contains(shape)) {
            return;
        }
        let (Some(from), Some(owner)) = (&self.context.from, &self.context.owner) else {
            return;
        };
        let ctx = solver.context();
        let high = ADDRESS_WIDTH_BITS - 1;
        let from = from.to_bv(ctx).extract(high, 0);
        let owner = owner.to_bv(ctx).extract(high, 0);
        if solver.check_with(&from._eq(&owner).not()).is_feasible() {
            debug!("{signature} can move a token whose owner is not `from`");
            self.findings
                .unrestricted_from_and_owner_inconsistency
                .add(signature);
        }
    }

    /// Observes the instruction that was compiled from `snippet` after it has
    /// been executed, leaving `top` on the stack.
    pub fn after_instruction(
        &mut self,
        snippet: &str,
        top: Option<&Value<'ctx>>,
        patterns: &dyn PatternMatcher,
    ) {
        if patterns.is_pausable_guard(snippet) {
            self.context.pausable_guard = true;
        }
        if patterns.captures_owner(snippet) {
            if let Some(owner) = top {
                debug!("Captured the token owner as {owner}");
                self.context.owner = Some(owner.clone());
            }
        }
        if patterns.is_erc721a_ownership_check(snippet) {
            self.context.erc721a_load = true;
        }
    }

    /// Observes a load of call data, the first three of which are the `from`,
    /// `to` and token arguments of a transfer.
    pub fn on_calldata_load(&mut self, value: &Value<'ctx>) {
        self.context.count += 1;
        let slot = match self.context.count {
            1 => &mut self.context.from,
            2 => &mut self.context.to,
            3 => &mut self.context.token_id,
            _ => return,
        };
        *slot = Some(value.clone());
    }

    /// Observes a storage write.
    pub fn on_sstore(&mut self) {
        self.context.storage_mutated = true;
    }

    /// Marks the start of the exploration of one entry point.
    pub fn begin_run(&mut self) {
        self.run_start = self.findings.empty_transfer_event.entries.len();
    }

    /// Marks the end of the exploration of one entry point.
    ///
    /// A run that ends with storage written has reached the event on some path
    /// after a write, so its first empty-transfer entry was raised by a path
    /// that only skipped the write.
    pub fn end_run(&mut self) {
        let record = &mut self.findings.empty_transfer_event;
        if record.entries.len() <= self.run_start || !self.context.storage_mutated {
            return;
        }
        let first_added = record.entries[self.run_start..]
            .iter()
            .position(|entry| entry.rsplit(':').next() == Some(EMPTY_TRANSFER_TAG));
        if let Some(offset) = first_added {
            record.remove(self.run_start + offset);
        }
    }

    /// Settles the signals once exploration is over.
    ///
    /// `explored_any` says whether any entry point was explored, and `source`
    /// is the content of the contract's source, if it is known.
    #[must_use]
    pub fn finish(
        mut self,
        explored_any: bool,
        source: Option<&str>,
        patterns: &dyn PatternMatcher,
    ) -> Findings {
        let findings = &mut self.findings;
        if !explored_any {
            for kind in DefectKind::ALL {
                findings.record_mut(kind).settle(SignalStatus::NotApplicable);
            }
        } else if self.context.owner.is_none() {
            findings
                .unrestricted_from_and_owner_inconsistency
                .settle(SignalStatus::OwnerUnresolved);
            findings.privileged_address.settle(SignalStatus::OwnerUnresolved);
        } else if self.context.erc721a_load {
            findings.privileged_address.settle(SignalStatus::Clean);
        }

        let pausable = source.is_some_and(|s| patterns.marks_pausable_contract(s));
        if pausable && self.context.pausable_guard && findings.privileged_address.is_found() {
            findings
                .privileged_address
                .retain(|entry| variable_name(entry) != "_owner");
        }

        self.findings
    }
}

/// Gets the source-level variable name from a privileged-address entry of the
/// form `function:Ia_store-<slot>-<name>`.
fn variable_name(entry: &str) -> &str {
    entry.rsplit('-').next().unwrap_or_default()
}

/// Scans the solver's assertions for equalities between the sender and a
/// storage variable that is not indexed by a mapping key.
fn privileged_variables(solver: &SolverSession<'_>) -> Vec<String> {
    let Ok(mapping_index) = Regex::new(r"\[[\w\d_]+\]") else {
        return Vec::new();
    };
    let mut found = Vec::new();
    let mut queue: VecDeque<Dynamic<'_>> = solver
        .assertions()
        .iter()
        .map(Dynamic::from_ast)
        .collect();

    while let Some(node) = queue.pop_front() {
        if !node.is_app() {
            continue;
        }
        let is_eq = node.safe_decl().is_ok_and(|decl| decl.kind() == DeclKind::EQ);
        if !is_eq {
            queue.extend(node.children());
            continue;
        }

        let names = constant_names(&node);
        if !names.iter().any(|n| n == Environment::SENDER) {
            continue;
        }
        let Some(other) = names.iter().find(|n| *n != Environment::SENDER) else {
            continue;
        };
        if other.starts_with(STORE_VARIABLE_PREFIX)
            && !mapping_index.is_match(other)
            && !found.contains(other)
        {
            found.push(other.clone());
        }
    }

    found
}

#[cfg(test)]
mod test {
    use z3::{
        ast::{Ast, Bool, BV},
        Config,
        Context,
    };

    use crate::{
        constant::TRANSFER_EVENT_TOPIC,
        defect::{tracker::DefectTracker, SignalStatus},
        opcode::Opcode,
        pattern::LiteralPatterns,
        vm::{solver::SolverSession, state::stack::Stack, value::Value},
    };

    const TRANSFER_FROM: &str = "transferFrom(address,address,uint256)";

    /// Builds the proposition that the top 96 bits of `value` are clear.
    fn is_address<'ctx>(ctx: &'ctx Context, value: &Value<'ctx>) -> Bool<'ctx> {
        value.to_bv(ctx).extract(255, 160)._eq(&BV::from_u64(ctx, 0, 96))
    }

    /// Builds a stack as it is just before a `LOG4` of `Transfer`.
    fn transfer_log_stack<'ctx>() -> anyhow::Result<Stack<'ctx>> {
        let mut stack = Stack::new();
        for value in [3u64, 2, 1] {
            stack.push(Value::from_u64(value))?;
        }
        stack.push(Value::Concrete(TRANSFER_EVENT_TOPIC))?;
        stack.push(Value::from_u64(0x20))?;
        stack.push(Value::from_u64(0))?;
        Ok(stack)
    }

    #[test]
    fn transfer_without_storage_write_is_empty() -> anyhow::Result<()> {
        let ctx = Context::new(&Config::new());
        let solver = SolverSession::new(&ctx, 1_000);
        let mut tracker = DefectTracker::new();
        tracker.enter_function("mint", "mint(address,uint256)");

        tracker.observe(&solver, &Opcode::Log(4), &transfer_log_stack()?);
        tracker.observe(&solver, &Opcode::Log(3), &transfer_log_stack()?);

        assert_eq!(
            tracker.findings().empty_transfer_event.entries,
            vec!["mint(address,uint256):standard1".to_string()]
        );
        Ok(())
    }

    #[test]
    fn sender_compared_with_owner_slot_is_privileged() -> anyhow::Result<()> {
        let ctx = Context::new(&Config::new());
        let solver = SolverSession::new(&ctx, 1_000);
        let sender = BV::new_const(&ctx, "Is", 256);
        let owner = BV::new_const(&ctx, "Ia_store-0-_owner", 256);
        let balance = BV::new_const(&ctx, "Ia_store-5-balances[from]", 256);
        let _scope = solver.scope();
        solver.assert(&sender._eq(&owner));
        solver.assert(&sender._eq(&balance));

        let mut tracker = DefectTracker::new();
        tracker.enter_function("transfer", "transfer(address,uint256)");
        tracker.on_sstore();
        tracker.observe(&solver, &Opcode::Log(4), &transfer_log_stack()?);

        assert_eq!(
            tracker.findings().privileged_address.entries,
            vec!["transfer(address,uint256):Ia_store-0-_owner".to_string()]
        );
        Ok(())
    }

    #[test]
    fn unchecked_from_is_unrestricted() -> anyhow::Result<()> {
        let ctx = Context::new(&Config::new());
        let solver = SolverSession::new(&ctx, 1_000);
        let from = Value::from_bv(&BV::new_const(&ctx, "Id_1", 256));
        let owner = Value::from_bv(&BV::new_const(&ctx, "Ia_store-7-_owners[tokenId]", 256));
        let _scope = solver.scope();
        solver.assert(&is_address(&ctx, &owner));

        let mut tracker = DefectTracker::new();
        tracker.enter_function("transferFrom", TRANSFER_FROM);
        tracker.on_calldata_load(&from);
        tracker.after_instruction("return owner", Some(&owner), &LiteralPatterns::default());
        tracker.on_sstore();
        tracker.observe(&solver, &Opcode::Log(4), &transfer_log_stack()?);

        let record = &tracker.findings().unrestricted_from_and_owner_inconsistency;
        assert_eq!(record.entries, vec![TRANSFER_FROM.to_string()]);

        // Once the path requires `from == owner` the check is in place.
        let mut checked = DefectTracker::new();
        checked.enter_function("transferFrom", TRANSFER_FROM);
        checked.on_calldata_load(&from);
        checked.after_instruction("return owner", Some(&owner), &LiteralPatterns::default());
        checked.on_sstore();
        solver.assert(&from.to_bv(&ctx)._eq(&owner.to_bv(&ctx)));
        checked.observe(&solver, &Opcode::Log(4), &transfer_log_stack()?);
        assert!(!checked.findings().unrestricted_from_and_owner_inconsistency.is_found());

        Ok(())
    }

    #[test]
    fn changing_function_resets_the_context() {
        let mut tracker = DefectTracker::new();
        assert!(tracker.enter_function("mint", "mint(uint256)"));
        tracker.on_sstore();
        tracker.on_calldata_load(&Value::from_u64(1));
        assert!(!tracker.enter_function("mint", "mint(uint256)"));
        assert!(tracker.context().storage_mutated);

        assert!(tracker.enter_function("burn", "burn(uint256)"));
        assert!(!tracker.context().storage_mutated);
        assert_eq!(tracker.context().count, 0);
    }

    #[test]
    fn runs_that_end_mutated_drop_their_first_empty_transfer() -> anyhow::Result<()> {
        let ctx = Context::new(&Config::new());
        let solver = SolverSession::new(&ctx, 1_000);
        let mut tracker = DefectTracker::new();
        tracker.enter_function("mint", "mint(uint256)");
        tracker.begin_run();
        tracker.observe(&solver, &Opcode::Log(4), &transfer_log_stack()?);
        tracker.on_sstore();
        tracker.end_run();

        let record = &tracker.findings().empty_transfer_event;
        assert!(record.entries.is_empty());
        assert_eq!(record.status, SignalStatus::Clean);
        Ok(())
    }

    #[test]
    fn settling_without_owner_or_entries() {
        let patterns = LiteralPatterns::default();
        let findings = DefectTracker::new().finish(false, None, &patterns);
        assert_eq!(findings.empty_transfer_event.status, SignalStatus::NotApplicable);

        let mut tracker = DefectTracker::new();
        tracker.enter_function("mint", "mint(uint256)");
        let findings = tracker.finish(true, None, &patterns);
        assert_eq!(findings.privileged_address.status, SignalStatus::OwnerUnresolved);
        assert_eq!(findings.empty_transfer_event.status, SignalStatus::Clean);
    }

    /// Builds a tracker that has captured the token owner in `transferFrom`
    /// and raised a privileged-address entry for each of `variables`.
    fn owner_captured(variables: &[&str], patterns: &LiteralPatterns) -> DefectTracker<'static> {
        let mut tracker = DefectTracker::new();
        tracker.enter_function("transferFrom", TRANSFER_FROM);
        tracker.after_instruction("return owner", Some(&Value::from_u64(7)), patterns);
        for variable in variables {
            tracker
                .findings
                .privileged_address
                .add(format!("{TRANSFER_FROM}:{variable}"));
        }
        tracker
    }

    #[test]
    fn erc721a_ownership_check_clears_privileged_addresses() {
        let patterns = LiteralPatterns::default();
        let mut tracker = owner_captured(&["Ia_store-0-_owner"], &patterns);
        tracker.after_instruction(
            "result := or(eq(msgSender, owner), eq(msgSender, approvedAddress))",
            None,
            &patterns,
        );
        assert!(tracker.context().erc721a_load);

        let findings = tracker.finish(true, None, &patterns);
        assert_eq!(findings.privileged_address.status, SignalStatus::Clean);
        assert!(findings.privileged_address.entries.is_empty());
    }

    #[test]
    fn pausable_guard_forgives_the_owner_variable() {
        let patterns = LiteralPatterns::default();
        let guard = r#"require(!paused(), "ERC721Pausable: token transfer while paused")"#;
        let source = Some("contract Token is ERC721Pausable {}");

        let mut tracker = owner_captured(&["Ia_store-0-_owner", "Ia_store-1-admin"], &patterns);
        tracker.after_instruction(guard, None, &patterns);
        let findings = tracker.finish(true, source, &patterns);
        assert_eq!(findings.privileged_address.status, SignalStatus::Found);
        assert_eq!(
            findings.privileged_address.entries,
            vec![format!("{TRANSFER_FROM}:Ia_store-1-admin")]
        );

        // Only the owner was privileged, so nothing is left
        let mut tracker = owner_captured(&["Ia_store-0-_owner"], &patterns);
        tracker.after_instruction(guard, None, &patterns);
        let findings = tracker.finish(true, source, &patterns);
        assert_eq!(findings.privileged_address.status, SignalStatus::Clean);
        assert!(findings.privileged_address.entries.is_empty());

        // Without the guard having run, the owner entry stays
        let tracker = owner_captured(&["Ia_store-0-_owner"], &patterns);
        let findings = tracker.finish(true, source, &patterns);
        assert!(findings.privileged_address.is_found());
    }
}
