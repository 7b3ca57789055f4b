//! This module contains the solver session shared by every path of an
//! analysis, and the scope guard through which speculative assertions are
//! made.
//!
//! # Scope Discipline
//!
//! The solver's assertion stack has to mirror the explorer's recursion. Every
//! speculative assertion is therefore made inside a [`ScopeGuard`], which
//! pushes a scope when it is created and pops it when it is dropped. This
//! includes unwinding through `?`, so an error on a path can never leave a
//! stale assumption behind for its siblings.

use std::{cell::Cell, rc::Rc};

use log::warn;
use z3::{
    ast::{Ast, Bool},
    Context, Model, Params, SatResult, Solver,
};

/// The result of a feasibility check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Feasibility {
    Feasible,
    Infeasible,
}

impl Feasibility {
    /// Checks whether the constraints may be satisfiable.
    #[must_use]
    pub fn is_feasible(self) -> bool {
        self == Self::Feasible
    }
}

/// The single solver instance used by one analysis run.
pub struct SolverSession<'ctx> {
    ctx:    &'ctx Context,
    solver: Solver<'ctx>,
    depth:  Cell<usize>,
}

impl<'ctx> SolverSession<'ctx> {
    /// Creates a new session whose individual queries are abandoned after
    /// `timeout_ms` milliseconds.
    #[must_use]
    pub fn new(ctx: &'ctx Context, timeout_ms: u32) -> Rc<Self> {
        let solver = Solver::new(ctx);
        let mut params = Params::new(ctx);
        params.set_u32("timeout", timeout_ms);
        solver.set_params(&params);

        Rc::new(Self {
            ctx,
            solver,
            depth: Cell::new(0),
        })
    }

    /// Gets the solver context.
    #[must_use]
    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    /// Opens a new assertion scope that is closed when the returned guard is
    /// dropped.
    #[must_use]
    pub fn scope(self: &Rc<Self>) -> ScopeGuard<'ctx> {
        self.solver.push();
        self.depth.set(self.depth.get() + 1);
        ScopeGuard {
            session: Rc::clone(self),
        }
    }

    /// Asserts `condition` in the innermost open scope, or permanently if no
    /// scope is open.
    pub fn assert(&self, condition: &Bool<'ctx>) {
        self.solver.assert(condition);
    }

    /// Checks whether the current assertions may be satisfiable.
    ///
    /// A query that times out or is otherwise inconclusive counts as
    /// feasible, so that no path is pruned without proof.
    #[must_use]
    pub fn check(&self) -> Feasibility {
        match self.solver.check() {
            SatResult::Sat => Feasibility::Feasible,
            SatResult::Unsat => Feasibility::Infeasible,
            SatResult::Unknown => {
                let reason = self.solver.get_reason_unknown().unwrap_or_default();
                warn!("Solver returned unknown ({reason}), treating as feasible");
                Feasibility::Feasible
            }
        }
    }

    /// Checks whether the current assertions together with `condition` may
    /// be satisfiable, without keeping `condition` asserted.
    #[must_use]
    pub fn check_with(self: &Rc<Self>, condition: &Bool<'ctx>) -> Feasibility {
        let _scope = self.scope();
        self.assert(condition);
        self.check()
    }

    /// Checks whether the current assertions prove `condition`.
    #[must_use]
    pub fn proves(self: &Rc<Self>, condition: &Bool<'ctx>) -> bool {
        !self.check_with(&condition.not()).is_feasible()
    }

    /// Gets a model of the current assertions, if they are satisfiable.
    #[must_use]
    pub fn model(&self) -> Option<Model<'ctx>> {
        match self.solver.check() {
            SatResult::Sat => self.solver.get_model(),
            _ => None,
        }
    }

    /// Gets the assertions currently held by the solver, outermost first.
    #[must_use]
    pub fn assertions(&self) -> Vec<Bool<'ctx>> {
        self.solver.get_assertions()
    }

    /// Gets the number of scopes that are currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    fn close_scope(&self) {
        let depth = self.depth.get();
        if depth > 0 {
            self.solver.pop(1);
            self.depth.set(depth - 1);
        }
    }
}

impl<'ctx> std::fmt::Debug for SolverSession<'ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverSession").field("depth", &self.depth.get()).finish_non_exhaustive()
    }
}

/// One open level of solver assumptions.
///
/// Dropping the guard pops the level, discarding everything asserted since
/// it was opened.
#[derive(Debug)]
#[must_use = "dropping the guard immediately closes the scope"]
pub struct ScopeGuard<'ctx> {
    session: Rc<SolverSession<'ctx>>,
}

impl<'ctx> ScopeGuard<'ctx> {
    /// Asserts `condition` within this scope.
    pub fn assert(&self, condition: &Bool<'ctx>) {
        self.session.assert(condition);
    }
}

impl<'ctx> Drop for ScopeGuard<'ctx> {
    fn drop(&mut self) {
        self.session.close_scope();
    }
}

/// Collects the names of the uninterpreted constants that occur in
/// `expression`, in the order they are first met in a breadth-first walk.
#[must_use]
pub fn constant_names<'ctx>(expression: &impl Ast<'ctx>) -> Vec<String> {
    use std::collections::VecDeque;

    use z3::{ast::Dynamic, DeclKind};

    let mut names = Vec::new();
    let mut queue: VecDeque<Dynamic<'ctx>> = VecDeque::new();
    queue.push_back(Dynamic::from_ast(expression));

    while let Some(node) = queue.pop_front() {
        if node.is_const() {
            if let Ok(decl) = node.safe_decl() {
                if decl.kind() == DeclKind::UNINTERPRETED {
                    let name = decl.name();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            continue;
        }
        queue.extend(node.children());
    }

    names
}
