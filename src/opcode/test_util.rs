//! Utilities for testing the opcode handlers against a bare machine.

use ethnum::U256;
use z3::{ast::BV, Context};

use crate::{
    disassembly::cfg::Cfg,
    vm::{
        solver::SolverSession,
        state::ExecutionState,
        value::Value,
        AnalysisContext,
        Config,
        Flow,
        Machine,
        Step,
    },
    watchdog::LazyWatchdog,
};

/// A context and a single path state on which handlers can be run.
pub struct TestVm<'ctx> {
    pub ctx:   AnalysisContext<'ctx>,
    pub state: ExecutionState<'ctx>,
}

impl<'ctx> TestVm<'ctx> {
    /// Creates a machine with an empty graph and a fresh transaction state.
    pub fn new(z3: &'ctx Context) -> Self {
        Self::with_cfg(z3, Cfg::default())
    }

    /// Creates a machine over `cfg`.
    pub fn with_cfg(z3: &'ctx Context, cfg: Cfg) -> Self {
        let solver = SolverSession::new(z3, 1_000);
        let ctx = AnalysisContext::new(solver, cfg, Config::default(), LazyWatchdog.in_rc());
        let state = ctx.initial_state();
        Self { ctx, state }
    }

    /// Pushes `values` so that the first of them ends up on top.
    pub fn stack(&mut self, values: &[Value<'ctx>]) -> anyhow::Result<&mut Self> {
        for value in values.iter().rev() {
            self.state.stack.push(value.clone())?;
        }
        Ok(self)
    }

    /// Pushes `words` so that the first of them ends up on top.
    pub fn words(&mut self, words: &[u128]) -> anyhow::Result<&mut Self> {
        let values: Vec<_> = words.iter().map(|w| Value::Concrete(U256::new(*w))).collect();
        self.stack(&values)
    }

    /// Runs `handler` as the instruction at `pc`.
    pub fn run_at(
        &mut self,
        pc: u64,
        handler: impl FnOnce(&mut Machine<'_, 'ctx>) -> Step<()>,
    ) -> Step<()> {
        let mut machine = Machine::new(&mut self.ctx, &mut self.state, 0, pc);
        handler(&mut machine)
    }

    /// Runs `handler` as the instruction at address zero.
    pub fn run(&mut self, handler: impl FnOnce(&mut Machine<'_, 'ctx>) -> Step<()>) -> Step<()> {
        self.run_at(0, handler)
    }

    /// Runs a handler that decides the flow of control.
    pub fn run_flow(
        &mut self,
        handler: impl FnOnce(&mut Machine<'_, 'ctx>) -> Step<Flow<'ctx>>,
    ) -> Step<Flow<'ctx>> {
        let mut machine = Machine::new(&mut self.ctx, &mut self.state, 0, 0);
        handler(&mut machine)
    }

    /// Gets the value on top of the stack.
    pub fn top(&self) -> Option<&Value<'ctx>> {
        self.state.stack.read(0)
    }

    /// Gets the concrete word on top of the stack.
    pub fn top_word(&self) -> Option<U256> {
        self.top().and_then(Value::as_concrete)
    }

    /// Makes a symbolic value named `name`.
    pub fn symbol(&self, name: &str) -> Value<'ctx> {
        Value::Symbolic(BV::new_const(self.ctx.z3(), name, 256))
    }
}

/// Gets the two's-complement encoding of `value`.
pub fn signed(value: i128) -> U256 {
    ethnum::I256::new(value).as_u256()
}
