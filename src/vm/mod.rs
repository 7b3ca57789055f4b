//! This module contains the symbolic virtual machine that explores the
//! control-flow graph of a contract.
//!
//! The pieces fit together as follows:
//!
//! - [`AnalysisContext`] owns everything that is shared across the paths of
//!   one analysis: the graph, the solver, the edge counters, the name
//!   generator and the defect tracker.
//! - [`state::ExecutionState`] is owned by exactly one path.
//! - [`Machine`] borrows both for the duration of one instruction, and is what
//!   the opcode handlers operate on.
//! - [`explorer`] walks the graph depth-first, and [`interpreter`] executes
//!   the instructions of each block.

pub mod data;
pub mod explorer;
pub mod interpreter;
pub mod naming;
pub mod solver;
pub mod state;
pub mod value;

use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
    time::Duration,
};

use ethnum::U256;
use z3::{
    ast::{Bool, BV},
    Context,
};

use crate::{
    constant::{
        DEFAULT_DEBUG_MODE,
        DEFAULT_DEPTH_LIMIT,
        DEFAULT_GAS_LIMIT,
        DEFAULT_GENERATE_TEST_CASES,
        DEFAULT_GLOBAL_TIMEOUT,
        DEFAULT_LOOP_LIMIT,
        DEFAULT_SOLVER_TIMEOUT_MS,
        DEFAULT_STRICT_INSTRUCTIONS,
    },
    defect::tracker::DefectTracker,
    disassembly::cfg::Cfg,
    error::execution::{self, Error},
    opcode::Opcode,
    pattern::{DynPatternMatcher, LiteralPatterns},
    report::TestVector,
    source_map::SourceView,
    vm::{
        data::VisitedEdges,
        explorer::FunctionEntry,
        naming::VariableNames,
        solver::SolverSession,
        state::{environment::Environment, ExecutionState},
        value::Value,
    },
    watchdog::{DeadlineWatchdog, DynWatchdog, Watchdog},
};

/// The result type of the opcode handlers, whose errors are located at the
/// instruction by the interpreter.
pub type Step<T> = std::result::Result<T, Error>;

/// The configuration for the explorer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum number of times that a path may take a single edge.
    pub loop_limit: usize,

    /// The approximate amount of gas that a path may consume.
    pub gas_limit: u64,

    /// The maximum number of blocks that a path may visit.
    pub depth_limit: usize,

    /// The time that the solver may spend on one query, in milliseconds.
    pub solver_timeout_ms: u32,

    /// The wall-clock budget for the whole exploration.
    pub global_timeout: Duration,

    /// The only function to explore, as a four-byte selector in hex or as a
    /// full signature.
    pub target_function: Option<String>,

    /// Whether a test vector is derived for every terminated path.
    pub generate_test_cases: bool,

    /// Whether per-path errors are logged as warnings.
    pub debug_mode: bool,

    /// Whether an unknown instruction ends the run rather than the path.
    pub strict_instructions: bool,
}

impl Config {
    /// Sets the loop limit configuration parameter to `value`.
    #[must_use]
    pub fn with_loop_limit(mut self, value: usize) -> Self {
        self.loop_limit = value;
        self
    }

    /// Sets the gas limit configuration parameter to `value`.
    #[must_use]
    pub fn with_gas_limit(mut self, value: u64) -> Self {
        self.gas_limit = value;
        self
    }

    /// Sets the depth limit configuration parameter to `value`.
    #[must_use]
    pub fn with_depth_limit(mut self, value: usize) -> Self {
        self.depth_limit = value;
        self
    }

    /// Sets the per-query solver timeout to `value` milliseconds.
    #[must_use]
    pub fn with_solver_timeout_ms(mut self, value: u32) -> Self {
        self.solver_timeout_ms = value;
        self
    }

    /// Sets the global timeout configuration parameter to `value`.
    #[must_use]
    pub fn with_global_timeout(mut self, value: Duration) -> Self {
        self.global_timeout = value;
        self
    }

    /// Restricts exploration to the function identified by `value`.
    #[must_use]
    pub fn with_target_function(mut self, value: impl Into<String>) -> Self {
        self.target_function = Some(value.into());
        self
    }

    /// Sets the test case generation configuration parameter to `value`.
    #[must_use]
    pub fn with_generate_test_cases(mut self, value: bool) -> Self {
        self.generate_test_cases = value;
        self
    }

    /// Sets the debug mode configuration parameter to `value`.
    #[must_use]
    pub fn with_debug_mode(mut self, value: bool) -> Self {
        self.debug_mode = value;
        self
    }

    /// Sets the strict instructions configuration parameter to `value`.
    #[must_use]
    pub fn with_strict_instructions(mut self, value: bool) -> Self {
        self.strict_instructions = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let loop_limit = DEFAULT_LOOP_LIMIT;
        let gas_limit = DEFAULT_GAS_LIMIT;
        let depth_limit = DEFAULT_DEPTH_LIMIT;
        let solver_timeout_ms = DEFAULT_SOLVER_TIMEOUT_MS;
        let global_timeout = DEFAULT_GLOBAL_TIMEOUT;
        let generate_test_cases = DEFAULT_GENERATE_TEST_CASES;
        let debug_mode = DEFAULT_DEBUG_MODE;
        let strict_instructions = DEFAULT_STRICT_INSTRUCTIONS;
        Self {
            loop_limit,
            gas_limit,
            depth_limit,
            solver_timeout_ms,
            global_timeout,
            target_function: None,
            generate_test_cases,
            debug_mode,
            strict_instructions,
        }
    }
}

/// What the exploration has covered so far.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Coverage {
    pub visited_pcs:    BTreeSet<u64>,
    pub visited_blocks: BTreeSet<u64>,

    /// The number of paths that ended, for whatever reason.
    pub total_paths: usize,

    /// The number of paths that ended with an error.
    pub error_paths: usize,

    pub instructions_executed: usize,
}

/// Everything that is shared by the paths of one analysis.
#[derive(Debug)]
pub struct AnalysisContext<'ctx> {
    pub solver: Rc<SolverSession<'ctx>>,

    /// The transaction environment that every path starts from.
    pub env: Environment<'ctx>,

    pub cfg: Cfg,

    pub visited_edges: VisitedEdges,

    pub names: VariableNames,

    pub tracker: DefectTracker<'ctx>,

    /// The source of the contract, if it is known.
    pub source: Option<SourceView>,

    pub patterns: DynPatternMatcher,

    /// The function whose entry block starts at each key.
    pub entry_points: BTreeMap<u64, FunctionEntry>,

    /// The bytecode of the contract, if the listing carried it.
    pub code: Option<Rc<[u8]>>,

    /// Whether the program reads the size of memory, without which the
    /// high-water mark does not need to follow symbolic accesses.
    pub tracks_msize: bool,

    pub coverage: Coverage,

    /// The errors that ended individual paths.
    pub errors: execution::Errors,

    pub test_vectors: Vec<TestVector>,

    pub config: Config,

    /// Whether exploration was cut short by the deadline or the watchdog.
    pub timed_out: bool,

    watchdog: DynWatchdog,
    deadline: DeadlineWatchdog,
}

impl<'ctx> AnalysisContext<'ctx> {
    /// Constructs the context for exploring `cfg` with the provided `config`,
    /// starting the global deadline.
    #[must_use]
    pub fn new(
        solver: Rc<SolverSession<'ctx>>,
        cfg: Cfg,
        config: Config,
        watchdog: DynWatchdog,
    ) -> Self {
        let env = Environment::new(solver.context());
        let visited_edges = VisitedEdges::new(config.loop_limit);
        let tracks_msize = cfg.contains_opcode(&Opcode::MSize);
        let deadline = DeadlineWatchdog::starting_now(config.global_timeout);
        Self {
            solver,
            env,
            cfg,
            visited_edges,
            names: VariableNames::new(),
            tracker: DefectTracker::new(),
            source: None,
            patterns: LiteralPatterns::default().in_rc(),
            entry_points: BTreeMap::new(),
            code: None,
            tracks_msize,
            coverage: Coverage::default(),
            errors: execution::Errors::new(),
            test_vectors: Vec::new(),
            config,
            timed_out: false,
            watchdog,
            deadline,
        }
    }

    /// Attaches the source of the contract.
    #[must_use]
    pub fn with_source(mut self, source: SourceView) -> Self {
        self.source = Some(source);
        self
    }

    /// Replaces the heuristics used to classify source snippets.
    #[must_use]
    pub fn with_patterns(mut self, patterns: DynPatternMatcher) -> Self {
        self.patterns = patterns;
        self
    }

    /// Sets the entry points of the public functions.
    #[must_use]
    pub fn with_entry_points(mut self, entry_points: BTreeMap<u64, FunctionEntry>) -> Self {
        self.entry_points = entry_points;
        self
    }

    /// Attaches the bytecode of the contract.
    #[must_use]
    pub fn with_code(mut self, code: Option<Rc<[u8]>>) -> Self {
        self.code = code;
        self
    }

    /// Gets the solver context.
    #[must_use]
    pub fn z3(&self) -> &'ctx Context {
        self.solver.context()
    }

    /// Creates the state of a new transaction.
    #[must_use]
    pub fn initial_state(&self) -> ExecutionState<'ctx> {
        ExecutionState::new(self.z3(), &self.env)
    }

    /// Counts one interpreted instruction, polling the watchdog and the
    /// deadline when they ask to be polled.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if exploration has to stop.
    pub fn poll(&mut self) -> Step<()> {
        self.coverage.instructions_executed += 1;
        let counter = self.coverage.instructions_executed;

        if counter % self.watchdog.poll_every().max(1) == 0 && self.watchdog.should_stop() {
            return Err(Error::StoppedByWatchdog);
        }
        if counter % self.deadline.poll_every().max(1) == 0 && self.deadline.should_stop() {
            return Err(Error::Timeout);
        }

        Ok(())
    }
}

/// How control leaves an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flow<'ctx> {
    /// Control continues with the next instruction.
    Continue,

    /// Control moves to the block at the target.
    Jump(u64),

    /// Control moves to the block at `target` if `condition` holds, and falls
    /// through otherwise.
    Branch {
        target:    u64,
        condition: Bool<'ctx>,
    },
}

/// The view of the virtual machine that an opcode handler operates on, for the
/// duration of one instruction.
#[derive(Debug)]
pub struct Machine<'a, 'ctx> {
    pub ctx:   &'a mut AnalysisContext<'ctx>,
    pub state: &'a mut ExecutionState<'ctx>,

    /// The start of the block being executed.
    pub block: u64,

    /// The address of the instruction being executed.
    pub pc: u64,
}

impl<'a, 'ctx> Machine<'a, 'ctx> {
    /// Constructs a machine executing the instruction at `pc` in `block`.
    #[must_use]
    pub fn new(
        ctx: &'a mut AnalysisContext<'ctx>,
        state: &'a mut ExecutionState<'ctx>,
        block: u64,
        pc: u64,
    ) -> Self {
        Self {
            ctx,
            state,
            block,
            pc,
        }
    }

    /// Gets the solver context.
    #[must_use]
    pub fn z3(&self) -> &'ctx Context {
        self.ctx.z3()
    }

    /// Pops `N` operands, with the top of the stack first.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack holds fewer than `N` items.
    pub fn pop<const N: usize>(&mut self) -> Step<[Value<'ctx>; N]> {
        self.state.stack.pop_n::<N>()
    }

    /// Pushes `value` onto the stack.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is full.
    pub fn push(&mut self, value: impl Into<Value<'ctx>>) -> Step<()> {
        self.state.stack.push(value)
    }

    /// Gets the variable called `name`, binding it on this path if needed.
    pub fn bind(&mut self, name: &str) -> Value<'ctx> {
        let ctx = self.z3();
        Value::Symbolic(self.state.bind(ctx, name))
    }

    /// Binds a fresh unconstrained variable.
    pub fn fresh(&mut self) -> Value<'ctx> {
        let name = self.ctx.names.arbitrary();
        let ctx = self.z3();
        Value::Symbolic(self.state.bind_fresh(ctx, &name))
    }

    /// Gets `value` as a solver expression.
    #[must_use]
    pub fn lift(&self, value: &Value<'ctx>) -> BV<'ctx> {
        value.to_bv(self.z3())
    }

    /// Gets the numeral for `word`.
    #[must_use]
    pub fn word(&self, word: U256) -> BV<'ctx> {
        value::bv_from_u256(self.z3(), word)
    }

    /// Checks whether `condition` may hold on the current path.
    #[must_use]
    pub fn feasible(&self, condition: &Bool<'ctx>) -> bool {
        self.ctx.solver.check_with(condition).is_feasible()
    }

    /// Checks whether `condition` holds on every continuation of the current
    /// path.
    #[must_use]
    pub fn proves(&self, condition: &Bool<'ctx>) -> bool {
        self.ctx.solver.proves(condition)
    }

    /// Gets the source snippet of the instruction being executed.
    #[must_use]
    pub fn source_code(&self) -> Option<String> {
        self.ctx
            .source
            .as_ref()
            .and_then(|source| source.source_code(self.pc))
            .map(str::to_string)
    }

    /// Executes a binary operation, taking the concrete path when both
    /// operands are known.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack does not hold two operands.
    pub fn binary(
        &mut self,
        concrete: impl FnOnce(U256, U256) -> U256,
        symbolic: impl FnOnce(&BV<'ctx>, &BV<'ctx>) -> BV<'ctx>,
    ) -> Step<()> {
        let [a, b] = self.pop()?;
        let result = match (a.as_concrete(), b.as_concrete()) {
            (Some(a), Some(b)) => Value::Concrete(concrete(a, b)),
            _ => Value::from_bv(&symbolic(&self.lift(&a), &self.lift(&b))),
        };
        self.push(result)
    }

    /// Executes a comparison, pushing `1` if it holds and `0` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack does not hold two operands.
    pub fn compare(
        &mut self,
        concrete: impl FnOnce(U256, U256) -> bool,
        symbolic: impl FnOnce(&BV<'ctx>, &BV<'ctx>) -> Bool<'ctx>,
    ) -> Step<()> {
        let [a, b] = self.pop()?;
        let result = match (a.as_concrete(), b.as_concrete()) {
            (Some(a), Some(b)) => Value::from_flag(concrete(a, b)),
            _ => {
                let holds = symbolic(&self.lift(&a), &self.lift(&b));
                Value::from_bv(&self.flag(&holds))
            }
        };
        self.push(result)
    }

    /// Gets the word that is `1` when `condition` holds and `0` otherwise.
    #[must_use]
    pub fn flag(&self, condition: &Bool<'ctx>) -> BV<'ctx> {
        condition.ite(&self.word(U256::ONE), &self.word(U256::ZERO))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use z3::Context;

    use crate::{
        constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS,
        disassembly::cfg::Cfg,
        error::execution::Error,
        vm::{solver::SolverSession, AnalysisContext, Config},
        watchdog::LazyWatchdog,
    };

    #[test]
    fn config_builders_override_defaults() {
        let config = Config::default()
            .with_loop_limit(2)
            .with_depth_limit(7)
            .with_target_function("23b872dd")
            .with_global_timeout(Duration::from_secs(1));

        assert_eq!(config.loop_limit, 2);
        assert_eq!(config.depth_limit, 7);
        assert_eq!(config.target_function.as_deref(), Some("23b872dd"));
        assert_eq!(config.gas_limit, Config::default().gas_limit);
    }

    #[test]
    fn polling_an_expired_deadline_times_out() {
        let ctx = Context::new(&z3::Config::new());
        let solver = SolverSession::new(&ctx, 1_000);
        let config = Config::default().with_global_timeout(Duration::ZERO);
        let mut context =
            AnalysisContext::new(solver, Cfg::default(), config, LazyWatchdog.in_rc());

        let mut result = Ok(());
        for _ in 0..DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS {
            result = result.and_then(|()| context.poll());
        }
        assert_eq!(result, Err(Error::Timeout));
    }
}
