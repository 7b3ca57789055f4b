//! This module contains the explorer, which walks the control-flow graph
//! depth-first and forks the execution state at every feasible branch.
//!
//! # Paths
//!
//! A path ends when it reaches a terminal block, when it exceeds one of the
//! loop, gas or depth bounds, or when an instruction on it fails. Every ended
//! path is counted. A failing path is recorded as an error and exploration
//! continues with its siblings, unless the error ends the whole run.
//!
//! # Solver Scopes
//!
//! Each entry point is explored inside its own root scope, and each side of a
//! branch inside a scope nested in that. The scopes are held by guards, so
//! the solver's assertions always match the path being explored, however
//! exploration of a subtree ends.

use std::rc::Rc;

use log::{debug, info, warn};
use z3::ast::Bool;

use crate::{
    constant::FALLBACK_FUNCTION_NAME,
    disassembly::cfg::BlockKind,
    error::{
        container::Locatable,
        execution::{Error, LocatedError, Result},
    },
    report::TestVector,
    vm::{
        data::Edge,
        interpreter::execute,
        state::ExecutionState,
        AnalysisContext,
        Flow,
        Machine,
    },
};

/// A function whose entry block exploration can start from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionEntry {
    /// The start of the function's entry block.
    pub entry: u64,

    /// The four-byte selector in hex, if the function was found in the
    /// dispatcher.
    pub selector: Option<String>,

    /// The full signature, such as `transfer(address,uint256)`.
    pub signature: String,

    /// The name of the function without its parameter list.
    pub name: String,
}

impl FunctionEntry {
    /// Constructs the entry for the function with the provided `signature`,
    /// whose entry block starts at `entry`.
    #[must_use]
    pub fn new(entry: u64, selector: Option<String>, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let name = short_name(&signature).to_string();
        Self {
            entry,
            selector,
            signature,
            name,
        }
    }

    /// Constructs the entry used when nothing is known about the functions of
    /// the program, which starts at the first block.
    #[must_use]
    pub fn fallback() -> Self {
        Self::new(0, None, FALLBACK_FUNCTION_NAME)
    }
}

/// Gets the name of a function from its `signature`.
fn short_name(signature: &str) -> &str {
    match signature.split_once('(') {
        Some((name, _)) if !name.is_empty() => name.trim(),
        _ => signature,
    }
}

/// Explores every function in `functions`, in order.
///
/// Exploration stops early if the global deadline passes or the watchdog
/// fires, in which case the context is marked as timed out and the results so
/// far are kept.
///
/// # Errors
///
/// Returns [`Err`] if an error that ends the whole run occurs.
pub fn explore(ctx: &mut AnalysisContext<'_>, functions: &[FunctionEntry]) -> Result<()> {
    for function in functions {
        if ctx.timed_out {
            break;
        }
        run(ctx, function)?;
    }

    Ok(())
}

/// Explores all paths through the program starting at the entry block of
/// `function`.
fn run(ctx: &mut AnalysisContext<'_>, function: &FunctionEntry) -> Result<()> {
    info!("Exploring {} from block {}", function.signature, function.entry);

    let solver = Rc::clone(&ctx.solver);
    let root = solver.scope();
    let mut state = ctx.initial_state();
    for condition in state.path_conditions.iter() {
        root.assert(condition);
    }
    state.pc = function.entry;

    ctx.tracker.enter_function(&function.name, &function.signature);
    state.features.enter_function(&function.name);
    ctx.tracker.begin_run();
    let result = visit(ctx, state, function.entry, None, 0);
    ctx.tracker.end_run();
    drop(root);

    match result {
        Err(error) if error.payload.is_cancellation() => {
            warn!("Exploration stopped at {:#x}: {}", error.location, error.payload);
            if error.payload == Error::StoppedByWatchdog {
                ctx.errors.add_located(error.location, error.payload);
            }
            ctx.timed_out = true;
            Ok(())
        }
        other => other,
    }
}

/// Explores `block`, which was entered from the block `from` with `depth`
/// blocks already on the path, and then its successors.
fn visit<'ctx>(
    ctx: &mut AnalysisContext<'ctx>,
    mut state: ExecutionState<'ctx>,
    block: u64,
    from: Option<u64>,
    depth: usize,
) -> Result<()> {
    debug!("Entering block {block}");

    if let Some(function) = ctx.entry_points.get(&block) {
        let (name, signature) = (function.name.clone(), function.signature.clone());
        ctx.tracker.enter_function(&name, &signature);
        state.features.enter_function(&name);
    }

    let edge = from.map(|from| Edge::new(from, block));
    if let Some(edge) = edge {
        ctx.visited_edges.mark_visited(edge);
        if ctx.visited_edges.over_limit(edge) {
            debug!("Loop limit reached on {} -> {}, pruning the path", edge.from, edge.to);
            ctx.coverage.total_paths += 1;
            return Ok(());
        }
    }
    if state.gas_used > ctx.config.gas_limit {
        debug!("Path ran out of gas ({}) at block {block}, pruning it", state.gas_used);
        ctx.coverage.total_paths += 1;
        return Ok(());
    }

    let Some(data) = ctx.cfg.block(block).cloned() else {
        return end_with_error(ctx, Error::NonExistentBlock { target: block }.locate(block));
    };
    ctx.coverage.visited_blocks.insert(block);

    let mut flow = Flow::Continue;
    for instruction in data.instructions.iter() {
        ctx.poll().locate(instruction.address)?;
        ctx.coverage.visited_pcs.insert(instruction.address);

        let mut machine = Machine::new(ctx, &mut state, block, instruction.address);
        flow = match execute(&mut machine, instruction) {
            Ok(flow) => flow,
            Err(error) => return end_with_error(ctx, error),
        };
    }

    let depth = depth + 1;
    if data.kind == BlockKind::Terminal || depth > ctx.config.depth_limit {
        if data.kind != BlockKind::Terminal {
            debug!("Depth limit reached at block {block}, ending the path");
        }
        end_path(ctx, &state);
        return Ok(());
    }

    match data.kind {
        BlockKind::FallsTo => {
            let next = data.falls_to.ok_or(Error::MissingFallThrough { block }).locate(data.end);
            match next {
                Ok(next) => {
                    state.pc = next;
                    visit(ctx, state, next, Some(block), depth)
                }
                Err(error) => end_with_error(ctx, error),
            }
        }
        BlockKind::Unconditional => match flow {
            Flow::Jump(target) => {
                state.pc = target;
                visit(ctx, state, target, Some(block), depth)
            }
            _ => end_with_error(ctx, Error::MissingJumpTarget { block }.locate(data.end)),
        },
        BlockKind::Conditional => {
            let Flow::Branch { target, condition } = flow else {
                return end_with_error(ctx, Error::MissingJumpTarget { block }.locate(data.end));
            };
            let Some(next) = data.falls_to else {
                return end_with_error(ctx, Error::MissingFallThrough { block }.locate(data.end));
            };

            branch(ctx, &state, block, target, condition.clone(), depth)?;
            branch(ctx, &state, block, next, condition.not(), depth)?;

            if let Some(edge) = edge {
                ctx.visited_edges.unmark_visited(edge);
            }
            Ok(())
        }
        BlockKind::Terminal => Ok(()),
    }
}

/// Explores the side of the branch at the end of `block` that goes to
/// `successor` when `condition` holds, if it can hold.
fn branch<'ctx>(
    ctx: &mut AnalysisContext<'ctx>,
    state: &ExecutionState<'ctx>,
    block: u64,
    successor: u64,
    condition: Bool<'ctx>,
    depth: usize,
) -> Result<()> {
    let solver = Rc::clone(&ctx.solver);
    let scope = solver.scope();
    scope.assert(&condition);

    if !solver.check().is_feasible() {
        debug!("Branch from {block} to {successor} is infeasible");
        return Ok(());
    }

    let mut fork = state.fork_at(successor);
    fork.add_condition(condition);
    visit(ctx, fork, successor, Some(block), depth)
}

/// Ends the path that has reached `state`, deriving a test vector for it if
/// asked to.
fn end_path<'ctx>(ctx: &mut AnalysisContext<'ctx>, state: &ExecutionState<'ctx>) {
    ctx.coverage.total_paths += 1;
    debug!("Path ended after {} gas", state.gas_used);

    if !ctx.config.generate_test_cases {
        return;
    }
    let Some(model) = ctx.solver.model() else {
        return;
    };
    let vector = TestVector::from_model(&model, &state.variables);
    if !vector.is_empty() {
        ctx.test_vectors.push(vector);
    }
}

/// Ends the current path with `error`.
///
/// # Errors
///
/// Returns [`Err`] if `error` ends the whole run rather than the path.
fn end_with_error(ctx: &mut AnalysisContext<'_>, error: LocatedError) -> Result<()> {
    if error.payload.is_run_fatal(ctx.config.strict_instructions) {
        return Err(error);
    }

    if ctx.config.debug_mode {
        warn!("Path ended with an error {error}");
    } else {
        debug!("Path ended with an error {error}");
    }
    ctx.errors.add_located(error.location, error.payload);
    ctx.coverage.error_paths += 1;
    ctx.coverage.total_paths += 1;
    Ok(())
}
