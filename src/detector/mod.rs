//! This module contains the definition of the detector itself.

pub mod state;

use std::{collections::BTreeMap, rc::Rc, time::Instant};

use itertools::Itertools;
use log::info;

use crate::{
    constant::TRANSFER_FROM_SELECTOR,
    detector::state::State,
    disassembly::{
        cfg::Cfg,
        dispatch::entry_points,
        normalizer::normalize,
        tokenizer::{parse_instructions, tokenize},
    },
    error,
    pattern::{DynPatternMatcher, LiteralPatterns},
    report::{AnalysisReport, ExplorationSummary},
    source_map::{correlate, SourceMap, SourceView},
    vm,
    vm::{
        explorer::{explore, FunctionEntry},
        solver::SolverSession,
        AnalysisContext,
    },
    watchdog::DynWatchdog,
};

/// Creates a new detector for the program in the disassembly `listing`.
///
/// The `source_map`, if provided, names the functions and variables of the
/// program and enables the source-level heuristics. Exploration is bounded by
/// `config`, and stops early if the `watchdog` says so.
#[must_use]
pub fn new(
    listing: impl Into<String>,
    source_map: Option<Rc<dyn SourceMap>>,
    config: vm::Config,
    watchdog: DynWatchdog,
) -> Detector<state::HasListing> {
    let owner_return_expression = source_map.as_ref().and_then(|map| map.owner_return_expression());
    let patterns = LiteralPatterns::new(owner_return_expression).in_rc();
    let input = Input {
        listing: listing.into(),
        source_map,
        patterns,
        config,
        watchdog,
        started: Instant::now(),
    };
    let state = state::HasListing;
    Detector { input, state }
}

/// What the detector was asked to analyse, and how.
#[derive(Clone, Debug)]
pub struct Input {
    pub listing:    String,
    pub source_map: Option<Rc<dyn SourceMap>>,

    /// The heuristics used to classify source snippets.
    pub patterns: DynPatternMatcher,

    pub config:   vm::Config,
    pub watchdog: DynWatchdog,

    /// When the detector was created, from which the reported time is taken.
    pub started: Instant,
}

/// The detector looks for defects in a token contract by exploring its
/// control-flow graph symbolically.
///
/// # Basic Usage
///
/// Construct a detector with [`new`] and call [`Detector::analyze`] to run
/// every step in turn.
///
/// # Enforcing Valid State Transitions
///
/// Each step of the analysis is only available in the state that precedes it,
/// and moves the detector into the state that follows it. The data produced
/// by the step is available through [`Detector::state`].
#[derive(Clone, Debug)]
pub struct Detector<S: State> {
    input: Input,
    state: S,
}

/// Operations available in all states.
impl<S: State> Detector<S> {
    /// Gets the input that the detector is analysing.
    pub fn input(&self) -> &Input {
        &self.input
    }

    /// Gets a reference to the current state of the detector.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Moves the detector into the state `NS`, built by applying `transform`
    /// to the current state.
    fn transform_state<NS: State>(
        self,
        transform: impl FnOnce(&Input, S) -> error::Result<NS>,
    ) -> error::Result<Detector<NS>> {
        let state = transform(&self.input, self.state)?;
        let input = self.input;

        Ok(Detector { input, state })
    }
}

/// Operations available on a newly-created detector.
impl Detector<state::HasListing> {
    /// Executes the analysis from beginning to end, performing all the
    /// intermediate steps automatically.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any step fails in a way that ends the run.
    pub fn analyze(self) -> error::Result<Detector<state::ExplorationComplete>> {
        let detector = self.disassemble()?;
        let detector = detector.build_cfg()?;
        let detector = detector.explore()?;

        Ok(detector)
    }

    /// Turns the listing into instructions, and relates them to the source
    /// map.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the listing is malformed, or if the source map does
    /// not describe the program in the listing.
    pub fn disassemble(self) -> error::Result<Detector<state::DisassemblyComplete>> {
        self.transform_state(|input, _| {
            let normalized = normalize(&input.listing)?;
            let instructions = parse_instructions(&tokenize(&normalized.lines)?)?;
            let ranges = match &input.source_map {
                Some(map) => correlate(map.asm_positions(), &instructions)?,
                None => BTreeMap::new(),
            };
            let selectors = entry_points(&instructions);
            let code = normalized.code.map(Rc::from);

            Ok(state::DisassemblyComplete {
                instructions,
                code,
                ranges,
                selectors,
            })
        })
    }
}

/// Operations available on a detector that has the instructions of the
/// program.
impl Detector<state::DisassemblyComplete> {
    /// Partitions the instructions into the basic blocks of the control-flow
    /// graph.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there are no instructions.
    pub fn build_cfg(self) -> error::Result<Detector<state::CfgReady>> {
        self.transform_state(|_, disassembly| {
            let cfg = Cfg::build(&disassembly.instructions)?;
            Ok(state::CfgReady { cfg, disassembly })
        })
    }
}

/// Operations available on a detector that is ready to explore the program.
impl Detector<state::CfgReady> {
    /// Explores the functions selected for analysis and settles the defect
    /// signals.
    ///
    /// Reaching the global deadline is not an error: the report then covers
    /// what was explored before it, and says that it timed out.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if an error that ends the whole run occurs.
    pub fn explore(self) -> error::Result<Detector<state::ExplorationComplete>> {
        self.transform_state(|input, ready| {
            let map = input.source_map.as_deref();
            let functions = select_functions(
                map,
                &ready.disassembly.selectors,
                input.config.target_function.as_deref(),
            );
            info!("Selected {} functions to explore", functions.len());

            let entry_points = ready
                .disassembly
                .selectors
                .iter()
                .map(|(&entry, selector)| (entry, resolve(map, entry, selector)))
                .collect();
            let instruction_count = ready.disassembly.instructions.len();
            let block_count = ready.cfg.block_count();

            let z3 = z3::Context::new(&z3::Config::new());
            let solver = SolverSession::new(&z3, input.config.solver_timeout_ms);
            let mut ctx = AnalysisContext::new(
                solver,
                ready.cfg,
                input.config.clone(),
                Rc::clone(&input.watchdog),
            )
            .with_patterns(Rc::clone(&input.patterns))
            .with_entry_points(entry_points)
            .with_code(ready.disassembly.code);
            if let Some(map) = &input.source_map {
                ctx = ctx.with_source(SourceView::new(Rc::clone(map), ready.disassembly.ranges));
            }

            explore(&mut ctx, &functions)?;

            let findings = std::mem::take(&mut ctx.tracker).finish(
                !functions.is_empty(),
                map.map(|map| map.source_content()),
                input.patterns.as_ref(),
            );
            let report = AnalysisReport::new(ExplorationSummary {
                findings,
                coverage: &ctx.coverage,
                errors: &ctx.errors,
                test_vectors: std::mem::take(&mut ctx.test_vectors),
                instruction_count,
                block_count,
                elapsed: input.started.elapsed(),
                timed_out: ctx.timed_out,
            });

            Ok(state::ExplorationComplete { report })
        })
    }
}

/// Operations available on a detector that has finished.
impl Detector<state::ExplorationComplete> {
    /// Gets the report of the analysis.
    pub fn report(&self) -> &AnalysisReport {
        &self.state.report
    }

    /// Consumes the detector, returning the report of the analysis.
    pub fn into_report(self) -> AnalysisReport {
        self.state.report
    }
}

/// Describes the function with the provided `selector` whose entry block
/// starts at `entry`, naming it from the source map when possible.
fn resolve(map: Option<&dyn SourceMap>, entry: u64, selector: &str) -> FunctionEntry {
    let signature = map
        .and_then(|map| map.sig_to_func().get(selector))
        .cloned()
        .unwrap_or_else(|| selector.to_string());
    FunctionEntry::new(entry, Some(selector.to_string()), signature)
}

/// Selects the functions to explore, in order.
///
/// - A `target` selector or signature selects just that function.
/// - Without a source map, exploration starts at the first block.
/// - Otherwise the functions that the source map says emit `Transfer` are
///   explored, preceded by `transferFrom` when the program has it.
fn select_functions(
    map: Option<&dyn SourceMap>,
    selectors: &BTreeMap<u64, String>,
    target: Option<&str>,
) -> Vec<FunctionEntry> {
    let mut entries = selectors.iter().map(|(&entry, selector)| resolve(map, entry, selector));

    if let Some(target) = target {
        let selector = target.trim_start_matches("0x").to_lowercase();
        return entries
            .filter(|f| f.selector.as_deref() == Some(selector.as_str()) || f.signature == target)
            .take(1)
            .collect();
    }

    let Some(map) = map else {
        return vec![FunctionEntry::fallback()];
    };

    let mut selected: Vec<FunctionEntry> = map
        .target_functions()
        .iter()
        .cartesian_product(map.sig_to_func())
        .filter(|(name, (_, signature))| signature.contains(name.as_str()))
        .filter_map(|(_, (selector, _))| selectors.iter().find(|(_, s)| *s == selector))
        .map(|(&entry, selector)| resolve(Some(map), entry, selector))
        .unique_by(|f| f.entry)
        .collect();

    let transfer_from = entries.find(|f| f.selector.as_deref() == Some(TRANSFER_FROM_SELECTOR));
    if let Some(transfer_from) = transfer_from {
        if !selected.iter().any(|f| f.entry == transfer_from.entry) {
            selected.insert(0, transfer_from);
        }
    }

    selected
}
