//! This module contains the state tracking functionality for the detector.

use std::{collections::BTreeMap, fmt::Debug, rc::Rc};

use crate::{
    disassembly::{cfg::Cfg, Instruction},
    report::AnalysisReport,
    source_map::SourceRange,
};

/// A marker trait that says that the type implementing it is a detector state.
pub trait State
where
    Self: Clone + Debug + Sized,
{
}

/// The initial state for the detector.
#[derive(Clone, Debug)]
pub struct HasListing;
impl State for HasListing {}

/// The detector has turned the listing into instructions.
#[derive(Clone, Debug)]
pub struct DisassemblyComplete {
    pub instructions: Vec<Instruction>,

    /// The bytecode from the listing's header, if it had one.
    pub code: Option<Rc<[u8]>>,

    /// The source range of each instruction that the source map accounts for.
    pub ranges: BTreeMap<u64, SourceRange>,

    /// The selector of the function whose entry block starts at each key.
    pub selectors: BTreeMap<u64, String>,
}
impl State for DisassemblyComplete {}

/// The detector has built the control-flow graph and is ready to explore it.
#[derive(Clone, Debug)]
pub struct CfgReady {
    pub cfg:         Cfg,
    pub disassembly: DisassemblyComplete,
}
impl State for CfgReady {}

/// The detector has explored the program and settled the defect signals.
#[derive(Clone, Debug)]
pub struct ExplorationComplete {
    pub report: AnalysisReport,
}
impl State for ExplorationComplete {}
