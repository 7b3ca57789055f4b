//! This module contains miscellaneous small data-types that are used throughout
//! the virtual machine.

use std::collections::HashMap;

/// An edge of the control-flow graph, as the start addresses of the block it
/// leaves and the block it enters.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Edge {
    pub from: u64,
    pub to:   u64,
}

impl Edge {
    /// Constructs the edge from block `from` to block `to`.
    #[must_use]
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }
}

/// A container that tracks how many times each edge of the control-flow graph
/// has been taken by the explorer.
///
/// This bounds loops: an edge may be taken at most `loop_limit` times before
/// the path that takes it again is pruned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VisitedEdges {
    loop_limit: usize,
    data:       HashMap<Edge, usize>,
}

impl VisitedEdges {
    /// Constructs a new visited edges container that allows each edge to be
    /// taken up to `loop_limit` times.
    #[must_use]
    pub fn new(loop_limit: usize) -> Self {
        let data = HashMap::default();

        Self { loop_limit, data }
    }

    /// Marks `edge` as having been taken once more, returning the new count.
    pub fn mark_visited(&mut self, edge: Edge) -> usize {
        let count = self.data.entry(edge).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Un-marks one visit of `edge`.
    ///
    /// This is used when a branching block has been fully explored, so that
    /// sibling paths higher in the exploration see an accurate count.
    pub fn unmark_visited(&mut self, edge: Edge) {
        self.data
            .entry(edge)
            .and_modify(|count| *count = count.saturating_sub(1))
            .or_insert(0);
    }

    /// Checks if `edge` has been taken more often than the loop limit allows.
    #[must_use]
    pub fn over_limit(&self, edge: Edge) -> bool {
        self.visits(edge) > self.loop_limit
    }

    /// Gets the number of times that `edge` is currently marked as taken.
    #[must_use]
    pub fn visits(&self, edge: Edge) -> usize {
        self.data.get(&edge).copied().unwrap_or(0)
    }
}
