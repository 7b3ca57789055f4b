//! This module contains the control-flow graph over which the explorer runs.
//!
//! # Construction
//!
//! The instructions are partitioned into basic blocks in a single pass:
//!
//! - A `JUMPDEST` begins a new block, and the block that it interrupts falls
//!   through into it.
//! - `JUMP`, `JUMPI` and the terminal instructions close the current block,
//!   and the next instruction begins a new one.
//! - A trailing block without a closing instruction is terminal.
//!
//! Only fall-through edges are known statically. The targets of jumps come off
//! the stack, so they are only resolved once the explorer interprets the jump,
//! at which point [`Cfg::resolve_jump`] records them.

use std::{collections::BTreeMap, rc::Rc};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    disassembly::Instruction,
    error::{
        container::Locatable,
        disassembly::{Error, Result},
    },
    opcode::Opcode,
};

/// How control leaves a basic block.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum BlockKind {
    /// The block ends the path.
    Terminal,

    /// The block ends in a `JUMP`.
    Unconditional,

    /// The block ends in a `JUMPI`, and falls through when the jump is not
    /// taken.
    Conditional,

    /// The block runs straight into the block that follows it.
    FallsTo,
}

/// A maximal run of instructions with a single entry and a single exit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicBlock {
    /// The address of the first instruction.
    pub start: u64,

    /// The address of the last instruction.
    pub end: u64,

    pub instructions: Rc<[Instruction]>,

    pub kind: BlockKind,

    /// The most recently resolved target of the closing jump.
    pub jump_target: Option<u64>,

    /// The block that follows this one in address order, for the kinds that
    /// can continue into it.
    pub falls_to: Option<u64>,
}

/// The control-flow graph of a program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Cfg {
    blocks:       BTreeMap<u64, BasicBlock>,
    edges:        BTreeMap<u64, Vec<u64>>,
    instructions: BTreeMap<u64, Instruction>,
}

impl Cfg {
    /// Builds the graph for the provided `instructions`, which must be in
    /// address order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there are no instructions.
    pub fn build(instructions: &[Instruction]) -> Result<Self> {
        if instructions.is_empty() {
            return Err(Error::EmptyListing.locate(0));
        }
        info!("Building the control-flow graph for {} instructions", instructions.len());

        let mut spans: Vec<(Vec<Instruction>, BlockKind)> = Vec::new();
        let mut current: Vec<Instruction> = Vec::new();

        for instruction in instructions {
            if instruction.opcode == Opcode::JumpDest && !current.is_empty() {
                spans.push((std::mem::take(&mut current), BlockKind::FallsTo));
            }
            current.push(instruction.clone());

            let closing_kind = match &instruction.opcode {
                Opcode::Jump => Some(BlockKind::Unconditional),
                Opcode::JumpI => Some(BlockKind::Conditional),
                op if op.is_terminal() => Some(BlockKind::Terminal),
                _ => None,
            };
            if let Some(kind) = closing_kind {
                spans.push((std::mem::take(&mut current), kind));
            }
        }
        if !current.is_empty() {
            spans.push((current, BlockKind::Terminal));
        }

        let starts: Vec<u64> = spans
            .iter()
            .filter_map(|(body, _)| body.first())
            .map(|i| i.address)
            .collect();
        let mut cfg = Self {
            instructions: instructions.iter().map(|i| (i.address, i.clone())).collect(),
            ..Self::default()
        };

        for (index, (body, kind)) in spans.into_iter().enumerate() {
            let (Some(first), Some(last)) = (body.first(), body.last()) else {
                continue;
            };
            let (start, end) = (first.address, last.address);
            let falls_to = match kind {
                BlockKind::FallsTo | BlockKind::Conditional => starts.get(index + 1).copied(),
                BlockKind::Terminal | BlockKind::Unconditional => None,
            };

            cfg.edges.insert(start, falls_to.into_iter().collect());
            cfg.blocks.insert(
                start,
                BasicBlock {
                    start,
                    end,
                    instructions: body.into(),
                    kind,
                    jump_target: None,
                    falls_to,
                },
            );
        }

        info!(
            "Built the control-flow graph with {} blocks and {} static edges",
            cfg.block_count(),
            cfg.edge_count()
        );

        Ok(cfg)
    }

    /// Gets the block that starts at `start`.
    #[must_use]
    pub fn block(&self, start: u64) -> Option<&BasicBlock> {
        self.blocks.get(&start)
    }

    /// Gets all of the blocks, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    /// Records that the jump closing `block` was resolved to `target`, adding
    /// the edge if it is new.
    pub fn resolve_jump(&mut self, block: u64, target: u64) {
        if let Some(data) = self.blocks.get_mut(&block) {
            data.jump_target = Some(target);
        }
        let successors = self.edges.entry(block).or_default();
        if !successors.contains(&target) {
            successors.push(target);
        }
    }

    /// Gets the known successors of `block`.
    #[must_use]
    pub fn successors(&self, block: u64) -> &[u64] {
        self.edges.get(&block).map_or(&[], Vec::as_slice)
    }

    /// Gets the instruction at `address`.
    #[must_use]
    pub fn instruction(&self, address: u64) -> Option<&Instruction> {
        self.instructions.get(&address)
    }

    /// Gets the block containing the instruction at `address`.
    #[must_use]
    pub fn block_containing(&self, address: u64) -> Option<&BasicBlock> {
        self.blocks
            .range(..=address)
            .next_back()
            .map(|(_, block)| block)
            .filter(|block| address <= block.end)
    }

    /// Checks whether any instruction in the program is `opcode`.
    #[must_use]
    pub fn contains_opcode(&self, opcode: &Opcode) -> bool {
        self.instructions.values().any(|i| &i.opcode == opcode)
    }

    /// Gets the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Gets the number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Gets the number of edges, counting each successor of each block.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::{
            cfg::{BlockKind, Cfg},
            normalizer::normalize,
            tokenizer::{parse_instructions, tokenize},
            Instruction,
        },
        opcode::Opcode,
    };

    fn instructions(listing: &str) -> anyhow::Result<Vec<Instruction>> {
        let normalized = normalize(listing)?;
        Ok(parse_instructions(&tokenize(&normalized.lines)?)?)
    }

    #[test]
    fn partitions_into_blocks() -> anyhow::Result<()> {
        let listing = crate::listing![
            "PUSH1 0x01",
            "PUSH1 0x08",
            "JUMPI",
            "PUSH1 0x00",
            "JUMPDEST",
            "STOP",
            "JUMPDEST",
            "STOP",
        ];
        let cfg = Cfg::build(&instructions(&listing)?)?;

        let kinds: Vec<_> = cfg.blocks().map(|b| (b.start, b.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (0, BlockKind::Conditional),
                (5, BlockKind::FallsTo),
                (7, BlockKind::Terminal),
                (9, BlockKind::Terminal),
            ]
        );
        assert_eq!(cfg.block(0).and_then(|b| b.falls_to), Some(5));
        assert_eq!(cfg.block(5).and_then(|b| b.falls_to), Some(7));
        assert_eq!(cfg.successors(7), &[] as &[u64]);

        Ok(())
    }

    #[test]
    fn every_instruction_is_in_exactly_one_block() -> anyhow::Result<()> {
        let listing = crate::listing![
            "PUSH1 0x05",
            "JUMP",
            "STOP",
            "ADD",
            "JUMPDEST",
            "INVALID",
            "POP",
        ];
        let instructions = instructions(&listing)?;
        let cfg = Cfg::build(&instructions)?;

        for instruction in &instructions {
            let owners = cfg
                .blocks()
                .filter(|b| b.instructions.iter().any(|i| i.address == instruction.address))
                .count();
            assert_eq!(owners, 1, "{instruction} belongs to {owners} blocks");
        }
        assert_eq!(cfg.block_containing(4).map(|b| b.start), Some(4));
        assert_eq!(cfg.block(3).map(|b| b.kind), Some(BlockKind::Terminal));

        Ok(())
    }

    #[test]
    fn resolving_jumps_adds_edges_once() -> anyhow::Result<()> {
        let listing = crate::listing!["PUSH1 0x03", "JUMP", "JUMPDEST", "STOP"];
        let mut cfg = Cfg::build(&instructions(&listing)?)?;
        assert_eq!(cfg.edge_count(), 0);

        cfg.resolve_jump(0, 3);
        cfg.resolve_jump(0, 3);
        assert_eq!(cfg.successors(0), &[3]);
        assert_eq!(cfg.block(0).and_then(|b| b.jump_target), Some(3));
        assert!(cfg.contains_opcode(&Opcode::Jump));

        Ok(())
    }
}
