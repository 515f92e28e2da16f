//! Outcomes and reports produced by the deobfuscator.

use std::fmt;

use crate::{
    analysis::{cfg::BlockId, symbolic::Formula},
    assembly::Opcode,
    deobfuscation::manual::UnsolvedBlock,
};

/// Result of one solve attempt on a block.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// The terminator was replaced and the graph changed.
    Solved,
    /// Every successor stays feasible. Carries the "branch is taken" formula for two-way
    /// branches, `None` for a dispatch no path resolves to a constant.
    Unsolved(Option<Formula>),
    /// The block has no terminator, or its operands are not bitvectors.
    Inapplicable,
}

impl SolveOutcome {
    /// Returns `true` if the attempt changed the graph.
    #[must_use]
    pub fn is_solved(&self) -> bool {
        matches!(self, Self::Solved)
    }
}

/// An instruction found dead by the dead code eliminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadInstruction {
    /// Block holding the instruction in the rewritten graph
    pub block: BlockId,
    /// Index of the instruction inside the block
    pub index: usize,
    /// Offset of the instruction in the original body
    pub offset: u32,
    /// The opcode
    pub opcode: Opcode,
}

impl fmt::Display for DeadInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {} ({}[{}])", self.offset, self.opcode, self.block, self.index)
    }
}

/// Counters describing what a deobfuscation run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeobfuscationStats {
    /// Two-way branches replaced by jumps
    pub branches_solved: usize,
    /// Dispatches replaced by jumps, or bypassed for one path
    pub switches_solved: usize,
    /// Unreachable blocks removed by cleaning
    pub blocks_removed: usize,
    /// Blocks merged into their predecessor by cleaning
    pub blocks_merged: usize,
    /// Clean/solve rounds executed
    pub rounds: usize,
}

impl DeobfuscationStats {
    /// Returns `true` if any branch or dispatch was solved.
    #[must_use]
    pub fn solved_any(&self) -> bool {
        self.branches_solved + self.switches_solved > 0
    }
}

impl fmt::Display for DeobfuscationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} branches, {} switches solved; {} blocks removed, {} merged in {} rounds",
            self.branches_solved,
            self.switches_solved,
            self.blocks_removed,
            self.blocks_merged,
            self.rounds
        )
    }
}

/// Report of a full run of [`crate::deobfuscation::MethodDeobfuscator`].
#[derive(Debug, Clone, Default)]
pub struct DeobfuscationResult {
    /// `false` when the run was cancelled or failed; the graph keeps the edits made so far
    pub success: bool,
    /// Instructions found dead after solving
    pub dead_instructions: Vec<DeadInstruction>,
    /// Two-way branches left undecided
    pub unsolved: Vec<UnsolvedBlock>,
    /// Change counters
    pub stats: DeobfuscationStats,
}
