//! Basic blocks and their stable handles.

use std::fmt;

use crate::{
    analysis::cfg::ScopeId,
    assembly::{FlowType, Instruction},
};

/// Stable handle of a block inside a [`crate::analysis::cfg::MethodBody`].
///
/// Handles are never reused: removing a block leaves its slot empty, so a handle kept by a
/// host (for example inside an unsolved block record) either still refers to the same block
/// or is reported as invalid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A basic block of CIL instructions.
///
/// Control leaves a block through its last instruction:
///
/// - a conditional branch jumps to `targets[0]` or falls through to `fallthrough`
/// - a `switch` jumps to `targets[index]`, or falls through when the index is out of range
/// - anything else continues at `fallthrough` (unconditional jumps are not stored as
///   instructions, the link is the jump) or leaves the method when there is none
///
/// `sources` lists one entry per incoming edge. It is a back-reference maintained by every
/// edit of [`crate::analysis::cfg::MethodBody`], never edited directly.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) sources: Vec<BlockId>,
    pub(crate) fallthrough: Option<BlockId>,
    pub(crate) targets: Vec<BlockId>,
    pub(crate) scope: ScopeId,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, scope: ScopeId, instructions: Vec<Instruction>) -> Self {
        BasicBlock {
            id,
            instructions,
            sources: Vec::new(),
            fallthrough: None,
            targets: Vec::new(),
            scope,
        }
    }

    /// Handle of this block.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The instructions, terminator included.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Predecessors, one entry per incoming edge.
    #[must_use]
    pub fn sources(&self) -> &[BlockId] {
        &self.sources
    }

    /// The fall-through (or unconditional jump) successor.
    #[must_use]
    pub fn fallthrough(&self) -> Option<BlockId> {
        self.fallthrough
    }

    /// Branch targets of the terminator, in operand order.
    #[must_use]
    pub fn targets(&self) -> &[BlockId] {
        &self.targets
    }

    /// The enclosing exception scope.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The last instruction, if any.
    #[must_use]
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// The terminator, if this block ends in a conditional branch or a switch.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.last_instruction().filter(|instr| {
            matches!(
                instr.flow_type(),
                FlowType::ConditionalBranch | FlowType::Switch
            )
        })
    }

    /// Returns `true` if the block ends in a two-way conditional branch.
    #[must_use]
    pub fn ends_with_conditional(&self) -> bool {
        self.last_instruction()
            .is_some_and(|instr| instr.flow_type() == FlowType::ConditionalBranch)
    }

    /// Returns `true` if the block ends in a `switch`.
    #[must_use]
    pub fn ends_with_switch(&self) -> bool {
        self.last_instruction()
            .is_some_and(|instr| instr.flow_type() == FlowType::Switch)
    }

    /// Successors in search order: branch targets first, then the fall-through.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.targets.iter().copied().chain(self.fallthrough)
    }

    /// Number of outgoing edges.
    #[must_use]
    pub fn successor_count(&self) -> usize {
        self.targets.len() + usize::from(self.fallthrough.is_some())
    }
}
