//! Arena of basic blocks forming a method body.
//!
//! [`MethodBody`] owns every block of one method and is the only place where control flow
//! edges are edited. Blocks refer to each other through [`BlockId`] handles; successor links
//! (`fallthrough`, `targets`) are authoritative and `sources` is the mirrored back-reference.
//! Every edit below updates both sides, so after any sequence of edits
//!
//! ```text
//! for every edge b -> s:  s.sources contains b (once per edge)
//! ```
//!
//! holds. [`MethodBody::verify`] checks this and the terminator shapes, and is used by the
//! test-suite after each transformation.

use std::collections::HashSet;

use crate::{
    analysis::cfg::{BasicBlock, BlockId, HandlerKind, Scope, ScopeId, ScopeKind},
    assembly::{FlowType, Instruction, Opcode},
    Error, Result,
};

/// The control flow graph of one method.
#[derive(Debug, Clone)]
pub struct MethodBody {
    blocks: Vec<Option<BasicBlock>>,
    scopes: Vec<Scope>,
    entry: Option<BlockId>,
    params: u16,
    locals: u16,
    returns_value: bool,
    layout: Vec<BlockId>,
}

impl MethodBody {
    /// Creates an empty method body.
    ///
    /// # Arguments
    ///
    /// * `params` - Number of argument slots, including `this` for instance methods
    /// * `locals` - Number of local variable slots
    /// * `returns_value` - Whether `ret` consumes a value
    #[must_use]
    pub fn new(params: u16, locals: u16, returns_value: bool) -> Self {
        MethodBody {
            blocks: Vec::new(),
            scopes: vec![Scope {
                kind: ScopeKind::Method,
                parent: None,
                entry: None,
                seeded: false,
            }],
            entry: None,
            params,
            locals,
            returns_value,
            layout: Vec::new(),
        }
    }

    /// Number of argument slots.
    #[must_use]
    pub fn params(&self) -> u16 {
        self.params
    }

    /// Number of local variable slots.
    #[must_use]
    pub fn locals(&self) -> u16 {
        self.locals
    }

    /// Whether the method returns a value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    /// The method entry block.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    /// Adds an exception scope nested in `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `parent` (or the protected scope of a
    /// handler) does not exist.
    pub fn add_scope(&mut self, kind: ScopeKind, parent: ScopeId) -> Result<ScopeId> {
        if parent.0 >= self.scopes.len() {
            return Err(Error::InvariantViolation(format!(
                "parent scope {parent:?} does not exist"
            )));
        }
        if let ScopeKind::Handler { protected, .. } = kind {
            if protected.0 >= self.scopes.len() {
                return Err(Error::InvariantViolation(format!(
                    "protected scope {protected:?} does not exist"
                )));
            }
        }
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            entry: None,
            seeded: false,
        });
        Ok(ScopeId(self.scopes.len() - 1))
    }

    /// Looks up a scope.
    #[must_use]
    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    /// Iterates all scopes, the method scope first.
    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(index, scope)| (ScopeId(index), scope))
    }

    /// Appends a new block to `scope`.
    ///
    /// The first block added to the body becomes the method entry, the first block added
    /// to a scope becomes the scope's entry. A scope whose entry was removed keeps no
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the scope does not exist.
    pub fn add_block(&mut self, scope: ScopeId, instructions: Vec<Instruction>) -> Result<BlockId> {
        let id = self.allocate(scope, instructions)?;
        self.layout.push(id);
        Ok(id)
    }

    /// Adds a new block to `scope`, placed right after `after` in the layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the scope does not exist and
    /// [`Error::InvalidBlock`] if `after` is not a live block.
    pub fn add_block_after(
        &mut self,
        after: BlockId,
        scope: ScopeId,
        instructions: Vec<Instruction>,
    ) -> Result<BlockId> {
        let position = self
            .layout
            .iter()
            .position(|&id| id == after)
            .ok_or(Error::InvalidBlock(after))?;
        let id = self.allocate(scope, instructions)?;
        self.layout.insert(position + 1, id);
        Ok(id)
    }

    fn allocate(&mut self, scope: ScopeId, instructions: Vec<Instruction>) -> Result<BlockId> {
        let Some(scope_data) = self.scopes.get_mut(scope.0) else {
            return Err(Error::InvariantViolation(format!(
                "scope {scope:?} does not exist"
            )));
        };
        let id = BlockId(self.blocks.len());
        if !scope_data.seeded {
            scope_data.seeded = true;
            scope_data.entry = Some(id);
        }
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        self.blocks.push(Some(BasicBlock::new(id, scope, instructions)));
        Ok(id)
    }

    /// Looks up a live block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if the handle is stale or out of range.
    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        self.get(id).ok_or(Error::InvalidBlock(id))
    }

    /// Looks up a live block.
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock> {
        self.blocks
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidBlock(id))
    }

    /// Returns `true` if the handle refers to a live block.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    /// Handles of all live blocks in layout order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.layout.clone()
    }

    /// All live blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.layout.iter().filter_map(|&id| self.get(id))
    }

    /// Current serialization order of the blocks.
    #[must_use]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: Vec<BlockId>) {
        self.layout = layout;
    }

    /// Number of live blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    /// Returns `true` if the body has no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Total number of instructions over all live blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks().map(|block| block.instructions.len()).sum()
    }

    /// Returns `true` if the block lies inside a handler region (at any nesting depth).
    #[must_use]
    pub fn in_handler(&self, id: BlockId) -> bool {
        let Some(block) = self.get(id) else {
            return false;
        };
        let mut scope = Some(block.scope);
        while let Some(current) = scope.and_then(|s| self.scopes.get(s.0)) {
            if matches!(current.kind, ScopeKind::Handler { .. }) {
                return true;
            }
            scope = current.parent;
        }
        false
    }

    /// Entry blocks of all handler scopes.
    #[must_use]
    pub fn handler_entries(&self) -> Vec<BlockId> {
        self.scopes
            .iter()
            .filter(|scope| matches!(scope.kind, ScopeKind::Handler { .. }))
            .filter_map(|scope| scope.entry)
            .filter(|&id| self.contains(id))
            .collect()
    }

    /// Returns the handler kind if `id` is the entry block of a handler scope.
    #[must_use]
    pub fn handler_entry_kind(&self, id: BlockId) -> Option<HandlerKind> {
        self.scopes
            .iter()
            .find(|scope| scope.entry == Some(id))
            .and_then(Scope::handler_kind)
    }

    /// Returns `true` if `id` is the first block of any scope or the method entry.
    #[must_use]
    pub fn is_scope_entry(&self, id: BlockId) -> bool {
        self.entry == Some(id) || self.scopes.iter().any(|scope| scope.entry == Some(id))
    }

    fn link(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.block_mut(to)?.sources.push(from);
        Ok(())
    }

    fn unlink(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let sources = &mut self.block_mut(to)?.sources;
        match sources.iter().position(|&s| s == from) {
            Some(index) => {
                sources.remove(index);
                Ok(())
            }
            None => Err(Error::InvariantViolation(format!(
                "{to} does not list {from} as a source"
            ))),
        }
    }

    fn ensure_live(&self, ids: impl IntoIterator<Item = BlockId>) -> Result<()> {
        for id in ids {
            if !self.contains(id) {
                return Err(Error::InvalidBlock(id));
            }
        }
        Ok(())
    }

    /// Replaces the fall-through successor of `from`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if either block is not live.
    pub fn set_fallthrough(&mut self, from: BlockId, to: Option<BlockId>) -> Result<()> {
        self.ensure_live(std::iter::once(from).chain(to))?;
        let old = std::mem::replace(&mut self.block_mut(from)?.fallthrough, to);
        if let Some(old) = old {
            self.unlink(from, old)?;
        }
        if let Some(to) = to {
            self.link(from, to)?;
        }
        Ok(())
    }

    /// Replaces all branch targets of `from`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if any block is not live.
    pub fn set_targets(&mut self, from: BlockId, targets: Vec<BlockId>) -> Result<()> {
        self.ensure_live(std::iter::once(from).chain(targets.iter().copied()))?;
        let old = std::mem::replace(&mut self.block_mut(from)?.targets, targets.clone());
        for old_target in old {
            self.unlink(from, old_target)?;
        }
        for target in targets {
            self.link(from, target)?;
        }
        Ok(())
    }

    /// Redirects every edge `from -> old` to `from -> new`.
    ///
    /// # Returns
    ///
    /// `true` if at least one edge was redirected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if any block is not live.
    pub fn redirect(&mut self, from: BlockId, old: BlockId, new: BlockId) -> Result<bool> {
        self.ensure_live([from, old, new])?;
        let mut redirected = 0;
        {
            let block = self.block_mut(from)?;
            if block.fallthrough == Some(old) {
                block.fallthrough = Some(new);
                redirected += 1;
            }
            for target in &mut block.targets {
                if *target == old {
                    *target = new;
                    redirected += 1;
                }
            }
        }
        for _ in 0..redirected {
            self.unlink(from, old)?;
            self.link(from, new)?;
        }
        Ok(redirected > 0)
    }

    /// Inserts an instruction into a block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] for a stale handle and [`Error::Malformed`] if the
    /// index is past the end of the block.
    pub fn insert_instruction(
        &mut self,
        id: BlockId,
        index: usize,
        instruction: Instruction,
    ) -> Result<()> {
        let block = self.block_mut(id)?;
        if index > block.instructions.len() {
            return Err(malformed_error!(
                "Instruction index {} out of range for {}",
                index,
                id
            ));
        }
        block.instructions.insert(index, instruction);
        Ok(())
    }

    /// Gives mutable access to a block's instructions.
    ///
    /// Only flow-neutral edits are allowed through this accessor (replacing non-terminators
    /// by `nop`, removing `nop`s); terminators must be changed through the edge operations.
    pub(crate) fn instructions_mut(&mut self, id: BlockId) -> Result<&mut Vec<Instruction>> {
        Ok(&mut self.block_mut(id)?.instructions)
    }

    /// Replaces the conditional branch or switch ending `id` by an unconditional jump to
    /// `successor`.
    ///
    /// The terminator instruction is removed and all outgoing edges are replaced by a single
    /// fall-through edge. Operand discards must be inserted by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the block has no terminator and
    /// [`Error::InvalidBlock`] for stale handles.
    pub fn replace_terminator_with_jump(&mut self, id: BlockId, successor: BlockId) -> Result<()> {
        self.ensure_live([id, successor])?;
        let block = self.block_mut(id)?;
        if block.terminator().is_none() {
            return Err(malformed_error!("{} has no conditional terminator", id));
        }
        block.instructions.pop();
        self.set_targets(id, Vec::new())?;
        self.set_fallthrough(id, Some(successor))
    }

    /// Clones a block without its `nop`s, keeping its scope and successors.
    ///
    /// The clone has no predecessors; callers redirect edges to it. It is placed right after
    /// the original in the layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] for a stale handle.
    pub fn clone_block(&mut self, id: BlockId) -> Result<BlockId> {
        let original = self.block(id)?;
        let instructions = original
            .instructions
            .iter()
            .filter(|instr| instr.opcode != Opcode::Nop)
            .cloned()
            .collect();
        let scope = original.scope;
        let fallthrough = original.fallthrough;
        let targets = original.targets.clone();

        let clone = self.add_block_after(id, scope, instructions)?;
        self.set_targets(clone, targets)?;
        self.set_fallthrough(clone, fallthrough)?;
        Ok(clone)
    }

    /// Removes a set of blocks that is closed under predecessors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if a block outside the set still has an edge
    /// into the set.
    pub(crate) fn remove_blocks(&mut self, ids: &HashSet<BlockId>) -> Result<()> {
        for &id in ids {
            let block = self.block(id)?;
            if let Some(source) = block.sources.iter().find(|s| !ids.contains(s)) {
                return Err(Error::InvariantViolation(format!(
                    "cannot remove {id}: still reached from {source}"
                )));
            }
        }
        for &id in ids {
            let successors: Vec<BlockId> = self.block(id)?.successors().collect();
            for successor in successors {
                if !ids.contains(&successor) {
                    self.unlink(id, successor)?;
                }
            }
        }
        for &id in ids {
            self.blocks[id.0] = None;
        }
        for scope in &mut self.scopes {
            if scope.entry.is_some_and(|entry| ids.contains(&entry)) {
                scope.entry = None;
            }
        }
        self.layout.retain(|id| !ids.contains(id));
        Ok(())
    }

    /// Appends `block` to its only predecessor `pred` and removes it.
    ///
    /// The caller guarantees that `pred` falls through to `block` without branch targets and
    /// that `block` has no other predecessor.
    pub(crate) fn merge_into(&mut self, pred: BlockId, id: BlockId) -> Result<()> {
        let block = self
            .blocks
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(Error::InvalidBlock(id))?;
        self.layout.retain(|&b| b != id);

        let successors: Vec<BlockId> = block.successors().collect();
        for successor in successors {
            let sources = &mut self.block_mut(successor)?.sources;
            if let Some(slot) = sources.iter_mut().find(|s| **s == id) {
                *slot = pred;
            }
        }

        let pred_block = self.block_mut(pred)?;
        pred_block.instructions.extend(block.instructions);
        pred_block.fallthrough = block.fallthrough;
        pred_block.targets = block.targets;
        Ok(())
    }

    /// Checks the structural invariants of the graph.
    ///
    /// - every successor is live and lists the edge's origin in its sources, once per edge
    /// - every source entry corresponds to an edge
    /// - conditional branches have one target and a fall-through, switches have targets,
    ///   all other blocks have no targets
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] describing the first violation found.
    pub fn verify(&self) -> Result<()> {
        for block in self.blocks() {
            let mut expected: Vec<BlockId> = Vec::new();
            for other in self.blocks() {
                for successor in other.successors() {
                    if !self.contains(successor) {
                        return Err(Error::InvariantViolation(format!(
                            "{} has a dangling edge to {successor}",
                            other.id
                        )));
                    }
                    if successor == block.id {
                        expected.push(other.id);
                    }
                }
            }
            let mut actual = block.sources.clone();
            expected.sort_unstable();
            actual.sort_unstable();
            if expected != actual {
                return Err(Error::InvariantViolation(format!(
                    "{} sources {actual:?} do not match incoming edges {expected:?}",
                    block.id
                )));
            }

            let shape_ok = match block.last_instruction().map(Instruction::flow_type) {
                Some(FlowType::ConditionalBranch) => {
                    block.targets.len() == 1 && block.fallthrough.is_some()
                }
                Some(FlowType::Switch) => true,
                _ => block.targets.is_empty(),
            };
            if !shape_ok {
                return Err(Error::InvariantViolation(format!(
                    "{} has successors inconsistent with its terminator",
                    block.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{
        analysis::cfg::{MethodBody, ScopeId, ScopeKind},
        assembly::{Instruction, Opcode},
        Error,
    };

    fn diamond() -> (MethodBody, [crate::analysis::cfg::BlockId; 4]) {
        let mut body = MethodBody::new(1, 0, false);
        let b0 = body
            .add_block(
                ScopeId::ROOT,
                vec![Instruction::ldarg(0), Instruction::simple(Opcode::Brtrue)],
            )
            .unwrap();
        let b1 = body.add_block(ScopeId::ROOT, vec![Instruction::nop()]).unwrap();
        let b2 = body.add_block(ScopeId::ROOT, vec![Instruction::nop()]).unwrap();
        let b3 = body
            .add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)])
            .unwrap();
        body.set_targets(b0, vec![b2]).unwrap();
        body.set_fallthrough(b0, Some(b1)).unwrap();
        body.set_fallthrough(b1, Some(b3)).unwrap();
        body.set_fallthrough(b2, Some(b3)).unwrap();
        (body, [b0, b1, b2, b3])
    }

    #[test]
    fn test_edges_mirror_sources() {
        let (body, [b0, b1, b2, b3]) = diamond();
        body.verify().unwrap();
        assert_eq!(body.block(b1).unwrap().sources(), &[b0]);
        assert_eq!(body.block(b2).unwrap().sources(), &[b0]);
        assert_eq!(body.block(b3).unwrap().sources().len(), 2);
        assert_eq!(body.entry(), Some(b0));
    }

    #[test]
    fn test_replace_terminator_with_jump() {
        let (mut body, [b0, b1, b2, _]) = diamond();
        body.replace_terminator_with_jump(b0, b2).unwrap();
        body.verify().unwrap();
        let block = body.block(b0).unwrap();
        assert_eq!(block.fallthrough(), Some(b2));
        assert!(block.targets().is_empty());
        assert_eq!(block.instructions().len(), 1);
        assert!(body.block(b1).unwrap().sources().is_empty());
    }

    #[test]
    fn test_clone_and_redirect() {
        let (mut body, [b0, b1, _, b3]) = diamond();
        let clone = body.clone_block(b1).unwrap();
        assert!(body.block(clone).unwrap().instructions().is_empty());
        assert!(body.redirect(b0, b1, clone).unwrap());
        body.verify().unwrap();
        assert_eq!(body.block(b3).unwrap().sources().len(), 3);
        assert!(body.block(b1).unwrap().sources().is_empty());
    }

    #[test]
    fn test_remove_requires_closed_set() {
        let (mut body, [_, b1, _, _]) = diamond();
        let set: HashSet<_> = [b1].into_iter().collect();
        assert!(matches!(
            body.remove_blocks(&set),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_stale_handles_are_rejected() {
        let (mut body, [b0, b1, _, _]) = diamond();
        body.replace_terminator_with_jump(b0, b1).unwrap();
        let b2 = crate::analysis::cfg::BlockId::new(2);
        let set: HashSet<_> = [b2].into_iter().collect();
        body.remove_blocks(&set).unwrap();
        assert!(matches!(body.block(b2), Err(Error::InvalidBlock(_))));
        body.verify().unwrap();
    }

    #[test]
    fn test_removed_scope_entry_is_not_replaced() {
        let mut body = MethodBody::new(0, 0, false);
        let protected = body.add_scope(ScopeKind::Try, ScopeId::ROOT).unwrap();
        body.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)])
            .unwrap();
        let first = body
            .add_block(protected, vec![Instruction::simple(Opcode::Leave)])
            .unwrap();
        assert_eq!(body.scope(protected).unwrap().entry(), Some(first));

        let set: HashSet<_> = [first].into_iter().collect();
        body.remove_blocks(&set).unwrap();
        assert_eq!(body.scope(protected).unwrap().entry(), None);

        let later = body.add_block(protected, vec![Instruction::nop()]).unwrap();
        assert_eq!(body.scope(protected).unwrap().entry(), None);
        assert!(!body.is_scope_entry(later));
    }
}
