//! Stack variable reconstruction.
//!
//! The evaluation stack is simulated over the blocks in flow order. Every value an
//! instruction pushes becomes a fresh stack variable, every value it pops is a use of the
//! variable in that slot. Where control flow joins, the variables arriving in the same slot
//! from different predecessors denote the same value and are unified.
//!
//! ```text
//!   B0: ldc.i4 1      def v0          B2 (join):
//!       br B2                           pop        use v0 ~ v1
//!   B1: ldarg 0       def v1
//! ```
//!
//! Catch and filter handlers start with the exception object on the stack. It is defined by
//! a binding marker entry that has no instruction behind it.

use std::collections::{HashMap, VecDeque};

use crate::{
    analysis::cfg::{BlockId, MethodBody},
    assembly::{Instruction, Opcode, Operand},
    Error, Result,
};

/// Handle of a stack variable.
pub(crate) type VarId = usize;

/// Handle of a def-use entry.
pub(crate) type EntryId = usize;

/// What a def-use entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Node {
    /// The instruction at `index` in `block`
    Instruction {
        block: BlockId,
        index: usize,
        offset: u32,
        opcode: Opcode,
    },
    /// The exception object bound at a catch or filter entry
    Binding,
}

/// One node together with the variables it defines and uses.
#[derive(Debug, Clone)]
pub(crate) struct DefUseEntry {
    pub(crate) node: Node,
    /// Variables pushed, bottom first
    pub(crate) defs: Vec<VarId>,
    /// Variables popped, bottom first
    pub(crate) uses: Vec<VarId>,
}

impl DefUseEntry {
    /// The opcode, or `None` for the binding marker.
    pub(crate) fn opcode(&self) -> Option<Opcode> {
        match self.node {
            Node::Instruction { opcode, .. } => Some(opcode),
            Node::Binding => None,
        }
    }

    pub(crate) fn is_binding(&self) -> bool {
        matches!(self.node, Node::Binding)
    }

    pub(crate) fn is_call(&self) -> bool {
        self.opcode().is_some_and(Opcode::is_call)
    }

    pub(crate) fn is(&self, opcode: Opcode) -> bool {
        self.opcode() == Some(opcode)
    }
}

/// Def-use entries of a method body over unified stack variables.
#[derive(Debug, Clone, Default)]
pub(crate) struct DefUseGraph {
    entries: Vec<DefUseEntry>,
    /// Union-find parents of the stack variables
    parent: Vec<VarId>,
}

impl DefUseGraph {
    /// Simulates the stack of `body` starting at the method entry and every handler entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackMismatch`] if two predecessors reach a block with different
    /// stack heights, or an instruction pops more values than the stack holds.
    pub(crate) fn build(body: &MethodBody) -> Result<Self> {
        let mut graph = DefUseGraph::default();
        let mut walker = FlowWalker::default();

        if let Some(entry) = body.entry() {
            walker.arrive(&mut graph, entry, Vec::new())?;
        }
        for handler in body.handler_entries() {
            let stack = match body.handler_entry_kind(handler) {
                Some(kind) if kind.binds_exception() => {
                    let var = graph.new_var();
                    graph.entries.push(DefUseEntry {
                        node: Node::Binding,
                        defs: vec![var],
                        uses: Vec::new(),
                    });
                    vec![var]
                }
                _ => Vec::new(),
            };
            walker.arrive(&mut graph, handler, stack)?;
        }

        while let Some(id) = walker.queue.pop_front() {
            let mut stack = walker.entry_stacks.get(&id).cloned().unwrap_or_default();
            let block = body.block(id)?;
            for (index, instr) in block.instructions().iter().enumerate() {
                graph.simulate(id, index, instr, &mut stack, body.returns_value())?;
            }
            for successor in block.successors() {
                walker.arrive(&mut graph, successor, stack.clone())?;
            }
        }
        Ok(graph)
    }

    fn new_var(&mut self) -> VarId {
        self.parent.push(self.parent.len());
        self.parent.len() - 1
    }

    fn simulate(
        &mut self,
        block: BlockId,
        index: usize,
        instr: &Instruction,
        stack: &mut Vec<VarId>,
        method_returns: bool,
    ) -> Result<()> {
        let behavior = instr.stack_behavior(method_returns);

        // a call without signature consumes whatever is on the stack
        let uses = if instr.opcode.is_call() && !matches!(instr.operand, Operand::Method(_)) {
            std::mem::take(stack)
        } else {
            let pops = usize::from(behavior.pops);
            if stack.len() < pops {
                return Err(Error::StackMismatch {
                    block,
                    expected: pops,
                    found: stack.len(),
                });
            }
            stack.split_off(stack.len() - pops)
        };
        if behavior.clears_stack {
            stack.clear();
        }

        let defs: Vec<VarId> = (0..behavior.pushes).map(|_| self.new_var()).collect();
        stack.extend(&defs);
        self.entries.push(DefUseEntry {
            node: Node::Instruction {
                block,
                index,
                offset: instr.offset,
                opcode: instr.opcode,
            },
            defs,
            uses,
        });
        Ok(())
    }

    /// Representative of the class `var` belongs to.
    pub(crate) fn find(&self, mut var: VarId) -> VarId {
        while self.parent[var] != var {
            var = self.parent[var];
        }
        var
    }

    /// Merges the classes of `a` and `b`.
    pub(crate) fn union(&mut self, a: VarId, b: VarId) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }

    pub(crate) fn entry(&self, id: EntryId) -> &DefUseEntry {
        &self.entries[id]
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Definers and consumers per variable class, ignoring the entries marked in `removed`.
    pub(crate) fn index(&self, removed: &[bool]) -> DefUseIndex {
        let mut index = DefUseIndex::default();
        for (id, entry) in self.entries.iter().enumerate() {
            if removed[id] {
                continue;
            }
            for &var in &entry.defs {
                index.definers.entry(self.find(var)).or_default().push(id);
            }
            for &var in &entry.uses {
                index.consumers.entry(self.find(var)).or_default().push(id);
            }
        }
        index
    }
}

/// Definers and consumers of each variable class.
#[derive(Debug, Default)]
pub(crate) struct DefUseIndex {
    definers: HashMap<VarId, Vec<EntryId>>,
    consumers: HashMap<VarId, Vec<EntryId>>,
}

impl DefUseIndex {
    /// Entries defining the class with representative `class`.
    pub(crate) fn definers(&self, class: VarId) -> &[EntryId] {
        self.definers.get(&class).map_or(&[], Vec::as_slice)
    }

    /// Entries consuming the class with representative `class`.
    pub(crate) fn consumers(&self, class: VarId) -> &[EntryId] {
        self.consumers.get(&class).map_or(&[], Vec::as_slice)
    }
}

/// Worklist over blocks with the stack each one is entered with.
#[derive(Default)]
struct FlowWalker {
    entry_stacks: HashMap<BlockId, Vec<VarId>>,
    queue: VecDeque<BlockId>,
}

impl FlowWalker {
    fn arrive(&mut self, graph: &mut DefUseGraph, block: BlockId, stack: Vec<VarId>) -> Result<()> {
        match self.entry_stacks.get(&block) {
            Some(existing) => {
                if existing.len() != stack.len() {
                    return Err(Error::StackMismatch {
                        block,
                        expected: existing.len(),
                        found: stack.len(),
                    });
                }
                for (&a, &b) in existing.iter().zip(&stack) {
                    graph.union(a, b);
                }
            }
            None => {
                self.entry_stacks.insert(block, stack);
                self.queue.push_back(block);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::cfg::{HandlerKind, MethodBodyBuilder, ScopeId},
        assembly::Opcode,
    };

    #[test]
    fn test_join_unifies_slots() {
        let body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 1, 2));
                m.block(1, |b| b.ldc_i4(1).jump(3));
                m.block(2, |b| b.ldc_i4(2).jump(3));
                m.block(3, |b| b.pop().ret());
            })
            .unwrap();
        let graph = DefUseGraph::build(&body).unwrap();
        let index = graph.index(&vec![false; graph.len()]);

        let pop = (0..graph.len())
            .find(|&id| graph.entry(id).is(Opcode::Pop))
            .unwrap();
        let class = graph.find(graph.entry(pop).uses[0]);
        assert_eq!(index.definers(class).len(), 2);
        assert_eq!(index.consumers(class), &[pop]);
    }

    #[test]
    fn test_height_mismatch_at_join() {
        let body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 1, 2));
                m.block(1, |b| b.ldc_i4(1).jump(3));
                m.block(2, |b| b.op(Opcode::Nop).jump(3));
                m.block(3, |b| b.ret());
            })
            .unwrap();
        assert!(matches!(
            DefUseGraph::build(&body),
            Err(Error::StackMismatch { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn test_catch_entry_binds_exception() {
        let body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                let protected = m.try_scope(ScopeId::ROOT);
                let handler = m.handler_scope(HandlerKind::Catch, protected, ScopeId::ROOT);
                m.block_in(protected, 0, |b| b.op(Opcode::Nop).leave(2));
                m.block_in(handler, 1, |b| b.pop().leave(2));
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let graph = DefUseGraph::build(&body).unwrap();
        let binding = (0..graph.len())
            .find(|&id| graph.entry(id).is_binding())
            .unwrap();
        let pop = (0..graph.len())
            .find(|&id| graph.entry(id).is(Opcode::Pop))
            .unwrap();
        assert_eq!(
            graph.find(graph.entry(pop).uses[0]),
            graph.find(graph.entry(binding).defs[0])
        );
    }
}
