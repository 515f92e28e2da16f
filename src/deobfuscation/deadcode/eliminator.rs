use std::collections::HashSet;

use crate::{
    analysis::cfg::{BlockId, MethodBody},
    assembly::Opcode,
    deobfuscation::{
        deadcode::defuse::{DefUseGraph, DefUseIndex, EntryId, Node},
        DeadInstruction,
    },
    Result,
};

/// Finds stack traffic whose value is never observed.
///
/// Removal works on whole expressions: a value-producing instruction goes together with
/// the `pop`s discarding it and with every operand computed only for it. Values that reach
/// a call, a `ret`, or the exception binding of a handler are kept, as is anything derived
/// from a call result.
#[derive(Debug)]
pub struct DeadCodeEliminator {
    graph: DefUseGraph,
    removed: Vec<bool>,
    max_depth: usize,
}

impl DeadCodeEliminator {
    /// Reconstructs the stack variables of `body`.
    ///
    /// # Arguments
    ///
    /// * `body` - The method body to analyze
    /// * `max_depth` - How far the producer walk looks for a `dup` feeding a call
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StackMismatch`] if stack heights disagree at a join.
    pub fn new(body: &MethodBody, max_depth: usize) -> Result<Self> {
        let graph = DefUseGraph::build(body)?;
        let removed = vec![false; graph.len()];
        Ok(DeadCodeEliminator {
            graph,
            removed,
            max_depth,
        })
    }

    /// Removes dead entries until a pass finds nothing, and returns the dead instructions
    /// in layout order.
    pub fn run(mut self, body: &MethodBody) -> Vec<DeadInstruction> {
        while self.step() {}

        let position = |block: BlockId| body.layout().iter().position(|&id| id == block);
        let mut dead: Vec<DeadInstruction> = (0..self.graph.len())
            .filter(|&id| self.removed[id])
            .filter_map(|id| match self.graph.entry(id).node {
                Node::Instruction {
                    block,
                    index,
                    offset,
                    opcode,
                } => Some(DeadInstruction {
                    block,
                    index,
                    offset,
                    opcode,
                }),
                Node::Binding => None,
            })
            .collect();
        dead.sort_by_key(|d| (position(d.block), d.index));
        dead
    }

    /// Removes one expression or collapses one `dup`.
    fn step(&mut self) -> bool {
        let index = self.graph.index(&self.removed);
        for id in 0..self.graph.len() {
            if self.removed[id] {
                continue;
            }
            if let Some(group) = self.dead_expression(id, &index) {
                for member in group {
                    self.removed[member] = true;
                }
                return true;
            }
            if self.collapse_dup(id, &index) {
                return true;
            }
        }
        false
    }

    /// The entries to remove together with `id` if its value is only ever discarded.
    fn dead_expression(&self, id: EntryId, index: &DefUseIndex) -> Option<Vec<EntryId>> {
        let entry = self.graph.entry(id);
        if entry.defs.is_empty() || entry.is_call() || entry.is_binding() {
            return None;
        }

        let mut group = vec![id];
        for &def in &entry.defs {
            let class = self.graph.find(def);
            if index.definers(class) != [id] {
                return None;
            }
            for &consumer in index.consumers(class) {
                if !self.graph.entry(consumer).is(Opcode::Pop) {
                    return None;
                }
                group.push(consumer);
            }
        }

        if !entry.is(Opcode::Dup) && self.dup_feeds_call(id, index, &mut Vec::new()) {
            return None;
        }
        let mut visited = HashSet::from([id]);
        if !self.operands_removable(id, index, &mut visited, &mut group) {
            return None;
        }
        Some(group)
    }

    /// Adds the producers of the operands of `id` to `group`.
    ///
    /// Each producer must be consumed by `id` alone and be removable itself. A `dup` may
    /// stay behind with one copy orphaned; it collapses on the next step.
    fn operands_removable(
        &self,
        id: EntryId,
        index: &DefUseIndex,
        visited: &mut HashSet<EntryId>,
        group: &mut Vec<EntryId>,
    ) -> bool {
        for &var in &self.graph.entry(id).uses {
            let class = self.graph.find(var);
            let &[source] = index.definers(class) else {
                return false;
            };
            if index.consumers(class) != [id] {
                return false;
            }

            let producer = self.graph.entry(source);
            if producer.is_binding() || producer.is_call() {
                return false;
            }
            if producer.is(Opcode::Dup) {
                continue;
            }
            if !visited.insert(source) || producer.defs.len() != 1 {
                return false;
            }
            group.push(source);
            if !self.operands_removable(source, index, visited, group) {
                return false;
            }
        }
        true
    }

    /// Walks producers backwards looking for a `dup` whose copies reach a call or `ret`.
    fn dup_feeds_call(&self, id: EntryId, index: &DefUseIndex, path: &mut Vec<EntryId>) -> bool {
        if path.contains(&id) || path.len() > self.max_depth {
            return false;
        }
        path.push(id);
        let found = self.graph.entry(id).uses.iter().any(|&var| {
            index
                .definers(self.graph.find(var))
                .iter()
                .any(|&source| {
                    if self.graph.entry(source).is(Opcode::Dup) {
                        self.reaches_call(source, index)
                    } else {
                        self.dup_feeds_call(source, index, path)
                    }
                })
        });
        path.pop();
        found
    }

    fn reaches_call(&self, id: EntryId, index: &DefUseIndex) -> bool {
        self.graph.entry(id).defs.iter().any(|&def| {
            index
                .consumers(self.graph.find(def))
                .iter()
                .any(|&consumer| {
                    let consumer = self.graph.entry(consumer);
                    consumer.is_call() || consumer.is(Opcode::Ret)
                })
        })
    }

    /// Removes a `dup` one of whose copies is only discarded, handing the value straight
    /// to the consumers of the other copy.
    fn collapse_dup(&mut self, id: EntryId, index: &DefUseIndex) -> bool {
        let entry = self.graph.entry(id);
        let (&[operand], &[bottom, top]) = (entry.uses.as_slice(), entry.defs.as_slice()) else {
            return false;
        };
        if !entry.is(Opcode::Dup) {
            return false;
        }

        for (discarded, kept) in [(top, bottom), (bottom, top)] {
            let (discarded, kept) = (self.graph.find(discarded), self.graph.find(kept));
            if index.definers(discarded) != [id] || index.definers(kept) != [id] {
                continue;
            }
            let pops = index.consumers(discarded);
            if !pops.iter().all(|&pop| self.graph.entry(pop).is(Opcode::Pop)) {
                continue;
            }

            self.removed[id] = true;
            for &pop in pops {
                self.removed[pop] = true;
            }
            self.graph.union(operand, kept);
            return true;
        }
        false
    }
}
