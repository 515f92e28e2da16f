//! Graph cleaning: unreachable block removal and straight-line block merging.

use std::collections::HashSet;

use crate::{
    analysis::cfg::{BlockId, MethodBody},
    assembly::FlowType,
    Result,
};

/// Counters reported by [`clean`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    /// Blocks removed because nothing reaches them
    pub blocks_removed: usize,
    /// Blocks appended to their only predecessor
    pub blocks_merged: usize,
}

impl CleanStats {
    /// Returns `true` if the graph was changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.blocks_removed + self.blocks_merged > 0
    }
}

/// Cleans the graph until nothing changes.
///
/// Each round removes the blocks not reachable from the method entry or any handler entry,
/// then merges every block into its predecessor when
///
/// - the predecessor's only successor is the block (a fall-through without branch targets)
/// - the block has exactly that one incoming edge
/// - both lie in the same scope and the block does not start a scope
/// - the predecessor does not end by leaving its region
///
/// Running it on an already clean graph changes nothing.
///
/// # Errors
///
/// Propagates [`crate::Error::InvariantViolation`] if the edge bookkeeping is inconsistent.
pub fn clean(body: &mut MethodBody) -> Result<CleanStats> {
    let mut stats = CleanStats::default();
    loop {
        let removed = remove_unreachable(body)?;
        let merged = merge_chains(body)?;
        stats.blocks_removed += removed;
        stats.blocks_merged += merged;
        if removed + merged == 0 {
            return Ok(stats);
        }
    }
}

fn remove_unreachable(body: &mut MethodBody) -> Result<usize> {
    let mut reachable: HashSet<BlockId> = HashSet::new();
    let mut worklist: Vec<BlockId> = body.entry().into_iter().collect();
    worklist.extend(body.handler_entries());

    while let Some(id) = worklist.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(block) = body.get(id) {
            worklist.extend(block.successors().filter(|s| !reachable.contains(s)));
        }
    }

    let dead: HashSet<BlockId> = body
        .layout()
        .iter()
        .copied()
        .filter(|id| !reachable.contains(id))
        .collect();
    if dead.is_empty() {
        return Ok(0);
    }
    log::debug!("removing {} unreachable blocks", dead.len());
    body.remove_blocks(&dead)?;
    Ok(dead.len())
}

fn merge_chains(body: &mut MethodBody) -> Result<usize> {
    let mut merged = 0;
    for id in body.block_ids() {
        // `id` may have been merged away earlier in this sweep
        let Some(block) = body.get(id) else {
            continue;
        };
        let &[pred] = block.sources() else {
            continue;
        };
        if pred == id || body.is_scope_entry(id) {
            continue;
        }
        let Some(pred_block) = body.get(pred) else {
            continue;
        };
        let falls_through = pred_block.targets().is_empty()
            && pred_block.fallthrough() == Some(id)
            && pred_block.scope() == block.scope();
        let sequential = pred_block
            .last_instruction()
            .map_or(true, |instr| {
                matches!(instr.flow_type(), FlowType::Sequential | FlowType::Call)
            });
        if falls_through && sequential {
            body.merge_into(pred, id)?;
            merged += 1;
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::cfg::{HandlerKind, MethodBodyBuilder, ScopeId},
        assembly::Opcode,
    };

    #[test]
    fn test_merges_straight_line() {
        let mut body = MethodBodyBuilder::new(0, 1, false)
            .build_with(|m| {
                m.block(0, |b| b.ldc_i4(1).jump(1));
                m.block(1, |b| b.stloc(0).jump(2));
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let stats = clean(&mut body).unwrap();
        assert_eq!(stats.blocks_merged, 2);
        assert_eq!(body.len(), 1);
        body.verify().unwrap();
        let entry = body.block(body.entry().unwrap()).unwrap();
        assert_eq!(entry.instructions().len(), 3);
    }

    #[test]
    fn test_removes_unreachable() {
        let mut body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ret());
                m.block(1, |b| b.ldc_i4(1).jump(2));
                m.block(2, |b| b.pop().ret());
            })
            .unwrap();
        let stats = clean(&mut body).unwrap();
        assert_eq!(stats.blocks_removed, 2);
        assert_eq!(body.len(), 1);
        body.verify().unwrap();
    }

    #[test]
    fn test_idempotent() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 1, 2));
                m.block(1, |b| b.jump(3));
                m.block(2, |b| b.jump(3));
                m.block(3, |b| b.ret());
            })
            .unwrap();
        clean(&mut body).unwrap();
        let layout = body.layout().to_vec();
        let count = body.instruction_count();
        let second = clean(&mut body).unwrap();
        assert!(!second.changed());
        assert_eq!(body.layout(), layout.as_slice());
        assert_eq!(body.instruction_count(), count);
    }

    #[test]
    fn test_keeps_handlers_and_scope_boundaries() {
        let mut body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                let protected = m.try_scope(ScopeId::ROOT);
                let handler = m.handler_scope(HandlerKind::Finally, protected, ScopeId::ROOT);
                m.block(0, |b| b.op(Opcode::Nop).jump(1));
                m.block_in(protected, 1, |b| b.op(Opcode::Nop).leave(3));
                m.block_in(handler, 2, |b| b.op(Opcode::Endfinally));
                m.block(3, |b| b.ret());
            })
            .unwrap();
        let stats = clean(&mut body).unwrap();
        assert_eq!(stats, CleanStats::default());
        assert_eq!(body.len(), 4);
    }
}
