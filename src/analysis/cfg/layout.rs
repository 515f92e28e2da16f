//! Repartitioning of the serialization layout.
//!
//! Solving and bifurcation append blocks next to the block they were derived from, which
//! can split a protected region or separate a handler from its entry. [`repartition`]
//! computes a fresh layout from the scope tree:
//!
//! - every scope occupies one contiguous range
//! - a try region is immediately followed by the handlers protecting it
//! - every scope starts with its entry block
//!
//! Inside a scope, blocks and nested regions keep their previous relative order.

use std::collections::HashMap;

use crate::analysis::cfg::{BlockId, MethodBody, ScopeId, ScopeKind};

/// Recomputes the block layout of `body`.
///
/// # Returns
///
/// `true` if the layout changed.
pub fn repartition(body: &mut MethodBody) -> bool {
    let position: HashMap<BlockId, usize> = body
        .layout()
        .iter()
        .enumerate()
        .map(|(index, &id)| (id, index))
        .collect();

    let layout = emit_scope(body, ScopeId::ROOT, &position);
    if layout.as_slice() == body.layout() {
        return false;
    }
    log::debug!("repartitioned layout of {} blocks", layout.len());
    body.set_layout(layout);
    true
}

/// An element of a scope in layout order: one of its own blocks, or a nested region
/// together with its handlers.
struct Item {
    key: usize,
    blocks: Vec<BlockId>,
}

fn emit_scope(body: &MethodBody, scope: ScopeId, position: &HashMap<BlockId, usize>) -> Vec<BlockId> {
    let entry = if scope == ScopeId::ROOT {
        body.entry()
    } else {
        body.scope(scope).and_then(|s| s.entry())
    };

    let mut items: Vec<Item> = body
        .blocks()
        .filter(|block| block.scope() == scope)
        .map(|block| Item {
            key: position.get(&block.id()).copied().unwrap_or(usize::MAX),
            blocks: vec![block.id()],
        })
        .collect();

    let children: Vec<(ScopeId, ScopeKind)> = body
        .scopes()
        .filter(|(_, s)| s.parent() == Some(scope))
        .map(|(id, s)| (id, s.kind()))
        .collect();
    let sibling_try = |protected: ScopeId| {
        children
            .iter()
            .any(|&(id, kind)| id == protected && kind == ScopeKind::Try)
    };

    for &(child, kind) in &children {
        let group: Vec<ScopeId> = match kind {
            ScopeKind::Try => std::iter::once(child)
                .chain(children.iter().filter_map(|&(id, k)| match k {
                    ScopeKind::Handler { protected, .. } if protected == child => Some(id),
                    _ => None,
                }))
                .collect(),
            ScopeKind::Handler { protected, .. } if sibling_try(protected) => continue,
            _ => vec![child],
        };
        let blocks: Vec<BlockId> = group
            .into_iter()
            .flat_map(|id| emit_scope(body, id, position))
            .collect();
        if let Some(key) = blocks.iter().filter_map(|id| position.get(id)).min() {
            items.push(Item { key: *key, blocks });
        }
    }

    items.sort_by_key(|item| item.key);
    if let Some(entry) = entry {
        if let Some(index) = items.iter().position(|item| item.blocks == [entry]) {
            let item = items.remove(index);
            items.insert(0, item);
        }
    }
    items.into_iter().flat_map(|item| item.blocks).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::cfg::{HandlerKind, MethodBodyBuilder},
        assembly::Opcode,
    };

    #[test]
    fn test_regions_become_contiguous() {
        let mut body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                let protected = m.try_scope(ScopeId::ROOT);
                let handler = m.handler_scope(HandlerKind::Catch, protected, ScopeId::ROOT);
                m.block(0, |b| b.op(Opcode::Nop).jump(1));
                m.block_in(protected, 1, |b| b.op(Opcode::Nop).jump(4));
                m.block_in(handler, 2, |b| b.pop().leave(3));
                m.block(3, |b| b.ret());
                m.block_in(protected, 4, |b| b.op(Opcode::Nop).leave(3));
            })
            .unwrap();
        let ids = body.block_ids();
        assert!(repartition(&mut body));
        assert_eq!(body.layout(), &[ids[0], ids[1], ids[4], ids[2], ids[3]]);
        assert!(!repartition(&mut body));
    }

    #[test]
    fn test_entry_block_first() {
        let mut body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.op(Opcode::Nop).jump(1));
                m.block(1, |b| b.ret());
            })
            .unwrap();
        let ids = body.block_ids();
        body.set_layout(vec![ids[1], ids[0]]);
        assert!(repartition(&mut body));
        assert_eq!(body.layout(), &[ids[0], ids[1]]);
    }
}
