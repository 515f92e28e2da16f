//! Simple path enumeration between two blocks.

use std::collections::HashSet;

use crate::{
    analysis::cfg::{BlockId, MethodBody},
    deobfuscation::CancellationToken,
    Error, Result,
};

/// Enumerates the simple paths from `root` to `target`.
///
/// The search is a depth-first walk over branch targets first, then the fall-through,
/// pruning blocks already on the current path. Each returned path starts with `root` and
/// ends with `target`; `root == target` yields the single path `[root]`.
///
/// # Errors
///
/// Returns [`crate::Error::PathLimit`] if there are more than `max_paths` paths,
/// [`crate::Error::Cancelled`] if the token is cancelled during the walk, and
/// [`crate::Error::InvalidBlock`] if `root` is not a live block.
pub fn enumerate_paths(
    body: &MethodBody,
    root: BlockId,
    target: BlockId,
    max_paths: usize,
    token: &CancellationToken,
) -> Result<Vec<Vec<BlockId>>> {
    body.block(root)?;
    let mut walker = PathWalker {
        body,
        target,
        max_paths,
        token,
        current: Vec::new(),
        on_path: HashSet::new(),
        paths: Vec::new(),
        truncated: false,
    };
    walker.visit(root)?;
    if walker.truncated {
        return Err(Error::PathLimit(max_paths));
    }
    Ok(walker.paths)
}

struct PathWalker<'a> {
    body: &'a MethodBody,
    target: BlockId,
    max_paths: usize,
    token: &'a CancellationToken,
    current: Vec<BlockId>,
    on_path: HashSet<BlockId>,
    paths: Vec<Vec<BlockId>>,
    truncated: bool,
}

impl PathWalker<'_> {
    fn visit(&mut self, id: BlockId) -> Result<()> {
        self.token.check()?;
        if self.truncated {
            return Ok(());
        }

        self.current.push(id);
        self.on_path.insert(id);

        if id == self.target {
            if self.paths.len() < self.max_paths {
                self.paths.push(self.current.clone());
            } else {
                self.truncated = true;
            }
        } else if let Some(block) = self.body.get(id) {
            let successors: Vec<BlockId> = block.successors().collect();
            for successor in successors {
                if !self.on_path.contains(&successor) {
                    self.visit(successor)?;
                }
            }
        }

        self.on_path.remove(&id);
        self.current.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::cfg::MethodBodyBuilder, assembly::Opcode};

    fn looped() -> MethodBody {
        // 0 -> {1, 2}; 1 -> 3; 2 -> 3; 3 -> {0, 4}
        MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 1, 2));
                m.block(1, |b| b.jump(3));
                m.block(2, |b| b.jump(3));
                m.block(3, |b| b.ldarg(0).branch(Opcode::Brfalse, 0, 4));
                m.block(4, |b| b.ret());
            })
            .unwrap()
    }

    #[test]
    fn test_paths_through_diamond() {
        let body = looped();
        let ids = body.block_ids();
        let paths =
            enumerate_paths(&body, ids[0], ids[4], 16, &CancellationToken::new()).unwrap();
        assert_eq!(
            paths,
            vec![
                vec![ids[0], ids[1], ids[3], ids[4]],
                vec![ids[0], ids[2], ids[3], ids[4]],
            ]
        );
    }

    #[test]
    fn test_root_is_target() {
        let body = looped();
        let ids = body.block_ids();
        let paths =
            enumerate_paths(&body, ids[3], ids[3], 16, &CancellationToken::new()).unwrap();
        assert_eq!(paths, vec![vec![ids[3]]]);
    }

    #[test]
    fn test_max_paths_bound() {
        let body = looped();
        let ids = body.block_ids();
        let token = CancellationToken::new();
        assert!(matches!(
            enumerate_paths(&body, ids[0], ids[4], 1, &token),
            Err(Error::PathLimit(1))
        ));
        // exactly at the bound is complete
        let paths = enumerate_paths(&body, ids[0], ids[4], 2, &token).unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_cancelled() {
        let body = looped();
        let ids = body.block_ids();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            enumerate_paths(&body, ids[0], ids[4], 16, &token),
            Err(Error::Cancelled)
        ));
    }
}
