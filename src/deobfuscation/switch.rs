//! Dispatch (`switch`) solving and path-based dispatch bypassing.
//!
//! Control flow flattening routes every original block through one dispatcher that loads
//! a state variable and `switch`es on it. Interpreting the dispatcher block alone rarely
//! tells which case runs; the state is written by the block that jumped to it. The
//! resolver therefore interprets whole paths from a candidate root to the dispatcher. When
//! one path produces a constant selector, that path is rerouted past the dispatcher:
//!
//! ```text
//!   before:  A ──► D(switch) ──► case 0 / case 1 / default
//!   after:   A ──► D'(pop) ──► case 1            (other paths still reach D)
//! ```
//!
//! The rerouted path must not share blocks with paths that still need the dispatcher. The
//! blocks after the last conditional branch of the path that are also reached by other
//! paths are cloned first (block bifurcation), so the redirection only affects this path.
//! Sharing is only known when every path was enumerated; a dispatcher reached by more paths
//! than the configured bound is left unsolved.

use crate::{
    analysis::{
        cfg::{enumerate_paths, BlockId, MethodBody},
        symbolic::SymbolicValue,
    },
    assembly::{Instruction, Opcode},
    deobfuscation::{context::InterpretationContext, CancellationToken, SolveOutcome},
    Error, Result,
};

/// Attempts to resolve the `switch` ending `id`.
///
/// A selector that is constant within the block itself replaces the `switch` by a jump.
/// A symbolic selector triggers path resolution from `root`.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if the token is cancelled during path enumeration, and
/// propagates translation faults. Exceeding `max_paths` is not an error: the dispatch is
/// reported as unsolved.
pub(crate) fn solve_switch(
    body: &mut MethodBody,
    id: BlockId,
    root: BlockId,
    max_paths: usize,
    token: &CancellationToken,
) -> Result<SolveOutcome> {
    let block = body.block(id)?;
    if !block.ends_with_switch() {
        return Ok(SolveOutcome::Inapplicable);
    }
    let Some((switch, prefix)) = block.instructions().split_last() else {
        return Ok(SolveOutcome::Inapplicable);
    };

    let mut ctx = InterpretationContext::for_block(body, id, root);
    for instr in prefix {
        ctx.execute(instr)?;
    }
    let offset = switch.offset;
    let switch_index = prefix.len();

    match ctx.stack_mut().pop() {
        SymbolicValue::Bitvector(selector) => match selector.numeral() {
            Some(value) => {
                let target = case_target(body, id, value)?;
                log::debug!("{id}: constant selector {value} dispatches to {target}");
                body.insert_instruction(id, switch_index, Instruction::pop().at(offset))?;
                body.replace_terminator_with_jump(id, target)?;
                Ok(SolveOutcome::Solved)
            }
            None => resolve_paths(body, id, root, max_paths, token),
        },
        _ => Ok(SolveOutcome::Inapplicable),
    }
}

/// Successor chosen by a `switch` on `value`: the indexed target, or the fall-through when
/// the index is out of range.
fn case_target(body: &MethodBody, id: BlockId, value: i32) -> Result<BlockId> {
    let block = body.block(id)?;
    usize::try_from(value)
        .ok()
        .and_then(|index| block.targets().get(index).copied())
        .or(block.fallthrough())
        .ok_or_else(|| malformed_error!("{} has no successor for case {}", id, value))
}

/// Looks for a path from `root` whose interpretation yields a constant selector, and
/// reroutes the first one found past the dispatcher.
fn resolve_paths(
    body: &mut MethodBody,
    id: BlockId,
    root: BlockId,
    max_paths: usize,
    token: &CancellationToken,
) -> Result<SolveOutcome> {
    let paths = match enumerate_paths(body, root, id, max_paths, token) {
        Ok(paths) => paths,
        Err(Error::PathLimit(limit)) => {
            log::debug!("{id}: more than {limit} paths from {root}, dispatch left unsolved");
            return Ok(SolveOutcome::Unsolved(None));
        }
        Err(error) => return Err(error),
    };
    let zero_locals = body.entry() == Some(root);

    for (position, path) in paths.iter().enumerate() {
        if path.len() < 2 {
            continue;
        }
        let Some(value) = path_selector(body, path, zero_locals)? else {
            continue;
        };

        // a dispatch feeding the dispatcher is left to its own resolution
        if body.block(path[path.len() - 2])?.ends_with_switch() {
            continue;
        }
        let path = bifurcate(body, path, &paths, position)?;
        let before = path[path.len() - 2];

        let target = case_target(body, id, value)?;
        let dispatcher = body.block(id)?;
        let scope = dispatcher.scope();
        let offset = dispatcher.last_instruction().map_or(0, |instr| instr.offset);
        let mut instructions: Vec<Instruction> = dispatcher
            .instructions()
            .iter()
            .filter(|instr| instr.opcode != Opcode::Nop && instr.opcode != Opcode::Switch)
            .cloned()
            .collect();
        instructions.push(Instruction::pop().at(offset));

        let bypass = body.add_block_after(id, scope, instructions)?;
        body.set_fallthrough(bypass, Some(target))?;
        body.redirect(before, id, bypass)?;
        log::debug!("{id}: path through {before} dispatches to {target} via {bypass}");
        return Ok(SolveOutcome::Solved);
    }
    Ok(SolveOutcome::Unsolved(None))
}

/// Interprets `path` up to (excluding) the final `switch` and returns the selector if it
/// is a numeral.
fn path_selector(body: &MethodBody, path: &[BlockId], zero_locals: bool) -> Result<Option<i32>> {
    let mut ctx = InterpretationContext::new(body, zero_locals);
    let Some((&dispatcher, leading)) = path.split_last() else {
        return Ok(None);
    };
    for &id in leading {
        for instr in body.block(id)?.instructions() {
            ctx.execute(instr)?;
        }
    }
    let instructions = body.block(dispatcher)?.instructions();
    if let Some((_, prefix)) = instructions.split_last() {
        for instr in prefix {
            ctx.execute(instr)?;
        }
    }
    Ok(ctx.stack_mut().pop().numeral())
}

/// Clones the blocks of `path` after its last conditional branch that other paths share,
/// so that redirecting this path leaves the others intact.
///
/// Returns the path with shared blocks replaced by their clones.
fn bifurcate(
    body: &mut MethodBody,
    path: &[BlockId],
    paths: &[Vec<BlockId>],
    position: usize,
) -> Result<Vec<BlockId>> {
    let mut path = path.to_vec();
    let dispatcher_index = path.len() - 1;
    let Some(last_conditional) = (0..dispatcher_index)
        .rev()
        .find(|&i| body.get(path[i]).is_some_and(|b| b.ends_with_conditional()))
    else {
        return Ok(path);
    };

    for index in (last_conditional + 1)..dispatcher_index {
        let id = path[index];
        let shared = paths
            .iter()
            .enumerate()
            .any(|(other, p)| other != position && p.contains(&id));
        if !shared || body.block(id)?.sources().len() < 2 {
            continue;
        }
        let clone = body.clone_block(id)?;
        body.redirect(path[index - 1], id, clone)?;
        log::debug!("bifurcated {id} into {clone}");
        path[index] = clone;
    }
    Ok(path)
}
