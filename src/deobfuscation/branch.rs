//! Two-way conditional branch solving.
//!
//! A block ending in a conditional branch is interpreted on its own: every instruction
//! before the terminator runs in a fresh [`InterpretationContext`], then the operands the
//! branch consumes are turned into the formula under which the branch is taken. The solver
//! proves the formula valid (always taken), unsatisfiable (never taken), or neither.
//!
//! When the outcome is decided the terminator is replaced by a jump to the surviving
//! successor. The operands the terminator used to consume are still pushed by the block,
//! so one `pop` per operand is inserted in its place; the dead code pass later removes the
//! computation together with its `pop`s.

use crate::{
    analysis::{
        cfg::{BlockId, MethodBody},
        symbolic::{Formula, SymbolicValue, Z3Solver},
    },
    assembly::Instruction,
    deobfuscation::{context::InterpretationContext, translator::branch_formula, SolveOutcome},
    Result,
};

/// Attempts to decide the conditional branch ending `id`.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidBlock`] for a stale handle and
/// [`crate::Error::Malformed`] if an instruction cannot be translated.
pub(crate) fn solve_conditional(
    body: &mut MethodBody,
    id: BlockId,
    root: BlockId,
    solver: &Z3Solver,
) -> Result<SolveOutcome> {
    let Some(formula) = taken_formula(body, id, root)? else {
        return Ok(SolveOutcome::Inapplicable);
    };

    match solver.decide(&formula) {
        Some(taken) => {
            log::debug!(
                "{id}: branch is {} taken",
                if taken { "always" } else { "never" }
            );
            apply_decision(body, id, taken)?;
            Ok(SolveOutcome::Solved)
        }
        None => Ok(SolveOutcome::Unsolved(Some(formula))),
    }
}

/// Interprets `id` and returns the formula under which its conditional branch is taken.
///
/// Returns `None` if the block does not end in a conditional branch or an operand is not a
/// bitvector.
pub(crate) fn taken_formula(
    body: &MethodBody,
    id: BlockId,
    root: BlockId,
) -> Result<Option<Formula>> {
    let block = body.block(id)?;
    if !block.ends_with_conditional() {
        return Ok(None);
    }
    let Some((terminator, prefix)) = block.instructions().split_last() else {
        return Ok(None);
    };

    let mut ctx = InterpretationContext::for_block(body, id, root);
    for instr in prefix {
        ctx.execute(instr)?;
    }

    let pops = terminator.stack_behavior(ctx.method_returns()).pops;
    let mut operands: Vec<SymbolicValue> = (0..pops).map(|_| ctx.stack_mut().pop()).collect();
    operands.reverse();
    Ok(branch_formula(terminator.opcode, &operands))
}

/// Replaces the conditional branch ending `id` by a jump to the branch target (`taken`)
/// or to the fall-through.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the block does not end in a well-formed
/// conditional branch.
pub(crate) fn apply_decision(body: &mut MethodBody, id: BlockId, taken: bool) -> Result<()> {
    let block = body.block(id)?;
    if !block.ends_with_conditional() {
        return Err(malformed_error!("{} does not end in a conditional branch", id));
    }
    let successor = if taken {
        block.targets().first().copied()
    } else {
        block.fallthrough()
    };
    let successor = successor.ok_or_else(|| malformed_error!("{} is missing a successor", id))?;

    let Some(terminator) = block.last_instruction() else {
        return Err(malformed_error!("{} is empty", id));
    };
    let offset = terminator.offset;
    let pops = terminator.stack_behavior(body.returns_value()).pops;
    let index = block.instructions().len() - 1;

    for _ in 0..pops {
        body.insert_instruction(id, index, Instruction::pop().at(offset))?;
    }
    body.replace_terminator_with_jump(id, successor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::cfg::{BlockBuilder, MethodBodyBuilder},
        assembly::Opcode,
    };

    fn two_way(prefix: impl Fn(&mut BlockBuilder), opcode: Opcode) -> MethodBody {
        MethodBodyBuilder::new(2, 1, false)
            .build_with(|m| {
                m.block(0, |b| {
                    prefix(b);
                    b.branch(opcode, 1, 2)
                });
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap()
    }

    #[test]
    fn test_self_equality_is_taken() {
        let mut body = two_way(
            |b| {
                b.ldarg(0).ldarg(0);
            },
            Opcode::Beq,
        );
        let ids = body.block_ids();
        let outcome = solve_conditional(&mut body, ids[0], ids[0], &Z3Solver::new()).unwrap();
        assert_eq!(outcome, SolveOutcome::Solved);
        body.verify().unwrap();

        let entry = body.block(ids[0]).unwrap();
        assert_eq!(entry.fallthrough(), Some(ids[1]));
        assert!(entry.targets().is_empty());
        let opcodes: Vec<Opcode> = entry.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::Ldarg, Opcode::Ldarg, Opcode::Pop, Opcode::Pop]
        );
    }

    #[test]
    fn test_negated_self_equality_is_not_taken() {
        let mut body = two_way(
            |b| {
                b.ldarg(0).ldarg(0);
            },
            Opcode::BneUn,
        );
        let ids = body.block_ids();
        let outcome = solve_conditional(&mut body, ids[0], ids[0], &Z3Solver::new()).unwrap();
        assert_eq!(outcome, SolveOutcome::Solved);
        assert_eq!(body.block(ids[0]).unwrap().fallthrough(), Some(ids[2]));
        assert!(body.block(ids[1]).unwrap().sources().is_empty());
    }

    #[test]
    fn test_free_argument_is_unsolved() {
        let mut body = two_way(
            |b| {
                b.ldarg(0);
            },
            Opcode::Brtrue,
        );
        let ids = body.block_ids();
        let outcome = solve_conditional(&mut body, ids[0], ids[0], &Z3Solver::new()).unwrap();
        let SolveOutcome::Unsolved(Some(formula)) = outcome else {
            panic!("expected an unsolved branch, got {outcome:?}");
        };
        assert!(formula.named_variables().contains("arg0"));
        assert_eq!(body.block(ids[0]).unwrap().targets(), &[ids[1]]);
    }

    #[test]
    fn test_zero_initialized_local_at_entry() {
        let mut body = two_way(
            |b| {
                b.ldloc(0);
            },
            Opcode::Brfalse,
        );
        let ids = body.block_ids();
        let outcome = solve_conditional(&mut body, ids[0], ids[0], &Z3Solver::new()).unwrap();
        assert_eq!(outcome, SolveOutcome::Solved);
        assert_eq!(body.block(ids[0]).unwrap().fallthrough(), Some(ids[1]));
    }

    #[test]
    fn test_opaque_xor_predicate() {
        // ((arg1 * arg1) ^ 0x5a5a) ^ 0x5a5a == arg1 * arg1
        let mut body = two_way(
            |b| {
                b.ldarg(1)
                    .ldarg(1)
                    .op(Opcode::Mul)
                    .ldc_i4(0x5a5a)
                    .op(Opcode::Xor)
                    .ldc_i4(0x5a5a)
                    .op(Opcode::Xor)
                    .ldarg(1)
                    .ldarg(1)
                    .op(Opcode::Mul);
            },
            Opcode::Beq,
        );
        let ids = body.block_ids();
        let outcome = solve_conditional(&mut body, ids[0], ids[0], &Z3Solver::new()).unwrap();
        assert_eq!(outcome, SolveOutcome::Solved);
        assert_eq!(body.block(ids[0]).unwrap().fallthrough(), Some(ids[1]));
    }

    #[test]
    fn test_non_bitvector_operand_is_inapplicable() {
        let mut body = two_way(
            |b| {
                b.op(Opcode::Ldnull);
            },
            Opcode::Brtrue,
        );
        let ids = body.block_ids();
        let outcome = solve_conditional(&mut body, ids[0], ids[0], &Z3Solver::new()).unwrap();
        assert_eq!(outcome, SolveOutcome::Inapplicable);
    }
}
