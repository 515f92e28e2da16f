//! Dead code elimination over reconstructed stack variables.
//!
//! Solving a branch leaves its operands behind: the terminator is replaced by a jump and
//! one `pop` per operand, so the comparison that fed it now computes a value nobody uses.
//! This pass finds such expressions on the rewritten graph and either blanks them out or
//! reports them.
//!
//! # Architecture
//!
//! - `defuse` simulates the evaluation stack and unifies stack variables at joins
//! - [`DeadCodeEliminator`] removes discarded expressions to a fixpoint
//! - [`eliminate_dead_code`] applies the result according to [`DeadCodeMode`]
//!
//! # Example
//!
//! ```rust,ignore
//! use dotflow::deobfuscation::{eliminate_dead_code, DeobfuscationConfig};
//!
//! let dead = eliminate_dead_code(&mut body, &DeobfuscationConfig::default())?;
//! for instr in &dead {
//!     println!("dead: {instr}");
//! }
//! ```

mod defuse;
mod eliminator;

pub use eliminator::DeadCodeEliminator;

use crate::{
    analysis::cfg::MethodBody,
    assembly::{Instruction, Opcode},
    deobfuscation::{DeadCodeMode, DeadInstruction, DeobfuscationConfig},
    Result,
};

/// Finds the dead instructions of `body` and, in [`DeadCodeMode::Remove`], replaces them by
/// `nop`.
///
/// The returned locations refer to the graph before nop stripping.
///
/// # Errors
///
/// Returns [`crate::Error::StackMismatch`] if the stack cannot be reconstructed; the body is
/// left untouched in that case.
pub fn eliminate_dead_code(
    body: &mut MethodBody,
    config: &DeobfuscationConfig,
) -> Result<Vec<DeadInstruction>> {
    let dead = DeadCodeEliminator::new(body, config.dup_walk_depth)?.run(body);
    if config.dead_code == DeadCodeMode::Remove {
        apply(body, &dead, config.strip_nops)?;
    }
    Ok(dead)
}

fn apply(body: &mut MethodBody, dead: &[DeadInstruction], strip_nops: bool) -> Result<()> {
    for instr in dead {
        if let Some(slot) = body.instructions_mut(instr.block)?.get_mut(instr.index) {
            *slot = Instruction::nop().at(instr.offset);
        }
    }
    if strip_nops {
        for id in body.block_ids() {
            let instructions = body.instructions_mut(id)?;
            if instructions.len() > 1 {
                instructions.retain(|instr| instr.opcode != Opcode::Nop);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::MethodBodyBuilder;

    fn body() -> MethodBody {
        MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldc_i4(1).ldc_i4(2).op(Opcode::Add).pop().ret());
            })
            .unwrap()
    }

    #[test]
    fn test_remove_strips_nops() {
        let mut body = body();
        let dead = eliminate_dead_code(&mut body, &DeobfuscationConfig::default()).unwrap();
        assert_eq!(dead.len(), 4);
        let entry = body.block(body.entry().unwrap()).unwrap();
        let opcodes: Vec<Opcode> = entry.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Ret]);
    }

    #[test]
    fn test_remove_without_stripping_keeps_nops() {
        let mut body = body();
        let config = DeobfuscationConfig::default().with_strip_nops(false);
        eliminate_dead_code(&mut body, &config).unwrap();
        let entry = body.block(body.entry().unwrap()).unwrap();
        assert_eq!(entry.instructions().len(), 5);
        assert_eq!(
            entry
                .instructions()
                .iter()
                .filter(|i| i.opcode == Opcode::Nop)
                .count(),
            4
        );
    }

    #[test]
    fn test_annotate_leaves_body_untouched() {
        let mut body = body();
        let before = body.instruction_count();
        let dead = eliminate_dead_code(&mut body, &DeobfuscationConfig::annotate_only()).unwrap();
        assert_eq!(dead.len(), 4);
        assert_eq!(body.instruction_count(), before);
        assert_eq!(dead[0].to_string(), "IL_0000: ldc.i4 (B0[0])");
    }
}
