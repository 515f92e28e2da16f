//! One-call deobfuscation of a method body.

use crate::{
    analysis::cfg::MethodBody,
    deobfuscation::{
        deadcode::eliminate_dead_code, CancellationToken, ControlFlowDeobfuscator,
        DeobfuscationConfig, DeobfuscationResult, UnsolvedBlock,
    },
    Error,
};

/// Runs the whole pipeline on a method body: solving to a fixpoint, discovery of the
/// branches left undecided, and dead code elimination.
///
/// Failures do not propagate. A cancelled or failed run reports `success == false` and
/// leaves the body as far as it got.
#[derive(Debug, Clone)]
pub struct MethodDeobfuscator {
    deobfuscator: ControlFlowDeobfuscator,
}

impl MethodDeobfuscator {
    /// Creates a facade sharing the caller's cancellation token.
    #[must_use]
    pub fn new(config: &DeobfuscationConfig, token: &CancellationToken) -> Self {
        MethodDeobfuscator {
            deobfuscator: ControlFlowDeobfuscator::new(config, token),
        }
    }

    /// The underlying driver, for manual resolution of the reported branches.
    #[must_use]
    pub fn deobfuscator(&self) -> &ControlFlowDeobfuscator {
        &self.deobfuscator
    }

    /// Deobfuscates `body` in place.
    ///
    /// Dead code elimination runs after every run that was not cancelled, whether or not a
    /// branch was solved; a stack that cannot be reconstructed is logged and reported as no
    /// dead code.
    pub fn run(&self, body: &mut MethodBody) -> DeobfuscationResult {
        let mut result = DeobfuscationResult::default();

        match self.deobfuscator.deobfuscate(body) {
            Ok(stats) => result.stats = stats,
            Err(Error::Cancelled) => {
                log::debug!("deobfuscation cancelled");
                return result;
            }
            Err(error) => {
                log::warn!("deobfuscation failed: {error}");
                return result;
            }
        }

        match self.deobfuscator.discover(body) {
            Ok(unsolved) => result.unsolved = unsolved,
            Err(Error::Cancelled) => return result,
            Err(error) => log::warn!("discovery failed: {error}"),
        }

        self.remove_dead_code(body, &mut result);
        result.success = true;
        result
    }

    /// Decides the given branches with the values assigned to their symbols, then reports
    /// the branches still undecided and removes the dead code the decisions left behind.
    ///
    /// Records with unassigned symbols are logged and skipped, as are records whose branch
    /// is no longer in the graph. Decided branches are counted in
    /// [`crate::deobfuscation::DeobfuscationStats::branches_solved`].
    pub fn run_assisted(
        &self,
        body: &mut MethodBody,
        records: &[UnsolvedBlock],
    ) -> DeobfuscationResult {
        let mut result = DeobfuscationResult::default();

        for record in records {
            match self.deobfuscator.solve_assisted(body, record) {
                Ok(true) => result.stats.branches_solved += 1,
                Ok(false) => log::debug!("{}: branch left undecided", record.block()),
                Err(Error::Cancelled) => {
                    log::debug!("assisted deobfuscation cancelled");
                    return result;
                }
                Err(error) => log::warn!("skipping {}: {error}", record.block()),
            }
        }

        match self.deobfuscator.discover(body) {
            Ok(unsolved) => result.unsolved = unsolved,
            Err(Error::Cancelled) => return result,
            Err(error) => log::warn!("discovery failed: {error}"),
        }

        self.remove_dead_code(body, &mut result);
        result.success = true;
        result
    }

    fn remove_dead_code(&self, body: &mut MethodBody, result: &mut DeobfuscationResult) {
        match eliminate_dead_code(body, self.deobfuscator.config()) {
            Ok(dead) => result.dead_instructions = dead,
            Err(error) => log::warn!("dead code elimination skipped: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::cfg::MethodBodyBuilder, assembly::Opcode};

    #[test]
    fn test_solved_branch_leaves_no_residue() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).ldarg(0).branch(Opcode::Beq, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ldc_i4(0).pop().ret());
            })
            .unwrap();
        let result = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new())
            .run(&mut body);

        assert!(result.success);
        assert_eq!(result.stats.branches_solved, 1);
        assert!(result.unsolved.is_empty());
        assert_eq!(result.dead_instructions.len(), 4);
        assert_eq!(body.len(), 1);
        let entry = body.block(body.entry().unwrap()).unwrap();
        let opcodes: Vec<Opcode> = entry.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Ret]);
    }

    #[test]
    fn test_cancelled_run_fails() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).ldarg(0).branch(Opcode::Beq, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &token).run(&mut body);
        assert!(!result.success);
        assert!(result.dead_instructions.is_empty());
    }

    #[test]
    fn test_dead_code_removed_without_solves() {
        let mut body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldc_i4(1).pop().ret());
            })
            .unwrap();
        let result = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new())
            .run(&mut body);

        assert!(result.success);
        assert!(!result.stats.solved_any());
        let dead: Vec<Opcode> = result.dead_instructions.iter().map(|d| d.opcode).collect();
        assert_eq!(dead, vec![Opcode::LdcI4, Opcode::Pop]);
        let entry = body.block(body.entry().unwrap()).unwrap();
        let opcodes: Vec<Opcode> = entry.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Ret]);
    }

    #[test]
    fn test_assisted_run_removes_branch_operands() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brfalse, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let facade = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new());
        let first = facade.run(&mut body);
        assert!(first.success);
        assert_eq!(first.unsolved.len(), 1);

        let mut record = first.unsolved[0].clone();
        record.assign("arg0", "0").unwrap();
        let result = facade.run_assisted(&mut body, &[record]);

        assert!(result.success);
        assert_eq!(result.stats.branches_solved, 1);
        assert!(result.unsolved.is_empty());
        // the argument and the pop standing in for the branch
        let dead: Vec<Opcode> = result.dead_instructions.iter().map(|d| d.opcode).collect();
        assert_eq!(dead, vec![Opcode::Ldarg, Opcode::Pop]);
        body.verify().unwrap();
        assert_eq!(body.len(), 1);
        let entry = body.block(body.entry().unwrap()).unwrap();
        let opcodes: Vec<Opcode> = entry.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Ret]);
    }

    #[test]
    fn test_assisted_run_skips_incomplete_records() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brfalse, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let facade = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new());
        let unsolved = facade.run(&mut body).unsolved;

        let result = facade.run_assisted(&mut body, &unsolved);
        assert!(result.success);
        assert_eq!(result.stats.branches_solved, 0);
        assert_eq!(result.unsolved.len(), 1);
        assert_eq!(body.len(), 3);
    }
}
