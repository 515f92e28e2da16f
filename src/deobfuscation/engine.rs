//! Fixpoint driver for control flow deobfuscation.
//!
//! The [`ControlFlowDeobfuscator`] alternates between cleaning the graph and solving every
//! block against every candidate root until a round changes nothing:
//!
//! ```text
//! Idle ──► Cleaning ──► Solving ──┬─► Cleaning   (something was solved)
//!                                 └─► Done       (fixpoint)
//! ```
//!
//! Candidate roots are the method entry and every block without predecessors. A root
//! decides which path prefixes the switch resolver interprets and whether locals start
//! zeroed. A fault in one block (a translation error, an inconsistent edge) is logged and
//! the block is treated as unsolved; only cancellation aborts the whole method.

use crate::{
    analysis::{
        cfg::{clean, repartition, BlockId, CleanStats, MethodBody},
        symbolic::Z3Solver,
    },
    deobfuscation::{
        branch::solve_conditional, manual::UnsolvedBlock, switch::solve_switch,
        CancellationToken, DeobfuscationConfig, DeobfuscationStats, SolveOutcome,
    },
    Error, Result,
};

/// Control flow deobfuscator for a single method body.
///
/// # Example
///
/// ```rust,ignore
/// use dotflow::prelude::*;
///
/// let config = DeobfuscationConfig::default();
/// let token = CancellationToken::new();
/// let deobfuscator = ControlFlowDeobfuscator::new(&config, &token);
///
/// let stats = deobfuscator.deobfuscate(&mut body)?;
/// println!("{stats}");
/// ```
#[derive(Debug, Clone)]
pub struct ControlFlowDeobfuscator {
    config: DeobfuscationConfig,
    token: CancellationToken,
    solver: Z3Solver,
}

impl ControlFlowDeobfuscator {
    /// Creates a deobfuscator sharing the caller's cancellation token.
    #[must_use]
    pub fn new(config: &DeobfuscationConfig, token: &CancellationToken) -> Self {
        ControlFlowDeobfuscator {
            config: config.clone(),
            token: token.clone(),
            solver: Z3Solver::new(),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &DeobfuscationConfig {
        &self.config
    }

    /// The cancellation token polled by this deobfuscator.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn solver(&self) -> &Z3Solver {
        &self.solver
    }

    /// Runs the clean/solve loop to a fixpoint, then cleans and repartitions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token is cancelled; the edits made so far are
    /// kept. Cleaning faults are returned as-is.
    pub fn deobfuscate(&self, body: &mut MethodBody) -> Result<DeobfuscationStats> {
        let mut stats = DeobfuscationStats::default();

        for _ in 0..self.config.max_rounds {
            self.token.check()?;
            stats.rounds += 1;

            let cleaned = clean(body)?;
            absorb(&mut stats, cleaned);

            let solved = self.solve_round(body, &mut stats)?;
            if self.config.diagnostics {
                log::info!("round {}: {} solved, {} blocks", stats.rounds, solved, body.len());
            }
            if solved == 0 && !cleaned.changed() {
                break;
            }
        }

        absorb(&mut stats, clean(body)?);
        if self.config.repartition {
            repartition(body);
        }
        if self.config.diagnostics {
            log::info!("{stats}");
        }
        Ok(stats)
    }

    /// Solves every block against every candidate root once.
    fn solve_round(&self, body: &mut MethodBody, stats: &mut DeobfuscationStats) -> Result<usize> {
        let mut solved = 0;
        for root in candidate_roots(body) {
            for id in body.block_ids() {
                loop {
                    self.token.check()?;
                    if !body.contains(id) || !body.contains(root) {
                        break;
                    }
                    let is_switch = body.block(id)?.ends_with_switch();
                    match self.solve_block(body, id, root) {
                        Ok(SolveOutcome::Solved) => {
                            solved += 1;
                            if is_switch {
                                stats.switches_solved += 1;
                            } else {
                                stats.branches_solved += 1;
                            }
                        }
                        Ok(_) => break,
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(error) => {
                            log::warn!("skipping {id} (root {root}): {error}");
                            break;
                        }
                    }
                }
            }
        }
        Ok(solved)
    }

    /// Makes one solve attempt on the terminator of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled during path enumeration,
    /// [`Error::InvalidBlock`] for stale handles and [`Error::Malformed`] for translation
    /// faults.
    pub fn solve_block(
        &self,
        body: &mut MethodBody,
        id: BlockId,
        root: BlockId,
    ) -> Result<SolveOutcome> {
        let block = body.block(id)?;
        if block.ends_with_conditional() {
            solve_conditional(body, id, root, &self.solver)
        } else if block.ends_with_switch() {
            solve_switch(body, id, root, self.config.max_paths, &self.token)
        } else {
            Ok(SolveOutcome::Inapplicable)
        }
    }

    /// Cleans the graph and solves each two-way branch against the method entry, returning
    /// the branches that stay undecided.
    ///
    /// Decidable branches found on the way are rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token is cancelled.
    pub fn discover(&self, body: &mut MethodBody) -> Result<Vec<UnsolvedBlock>> {
        clean(body)?;
        let Some(entry) = body.entry() else {
            return Ok(Vec::new());
        };

        let mut unsolved = Vec::new();
        for id in body.block_ids() {
            self.token.check()?;
            let Some(block) = body.get(id) else {
                continue;
            };
            if !block.ends_with_conditional() {
                continue;
            }
            let Some((opcode, offset)) = block
                .last_instruction()
                .map(|instr| (instr.opcode, instr.offset))
            else {
                continue;
            };
            match solve_conditional(body, id, entry, &self.solver) {
                Ok(SolveOutcome::Unsolved(Some(formula))) => {
                    unsolved.push(UnsolvedBlock::new(id, opcode, formula).at(offset));
                }
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => log::warn!("skipping {id}: {error}"),
            }
        }
        Ok(unsolved)
    }
}

/// The method entry followed by every other block without predecessors.
fn candidate_roots(body: &MethodBody) -> Vec<BlockId> {
    let mut roots: Vec<BlockId> = body.entry().into_iter().collect();
    for block in body.blocks() {
        if block.sources().is_empty() && !roots.contains(&block.id()) {
            roots.push(block.id());
        }
    }
    roots
}

fn absorb(stats: &mut DeobfuscationStats, cleaned: CleanStats) {
    stats.blocks_removed += cleaned.blocks_removed;
    stats.blocks_merged += cleaned.blocks_merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::cfg::MethodBodyBuilder, assembly::Opcode};

    #[test]
    fn test_opaque_predicate_chain_collapses() {
        // if (arg0 == arg0) goto A else goto B; A: if (arg0 != arg0) C else D
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).ldarg(0).branch(Opcode::Beq, 1, 2));
                m.block(1, |b| b.ldarg(0).ldarg(0).branch(Opcode::BneUn, 3, 4));
                m.block(2, |b| b.ret());
                m.block(3, |b| b.ret());
                m.block(4, |b| b.ldc_i4(7).pop().ret());
            })
            .unwrap();
        let config = DeobfuscationConfig::default();
        let token = CancellationToken::new();
        let stats = ControlFlowDeobfuscator::new(&config, &token)
            .deobfuscate(&mut body)
            .unwrap();
        assert_eq!(stats.branches_solved, 2);
        assert_eq!(body.len(), 1);
        body.verify().unwrap();
        let entry = body.block(body.entry().unwrap()).unwrap();
        assert_eq!(entry.last_instruction().map(|i| i.opcode), Some(Opcode::Ret));
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).ldarg(0).branch(Opcode::Beq, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result =
            ControlFlowDeobfuscator::new(&DeobfuscationConfig::default(), &token).deobfuscate(&mut body);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn test_discover_reports_free_branches() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brfalse, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let deobfuscator =
            ControlFlowDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new());
        let mut unsolved = deobfuscator.discover(&mut body).unwrap();
        assert_eq!(unsolved.len(), 1);
        let record = &mut unsolved[0];
        assert_eq!(record.terminator(), Opcode::Brfalse);
        assert!(matches!(
            deobfuscator.solve_assisted(&mut body, record),
            Err(Error::UnresolvedSymbols(_))
        ));

        record.assign("arg0", "0").unwrap();
        assert!(deobfuscator.solve_assisted(&mut body, record).unwrap());
        body.verify().unwrap();
        // brfalse on zero is taken: only the target survives
        assert_eq!(body.len(), 1);
    }
}
