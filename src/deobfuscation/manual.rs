//! Assisted resolution of branches the solver could not decide.
//!
//! A branch that depends on method arguments or on values from outside the interpreted
//! window stays unsolved. An analyst who knows the concrete values (from a debugger, or
//! from the call site) can assign them to the free symbols of the recorded formula and let
//! the deobfuscator finish the job:
//!
//! ```rust,ignore
//! let mut unsolved = deobfuscator.discover(&mut body)?;
//! let record = &mut unsolved[0];
//! for name in record.symbols() {
//!     record.assign(&name, "0x2a")?;
//! }
//! deobfuscator.solve_assisted(&mut body, record)?;
//! ```
//!
//! [`crate::deobfuscation::MethodDeobfuscator::run_assisted`] does the same for a list of
//! records and also removes the operands the decided branches leave on the stack.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    analysis::{
        cfg::{clean, repartition, BasicBlock, BlockId, MethodBody},
        symbolic::Formula,
    },
    assembly::Opcode,
    deobfuscation::{branch::apply_decision, engine::ControlFlowDeobfuscator},
    Error, Result,
};

/// A two-way branch left undecided, with the formula under which it is taken.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsolvedBlock {
    block: BlockId,
    terminator: Opcode,
    offset: Option<u32>,
    formula: Formula,
    assignments: BTreeMap<String, i32>,
}

impl UnsolvedBlock {
    /// Creates a record for the branch ending `block`.
    #[must_use]
    pub fn new(block: BlockId, terminator: Opcode, formula: Formula) -> Self {
        UnsolvedBlock {
            block,
            terminator,
            offset: None,
            formula,
            assignments: BTreeMap::new(),
        }
    }

    /// Records the offset of the branch instruction.
    ///
    /// With an offset the branch is found again after cleaning merged its block into a
    /// predecessor.
    #[must_use]
    pub fn at(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The block ending in the undecided branch.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// The branch opcode.
    #[must_use]
    pub fn terminator(&self) -> Opcode {
        self.terminator
    }

    /// Offset of the branch instruction, if recorded.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    /// The "branch is taken" formula, without assignments applied.
    #[must_use]
    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Free symbols of the formula (`arg0`, `loc1`, `unk3`, ...).
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<String> {
        self.formula.named_variables()
    }

    /// Symbols that have not been assigned yet.
    #[must_use]
    pub fn missing(&self) -> Vec<String> {
        self.symbols()
            .into_iter()
            .filter(|name| !self.assignments.contains_key(name))
            .collect()
    }

    /// Returns `true` once every symbol has a value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Assigns a value to a symbol.
    ///
    /// `text` is decimal (`42`), `0x`-prefixed hexadecimal (`0x2A`), or bare hexadecimal
    /// (`2A`), read as an unsigned 32-bit value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the symbol does not occur in the formula or the
    /// text is not a 32-bit value.
    pub fn assign(&mut self, name: &str, text: &str) -> Result<()> {
        if !self.formula.named_variables().contains(name) {
            return Err(Error::InvalidValue(format!(
                "{name} is not a symbol of the formula"
            )));
        }
        let value = parse_value(text)?;
        self.assignments.insert(name.to_string(), value);
        Ok(())
    }

    /// The formula with every assignment substituted.
    #[must_use]
    pub fn resolved_formula(&self) -> Formula {
        self.assignments
            .iter()
            .fold(self.formula.clone(), |formula, (name, &value)| {
                formula.substitute_named(name, value)
            })
            .simplify()
    }

    /// The live block currently ending in this record's branch.
    ///
    /// The recorded handle is used while it still ends in the branch. Otherwise the branch
    /// is searched by offset; it must end exactly one block.
    pub(crate) fn locate(&self, body: &MethodBody) -> Option<BlockId> {
        let ends_in_branch = |block: &BasicBlock| {
            block.ends_with_conditional()
                && block.last_instruction().is_some_and(|instr| {
                    instr.opcode == self.terminator
                        && self.offset.map_or(true, |offset| offset == instr.offset)
                })
        };
        if body.get(self.block).is_some_and(|block| ends_in_branch(block)) {
            return Some(self.block);
        }
        if self.offset.is_none() {
            return None;
        }
        let mut found = body
            .blocks()
            .filter(|block| ends_in_branch(block))
            .map(BasicBlock::id);
        let first = found.next()?;
        found.next().is_none().then_some(first)
    }
}

/// Parses a user-supplied 32-bit value.
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] for empty or out-of-range text.
#[allow(clippy::cast_possible_wrap)]
pub fn parse_value(text: &str) -> Result<i32> {
    let text = text.trim();
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text
            .parse::<u32>()
            .ok()
            .or_else(|| u32::from_str_radix(text, 16).ok()),
    };
    parsed
        .map(|value| value as i32)
        .ok_or_else(|| Error::InvalidValue(format!("'{text}' is not a 32-bit value")))
}

impl ControlFlowDeobfuscator {
    /// Decides an unsolved branch using the values assigned to its symbols.
    ///
    /// Cleans the graph, applies the decision, cleans again, then repartitions the layout
    /// when enabled. Dead code is left to the caller, see
    /// [`crate::deobfuscation::MethodDeobfuscator::run_assisted`].
    ///
    /// # Returns
    ///
    /// `true` if the branch was rewritten, `false` if the substituted formula is still
    /// undecided or the branch is no longer in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedSymbols`] if a symbol has no value and
    /// [`Error::Cancelled`] if the token is cancelled.
    pub fn solve_assisted(&self, body: &mut MethodBody, record: &UnsolvedBlock) -> Result<bool> {
        let missing = record.missing();
        if !missing.is_empty() {
            return Err(Error::UnresolvedSymbols(missing));
        }
        self.token().check()?;

        clean(body)?;
        let Some(block) = record.locate(body) else {
            log::debug!("{}: branch no longer in the graph, skipped", record.block());
            return Ok(false);
        };
        let Some(taken) = self.solver().decide(&record.resolved_formula()) else {
            return Ok(false);
        };
        apply_decision(body, block, taken)?;
        clean(body)?;
        if self.config().repartition {
            repartition(body);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{cfg::MethodBodyBuilder, symbolic::SymbolicExpr},
        deobfuscation::{CancellationToken, DeobfuscationConfig},
    };

    fn record() -> UnsolvedBlock {
        // arg0 == 0x10
        UnsolvedBlock::new(
            BlockId::new(0),
            Opcode::Beq,
            Formula::eq(SymbolicExpr::named("arg0"), SymbolicExpr::constant(0x10)),
        )
    }

    #[test]
    fn test_parse_value_forms() {
        assert_eq!(parse_value("42").unwrap(), 42);
        assert_eq!(parse_value("0x2A").unwrap(), 42);
        assert_eq!(parse_value("2a").unwrap(), 42);
        assert_eq!(parse_value("FFFFFFFF").unwrap(), -1);
        assert!(matches!(parse_value("xyz"), Err(Error::InvalidValue(_))));
        assert!(matches!(parse_value("0x1FFFFFFFF"), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn test_assignment_completes_record() {
        let mut record = record();
        assert_eq!(record.missing(), vec!["arg0".to_string()]);
        assert!(!record.is_complete());
        assert!(matches!(
            record.assign("loc0", "1"),
            Err(Error::InvalidValue(_))
        ));
        record.assign("arg0", "16").unwrap();
        assert!(record.is_complete());
        assert_eq!(record.resolved_formula(), Formula::Const(true));
    }

    #[test]
    fn test_merged_branch_is_found_by_offset() {
        // 0: brfalse arg0 -> 1 / 2
        // 1: brtrue arg1 -> 3 / 4
        let mut body = MethodBodyBuilder::new(2, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brfalse, 1, 2));
                m.block(1, |b| b.ldarg(1).branch(Opcode::Brtrue, 3, 4));
                m.block(2, |b| b.ret());
                m.block(3, |b| b.ret());
                m.block(4, |b| b.ret());
            })
            .unwrap();
        let ids = body.block_ids();
        let deobfuscator =
            ControlFlowDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new());
        let mut unsolved = deobfuscator.discover(&mut body).unwrap();
        assert_eq!(unsolved.len(), 2);
        assert_eq!(unsolved[1].block(), ids[1]);
        assert_eq!(unsolved[1].offset(), Some(3));
        unsolved[0].assign("arg0", "0").unwrap();
        unsolved[1].assign("arg1", "1").unwrap();

        // taking the first branch merges block 1 into block 0
        assert!(deobfuscator.solve_assisted(&mut body, &unsolved[0]).unwrap());
        assert!(!body.contains(ids[1]));
        assert_eq!(unsolved[1].locate(&body), Some(ids[0]));

        assert!(deobfuscator.solve_assisted(&mut body, &unsolved[1]).unwrap());
        body.verify().unwrap();
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_vanished_branch_is_skipped() {
        let mut body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ret());
            })
            .unwrap();
        let mut record = record().at(7);
        record.assign("arg0", "1").unwrap();
        let deobfuscator =
            ControlFlowDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new());
        assert!(!deobfuscator.solve_assisted(&mut body, &record).unwrap());
        assert_eq!(body.len(), 1);
    }
}
