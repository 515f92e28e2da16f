//! Z3 SMT solver integration for deciding branch formulas.
//!
//! The solver answers one question for the deobfuscator: given the condition under which a
//! branch is taken, is the branch *always* taken, *never* taken, or genuinely input
//! dependent? This is done by two satisfiability checks, one on the formula and one on its
//! negation.
//!
//! Formulas are first simplified locally; anything that folds to a constant never reaches Z3.
//!
//! # Example
//!
//! ```rust,ignore
//! use dotflow::analysis::symbolic::{Formula, SymbolicExpr, SymbolicOp, Z3Solver};
//!
//! // (x ^ x) == 0 always holds
//! let x = SymbolicExpr::named("arg0");
//! let formula = Formula::eq(
//!     SymbolicExpr::binary(SymbolicOp::Xor, x.clone(), x),
//!     SymbolicExpr::constant(0),
//! );
//! assert_eq!(Z3Solver::new().decide(&formula), Some(true));
//! ```

use z3::ast::{Bool, BV};

use crate::analysis::symbolic::{
    expr::SymbolicExpr,
    formula::Formula,
    ops::{CompareOp, OverflowOp, SymbolicOp},
};

/// Width of every bitvector handed to Z3.
const WIDTH: u32 = 32;

/// Z3-based satisfiability checker for [`Formula`] values.
///
/// The solver is stateless: every query builds a fresh `z3::Solver` on the thread-local
/// context, so a `Z3Solver` can be shared freely within a thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Z3Solver;

impl Z3Solver {
    /// Creates a new solver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Checks whether some assignment of the free symbols satisfies the formula.
    ///
    /// A Z3 `unknown` verdict counts as satisfiable: only a proof of unsatisfiability may
    /// lead to a rewrite.
    #[must_use]
    pub fn is_satisfiable(&self, formula: &Formula) -> bool {
        let formula = formula.simplify();
        if let Some(value) = formula.as_bool() {
            return value;
        }

        let solver = z3::Solver::new();
        solver.assert(self.translate_bool(&formula));
        match solver.check() {
            z3::SatResult::Unsat => false,
            z3::SatResult::Sat | z3::SatResult::Unknown => true,
        }
    }

    /// Decides a formula.
    ///
    /// # Returns
    ///
    /// * `Some(true)` - The formula holds for every assignment (its negation is unsatisfiable)
    /// * `Some(false)` - The formula holds for no assignment
    /// * `None` - Both outcomes are possible
    #[must_use]
    pub fn decide(&self, formula: &Formula) -> Option<bool> {
        let satisfiable = self.is_satisfiable(formula);
        let refutable = self.is_satisfiable(&formula.negate());
        match (satisfiable, refutable) {
            (true, false) => Some(true),
            (false, true) => Some(false),
            // Both unsatisfiable cannot happen for a consistent encoding; treat as undecided.
            _ => None,
        }
    }

    #[allow(clippy::self_only_used_in_recursion)]
    fn translate_bool(&self, formula: &Formula) -> Bool {
        match formula {
            Formula::Const(value) => Bool::from_bool(*value),
            Formula::Compare { op, left, right } => {
                let l = self.translate_bv(left);
                let r = self.translate_bv(right);
                match op {
                    CompareOp::Eq => l.eq(&r),
                    CompareOp::LtS => l.bvslt(&r),
                    CompareOp::LtU => l.bvult(&r),
                    CompareOp::GtS => l.bvsgt(&r),
                    CompareOp::GtU => l.bvugt(&r),
                    CompareOp::LeS => l.bvsle(&r),
                    CompareOp::LeU => l.bvule(&r),
                    CompareOp::GeS => l.bvsge(&r),
                    CompareOp::GeU => l.bvuge(&r),
                }
            }
            Formula::NoOverflow {
                op,
                signed,
                left,
                right,
            } => {
                let l = self.translate_bv(left);
                let r = self.translate_bv(right);
                Self::no_overflow(*op, *signed, &l, &r)
            }
            Formula::Not(inner) => self.translate_bool(inner).not(),
        }
    }

    /// Encodes "the operation does not overflow" by computing it in a wider bitvector and
    /// comparing against the extended 32-bit result.
    fn no_overflow(op: OverflowOp, signed: bool, l: &BV, r: &BV) -> Bool {
        match (op, signed) {
            (OverflowOp::Add, true) => {
                let wide = l.sign_ext(1).bvadd(&r.sign_ext(1));
                wide.eq(&l.bvadd(r).sign_ext(1))
            }
            (OverflowOp::Add, false) => {
                let wide = l.zero_ext(1).bvadd(&r.zero_ext(1));
                wide.extract(WIDTH, WIDTH).eq(&BV::from_i64(0, 1))
            }
            (OverflowOp::Sub, true) => {
                let wide = l.sign_ext(1).bvsub(&r.sign_ext(1));
                wide.eq(&l.bvsub(r).sign_ext(1))
            }
            (OverflowOp::Sub, false) => l.bvuge(r),
            (OverflowOp::Mul, true) => {
                let wide = l.sign_ext(WIDTH).bvmul(&r.sign_ext(WIDTH));
                wide.eq(&l.bvmul(r).sign_ext(WIDTH))
            }
            (OverflowOp::Mul, false) => {
                let wide = l.zero_ext(WIDTH).bvmul(&r.zero_ext(WIDTH));
                wide.extract(2 * WIDTH - 1, WIDTH)
                    .eq(&BV::from_i64(0, WIDTH))
            }
        }
    }

    fn translate_bv(&self, expr: &SymbolicExpr) -> BV {
        match expr {
            SymbolicExpr::Constant(v) => BV::from_i64(i64::from(*v), WIDTH),
            SymbolicExpr::NamedVar(name) => BV::new_const(name.as_str(), WIDTH),
            SymbolicExpr::Unary { op, operand } => {
                let operand_z3 = self.translate_bv(operand);
                match op {
                    SymbolicOp::Neg => operand_z3.bvneg(),
                    SymbolicOp::Not => operand_z3.bvnot(),
                    // Binary operators are never built as unary nodes
                    _ => operand_z3,
                }
            }
            SymbolicExpr::Binary { op, left, right } => {
                let l = self.translate_bv(left);
                let r = self.translate_bv(right);
                match op {
                    SymbolicOp::Add => l.bvadd(&r),
                    SymbolicOp::Sub => l.bvsub(&r),
                    SymbolicOp::Mul => l.bvmul(&r),
                    SymbolicOp::DivS => l.bvsdiv(&r),
                    SymbolicOp::DivU => l.bvudiv(&r),
                    SymbolicOp::RemS => l.bvsrem(&r),
                    SymbolicOp::RemU => l.bvurem(&r),
                    SymbolicOp::And => l.bvand(&r),
                    SymbolicOp::Or => l.bvor(&r),
                    SymbolicOp::Xor => l.bvxor(&r),
                    SymbolicOp::Shl => l.bvshl(&r),
                    SymbolicOp::ShrS => l.bvashr(&r),
                    SymbolicOp::ShrU => l.bvlshr(&r),
                    // Unary operators are never built as binary nodes
                    SymbolicOp::Neg | SymbolicOp::Not => l,
                }
            }
            SymbolicExpr::Ite {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.translate_bool(cond);
                cond.ite(&self.translate_bv(then), &self.translate_bv(otherwise))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::symbolic::{
        CompareOp, Formula, OverflowOp, SymbolicExpr, SymbolicOp, Z3Solver,
    };

    #[test]
    fn test_tautology_and_contradiction() {
        let solver = Z3Solver::new();
        // (x * 2) & 1 == 0 for every x
        let x = SymbolicExpr::named("arg0");
        let even = SymbolicExpr::binary(
            SymbolicOp::And,
            SymbolicExpr::binary(SymbolicOp::Mul, x, SymbolicExpr::constant(2)),
            SymbolicExpr::constant(1),
        );
        let formula = Formula::eq(even, SymbolicExpr::constant(0));
        assert_eq!(solver.decide(&formula), Some(true));
        assert_eq!(solver.decide(&formula.negate()), Some(false));
    }

    #[test]
    fn test_free_input_is_undecided() {
        let solver = Z3Solver::new();
        let formula = Formula::eq(SymbolicExpr::named("arg0"), SymbolicExpr::constant(0));
        assert_eq!(solver.decide(&formula), None);
    }

    #[test]
    fn test_signed_and_unsigned_orderings_disagree() {
        let solver = Z3Solver::new();
        // x | 0x80000000 is negative as signed and huge as unsigned
        let x = SymbolicExpr::binary(
            SymbolicOp::Or,
            SymbolicExpr::named("arg0"),
            SymbolicExpr::constant(i32::MIN),
        );
        let signed = Formula::compare(CompareOp::LtS, x.clone(), SymbolicExpr::constant(0));
        let unsigned = Formula::compare(CompareOp::LtU, x, SymbolicExpr::constant(0));
        assert_eq!(solver.decide(&signed), Some(true));
        assert_eq!(solver.decide(&unsigned), Some(false));
    }

    #[test]
    fn test_overflow_guard() {
        let solver = Z3Solver::new();
        // x & 0xFF plus 1 never overflows, signed or unsigned
        let small = SymbolicExpr::binary(
            SymbolicOp::And,
            SymbolicExpr::named("arg0"),
            SymbolicExpr::constant(0xFF),
        );
        for signed in [true, false] {
            let guard = Formula::no_overflow(
                OverflowOp::Add,
                signed,
                small.clone(),
                SymbolicExpr::constant(1),
            );
            assert_eq!(solver.decide(&guard), Some(true));
        }

        let guard = Formula::no_overflow(
            OverflowOp::Mul,
            false,
            SymbolicExpr::named("arg0"),
            SymbolicExpr::constant(2),
        );
        assert_eq!(solver.decide(&guard), None);
    }

    #[test]
    fn test_ite_translation() {
        let solver = Z3Solver::new();
        let cond = Formula::compare(CompareOp::GtU, SymbolicExpr::named("arg0"), SymbolicExpr::constant(5));
        let ite = SymbolicExpr::ite(cond, SymbolicExpr::constant(1), SymbolicExpr::constant(1));
        // Both arms agree, so the term is always 1
        let formula = Formula::eq(ite, SymbolicExpr::constant(1));
        assert_eq!(solver.decide(&formula), Some(true));
    }
}
