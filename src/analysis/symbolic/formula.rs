//! Boolean formulas over symbolic bitvectors.
//!
//! A [`Formula`] is what the branch solver hands to Z3: the condition under which a
//! conditional branch is taken, or the guard of an overflow-checked operation.

use std::{collections::BTreeSet, fmt};

use crate::analysis::symbolic::{
    expr::SymbolicExpr,
    ops::{CompareOp, OverflowOp},
};

/// A boolean formula over 32-bit bitvector terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Formula {
    /// A decided truth value.
    Const(bool),

    /// A comparison between two bitvector terms.
    Compare {
        /// The predicate.
        op: CompareOp,
        /// The left operand.
        left: SymbolicExpr,
        /// The right operand.
        right: SymbolicExpr,
    },

    /// Holds when the guarded operation does not overflow.
    NoOverflow {
        /// The guarded operation.
        op: OverflowOp,
        /// Signed (`*.ovf`) or unsigned (`*.ovf.un`) overflow.
        signed: bool,
        /// The left operand.
        left: SymbolicExpr,
        /// The right operand.
        right: SymbolicExpr,
    },

    /// Logical negation.
    Not(Box<Formula>),
}

impl Formula {
    /// Creates a comparison formula.
    #[must_use]
    pub fn compare(op: CompareOp, left: SymbolicExpr, right: SymbolicExpr) -> Self {
        Self::Compare { op, left, right }
    }

    /// Creates an equality formula.
    #[must_use]
    pub fn eq(left: SymbolicExpr, right: SymbolicExpr) -> Self {
        Self::compare(CompareOp::Eq, left, right)
    }

    /// Creates an overflow guard.
    #[must_use]
    pub fn no_overflow(op: OverflowOp, signed: bool, left: SymbolicExpr, right: SymbolicExpr) -> Self {
        Self::NoOverflow {
            op,
            signed,
            left,
            right,
        }
    }

    /// Returns the negation of this formula.
    #[must_use]
    pub fn negate(&self) -> Self {
        Self::Not(Box::new(self.clone()))
    }

    /// Returns the truth value if this formula is a decided constant.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Const(b) => Some(*b),
            _ => None,
        }
    }

    /// Collects the names of all free symbols.
    #[must_use]
    pub fn named_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_named(&mut names);
        names
    }

    pub(crate) fn collect_named(&self, names: &mut BTreeSet<String>) {
        match self {
            Self::Const(_) => {}
            Self::Compare { left, right, .. } | Self::NoOverflow { left, right, .. } => {
                left.collect_named(names);
                right.collect_named(names);
            }
            Self::Not(inner) => inner.collect_named(names),
        }
    }

    /// Replaces every occurrence of the named symbol by a constant.
    #[must_use]
    pub fn substitute_named(&self, name: &str, value: i32) -> Self {
        match self {
            Self::Const(_) => self.clone(),
            Self::Compare { op, left, right } => Self::compare(
                *op,
                left.substitute_named(name, value),
                right.substitute_named(name, value),
            ),
            Self::NoOverflow {
                op,
                signed,
                left,
                right,
            } => Self::no_overflow(
                *op,
                *signed,
                left.substitute_named(name, value),
                right.substitute_named(name, value),
            ),
            Self::Not(inner) => Self::Not(Box::new(inner.substitute_named(name, value))),
        }
    }

    /// Simplifies the formula, deciding it outright when both sides fold to numerals.
    #[must_use]
    pub fn simplify(&self) -> Self {
        match self {
            Self::Const(_) => self.clone(),
            Self::Compare { op, left, right } => {
                let left = left.simplify();
                let right = right.simplify();
                if let (Some(l), Some(r)) = (left.as_constant(), right.as_constant()) {
                    return Self::Const(op.eval(l, r));
                }
                if left == right {
                    let reflexive = matches!(
                        op,
                        CompareOp::Eq
                            | CompareOp::LeS
                            | CompareOp::LeU
                            | CompareOp::GeS
                            | CompareOp::GeU
                    );
                    return Self::Const(reflexive);
                }
                Self::compare(*op, left, right)
            }
            Self::NoOverflow {
                op,
                signed,
                left,
                right,
            } => {
                let left = left.simplify();
                let right = right.simplify();
                if let (Some(l), Some(r)) = (left.as_constant(), right.as_constant()) {
                    return Self::Const(op.fits(l, r, *signed));
                }
                Self::no_overflow(*op, *signed, left, right)
            }
            Self::Not(inner) => match inner.simplify() {
                Self::Const(b) => Self::Const(!b),
                Self::Not(double) => *double,
                simplified => Self::Not(Box::new(simplified)),
            },
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(b) => write!(f, "{b}"),
            Self::Compare { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::NoOverflow {
                op,
                signed,
                left,
                right,
            } => {
                let kind = if *signed { "s" } else { "u" };
                write!(f, "no_overflow_{kind}({left} {op} {right})")
            }
            Self::Not(inner) => write!(f, "!{inner}"),
        }
    }
}
