//! Symbolic expression tree representation.
//!
//! This module defines [`SymbolicExpr`], the 32-bit bitvector terms built by the instruction
//! translator. Expressions are plain owned trees: they never reference solver state, so they
//! can be stored in unsolved block records, substituted by a user and translated to Z3 later.

use std::{collections::BTreeSet, fmt};

use crate::analysis::symbolic::{formula::Formula, ops::SymbolicOp};

/// A symbolic 32-bit bitvector term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolicExpr {
    /// A concrete value.
    Constant(i32),

    /// A free symbol (`arg0`, `loc3`, `unk12`, ...).
    NamedVar(String),

    /// A unary operation.
    Unary {
        /// The operation to perform.
        op: SymbolicOp,
        /// The operand.
        operand: Box<SymbolicExpr>,
    },

    /// A binary operation.
    Binary {
        /// The operation to perform.
        op: SymbolicOp,
        /// The left operand.
        left: Box<SymbolicExpr>,
        /// The right operand.
        right: Box<SymbolicExpr>,
    },

    /// A conditional term: `then` if `cond` holds, `otherwise` if not.
    Ite {
        /// The condition.
        cond: Box<Formula>,
        /// Value when the condition holds.
        then: Box<SymbolicExpr>,
        /// Value when the condition does not hold.
        otherwise: Box<SymbolicExpr>,
    },
}

impl SymbolicExpr {
    /// Creates a constant expression.
    #[must_use]
    pub const fn constant(value: i32) -> Self {
        Self::Constant(value)
    }

    /// Creates a named variable expression.
    ///
    /// # Arguments
    ///
    /// * `name` - The symbol name (e.g., "arg0").
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::NamedVar(name.into())
    }

    /// Creates a unary operation expression.
    #[must_use]
    pub fn unary(op: SymbolicOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Creates a binary operation expression.
    #[must_use]
    pub fn binary(op: SymbolicOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Creates a conditional expression.
    #[must_use]
    pub fn ite(cond: Formula, then: Self, otherwise: Self) -> Self {
        Self::Ite {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Checks if this expression is a constant.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Returns the concrete value if this is a constant expression.
    #[must_use]
    pub const fn as_constant(&self) -> Option<i32> {
        match self {
            Self::Constant(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the concrete value this expression simplifies to, if any.
    ///
    /// This is the "provable numeral" test used throughout the translator and solver.
    #[must_use]
    pub fn numeral(&self) -> Option<i32> {
        self.simplify().as_constant()
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
            Self::Constant(_) => {}
            Self::NamedVar(name) => {
                names.insert(name.clone());
            }
            Self::Unary { operand, .. } => operand.collect_named(names),
            Self::Binary { left, right, .. } => {
                left.collect_named(names);
                right.collect_named(names);
            }
            Self::Ite {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_named(names);
                then.collect_named(names);
                otherwise.collect_named(names);
            }
        }
    }

    /// Replaces every occurrence of the named symbol by a constant.
    #[must_use]
    pub fn substitute_named(&self, name: &str, value: i32) -> Self {
        match self {
            Self::NamedVar(n) if n == name => Self::Constant(value),
            Self::Constant(_) | Self::NamedVar(_) => self.clone(),
            Self::Unary { op, operand } => Self::unary(*op, operand.substitute_named(name, value)),
            Self::Binary { op, left, right } => Self::binary(
                *op,
                left.substitute_named(name, value),
                right.substitute_named(name, value),
            ),
            Self::Ite {
                cond,
                then,
                otherwise,
            } => Self::ite(
                cond.substitute_named(name, value),
                then.substitute_named(name, value),
                otherwise.substitute_named(name, value),
            ),
        }
    }

    /// Simplifies the expression.
    ///
    /// Performs constant folding with 32-bit wrapping semantics and the algebraic
    /// identities obfuscators lean on (self-cancellation, repeated XOR with the same key,
    /// neutral and absorbing elements). The result is equivalent to the input for every
    /// assignment of its symbols.
    #[must_use]
    pub fn simplify(&self) -> Self {
        match self {
            Self::Constant(_) | Self::NamedVar(_) => self.clone(),
            Self::Unary { op, operand } => {
                let simplified = operand.simplify();

                if let Self::Constant(v) = simplified {
                    if let Some(result) = op.eval_unary(v) {
                        return Self::Constant(result);
                    }
                }

                // --x = x, ~~x = x
                if let Self::Unary {
                    op: inner_op,
                    operand: inner_operand,
                } = &simplified
                {
                    if op == inner_op {
                        return (**inner_operand).clone();
                    }
                }

                Self::unary(*op, simplified)
            }
            Self::Binary { op, left, right } => {
                let left_simp = left.simplify();
                let right_simp = right.simplify();
                simplify_binary(*op, left_simp, right_simp)
            }
            Self::Ite {
                cond,
                then,
                otherwise,
            } => {
                let cond = cond.simplify();
                let then = then.simplify();
                let otherwise = otherwise.simplify();
                match cond.as_bool() {
                    Some(true) => then,
                    Some(false) => otherwise,
                    None if then == otherwise => then,
                    None => Self::ite(cond, then, otherwise),
                }
            }
        }
    }
}

fn simplify_binary(op: SymbolicOp, left: SymbolicExpr, right: SymbolicExpr) -> SymbolicExpr {
    use SymbolicExpr::Constant;

    if let (Constant(l), Constant(r)) = (&left, &right) {
        if let Some(result) = op.eval_binary(*l, *r) {
            return Constant(result);
        }
    }

    if left == right {
        match op {
            SymbolicOp::Xor | SymbolicOp::Sub => return Constant(0),
            SymbolicOp::Or | SymbolicOp::And => return left,
            _ => {}
        }
    }

    // (x ^ c) ^ c = x, in any operand order
    if op == SymbolicOp::Xor {
        let (outer, inner) = match (&left, &right) {
            (Constant(c), inner @ SymbolicExpr::Binary { .. }) => (Some(*c), inner),
            (inner @ SymbolicExpr::Binary { .. }, Constant(c)) => (Some(*c), inner),
            _ => (None, &left),
        };
        if let (
            Some(c1),
            SymbolicExpr::Binary {
                op: SymbolicOp::Xor,
                left: inner_left,
                right: inner_right,
            },
        ) = (outer, inner)
        {
            if inner_right.as_constant() == Some(c1) {
                return (**inner_left).clone();
            }
            if inner_left.as_constant() == Some(c1) {
                return (**inner_right).clone();
            }
        }
    }

    if let Constant(r) = right {
        match (op, r) {
            (
                SymbolicOp::Add
                | SymbolicOp::Sub
                | SymbolicOp::Xor
                | SymbolicOp::Or
                | SymbolicOp::Shl
                | SymbolicOp::ShrS
                | SymbolicOp::ShrU,
                0,
            )
            | (SymbolicOp::Mul | SymbolicOp::DivS | SymbolicOp::DivU, 1)
            | (SymbolicOp::And, -1) => return left,
            (SymbolicOp::Mul | SymbolicOp::And, 0) => return Constant(0),
            (SymbolicOp::Or, -1) => return Constant(-1),
            _ => {}
        }
    }

    if let Constant(l) = left {
        match (op, l) {
            (SymbolicOp::Add | SymbolicOp::Xor | SymbolicOp::Or, 0)
            | (SymbolicOp::Mul, 1)
            | (SymbolicOp::And, -1) => return right,
            (SymbolicOp::Mul | SymbolicOp::And | SymbolicOp::Shl | SymbolicOp::ShrU, 0) => {
                return Constant(0)
            }
            (SymbolicOp::Or, -1) => return Constant(-1),
            _ => {}
        }
    }

    SymbolicExpr::binary(op, left, right)
}

impl fmt::Display for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::NamedVar(name) => write!(f, "{name}"),
            Self::Unary { op, operand } => write!(f, "{op}{operand}"),
            Self::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::Ite {
                cond,
                then,
                otherwise,
            } => write!(f, "ite({cond}, {then}, {otherwise})"),
        }
    }
}
