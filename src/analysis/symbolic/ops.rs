//! Symbolic operation types.
//!
//! This module defines the operators that appear in symbolic expressions and formulas.
//! All of them use 32-bit two's-complement semantics, matching the CIL `int32` stack type.
//!
//! Operations are categorized as:
//! - **Arithmetic / bitwise** ([`SymbolicOp`]): produce a bitvector
//! - **Comparison** ([`CompareOp`]): produce a boolean, with distinct signed and unsigned
//!   variants
//! - **Overflow checks** ([`OverflowOp`]): the operations guarded by `*.ovf` opcodes

use std::fmt;

/// An arithmetic or bitwise operation on 32-bit bitvectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicOp {
    // Arithmetic operations
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Signed division.
    DivS,
    /// Unsigned division.
    DivU,
    /// Signed remainder.
    RemS,
    /// Unsigned remainder.
    RemU,
    /// Negation.
    Neg,

    // Bitwise operations
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise NOT.
    Not,
    /// Shift left.
    Shl,
    /// Arithmetic shift right (preserves sign).
    ShrS,
    /// Logical shift right (zero-fill).
    ShrU,
}

impl SymbolicOp {
    /// Checks if this operation is commutative.
    ///
    /// # Returns
    ///
    /// `true` if `a op b == b op a` for all operands.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor
        )
    }

    /// Checks if this operation is unary.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Not)
    }

    /// Evaluates a unary operation on a concrete value.
    #[must_use]
    pub fn eval_unary(self, value: i32) -> Option<i32> {
        match self {
            Self::Neg => Some(value.wrapping_neg()),
            Self::Not => Some(!value),
            _ => None,
        }
    }

    /// Evaluates a binary operation on concrete values.
    ///
    /// Shift amounts of 32 or more follow bitvector semantics (the result saturates to
    /// zero, or to the sign fill for arithmetic right shifts). Division and remainder by
    /// zero are left unevaluated so that folding never disagrees with the solver.
    #[must_use]
    pub fn eval_binary(self, left: i32, right: i32) -> Option<i32> {
        let shift = right as u32;
        let value = match self {
            Self::Add => left.wrapping_add(right),
            Self::Sub => left.wrapping_sub(right),
            Self::Mul => left.wrapping_mul(right),
            Self::DivS if right != 0 => left.wrapping_div(right),
            Self::DivU if right != 0 => ((left as u32) / (right as u32)) as i32,
            Self::RemS if right != 0 => left.wrapping_rem(right),
            Self::RemU if right != 0 => ((left as u32) % (right as u32)) as i32,
            Self::And => left & right,
            Self::Or => left | right,
            Self::Xor => left ^ right,
            Self::Shl if shift < 32 => left << shift,
            Self::Shl => 0,
            Self::ShrS if shift < 32 => left >> shift,
            Self::ShrS => left >> 31,
            Self::ShrU if shift < 32 => ((left as u32) >> shift) as i32,
            Self::ShrU => 0,
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for SymbolicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub | Self::Neg => "-",
            Self::Mul => "*",
            Self::DivS => "/s",
            Self::DivU => "/u",
            Self::RemS => "%s",
            Self::RemU => "%u",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Not => "~",
            Self::Shl => "<<",
            Self::ShrS => ">>s",
            Self::ShrU => ">>u",
        };
        write!(f, "{s}")
    }
}

/// A comparison between two 32-bit bitvectors.
///
/// Signed and unsigned orderings are distinct predicates all the way down to the solver:
/// `-1 <s 0` holds while `-1 <u 0` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Signed less than.
    LtS,
    /// Unsigned less than.
    LtU,
    /// Signed greater than.
    GtS,
    /// Unsigned greater than.
    GtU,
    /// Signed less than or equal.
    LeS,
    /// Unsigned less than or equal.
    LeU,
    /// Signed greater than or equal.
    GeS,
    /// Unsigned greater than or equal.
    GeU,
}

impl CompareOp {
    /// Returns `true` for the unsigned orderings.
    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::LtU | Self::GtU | Self::LeU | Self::GeU)
    }

    /// Evaluates the comparison on concrete values.
    #[must_use]
    pub fn eval(self, left: i32, right: i32) -> bool {
        let (ul, ur) = (left as u32, right as u32);
        match self {
            Self::Eq => left == right,
            Self::LtS => left < right,
            Self::LtU => ul < ur,
            Self::GtS => left > right,
            Self::GtU => ul > ur,
            Self::LeS => left <= right,
            Self::LeU => ul <= ur,
            Self::GeS => left >= right,
            Self::GeU => ul >= ur,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::LtS => "<s",
            Self::LtU => "<u",
            Self::GtS => ">s",
            Self::GtU => ">u",
            Self::LeS => "<=s",
            Self::LeU => "<=u",
            Self::GeS => ">=s",
            Self::GeU => ">=u",
        };
        write!(f, "{s}")
    }
}

/// An arithmetic operation guarded by an overflow check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowOp {
    /// `add.ovf` / `add.ovf.un`
    Add,
    /// `sub.ovf` / `sub.ovf.un`
    Sub,
    /// `mul.ovf` / `mul.ovf.un`
    Mul,
}

impl OverflowOp {
    /// The unchecked operation computing the result.
    #[must_use]
    pub const fn arithmetic(self) -> SymbolicOp {
        match self {
            Self::Add => SymbolicOp::Add,
            Self::Sub => SymbolicOp::Sub,
            Self::Mul => SymbolicOp::Mul,
        }
    }

    /// Returns `true` if the operation does not overflow on the given operands.
    #[must_use]
    pub fn fits(self, left: i32, right: i32, signed: bool) -> bool {
        let (ul, ur) = (left as u32, right as u32);
        match (self, signed) {
            (Self::Add, true) => left.checked_add(right).is_some(),
            (Self::Add, false) => ul.checked_add(ur).is_some(),
            (Self::Sub, true) => left.checked_sub(right).is_some(),
            (Self::Sub, false) => ul.checked_sub(ur).is_some(),
            (Self::Mul, true) => left.checked_mul(right).is_some(),
            (Self::Mul, false) => ul.checked_mul(ur).is_some(),
        }
    }
}

impl fmt::Display for OverflowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arithmetic())
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::symbolic::{CompareOp, OverflowOp, SymbolicOp};

    #[test]
    fn test_shift_semantics() {
        assert_eq!(SymbolicOp::Shl.eval_binary(1, 4), Some(16));
        assert_eq!(SymbolicOp::Shl.eval_binary(1, 32), Some(0));
        assert_eq!(SymbolicOp::ShrS.eval_binary(-8, 1), Some(-4));
        assert_eq!(SymbolicOp::ShrS.eval_binary(-8, 40), Some(-1));
        assert_eq!(SymbolicOp::ShrU.eval_binary(-8, 1), Some(0x7FFF_FFFC));
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        assert_eq!(SymbolicOp::DivS.eval_binary(10, 0), None);
        assert_eq!(SymbolicOp::RemU.eval_binary(10, 0), None);
        assert_eq!(SymbolicOp::DivS.eval_binary(i32::MIN, -1), Some(i32::MIN));
    }

    #[test]
    fn test_signed_unsigned_comparisons_differ() {
        assert!(CompareOp::LtS.eval(-1, 0));
        assert!(!CompareOp::LtU.eval(-1, 0));
        assert!(CompareOp::GtU.eval(-1, 0));
    }

    #[test]
    fn test_overflow_fits() {
        assert!(!OverflowOp::Add.fits(i32::MAX, 1, true));
        assert!(OverflowOp::Add.fits(i32::MAX, 1, false));
        assert!(!OverflowOp::Sub.fits(0, 1, false));
        assert!(!OverflowOp::Mul.fits(0x10000, 0x10000, false));
    }
}
