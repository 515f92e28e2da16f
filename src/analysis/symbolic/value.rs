//! Values on the simulated operand stack.

use std::fmt;

use crate::{analysis::symbolic::expr::SymbolicExpr, assembly::FieldRef};

/// A tagged value tracked by the abstract interpreter.
///
/// Only [`SymbolicValue::Bitvector`] participates in arithmetic and comparisons. Every
/// operation that receives anything else produces a fresh [`SymbolicValue::Unknown`] rather
/// than coercing.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolicValue {
    /// A 32-bit bitvector term, possibly a provable numeral.
    Bitvector(SymbolicExpr),
    /// An opaque value. The id is unique within one interpretation context, so two
    /// unknowns are never considered equal.
    Unknown(u32),
    /// A reference to a static field, as pushed by `ldsfld`.
    FieldRef(FieldRef),
    /// The address of a local, wrapping the local's value at the time it was taken.
    Address(Box<SymbolicValue>),
}

impl SymbolicValue {
    /// Wraps a constant.
    #[must_use]
    pub fn constant(value: i32) -> Self {
        Self::Bitvector(SymbolicExpr::constant(value))
    }

    /// Wraps a named symbol.
    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Bitvector(SymbolicExpr::named(name))
    }

    /// Returns the bitvector term, if this is one.
    #[must_use]
    pub fn as_bitvector(&self) -> Option<&SymbolicExpr> {
        match self {
            Self::Bitvector(expr) => Some(expr),
            _ => None,
        }
    }

    /// Returns the concrete value if this is a bitvector that simplifies to a numeral.
    #[must_use]
    pub fn numeral(&self) -> Option<i32> {
        self.as_bitvector().and_then(SymbolicExpr::numeral)
    }

    /// Returns `true` for [`SymbolicValue::Unknown`].
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitvector(expr) => write!(f, "{expr}"),
            Self::Unknown(id) => write!(f, "unk{id}"),
            Self::FieldRef(field) => write!(f, "&{}", field.full_name),
            Self::Address(inner) => write!(f, "addr({inner})"),
        }
    }
}
