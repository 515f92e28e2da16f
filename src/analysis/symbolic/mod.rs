//! Symbolic value model for the CIL abstract interpreter.
//!
//! This module provides the building blocks used to run stack-machine code symbolically:
//!
//! - [`SymbolicExpr`] - 32-bit bitvector terms with local simplification
//! - [`Formula`] - Boolean conditions over those terms
//! - [`SymbolicValue`] - Tagged stack values (bitvector, unknown, field reference, address)
//! - [`SymbolicStack`] - Operand stack with underflow-tolerant pops
//! - [`Z3Solver`] - Satisfiability checks on formulas
//!
//! # Example
//!
//! ```rust,ignore
//! use dotflow::analysis::symbolic::{Formula, SymbolicExpr, SymbolicOp, Z3Solver};
//!
//! // ((arg0 ^ 0x1234) ^ 0x1234) == arg0
//! let x = SymbolicExpr::named("arg0");
//! let masked = SymbolicExpr::binary(
//!     SymbolicOp::Xor,
//!     SymbolicExpr::binary(SymbolicOp::Xor, x.clone(), SymbolicExpr::constant(0x1234)),
//!     SymbolicExpr::constant(0x1234),
//! );
//! assert_eq!(Z3Solver::new().decide(&Formula::eq(masked, x)), Some(true));
//! ```

mod expr;
mod formula;
mod ops;
mod solver;
mod stack;
mod value;

pub use expr::SymbolicExpr;
pub use formula::Formula;
pub use ops::{CompareOp, OverflowOp, SymbolicOp};
pub use solver::Z3Solver;
pub use stack::SymbolicStack;
pub use value::SymbolicValue;
