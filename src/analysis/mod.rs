//! Program analysis infrastructure for CIL method bodies.
//!
//! This module provides the analysis layers the deobfuscator is built on.
//!
//! # Architecture
//!
//! The analysis module is organized into focused sub-modules:
//!
//! - [`cfg`] - Mutable control flow graph with exception scopes, cleaning and layout
//! - [`symbolic`] - Symbolic 32-bit bitvector values, formulas and the Z3 bridge
//!
//! # Usage
//!
//! ```rust,ignore
//! use dotflow::analysis::{enumerate_paths, MethodBodyBuilder, Z3Solver};
//!
//! let body = MethodBodyBuilder::new(1, 0, false).build_with(|m| { /* ... */ })?;
//! let paths = enumerate_paths(&body, root, target, 64, &token)?;
//! ```

pub mod cfg;
pub mod symbolic;

// Re-export primary types at module level
pub use cfg::{
    clean, enumerate_paths, repartition, BasicBlock, BlockId, CleanStats, HandlerKind,
    MethodBody, MethodBodyBuilder, Scope, ScopeId, ScopeKind,
};
pub use symbolic::{
    CompareOp, Formula, OverflowOp, SymbolicExpr, SymbolicOp, SymbolicStack, SymbolicValue,
    Z3Solver,
};
