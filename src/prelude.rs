//! # dotflow Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! dotflow library. Import this module to get quick access to everything needed to build a
//! method body and deobfuscate it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotflow operations
pub use crate::Error;

/// The result type used throughout dotflow
pub use crate::Result;

// ================================================================================================
// Instruction Model
// ================================================================================================

/// Opcodes, instructions and operands
pub use crate::assembly::{FlowType, Instruction, Opcode, Operand};

/// Metadata references carried by operands
pub use crate::assembly::{FieldRef, MethodRef, Token, TypeRef};

// ================================================================================================
// Block Graph
// ================================================================================================

/// Blocks, scopes and the method body
pub use crate::analysis::cfg::{
    BasicBlock, BlockId, HandlerKind, MethodBody, Scope, ScopeId, ScopeKind,
};

/// Construction of method bodies
pub use crate::analysis::cfg::{BlockBuilder, MethodBodyBuilder, MethodBuilder};

/// Structural passes over the graph
pub use crate::analysis::cfg::{clean, enumerate_paths, repartition, CleanStats};

// ================================================================================================
// Symbolic Execution
// ================================================================================================

/// Symbolic values and formulas
pub use crate::analysis::symbolic::{
    CompareOp, Formula, SymbolicExpr, SymbolicStack, SymbolicValue, Z3Solver,
};

// ================================================================================================
// Deobfuscation
// ================================================================================================

/// Configuration and cancellation
pub use crate::deobfuscation::{CancellationToken, DeadCodeMode, DeobfuscationConfig};

/// Drivers
pub use crate::deobfuscation::{ControlFlowDeobfuscator, MethodDeobfuscator};

/// Results and reports
pub use crate::deobfuscation::{
    DeadInstruction, DeobfuscationResult, DeobfuscationStats, SolveOutcome, UnsolvedBlock,
};

/// Dead code elimination
pub use crate::deobfuscation::{eliminate_dead_code, DeadCodeEliminator};
