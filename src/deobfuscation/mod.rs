//! Control flow deobfuscation of CIL method bodies.
//!
//! Obfuscators hide the real control flow of a method behind opaque predicates
//! (conditions that always evaluate the same way but are hard to see through) and behind
//! flattening (every block jumps back to a central `switch` driven by a state variable).
//! This module undoes both with symbolic execution and a constraint solver.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                       ControlFlowDeobfuscator                      │
//! │                                                                    │
//! │   ┌──────────┐     ┌──────────────────────────────────────────┐    │
//! │   │ Cleaning │ ──► │ Solving (per candidate root and block)   │    │
//! │   └──────────┘     │                                          │    │
//! │        ▲           │  conditional ─► translator ─► Z3         │    │
//! │        │           │  switch      ─► path resolution          │    │
//! │        │           │                 └─► bifurcation, bypass  │    │
//! │        │           └──────────────────┬───────────────────────┘    │
//! │        └────────── modified ◄─────────┘                            │
//! │                                       │ fixpoint                   │
//! │                                       ▼                            │
//! │                     Repartition ─► dead code elimination           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`InterpretationContext`] holds the symbolic stack, arguments and locals of one solve
//!   attempt, and executes instructions on them
//! - [`ControlFlowDeobfuscator`] runs the clean/solve loop and offers discovery of the
//!   branches it could not decide plus their assisted resolution
//! - [`eliminate_dead_code`] removes the stack traffic left behind by solved branches
//! - [`MethodDeobfuscator`] chains everything and reports a [`DeobfuscationResult`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use dotflow::prelude::*;
//!
//! let token = CancellationToken::new();
//! let deobfuscator = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &token);
//!
//! let result = deobfuscator.run(&mut body);
//! if result.success {
//!     println!("{}", result.stats);
//!     for unsolved in &result.unsolved {
//!         println!("{} depends on {:?}", unsolved.block(), unsolved.symbols());
//!     }
//! }
//! ```
//!
//! # Cancellation
//!
//! The [`CancellationToken`] is polled before every solve attempt and during path
//! enumeration. Cancelling aborts the current method with [`crate::Error::Cancelled`];
//! rewrites made so far stay in place.

mod branch;
mod cancel;
mod config;
mod context;
mod deadcode;
mod engine;
mod manual;
mod method;
mod result;
mod switch;
mod translator;

pub use cancel::CancellationToken;
pub use config::{DeadCodeMode, DeobfuscationConfig};
pub use context::InterpretationContext;
pub use deadcode::{eliminate_dead_code, DeadCodeEliminator};
pub use engine::ControlFlowDeobfuscator;
pub use manual::{parse_value, UnsolvedBlock};
pub use method::MethodDeobfuscator;
pub use result::{DeadInstruction, DeobfuscationResult, DeobfuscationStats, SolveOutcome};
pub use translator::{branch_formula, comparison_predicate};
