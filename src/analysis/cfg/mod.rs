//! Control flow graph of a method body.
//!
//! This module provides the mutable block graph the deobfuscator rewrites. Unlike a
//! read-only analysis graph, every structural edit (redirecting an edge, replacing a
//! terminator, cloning or merging blocks) goes through [`MethodBody`], which keeps the
//! predecessor lists in sync with the successor links.
//!
//! # Key Components
//!
//! - [`MethodBody`] - Arena of [`BasicBlock`]s addressed by stable [`BlockId`] handles
//! - [`Scope`] - Exception handling regions (try bodies and handlers)
//! - [`MethodBodyBuilder`] - Closure-based construction for hosts and tests
//! - [`enumerate_paths`] - Simple path enumeration between two blocks
//! - [`clean`] - Unreachable block removal and straight-line merging
//! - [`repartition`] - Layout recomputation keeping regions contiguous
//!
//! # Edge Representation
//!
//! A block ending in a conditional branch jumps to `targets[0]` and falls through
//! otherwise; a `switch` jumps to `targets[index]`. Unconditional jumps are not kept as
//! instructions: the fall-through link is the jump, and the layout decides whether a `br`
//! is needed when the body is serialized again.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotflow::analysis::cfg::{clean, MethodBodyBuilder};
//! use dotflow::assembly::Opcode;
//!
//! let mut body = MethodBodyBuilder::new(1, 0, false).build_with(|m| {
//!     m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 1, 2));
//!     m.block(1, |b| b.ret());
//!     m.block(2, |b| b.ret());
//! })?;
//! let stats = clean(&mut body)?;
//! println!("{}", body.to_dot(None));
//! ```

mod block;
mod builder;
mod cleaning;
mod dot;
mod graph;
mod layout;
mod paths;
mod scope;

pub use block::{BasicBlock, BlockId};
pub use builder::{BlockBuilder, MethodBodyBuilder, MethodBuilder};
pub use cleaning::{clean, CleanStats};
pub use dot::escape_dot;
pub use graph::MethodBody;
pub use layout::repartition;
pub use paths::enumerate_paths;
pub use scope::{HandlerKind, Scope, ScopeId, ScopeKind};
