// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dotflow
//!
//! Control flow deobfuscation for CIL method bodies, built on symbolic execution and the Z3
//! constraint solver.
//!
//! Obfuscators protect .NET methods by inserting opaque predicates (branches whose outcome
//! never changes but is hard to prove) and by flattening the control flow into a state
//! machine driven by a central `switch`. `dotflow` interprets blocks with 32-bit symbolic
//! bitvector values, asks Z3 whether a branch can go both ways, and rewrites the block
//! graph once it cannot. The stack traffic left behind by the rewrite is then removed by a
//! dead code pass over reconstructed stack variables.
//!
//! ## Features
//!
//! - **🔍 Opaque predicate removal** - Two-way branches proven constant become jumps
//! - **🧭 Unflattening** - Dispatch `switch`es are bypassed path by path, cloning shared
//!   blocks where needed
//! - **🧹 Cleaning and layout** - Unreachable blocks are dropped, chains merged, and the
//!   layout rebuilt so exception regions stay contiguous
//! - **✂️ Dead code elimination** - Discarded expressions are blanked out or reported
//! - **🖐️ Assisted mode** - Branches depending on free inputs are reported with their formula
//!   and can be decided once the inputs are known
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotflow::prelude::*;
//!
//! // if (arg0 == arg0) { return; } else { return; }
//! let mut body = MethodBodyBuilder::new(1, 0, false).build_with(|m| {
//!     m.block(0, |b| b.ldarg(0).ldarg(0).branch(Opcode::Beq, 1, 2));
//!     m.block(1, |b| b.ret());
//!     m.block(2, |b| b.ret());
//! })?;
//!
//! let token = CancellationToken::new();
//! let result = MethodDeobfuscator::new(&DeobfuscationConfig::default(), &token).run(&mut body);
//! assert!(result.success);
//! println!("{}", result.stats);
//! # Ok::<(), dotflow::Error>(())
//! ```
//!
//! ## Requirements
//!
//! The `z3` crate links against the system `libz3`; it has to be installed to build and to
//! run the solver tests.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use dotflow::prelude::*;
///
/// let config = DeobfuscationConfig::default().with_dead_code(DeadCodeMode::Annotate);
/// let token = CancellationToken::new();
/// let deobfuscator = ControlFlowDeobfuscator::new(&config, &token);
/// ```
pub mod prelude;

/// The CIL instruction model consumed by the deobfuscator.
///
/// # Key Types
///
/// - [`assembly::Opcode`] - The closed set of canonical opcodes, with flow classification
///   and stack arity
/// - [`assembly::Instruction`] - An opcode, its operand and its original offset
/// - [`assembly::MethodRef`], [`assembly::FieldRef`], [`assembly::TypeRef`] - Resolved
///   metadata references carrying what the translator needs (arity, names, sizes)
pub mod assembly;

/// Block graphs and symbolic values.
///
/// - [`analysis::cfg`] - The mutable block graph of a method body with its exception
///   scopes, structural edits, cleaning, layout and path enumeration
/// - [`analysis::symbolic`] - Bitvector expressions, formulas, the symbolic stack and the
///   Z3 bridge
pub mod analysis;

/// Branch solving, unflattening and dead code elimination.
///
/// See [`deobfuscation::MethodDeobfuscator`] for the one-call entry point and
/// [`deobfuscation::ControlFlowDeobfuscator`] for finer control.
pub mod deobfuscation;

/// `dotflow` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `dotflow` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use dotflow::{prelude::*, Error};
///
/// let mut body = MethodBody::new(0, 0, false);
/// let record = UnsolvedBlock::new(
///     BlockId::new(0),
///     Opcode::Brtrue,
///     Formula::eq(SymbolicExpr::named("arg0"), SymbolicExpr::constant(1)),
/// );
/// let deobfuscator =
///     ControlFlowDeobfuscator::new(&DeobfuscationConfig::default(), &CancellationToken::new());
///
/// match deobfuscator.solve_assisted(&mut body, &record) {
///     Ok(solved) => println!("solved: {solved}"),
///     Err(Error::UnresolvedSymbols(names)) => println!("assign {names:?} first"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;
