//! CIL instruction model consumed by the deobfuscator.
//!
//! # Key Components
//!
//! - [`Opcode`] - Closed enumeration of the modeled opcodes
//! - [`Instruction`] - Opcode, operand and original offset
//! - [`Operand`] - Immediates, slot indices and member references
//! - [`FlowType`] - Control flow classification
//! - [`StackBehavior`] - Stack arity of an instruction

mod instruction;
mod opcode;

pub use instruction::{FieldRef, Instruction, MethodRef, Operand, StackBehavior, Token, TypeRef};
pub use opcode::{FlowType, Opcode};
