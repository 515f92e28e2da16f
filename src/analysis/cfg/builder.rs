//! Builder pattern for programmatic method body construction.
//!
//! This module provides a fluent API for building [`MethodBody`] graphs without manual
//! handle and edge management. It's useful for:
//!
//! - Hosts that already decoded a method and know its blocks and successors
//! - Writing unit tests for the solver and the cleaning passes
//!
//! # Design
//!
//! The builder uses a closure-based API where all blocks are defined within a single
//! expression, making the CFG structure visually clear. Blocks are named by caller-chosen
//! labels; edges to labels that are defined later are resolved when the body is built.
//!
//! ```rust,ignore
//! let body = MethodBodyBuilder::new(1, 1, false).build_with(|m| {
//!     m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 2, 1));
//!     m.block(1, |b| b.ldc_i4(1).stloc(0).jump(3));
//!     m.block(2, |b| b.ldc_i4(2).stloc(0).jump(3));
//!     m.block(3, |b| b.ret());
//! })?;
//! ```
//!
//! Instructions receive consecutive offsets in definition order.

use std::collections::HashMap;

use crate::{
    analysis::cfg::{BlockId, HandlerKind, MethodBody, ScopeId, ScopeKind},
    assembly::{FieldRef, Instruction, MethodRef, Opcode},
    Error, Result,
};

/// Builder for constructing method bodies programmatically.
#[derive(Debug)]
pub struct MethodBodyBuilder {
    params: u16,
    locals: u16,
    returns_value: bool,
}

impl MethodBodyBuilder {
    /// Creates a builder for a method with the given signature shape.
    ///
    /// # Arguments
    ///
    /// * `params` - Number of argument slots, including `this`
    /// * `locals` - Number of local variable slots
    /// * `returns_value` - Whether the method returns a value
    #[must_use]
    pub fn new(params: u16, locals: u16, returns_value: bool) -> Self {
        MethodBodyBuilder {
            params,
            locals,
            returns_value,
        }
    }

    /// Builds the body from the blocks defined in `define`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a label is defined twice or an edge refers to an
    /// undefined label, and propagates errors from scope creation.
    pub fn build_with<F>(self, define: F) -> Result<MethodBody>
    where
        F: FnOnce(&mut MethodBuilder),
    {
        let mut builder = MethodBuilder {
            body: MethodBody::new(self.params, self.locals, self.returns_value),
            labels: HashMap::new(),
            pending: Vec::new(),
            next_offset: 0,
            error: None,
        };
        define(&mut builder);
        builder.finish()
    }
}

/// Edges recorded for a block, by label.
#[derive(Debug)]
struct PendingEdges {
    block: BlockId,
    fallthrough: Option<usize>,
    targets: Vec<usize>,
}

/// Method-level builder handed to the definition closure.
#[derive(Debug)]
pub struct MethodBuilder {
    body: MethodBody,
    labels: HashMap<usize, BlockId>,
    pending: Vec<PendingEdges>,
    next_offset: u32,
    error: Option<Error>,
}

impl MethodBuilder {
    /// Defines a block in the method scope.
    pub fn block<F>(&mut self, label: usize, define: F)
    where
        F: FnOnce(&mut BlockBuilder) -> &mut BlockBuilder,
    {
        self.block_in(ScopeId::ROOT, label, define);
    }

    /// Defines a block in the given scope.
    pub fn block_in<F>(&mut self, scope: ScopeId, label: usize, define: F)
    where
        F: FnOnce(&mut BlockBuilder) -> &mut BlockBuilder,
    {
        let mut block = BlockBuilder {
            instructions: Vec::new(),
            fallthrough: None,
            targets: Vec::new(),
            next_offset: self.next_offset,
        };
        define(&mut block);
        self.next_offset = block.next_offset;

        if self.labels.contains_key(&label) {
            self.fail(malformed_error!("Label {} defined twice", label));
            return;
        }
        match self.body.add_block(scope, block.instructions) {
            Ok(id) => {
                self.labels.insert(label, id);
                self.pending.push(PendingEdges {
                    block: id,
                    fallthrough: block.fallthrough,
                    targets: block.targets,
                });
            }
            Err(error) => self.fail(error),
        }
    }

    /// Opens a protected region nested in `parent`.
    pub fn try_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scope(ScopeKind::Try, parent)
    }

    /// Opens a handler region for `protected`, nested in `parent`.
    pub fn handler_scope(
        &mut self,
        kind: HandlerKind,
        protected: ScopeId,
        parent: ScopeId,
    ) -> ScopeId {
        self.scope(ScopeKind::Handler { kind, protected }, parent)
    }

    fn scope(&mut self, kind: ScopeKind, parent: ScopeId) -> ScopeId {
        match self.body.add_scope(kind, parent) {
            Ok(id) => id,
            Err(error) => {
                self.fail(error);
                ScopeId::ROOT
            }
        }
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn resolve(&self, label: usize) -> Result<BlockId> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| malformed_error!("Undefined block label {}", label))
    }

    fn finish(mut self) -> Result<MethodBody> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let pending = std::mem::take(&mut self.pending);
        for edges in pending {
            let targets = edges
                .targets
                .iter()
                .map(|&label| self.resolve(label))
                .collect::<Result<Vec<_>>>()?;
            let fallthrough = edges.fallthrough.map(|label| self.resolve(label)).transpose()?;
            self.body.set_targets(edges.block, targets)?;
            self.body.set_fallthrough(edges.block, fallthrough)?;
        }
        Ok(self.body)
    }
}

/// Block-level builder.
#[derive(Debug)]
pub struct BlockBuilder {
    instructions: Vec<Instruction>,
    fallthrough: Option<usize>,
    targets: Vec<usize>,
    next_offset: u32,
}

impl BlockBuilder {
    /// Appends an instruction, assigning it the next offset.
    pub fn instr(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction.at(self.next_offset));
        self.next_offset += 1;
        self
    }

    /// Appends an operand-less instruction.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.instr(Instruction::simple(opcode))
    }

    /// `ldc.i4 value`
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.instr(Instruction::ldc_i4(value))
    }

    /// `ldarg index`
    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        self.instr(Instruction::ldarg(index))
    }

    /// `starg index`
    pub fn starg(&mut self, index: u16) -> &mut Self {
        self.instr(Instruction::starg(index))
    }

    /// `ldloc index`
    pub fn ldloc(&mut self, index: u16) -> &mut Self {
        self.instr(Instruction::ldloc(index))
    }

    /// `ldloca index`
    pub fn ldloca(&mut self, index: u16) -> &mut Self {
        self.instr(Instruction::ldloca(index))
    }

    /// `stloc index`
    pub fn stloc(&mut self, index: u16) -> &mut Self {
        self.instr(Instruction::stloc(index))
    }

    /// `dup`
    pub fn dup(&mut self) -> &mut Self {
        self.op(Opcode::Dup)
    }

    /// `pop`
    pub fn pop(&mut self) -> &mut Self {
        self.op(Opcode::Pop)
    }

    /// `call method`
    pub fn call(&mut self, method: MethodRef) -> &mut Self {
        self.instr(Instruction::call(method))
    }

    /// `ldsfld field`
    pub fn ldsfld(&mut self, field: FieldRef) -> &mut Self {
        self.instr(Instruction::ldsfld(field))
    }

    /// `ret`, ending the block without successor.
    pub fn ret(&mut self) -> &mut Self {
        self.op(Opcode::Ret)
    }

    /// `throw`, ending the block without successor.
    pub fn throw(&mut self) -> &mut Self {
        self.op(Opcode::Throw)
    }

    /// Unconditional transfer to `label` (fall-through or `br`).
    pub fn jump(&mut self, label: usize) -> &mut Self {
        self.fallthrough = Some(label);
        self
    }

    /// `leave` to `label`.
    pub fn leave(&mut self, label: usize) -> &mut Self {
        self.op(Opcode::Leave).jump(label)
    }

    /// Two-way conditional branch: jumps to `taken` or falls through to `not_taken`.
    pub fn branch(&mut self, opcode: Opcode, taken: usize, not_taken: usize) -> &mut Self {
        self.op(opcode);
        self.targets = vec![taken];
        self.fallthrough = Some(not_taken);
        self
    }

    /// `switch` over `cases`, falling through to `default` when out of range.
    pub fn switch(&mut self, cases: &[usize], default: usize) -> &mut Self {
        self.op(Opcode::Switch);
        self.targets = cases.to_vec();
        self.fallthrough = Some(default);
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::cfg::{HandlerKind, MethodBodyBuilder, ScopeId},
        assembly::Opcode,
        Error,
    };

    #[test]
    fn test_build_diamond() {
        let body = MethodBodyBuilder::new(1, 1, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 2, 1));
                m.block(1, |b| b.ldc_i4(1).stloc(0).jump(3));
                m.block(2, |b| b.ldc_i4(2).stloc(0).jump(3));
                m.block(3, |b| b.ret());
            })
            .unwrap();
        body.verify().unwrap();
        assert_eq!(body.len(), 4);
        let entry = body.block(body.entry().unwrap()).unwrap();
        assert!(entry.ends_with_conditional());
        assert_eq!(entry.targets().len(), 1);
        // offsets are consecutive across blocks
        let offsets: Vec<u32> = body
            .blocks()
            .flat_map(|b| b.instructions().iter().map(|i| i.offset))
            .collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_undefined_label() {
        let result = MethodBodyBuilder::new(0, 0, false).build_with(|m| {
            m.block(0, |b| b.jump(7));
        });
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_handler_scopes() {
        let body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                let protected = m.try_scope(ScopeId::ROOT);
                let handler = m.handler_scope(HandlerKind::Catch, protected, ScopeId::ROOT);
                m.block(0, |b| b.jump(1));
                m.block_in(protected, 1, |b| b.op(Opcode::Nop).leave(3));
                m.block_in(handler, 2, |b| b.pop().leave(3));
                m.block(3, |b| b.ret());
            })
            .unwrap();
        body.verify().unwrap();
        let handlers = body.handler_entries();
        assert_eq!(handlers.len(), 1);
        assert!(body.in_handler(handlers[0]));
        assert_eq!(body.handler_entry_kind(handlers[0]), Some(HandlerKind::Catch));
    }
}
