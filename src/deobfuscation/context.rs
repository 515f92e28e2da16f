//! Interpretation context for one solve attempt.
//!
//! An [`InterpretationContext`] holds the abstract machine state the instruction translator
//! works on: the operand stack and the argument and local slots. It is created fresh for
//! every attempt and never outlives it, so unknown ids and symbol names are only unique
//! within one context.

use crate::analysis::{
    cfg::{BlockId, MethodBody},
    symbolic::{SymbolicStack, SymbolicValue},
};

/// Abstract machine state used while translating instructions.
#[derive(Debug)]
pub struct InterpretationContext {
    stack: SymbolicStack,
    args: Vec<SymbolicValue>,
    locals: Vec<SymbolicValue>,
    method_returns: bool,
}

impl InterpretationContext {
    /// Creates a context for `body`.
    ///
    /// Arguments are always the free symbols `arg0..argN`. Locals are zero when
    /// `zero_locals` is set (interpretation starts at the method entry, where the runtime
    /// zero-initializes them) and the free symbols `loc0..locN` otherwise.
    #[must_use]
    pub fn new(body: &MethodBody, zero_locals: bool) -> Self {
        let args = (0..body.params())
            .map(|i| SymbolicValue::symbol(format!("arg{i}")))
            .collect();
        let locals = (0..body.locals())
            .map(|i| {
                if zero_locals {
                    SymbolicValue::constant(0)
                } else {
                    SymbolicValue::symbol(format!("loc{i}"))
                }
            })
            .collect();
        InterpretationContext {
            stack: SymbolicStack::new(),
            args,
            locals,
            method_returns: body.returns_value(),
        }
    }

    /// Creates the context for solving `block` alone under the candidate root `root`.
    ///
    /// Locals start zeroed only when the block is the root, the root is the method entry,
    /// and the block does not lie in a handler.
    #[must_use]
    pub fn for_block(body: &MethodBody, block: BlockId, root: BlockId) -> Self {
        let zero_locals =
            block == root && body.entry() == Some(root) && !body.in_handler(block);
        Self::new(body, zero_locals)
    }

    /// The operand stack.
    #[must_use]
    pub fn stack(&self) -> &SymbolicStack {
        &self.stack
    }

    /// Mutable access to the operand stack.
    pub fn stack_mut(&mut self) -> &mut SymbolicStack {
        &mut self.stack
    }

    /// Whether `ret` consumes a value in this method.
    #[must_use]
    pub fn method_returns(&self) -> bool {
        self.method_returns
    }

    /// Reads an argument slot; out-of-range slots read as a fresh unknown.
    pub fn argument(&mut self, index: u16) -> SymbolicValue {
        match self.args.get(usize::from(index)) {
            Some(value) => value.clone(),
            None => self.stack.unknown(),
        }
    }

    /// Writes an argument slot; out-of-range writes are ignored.
    pub fn set_argument(&mut self, index: u16, value: SymbolicValue) {
        if let Some(slot) = self.args.get_mut(usize::from(index)) {
            *slot = value;
        }
    }

    /// Reads a local slot; out-of-range slots read as a fresh unknown.
    pub fn local(&mut self, index: u16) -> SymbolicValue {
        match self.locals.get(usize::from(index)) {
            Some(value) => value.clone(),
            None => self.stack.unknown(),
        }
    }

    /// Writes a local slot; out-of-range writes are ignored.
    pub fn set_local(&mut self, index: u16, value: SymbolicValue) {
        if let Some(slot) = self.locals.get_mut(usize::from(index)) {
            *slot = value;
        }
    }

    /// Replaces a local by a fresh unknown, used once its address escapes.
    pub fn invalidate_local(&mut self, index: u16) {
        let unknown = self.stack.unknown();
        self.set_local(index, unknown);
    }

    /// Replaces an argument by a fresh unknown, used once its address escapes.
    pub fn invalidate_argument(&mut self, index: u16) {
        let unknown = self.stack.unknown();
        self.set_argument(index, unknown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::{HandlerKind, MethodBodyBuilder, ScopeId};

    #[test]
    fn test_locals_zeroed_only_at_entry() {
        let body = MethodBodyBuilder::new(1, 1, false)
            .build_with(|m| {
                let protected = m.try_scope(ScopeId::ROOT);
                let handler = m.handler_scope(HandlerKind::Fault, protected, ScopeId::ROOT);
                m.block(0, |b| b.ldc_i4(0).jump(1));
                m.block_in(protected, 1, |b| b.ldc_i4(1).leave(3));
                m.block_in(handler, 2, |b| b.op(crate::assembly::Opcode::Endfinally));
                m.block(3, |b| b.ret());
            })
            .unwrap();
        let ids = body.block_ids();

        let mut ctx = InterpretationContext::for_block(&body, ids[0], ids[0]);
        assert_eq!(ctx.local(0), SymbolicValue::constant(0));
        assert_eq!(ctx.argument(0), SymbolicValue::symbol("arg0"));

        let mut ctx = InterpretationContext::for_block(&body, ids[1], ids[0]);
        assert_eq!(ctx.local(0), SymbolicValue::symbol("loc0"));

        let mut ctx = InterpretationContext::for_block(&body, ids[2], ids[2]);
        assert_eq!(ctx.local(0), SymbolicValue::symbol("loc0"));
    }

    #[test]
    fn test_out_of_range_slots() {
        let body = MethodBodyBuilder::new(0, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ret());
            })
            .unwrap();
        let mut ctx = InterpretationContext::new(&body, true);
        ctx.set_local(3, SymbolicValue::constant(1));
        assert!(ctx.local(3).is_unknown());
        assert!(ctx.argument(0).is_unknown());
    }
}
