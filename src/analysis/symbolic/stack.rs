//! Underflow-tolerant operand stack over symbolic values.
//!
//! The deobfuscator interprets single blocks or short paths, never whole methods from a
//! known empty stack. Values that were pushed before the simulated window are therefore
//! legitimately missing: popping an empty stack does not fail, it mints a fresh unknown
//! standing in for whatever the predecessor left behind.
//!
//! # Example
//!
//! ```text
//! ldc.i4 3      // [3]
//! add           // pops 3 and an underflow unknown, pushes unknown
//! ```

use crate::analysis::symbolic::value::SymbolicValue;

/// Operand stack used by one interpretation context.
#[derive(Debug, Default)]
pub struct SymbolicStack {
    values: Vec<SymbolicValue>,
    next_unknown: u32,
}

impl SymbolicStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh unknown value without touching the stack.
    pub fn unknown(&mut self) -> SymbolicValue {
        let id = self.next_unknown;
        self.next_unknown += 1;
        SymbolicValue::Unknown(id)
    }

    /// Returns a fresh symbol name, used where an opaque value has to live inside a
    /// bitvector term (the overflow branch of checked arithmetic).
    pub fn unknown_symbol(&mut self) -> String {
        let id = self.next_unknown;
        self.next_unknown += 1;
        format!("unk{id}")
    }

    /// Pushes a value.
    pub fn push(&mut self, value: SymbolicValue) {
        self.values.push(value);
    }

    /// Pushes `count` fresh unknowns.
    pub fn push_unknowns(&mut self, count: usize) {
        for _ in 0..count {
            let value = self.unknown();
            self.values.push(value);
        }
    }

    /// Pops the top value, or a fresh unknown if the stack is empty.
    pub fn pop(&mut self) -> SymbolicValue {
        match self.values.pop() {
            Some(value) => value,
            None => self.unknown(),
        }
    }

    /// Discards the top `count` values. Popping more values than present empties the stack.
    pub fn pop_n(&mut self, count: usize) {
        let keep = self.values.len().saturating_sub(count);
        self.values.truncate(keep);
    }

    /// Returns the top value without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&SymbolicValue> {
        self.values.last()
    }

    /// Pushes a copy of the top value. An empty stack duplicates a fresh unknown.
    pub fn duplicate_top(&mut self) {
        let top = match self.values.last() {
            Some(value) => value.clone(),
            None => {
                let value = self.unknown();
                self.values.push(value.clone());
                value
            }
        };
        self.values.push(top);
    }

    /// Removes every value.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of values currently on the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the stack holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::symbolic::{SymbolicStack, SymbolicValue};

    #[test]
    fn test_underflow_mints_distinct_unknowns() {
        let mut stack = SymbolicStack::new();
        let a = stack.pop();
        let b = stack.pop();
        assert!(a.is_unknown());
        assert!(b.is_unknown());
        assert_ne!(a, b);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_duplicate_top() {
        let mut stack = SymbolicStack::new();
        stack.push(SymbolicValue::constant(7));
        stack.duplicate_top();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop().numeral(), Some(7));
        assert_eq!(stack.pop().numeral(), Some(7));
    }

    #[test]
    fn test_pop_n_clamps() {
        let mut stack = SymbolicStack::new();
        stack.push_unknowns(2);
        stack.pop_n(5);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_unknown_symbols_do_not_collide_with_values() {
        let mut stack = SymbolicStack::new();
        let value = stack.unknown();
        let symbol = stack.unknown_symbol();
        assert_eq!(value, SymbolicValue::Unknown(0));
        assert_eq!(symbol, "unk1");
    }
}
