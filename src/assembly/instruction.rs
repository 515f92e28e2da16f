//! Instruction and operand model.
//!
//! An [`Instruction`] is an opcode plus its operand and the bytecode offset it was decoded
//! from. Branch targets are not stored on the instruction: they are edges of the enclosing
//! [`crate::analysis::cfg::BasicBlock`], which is what the graph rewrites manipulate.
//!
//! Member references carry just enough of their signature to compute stack effects
//! (parameter count, instance flag, return value) and a fully qualified name for the few
//! places where the translator recognizes well-known members.

use std::fmt;

use crate::assembly::{FlowType, Opcode};

/// A metadata token referencing a table row.
///
/// The high byte encodes the table, the low 24 bits the row index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(0x{:08x})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Reference to a field, as used by `ldsfld`, `ldfld` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Metadata token of the field
    pub token: Token,
    /// Fully qualified name, e.g. `System.Type[] System.Type::EmptyTypes`
    pub full_name: String,
}

impl FieldRef {
    /// Full name of `System.Type.EmptyTypes`, a static zero-length array.
    pub const EMPTY_TYPES: &'static str = "System.Type[] System.Type::EmptyTypes";

    /// Creates a new field reference.
    #[must_use]
    pub fn new(token: Token, full_name: impl Into<String>) -> Self {
        FieldRef {
            token,
            full_name: full_name.into(),
        }
    }

    /// Returns `true` if this field is known to hold an empty array.
    #[must_use]
    pub fn is_zero_length_array(&self) -> bool {
        self.full_name == Self::EMPTY_TYPES
    }
}

/// Reference to a method or call site signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Metadata token of the method (or standalone signature for `calli`)
    pub token: Token,
    /// Fully qualified name, informational only
    pub full_name: String,
    /// Number of declared parameters, excluding `this`
    pub params: u16,
    /// Whether the method takes an implicit `this` argument
    pub has_this: bool,
    /// Whether the method returns a value
    pub returns_value: bool,
}

impl MethodRef {
    /// Creates a static method reference.
    #[must_use]
    pub fn new(token: Token, full_name: impl Into<String>, params: u16, returns_value: bool) -> Self {
        MethodRef {
            token,
            full_name: full_name.into(),
            params,
            has_this: false,
            returns_value,
        }
    }

    /// Marks the method as an instance method.
    #[must_use]
    pub fn with_this(mut self) -> Self {
        self.has_this = true;
        self
    }

    /// Number of stack slots consumed by a call to this method.
    #[must_use]
    pub fn argument_slots(&self) -> u16 {
        self.params + u16::from(self.has_this)
    }
}

/// Reference to a type, as used by `sizeof`, `box`, `newarr` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Metadata token of the type
    pub token: Token,
    /// Fully qualified name, e.g. `System.Int32`
    pub full_name: String,
}

impl TypeRef {
    /// Creates a new type reference.
    #[must_use]
    pub fn new(token: Token, full_name: impl Into<String>) -> Self {
        TypeRef {
            token,
            full_name: full_name.into(),
        }
    }

    /// Size in bytes for the built-in value types with a fixed layout.
    #[must_use]
    pub fn primitive_size(&self) -> Option<i32> {
        let size = match self.full_name.as_str() {
            "System.Boolean" | "System.Byte" | "System.SByte" => 1,
            "System.Char" | "System.Int16" | "System.UInt16" => 2,
            "System.Int32" | "System.UInt32" | "System.Single" => 4,
            "System.Int64" | "System.UInt64" | "System.Double" => 8,
            "System.Guid" => 16,
            _ => return None,
        };
        Some(size)
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand (also used by branches, whose targets live on the block)
    None,
    /// 32-bit integer immediate
    Int32(i32),
    /// 64-bit integer immediate
    Int64(i64),
    /// 32-bit float immediate
    Float32(f32),
    /// 64-bit float immediate
    Float64(f64),
    /// Local variable index
    Local(u16),
    /// Argument index (including `this` for instance methods)
    Argument(u16),
    /// User string literal
    String(String),
    /// Field reference
    Field(FieldRef),
    /// Method reference or call site signature
    Method(MethodRef),
    /// Type reference
    Type(TypeRef),
    /// Any other metadata token
    Token(Token),
}

/// Stack effect of a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of values consumed
    pub pops: u16,
    /// Number of values produced
    pub pushes: u16,
    /// Whether the instruction discards everything below its operands
    pub clears_stack: bool,
}

/// A single CIL instruction inside a basic block.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the instruction in the original method body
    pub offset: u32,
    /// The opcode
    pub opcode: Opcode,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction at offset 0.
    #[must_use]
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Instruction {
            offset: 0,
            opcode,
            operand,
        }
    }

    /// Creates an instruction without operand.
    #[must_use]
    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// `nop`
    #[must_use]
    pub fn nop() -> Self {
        Self::simple(Opcode::Nop)
    }

    /// `pop`
    #[must_use]
    pub fn pop() -> Self {
        Self::simple(Opcode::Pop)
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self::new(Opcode::LdcI4, Operand::Int32(value))
    }

    /// `ldarg index`
    #[must_use]
    pub fn ldarg(index: u16) -> Self {
        Self::new(Opcode::Ldarg, Operand::Argument(index))
    }

    /// `starg index`
    #[must_use]
    pub fn starg(index: u16) -> Self {
        Self::new(Opcode::Starg, Operand::Argument(index))
    }

    /// `ldloc index`
    #[must_use]
    pub fn ldloc(index: u16) -> Self {
        Self::new(Opcode::Ldloc, Operand::Local(index))
    }

    /// `ldloca index`
    #[must_use]
    pub fn ldloca(index: u16) -> Self {
        Self::new(Opcode::Ldloca, Operand::Local(index))
    }

    /// `stloc index`
    #[must_use]
    pub fn stloc(index: u16) -> Self {
        Self::new(Opcode::Stloc, Operand::Local(index))
    }

    /// `call method`
    #[must_use]
    pub fn call(method: MethodRef) -> Self {
        Self::new(Opcode::Call, Operand::Method(method))
    }

    /// `ldsfld field`
    #[must_use]
    pub fn ldsfld(field: FieldRef) -> Self {
        Self::new(Opcode::Ldsfld, Operand::Field(field))
    }

    /// Places the instruction at the given offset.
    #[must_use]
    pub fn at(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Returns the control flow classification of this instruction.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Returns the 32-bit immediate, if any.
    #[must_use]
    pub fn i32_operand(&self) -> Option<i32> {
        match self.operand {
            Operand::Int32(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the local or argument index, if any.
    #[must_use]
    pub fn slot_operand(&self) -> Option<u16> {
        match self.operand {
            Operand::Local(index) | Operand::Argument(index) => Some(index),
            _ => None,
        }
    }

    /// Computes the stack effect of this instruction.
    ///
    /// # Arguments
    ///
    /// * `method_returns` - Whether the enclosing method returns a value, which decides
    ///   the arity of `ret`
    #[must_use]
    pub fn stack_behavior(&self, method_returns: bool) -> StackBehavior {
        let clears_stack = self.opcode.ends_region();
        if let Some((pops, pushes)) = self.opcode.fixed_arity() {
            return StackBehavior {
                pops,
                pushes,
                clears_stack,
            };
        }

        let (pops, pushes) = match (self.opcode, &self.operand) {
            (Opcode::Ret, _) => (u16::from(method_returns), 0),
            (Opcode::Newobj, Operand::Method(method)) => (method.params, 1),
            (Opcode::Calli, Operand::Method(method)) => (
                method.argument_slots() + 1,
                u16::from(method.returns_value),
            ),
            (_, Operand::Method(method)) => {
                (method.argument_slots(), u16::from(method.returns_value))
            }
            // A call without signature: the consumed values are unknown, the translator
            // clears the stack anyway.
            (Opcode::Newobj, _) => (0, 1),
            _ => (0, 0),
        };
        StackBehavior {
            pops,
            pushes,
            clears_stack,
        }
    }

    /// Returns `true` if `other` denotes the same instruction of the original body.
    #[must_use]
    pub fn same_origin(&self, other: &Instruction) -> bool {
        self.offset == other.offset && self.opcode == other.opcode && self.operand == other.operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Float32(v) => write!(f, " {v}"),
            Operand::Float64(v) => write!(f, " {v}"),
            Operand::Local(i) => write!(f, " V_{i}"),
            Operand::Argument(i) => write!(f, " A_{i}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Field(field) => write!(f, " {}", field.full_name),
            Operand::Method(method) => write!(f, " {}", method.full_name),
            Operand::Type(ty) => write!(f, " {}", ty.full_name),
            Operand::Token(token) => write!(f, " {token}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::assembly::{Instruction, MethodRef, Opcode, Operand, Token, TypeRef};

    #[test]
    fn test_call_stack_behavior() {
        let method = MethodRef::new(Token::new(0x0A00_0001), "int32 C::F(int32, int32)", 2, true);
        let call = Instruction::call(method.clone());
        let behavior = call.stack_behavior(false);
        assert_eq!(behavior.pops, 2);
        assert_eq!(behavior.pushes, 1);

        let callvirt = Instruction::new(Opcode::Callvirt, Operand::Method(method.with_this()));
        assert_eq!(callvirt.stack_behavior(false).pops, 3);
    }

    #[test]
    fn test_ret_depends_on_method() {
        let ret = Instruction::simple(Opcode::Ret);
        assert_eq!(ret.stack_behavior(true).pops, 1);
        assert_eq!(ret.stack_behavior(false).pops, 0);
    }

    #[test]
    fn test_leave_clears_stack() {
        assert!(Instruction::simple(Opcode::Leave).stack_behavior(false).clears_stack);
        assert!(!Instruction::simple(Opcode::Add).stack_behavior(false).clears_stack);
    }

    #[test]
    fn test_primitive_sizes() {
        let int32 = TypeRef::new(Token::new(0x0100_0001), "System.Int32");
        let guid = TypeRef::new(Token::new(0x0100_0002), "System.Guid");
        let string = TypeRef::new(Token::new(0x0100_0003), "System.String");
        assert_eq!(int32.primitive_size(), Some(4));
        assert_eq!(guid.primitive_size(), Some(16));
        assert_eq!(string.primitive_size(), None);
    }

    #[test]
    fn test_display() {
        let instr = Instruction::ldc_i4(42).at(0x10);
        assert_eq!(instr.to_string(), "IL_0010: ldc.i4 42");
    }
}
