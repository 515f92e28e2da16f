//! The closed set of CIL opcodes understood by the deobfuscator.
//!
//! Short and macro encodings (`ldarg.0`, `ldc.i4.s`, `br.s`, ...) are expanded by whoever
//! builds the [`crate::analysis::cfg::MethodBody`], so every opcode appears here exactly once in
//! its canonical form and carries its index or immediate in the [`crate::assembly::Operand`].
//!
//! Anything outside this subset has to be mapped by the host onto the closest opcode with the
//! same stack behavior; the translator treats every opcode it does not model precisely by its
//! declared arity anyway.

use strum::{Display, EnumIter, IntoStaticStr};

/// How an instruction affects control flow.
///
/// Mirrors the flow classification used by CIL disassemblers: the deobfuscator only needs to
/// tell conditional and multi-way terminators apart from everything else, but the full
/// classification is kept for hosts that rebuild or serialize blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Two-way branch (`brtrue`, `beq`, `blt.un`, ...)
    ConditionalBranch,
    /// Unconditional jump (`br`)
    UnconditionalBranch,
    /// Method invocation (`call`, `callvirt`, `calli`, `newobj`)
    Call,
    /// Method return
    Return,
    /// Multi-way dispatch by integer index
    Switch,
    /// Raises or rethrows an exception
    Throw,
    /// Leaves a protected region
    Leave,
    /// Ends a finally, fault or filter block
    EndFinally,
}

/// A canonical CIL opcode.
///
/// The `Display` implementation yields the ECMA-335 mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[allow(missing_docs)]
pub enum Opcode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "ldarga")]
    Ldarga,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca")]
    Ldloca,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "calli")]
    Calli,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "bgt")]
    Bgt,
    #[strum(serialize = "ble")]
    Ble,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "bge.un")]
    BgeUn,
    #[strum(serialize = "bgt.un")]
    BgtUn,
    #[strum(serialize = "ble.un")]
    BleUn,
    #[strum(serialize = "blt.un")]
    BltUn,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "ldind.i4")]
    LdindI4,
    #[strum(serialize = "ldind.i")]
    LdindI,
    #[strum(serialize = "ldind.ref")]
    LdindRef,
    #[strum(serialize = "stind.i4")]
    StindI4,
    #[strum(serialize = "stind.ref")]
    StindRef,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "div.un")]
    DivUn,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "rem.un")]
    RemUn,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "shr")]
    Shr,
    #[strum(serialize = "shr.un")]
    ShrUn,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "add.ovf")]
    AddOvf,
    #[strum(serialize = "add.ovf.un")]
    AddOvfUn,
    #[strum(serialize = "sub.ovf")]
    SubOvf,
    #[strum(serialize = "sub.ovf.un")]
    SubOvfUn,
    #[strum(serialize = "mul.ovf")]
    MulOvf,
    #[strum(serialize = "mul.ovf.un")]
    MulOvfUn,
    #[strum(serialize = "conv.i1")]
    ConvI1,
    #[strum(serialize = "conv.i2")]
    ConvI2,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "conv.i8")]
    ConvI8,
    #[strum(serialize = "conv.u1")]
    ConvU1,
    #[strum(serialize = "conv.u2")]
    ConvU2,
    #[strum(serialize = "conv.u4")]
    ConvU4,
    #[strum(serialize = "conv.u8")]
    ConvU8,
    #[strum(serialize = "conv.i")]
    ConvI,
    #[strum(serialize = "conv.r4")]
    ConvR4,
    #[strum(serialize = "conv.r8")]
    ConvR8,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "cgt.un")]
    CgtUn,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "clt.un")]
    CltUn,
    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "ldflda")]
    Ldflda,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,
    #[strum(serialize = "ldelem.i4")]
    LdelemI4,
    #[strum(serialize = "ldelem.u1")]
    LdelemU1,
    #[strum(serialize = "ldelem.ref")]
    LdelemRef,
    #[strum(serialize = "ldelema")]
    Ldelema,
    #[strum(serialize = "stelem.i1")]
    StelemI1,
    #[strum(serialize = "stelem.i4")]
    StelemI4,
    #[strum(serialize = "stelem.ref")]
    StelemRef,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "castclass")]
    Castclass,
    #[strum(serialize = "isinst")]
    Isinst,
    #[strum(serialize = "sizeof")]
    Sizeof,
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    #[strum(serialize = "ldftn")]
    Ldftn,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "rethrow")]
    Rethrow,
    #[strum(serialize = "leave")]
    Leave,
    #[strum(serialize = "endfinally")]
    Endfinally,
    #[strum(serialize = "endfilter")]
    Endfilter,
}

impl Opcode {
    /// Returns the control flow classification of this opcode.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            Opcode::Brfalse
            | Opcode::Brtrue
            | Opcode::Beq
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt
            | Opcode::BneUn
            | Opcode::BgeUn
            | Opcode::BgtUn
            | Opcode::BleUn
            | Opcode::BltUn => FlowType::ConditionalBranch,
            Opcode::Br => FlowType::UnconditionalBranch,
            Opcode::Switch => FlowType::Switch,
            Opcode::Call | Opcode::Calli | Opcode::Callvirt | Opcode::Newobj => FlowType::Call,
            Opcode::Ret => FlowType::Return,
            Opcode::Throw | Opcode::Rethrow => FlowType::Throw,
            Opcode::Leave => FlowType::Leave,
            Opcode::Endfinally | Opcode::Endfilter => FlowType::EndFinally,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` for two-way conditional branches.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        self.flow_type() == FlowType::ConditionalBranch
    }

    /// Returns `true` for instructions that invoke another method.
    ///
    /// `newobj` counts as a call: it runs a constructor with arbitrary side effects.
    #[must_use]
    pub fn is_call(self) -> bool {
        self.flow_type() == FlowType::Call
    }

    /// Returns `true` for instructions that leave the current region or method and
    /// therefore end the stack's lifetime.
    #[must_use]
    pub fn ends_region(self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::Throw | FlowType::Leave | FlowType::EndFinally
        )
    }

    /// Fixed stack arity as `(pops, pushes)`.
    ///
    /// Returns `None` for opcodes whose arity depends on the operand or on the enclosing
    /// method (`call`, `calli`, `callvirt`, `newobj`, `ret`).
    #[must_use]
    pub fn fixed_arity(self) -> Option<(u16, u16)> {
        let arity = match self {
            Opcode::Call | Opcode::Calli | Opcode::Callvirt | Opcode::Newobj | Opcode::Ret => {
                return None
            }
            Opcode::Nop
            | Opcode::Br
            | Opcode::Rethrow
            | Opcode::Leave
            | Opcode::Endfinally => (0, 0),
            Opcode::Ldarg
            | Opcode::Ldarga
            | Opcode::Ldloc
            | Opcode::Ldloca
            | Opcode::Ldnull
            | Opcode::LdcI4
            | Opcode::LdcI8
            | Opcode::LdcR4
            | Opcode::LdcR8
            | Opcode::Ldstr
            | Opcode::Ldsfld
            | Opcode::Ldsflda
            | Opcode::Sizeof
            | Opcode::Ldtoken
            | Opcode::Ldftn => (0, 1),
            Opcode::Starg
            | Opcode::Stloc
            | Opcode::Pop
            | Opcode::Brfalse
            | Opcode::Brtrue
            | Opcode::Switch
            | Opcode::Stsfld
            | Opcode::Throw
            | Opcode::Endfilter => (1, 0),
            Opcode::Dup => (1, 2),
            Opcode::Beq
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt
            | Opcode::BneUn
            | Opcode::BgeUn
            | Opcode::BgtUn
            | Opcode::BleUn
            | Opcode::BltUn
            | Opcode::StindI4
            | Opcode::StindRef
            | Opcode::Stfld => (2, 0),
            Opcode::LdindI4
            | Opcode::LdindI
            | Opcode::LdindRef
            | Opcode::Neg
            | Opcode::Not
            | Opcode::ConvI1
            | Opcode::ConvI2
            | Opcode::ConvI4
            | Opcode::ConvI8
            | Opcode::ConvU1
            | Opcode::ConvU2
            | Opcode::ConvU4
            | Opcode::ConvU8
            | Opcode::ConvI
            | Opcode::ConvR4
            | Opcode::ConvR8
            | Opcode::Ldfld
            | Opcode::Ldflda
            | Opcode::Newarr
            | Opcode::Ldlen
            | Opcode::Box
            | Opcode::UnboxAny
            | Opcode::Castclass
            | Opcode::Isinst => (1, 1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::DivUn
            | Opcode::Rem
            | Opcode::RemUn
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::ShrUn
            | Opcode::AddOvf
            | Opcode::AddOvfUn
            | Opcode::SubOvf
            | Opcode::SubOvfUn
            | Opcode::MulOvf
            | Opcode::MulOvfUn
            | Opcode::Ceq
            | Opcode::Cgt
            | Opcode::CgtUn
            | Opcode::Clt
            | Opcode::CltUn
            | Opcode::LdelemI4
            | Opcode::LdelemU1
            | Opcode::LdelemRef
            | Opcode::Ldelema => (2, 1),
            Opcode::StelemI1 | Opcode::StelemI4 | Opcode::StelemRef => (3, 0),
        };
        Some(arity)
    }
}
