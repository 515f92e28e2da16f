//! Symbolic translation of CIL instructions.
//!
//! [`InterpretationContext::execute`] applies one instruction to the abstract machine
//! state. Integer arithmetic on bitvector values is kept as a term so that the solver can
//! reason about it later; everything the model does not track (floats, objects, array
//! elements, call results) becomes an opaque unknown.
//!
//! # Supported Operations
//!
//! | Category | Opcodes | Result |
//! |----------|---------|--------|
//! | Slots | `ldarg ldloc starg stloc` | slot value, non-bitvectors stored as unknown |
//! | Addresses | `ldloca ldarga ldind.i4` | one level of address tracking |
//! | Arithmetic | `add sub mul div rem and or xor shl shr neg not` (+ `.un`) | 32-bit term |
//! | Checked | `add.ovf sub.ovf mul.ovf` (+ `.un`) | term guarded by the overflow condition |
//! | Compare | `ceq cgt clt` (+ `.un`) | constant when both sides are numerals |
//! | Narrowing | `conv.i1 conv.i2 conv.u1 conv.u2 conv.i4 conv.u4` | masked or sign-extended term |
//! | Calls, region exits | `call calli callvirt newobj leave endfinally endfilter throw rethrow` | stack cleared, results unknown |

use crate::{
    analysis::symbolic::{CompareOp, Formula, OverflowOp, SymbolicExpr, SymbolicOp, SymbolicValue},
    assembly::{Instruction, Opcode, Operand},
    deobfuscation::context::InterpretationContext,
    Result,
};

/// Maps a comparing opcode to its predicate.
///
/// Returns the predicate and whether the opcode tests its negation (`bne.un`). Used both
/// for `c*` comparisons and for the conditional branches so that both share one meaning.
#[must_use]
pub fn comparison_predicate(opcode: Opcode) -> Option<(CompareOp, bool)> {
    let predicate = match opcode {
        Opcode::Beq | Opcode::Ceq => (CompareOp::Eq, false),
        Opcode::BneUn => (CompareOp::Eq, true),
        Opcode::Bge => (CompareOp::GeS, false),
        Opcode::Bgt | Opcode::Cgt => (CompareOp::GtS, false),
        Opcode::Ble => (CompareOp::LeS, false),
        Opcode::Blt | Opcode::Clt => (CompareOp::LtS, false),
        Opcode::BgeUn => (CompareOp::GeU, false),
        Opcode::BgtUn | Opcode::CgtUn => (CompareOp::GtU, false),
        Opcode::BleUn => (CompareOp::LeU, false),
        Opcode::BltUn | Opcode::CltUn => (CompareOp::LtU, false),
        _ => return None,
    };
    Some(predicate)
}

/// Builds the "branch is taken" formula of a conditional branch.
///
/// `operands` are the values the branch pops, bottom first. Returns `None` when an operand
/// is not a bitvector or the opcode is not a conditional branch.
#[must_use]
pub fn branch_formula(opcode: Opcode, operands: &[SymbolicValue]) -> Option<Formula> {
    match (opcode, operands) {
        (Opcode::Brtrue, [value]) => Some(
            Formula::eq(value.as_bitvector()?.clone(), SymbolicExpr::constant(0)).negate(),
        ),
        (Opcode::Brfalse, [value]) => Some(Formula::eq(
            value.as_bitvector()?.clone(),
            SymbolicExpr::constant(0),
        )),
        (_, [left, right]) => {
            let (op, negated) = comparison_predicate(opcode)?;
            let formula = Formula::compare(
                op,
                left.as_bitvector()?.clone(),
                right.as_bitvector()?.clone(),
            );
            Some(if negated { formula.negate() } else { formula })
        }
        _ => None,
    }
}

fn binary_op(opcode: Opcode) -> Option<SymbolicOp> {
    let op = match opcode {
        Opcode::Add => SymbolicOp::Add,
        Opcode::Sub => SymbolicOp::Sub,
        Opcode::Mul => SymbolicOp::Mul,
        Opcode::Div => SymbolicOp::DivS,
        Opcode::DivUn => SymbolicOp::DivU,
        Opcode::Rem => SymbolicOp::RemS,
        Opcode::RemUn => SymbolicOp::RemU,
        Opcode::And => SymbolicOp::And,
        Opcode::Or => SymbolicOp::Or,
        Opcode::Xor => SymbolicOp::Xor,
        Opcode::Shl => SymbolicOp::Shl,
        Opcode::Shr => SymbolicOp::ShrS,
        Opcode::ShrUn => SymbolicOp::ShrU,
        _ => return None,
    };
    Some(op)
}

fn checked_op(opcode: Opcode) -> Option<(OverflowOp, bool)> {
    let op = match opcode {
        Opcode::AddOvf => (OverflowOp::Add, true),
        Opcode::AddOvfUn => (OverflowOp::Add, false),
        Opcode::SubOvf => (OverflowOp::Sub, true),
        Opcode::SubOvfUn => (OverflowOp::Sub, false),
        Opcode::MulOvf => (OverflowOp::Mul, true),
        Opcode::MulOvfUn => (OverflowOp::Mul, false),
        _ => return None,
    };
    Some(op)
}

impl InterpretationContext {
    /// Applies one instruction to the machine state.
    ///
    /// Conditional branches and `switch` only consume their operands here; the solvers
    /// inspect those operands before executing the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when an instruction lacks the operand its
    /// opcode requires.
    pub fn execute(&mut self, instr: &Instruction) -> Result<()> {
        match instr.opcode {
            Opcode::Nop | Opcode::Br => {}
            Opcode::Ldarg => {
                let value = self.argument(slot(instr)?);
                self.stack_mut().push(value);
            }
            Opcode::Ldloc => {
                let value = self.local(slot(instr)?);
                self.stack_mut().push(value);
            }
            Opcode::Starg => {
                let value = self.pop_storable();
                self.set_argument(slot(instr)?, value);
            }
            Opcode::Stloc => {
                let value = self.pop_storable();
                self.set_local(slot(instr)?, value);
            }
            Opcode::Ldloca => {
                let index = slot(instr)?;
                let value = self.local(index);
                self.invalidate_local(index);
                self.stack_mut().push(SymbolicValue::Address(Box::new(value)));
            }
            Opcode::Ldarga => {
                let index = slot(instr)?;
                let value = self.argument(index);
                self.invalidate_argument(index);
                self.stack_mut().push(SymbolicValue::Address(Box::new(value)));
            }
            Opcode::LdindI4 => {
                let value = match self.stack_mut().pop() {
                    SymbolicValue::Address(inner) if inner.as_bitvector().is_some() => *inner,
                    _ => self.stack_mut().unknown(),
                };
                self.stack_mut().push(value);
            }
            Opcode::LdcI4 => {
                let value = instr
                    .i32_operand()
                    .ok_or_else(|| malformed_error!("{} without 32-bit immediate", instr))?;
                self.stack_mut().push(SymbolicValue::constant(value));
            }
            Opcode::Dup => self.stack_mut().duplicate_top(),
            Opcode::Box | Opcode::UnboxAny | Opcode::ConvI4 | Opcode::ConvU4 => {
                let value = self.stack_mut().pop();
                self.stack_mut().push(value);
            }
            Opcode::ConvI1 => self.narrow(|e| sign_extend(e, 24)),
            Opcode::ConvI2 => self.narrow(|e| sign_extend(e, 16)),
            Opcode::ConvU1 => self.narrow(|e| mask(e, 0xff)),
            Opcode::ConvU2 => self.narrow(|e| mask(e, 0xffff)),
            Opcode::Neg | Opcode::Not => {
                let op = if instr.opcode == Opcode::Neg {
                    SymbolicOp::Neg
                } else {
                    SymbolicOp::Not
                };
                self.narrow(|e| SymbolicExpr::unary(op, e));
            }
            Opcode::Ceq | Opcode::Cgt | Opcode::CgtUn | Opcode::Clt | Opcode::CltUn => {
                self.compare(instr.opcode);
            }
            Opcode::Ldsfld => {
                let Operand::Field(field) = &instr.operand else {
                    return Err(malformed_error!("{} without field operand", instr));
                };
                self.stack_mut().push(SymbolicValue::FieldRef(field.clone()));
            }
            Opcode::Ldlen => {
                let value = match self.stack_mut().pop() {
                    SymbolicValue::FieldRef(field) if field.is_zero_length_array() => {
                        SymbolicValue::constant(0)
                    }
                    _ => self.stack_mut().unknown(),
                };
                self.stack_mut().push(value);
            }
            Opcode::Sizeof => {
                let size = match &instr.operand {
                    Operand::Type(ty) => ty.primitive_size(),
                    _ => None,
                };
                let value = match size {
                    Some(size) => SymbolicValue::constant(size),
                    None => self.stack_mut().unknown(),
                };
                self.stack_mut().push(value);
            }
            opcode if opcode.is_call() || opcode.ends_region() => {
                let behavior = instr.stack_behavior(self.method_returns());
                self.stack_mut().clear();
                self.stack_mut().push_unknowns(usize::from(behavior.pushes));
            }
            opcode => {
                if let Some(op) = binary_op(opcode) {
                    self.arithmetic(op);
                } else if let Some((op, signed)) = checked_op(opcode) {
                    self.checked_arithmetic(op, signed);
                } else {
                    let behavior = instr.stack_behavior(self.method_returns());
                    self.stack_mut().pop_n(usize::from(behavior.pops));
                    self.stack_mut().push_unknowns(usize::from(behavior.pushes));
                }
            }
        }
        Ok(())
    }

    /// Pops a value for a slot store; only bitvectors keep their identity.
    fn pop_storable(&mut self) -> SymbolicValue {
        match self.stack_mut().pop() {
            value @ SymbolicValue::Bitvector(_) => value,
            _ => self.stack_mut().unknown(),
        }
    }

    fn narrow(&mut self, f: impl FnOnce(SymbolicExpr) -> SymbolicExpr) {
        let value = match self.stack_mut().pop() {
            SymbolicValue::Bitvector(expr) => SymbolicValue::Bitvector(f(expr)),
            _ => self.stack_mut().unknown(),
        };
        self.stack_mut().push(value);
    }

    fn pop_pair(&mut self) -> Option<(SymbolicExpr, SymbolicExpr)> {
        let right = self.stack_mut().pop();
        let left = self.stack_mut().pop();
        match (left, right) {
            (SymbolicValue::Bitvector(l), SymbolicValue::Bitvector(r)) => Some((l, r)),
            _ => None,
        }
    }

    fn arithmetic(&mut self, op: SymbolicOp) {
        let value = match self.pop_pair() {
            Some((l, r)) => SymbolicValue::Bitvector(SymbolicExpr::binary(op, l, r)),
            None => self.stack_mut().unknown(),
        };
        self.stack_mut().push(value);
    }

    fn checked_arithmetic(&mut self, op: OverflowOp, signed: bool) {
        let value = match self.pop_pair() {
            Some((l, r)) => {
                let overflowed = SymbolicExpr::named(self.stack_mut().unknown_symbol());
                SymbolicValue::Bitvector(SymbolicExpr::ite(
                    Formula::no_overflow(op, signed, l.clone(), r.clone()),
                    SymbolicExpr::binary(op.arithmetic(), l, r),
                    overflowed,
                ))
            }
            None => self.stack_mut().unknown(),
        };
        self.stack_mut().push(value);
    }

    fn compare(&mut self, opcode: Opcode) {
        let decided = self.pop_pair().and_then(|(l, r)| {
            let (op, _) = comparison_predicate(opcode)?;
            Some(op.eval(l.numeral()?, r.numeral()?))
        });
        let value = match decided {
            Some(holds) => SymbolicValue::constant(i32::from(holds)),
            None => self.stack_mut().unknown(),
        };
        self.stack_mut().push(value);
    }
}

fn slot(instr: &Instruction) -> Result<u16> {
    instr
        .slot_operand()
        .ok_or_else(|| malformed_error!("{} without slot operand", instr))
}

fn sign_extend(expr: SymbolicExpr, shift: i32) -> SymbolicExpr {
    let shift_expr = SymbolicExpr::constant(shift);
    SymbolicExpr::binary(
        SymbolicOp::ShrS,
        SymbolicExpr::binary(SymbolicOp::Shl, expr, shift_expr.clone()),
        shift_expr,
    )
}

fn mask(expr: SymbolicExpr, bits: i32) -> SymbolicExpr {
    SymbolicExpr::binary(SymbolicOp::And, expr, SymbolicExpr::constant(bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{cfg::MethodBodyBuilder, symbolic::Z3Solver},
        assembly::{FieldRef, MethodRef, Token, TypeRef},
        Error,
    };

    fn context(params: u16, locals: u16, zero_locals: bool) -> InterpretationContext {
        let body = MethodBodyBuilder::new(params, locals, false)
            .build_with(|m| {
                m.block(0, |b| b.ret());
            })
            .unwrap();
        InterpretationContext::new(&body, zero_locals)
    }

    fn run(ctx: &mut InterpretationContext, instrs: &[Instruction]) {
        for instr in instrs {
            ctx.execute(instr).unwrap();
        }
    }

    #[test]
    fn test_arithmetic_folds() {
        let mut ctx = context(0, 0, true);
        run(
            &mut ctx,
            &[
                Instruction::ldc_i4(6),
                Instruction::ldc_i4(7),
                Instruction::simple(Opcode::Mul),
                Instruction::ldc_i4(2),
                Instruction::simple(Opcode::Sub),
            ],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(40));
    }

    #[test]
    fn test_locals_and_stores() {
        let mut ctx = context(1, 2, true);
        run(
            &mut ctx,
            &[
                Instruction::ldarg(0),
                Instruction::stloc(1),
                Instruction::simple(Opcode::Ldnull),
                Instruction::stloc(0),
            ],
        );
        assert_eq!(ctx.local(1), SymbolicValue::symbol("arg0"));
        assert!(ctx.local(0).is_unknown());
    }

    #[test]
    fn test_address_roundtrip_one_level() {
        let mut ctx = context(0, 1, true);
        run(
            &mut ctx,
            &[Instruction::ldloca(0), Instruction::simple(Opcode::LdindI4)],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(0));
        // the local itself no longer has a known value
        assert!(ctx.local(0).is_unknown());
    }

    #[test]
    fn test_non_bitvector_operands_are_unknown() {
        let mut ctx = context(0, 0, true);
        run(
            &mut ctx,
            &[
                Instruction::simple(Opcode::Ldstr),
                Instruction::ldc_i4(1),
                Instruction::simple(Opcode::Add),
            ],
        );
        assert!(ctx.stack().peek().is_some_and(SymbolicValue::is_unknown));
    }

    #[test]
    fn test_compare_needs_numerals() {
        let mut ctx = context(1, 0, true);
        run(
            &mut ctx,
            &[
                Instruction::ldc_i4(-1),
                Instruction::ldc_i4(1),
                Instruction::simple(Opcode::CgtUn),
            ],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(1));

        run(
            &mut ctx,
            &[
                Instruction::ldc_i4(-1),
                Instruction::ldc_i4(1),
                Instruction::simple(Opcode::Cgt),
            ],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(0));

        run(
            &mut ctx,
            &[
                Instruction::ldarg(0),
                Instruction::ldc_i4(1),
                Instruction::simple(Opcode::Ceq),
            ],
        );
        assert!(ctx.stack().peek().is_some_and(SymbolicValue::is_unknown));
    }

    #[test]
    fn test_calls_clear_stack() {
        let mut ctx = context(0, 0, true);
        let method = MethodRef::new(Token::new(0x0A00_0001), "Foo::Bar", 1, true);
        run(
            &mut ctx,
            &[
                Instruction::ldc_i4(1),
                Instruction::ldc_i4(2),
                Instruction::call(method),
            ],
        );
        assert_eq!(ctx.stack().len(), 1);
        assert!(ctx.stack().peek().is_some_and(SymbolicValue::is_unknown));
    }

    #[test]
    fn test_empty_types_length() {
        let mut ctx = context(0, 0, true);
        let field = FieldRef::new(Token::new(0x0A00_0002), FieldRef::EMPTY_TYPES);
        run(
            &mut ctx,
            &[
                Instruction::ldsfld(field),
                Instruction::simple(Opcode::Ldlen),
            ],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(0));
    }

    #[test]
    fn test_sizeof_primitive() {
        let mut ctx = context(0, 0, true);
        let ty = TypeRef::new(Token::new(0x0100_0001), "System.Int64");
        run(&mut ctx, &[Instruction::new(Opcode::Sizeof, Operand::Type(ty))]);
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(8));
    }

    #[test]
    fn test_narrowing() {
        let mut ctx = context(0, 0, true);
        run(
            &mut ctx,
            &[Instruction::ldc_i4(0x1ff), Instruction::simple(Opcode::ConvI1)],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(-1));
        run(
            &mut ctx,
            &[Instruction::ldc_i4(0x1ff), Instruction::simple(Opcode::ConvU1)],
        );
        assert_eq!(ctx.stack().peek().and_then(SymbolicValue::numeral), Some(0xff));
    }

    #[test]
    fn test_checked_add_is_guarded() {
        let mut ctx = context(1, 0, true);
        run(
            &mut ctx,
            &[
                Instruction::ldarg(0),
                Instruction::ldc_i4(1),
                Instruction::simple(Opcode::AddOvf),
            ],
        );
        let Some(SymbolicValue::Bitvector(sum)) = ctx.stack().peek().cloned() else {
            panic!("expected a bitvector");
        };
        assert!(matches!(sum, SymbolicExpr::Ite { .. }));
        // only the overflow branch can equal arg0
        let formula = Formula::eq(sum, SymbolicExpr::named("arg0"));
        assert_eq!(Z3Solver::new().decide(&formula), None);
    }

    #[test]
    fn test_branch_formula_shapes() {
        let x = SymbolicValue::symbol("arg0");
        let taken = branch_formula(Opcode::Brtrue, std::slice::from_ref(&x)).unwrap();
        assert_eq!(
            taken,
            Formula::eq(SymbolicExpr::named("arg0"), SymbolicExpr::constant(0)).negate()
        );
        assert_ne!(
            branch_formula(Opcode::Blt, &[x.clone(), x.clone()]),
            branch_formula(Opcode::BltUn, &[x.clone(), x.clone()])
        );
        assert!(branch_formula(Opcode::Beq, &[x, SymbolicValue::Unknown(0)]).is_none());
    }

    #[test]
    fn test_missing_operand() {
        let mut ctx = context(0, 0, true);
        let result = ctx.execute(&Instruction::simple(Opcode::LdcI4));
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }
}
