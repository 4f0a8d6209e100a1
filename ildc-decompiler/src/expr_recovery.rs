//! Stack-simulating expression recovery.
//!
//! [`ExpressionDecompiler`] interprets one instruction at a time against a
//! [`StackModel`]. Value-producing instructions push expression trees; the
//! rest report an [`Effect`] the action-flow builder turns into an action.

use std::rc::Rc;

use ildc_ir::expr::{BinaryOperator, Expression, Literal, UnaryOperator};
use ildc_ir::instruction::{Instruction, Opcode, Operand};
use ildc_ir::metadata::{FieldRef, MethodRef, TypeRef};
use ildc_ir::variables::{ArgumentSlot, VariableTable};

use crate::error::{DecompileError, Result};
use crate::stack::StackModel;

/// Statement-shaped outcome of one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Store into a local, argument, field or array element.
    Assign(Expression),
    /// Call whose result is discarded.
    Invoke(Expression),
    Return(Option<Expression>),
    /// `None` rethrows the exception being handled.
    Throw(Option<Expression>),
    Branch { target: u32 },
    /// Control goes to `target` when `condition` holds.
    ConditionalBranch { condition: Expression, target: u32 },
    Switch { value: Expression, targets: Vec<u32> },
    EndHandler,
}

/// Opcode-dispatch interpreter over a simulated evaluation stack.
#[derive(Debug, Clone)]
pub struct ExpressionDecompiler<'a> {
    method: &'a MethodRef,
    variables: &'a VariableTable,
    stack: StackModel,
}

impl<'a> ExpressionDecompiler<'a> {
    pub fn new(method: &'a MethodRef, variables: &'a VariableTable) -> Self {
        ExpressionDecompiler {
            method,
            variables,
            stack: StackModel::new(),
        }
    }

    pub fn method(&self) -> &'a MethodRef {
        self.method
    }

    pub fn stack(&self) -> &StackModel {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut StackModel {
        &mut self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Interpret one instruction.
    pub fn step(&mut self, insn: &Instruction) -> Result<Option<Effect>> {
        let offset = insn.offset;
        let effect = match insn.opcode {
            Opcode::Nop => None,
            Opcode::Dup => {
                let top = self
                    .stack
                    .peek()
                    .cloned()
                    .ok_or_else(|| self.underflow(offset))?;
                self.stack.push_shared(top);
                None
            }
            Opcode::Pop => Some(Effect::Invoke(self.pop(offset)?)),

            Opcode::Ldarg | Opcode::Ldarga => {
                let slot = self.argument_operand(insn)?;
                let expr = self.argument(slot, offset)?;
                self.stack.push(expr);
                None
            }
            Opcode::Starg => {
                let slot = self.argument_operand(insn)?;
                let target = self.argument(slot, offset)?;
                let ty = target.static_type();
                self.store(target, ty, offset)?
            }
            Opcode::Ldloc | Opcode::Ldloca => {
                let target = self.local(insn)?;
                self.stack.push(target);
                None
            }
            Opcode::Stloc => {
                let target = self.local(insn)?;
                let ty = target.static_type();
                self.store(target, ty, offset)?
            }

            Opcode::Ldnull => self.push(Expression::null()),
            Opcode::LdcI4 => match insn.operand {
                Operand::Int32(v) => self.push(Expression::int(v)),
                _ => return Err(self.operand_mismatch(insn)),
            },
            Opcode::LdcI8 => match insn.operand {
                Operand::Int64(v) => self.push(Expression::Literal(Literal::Int64(v))),
                _ => return Err(self.operand_mismatch(insn)),
            },
            Opcode::LdcR4 => match insn.operand {
                Operand::Float32(v) => self.push(Expression::Literal(Literal::Float32(v))),
                _ => return Err(self.operand_mismatch(insn)),
            },
            Opcode::LdcR8 => match insn.operand {
                Operand::Float64(v) => self.push(Expression::Literal(Literal::Float64(v))),
                _ => return Err(self.operand_mismatch(insn)),
            },
            Opcode::Ldstr => match &insn.operand {
                Operand::String(s) => self.push(Expression::Literal(Literal::String(s.clone()))),
                _ => return Err(self.operand_mismatch(insn)),
            },

            Opcode::Ldfld | Opcode::Ldflda => {
                let field = self.field_operand(insn)?.clone();
                let target = self.pop(offset)?;
                self.push(Expression::FieldRef {
                    target: Some(Box::new(target)),
                    field,
                })
            }
            Opcode::Ldsfld => {
                let field = self.field_operand(insn)?.clone();
                self.push(Expression::FieldRef {
                    target: None,
                    field,
                })
            }
            Opcode::Stfld => {
                let field = self.field_operand(insn)?.clone();
                let value = self.pop(offset)?;
                let target = self.pop(offset)?;
                let value = coerce(value, &field.field_type);
                Some(Effect::Assign(Expression::Assign {
                    target: Box::new(Expression::FieldRef {
                        target: Some(Box::new(target)),
                        field,
                    }),
                    value: Box::new(value),
                }))
            }
            Opcode::Stsfld => {
                let field = self.field_operand(insn)?.clone();
                let ty = Some(field.field_type.clone());
                let target = Expression::FieldRef {
                    target: None,
                    field,
                };
                self.store(target, ty, offset)?
            }

            Opcode::Add => self.binary(BinaryOperator::Add, offset)?,
            Opcode::Sub => self.binary(BinaryOperator::Subtract, offset)?,
            Opcode::Mul => self.binary(BinaryOperator::Multiply, offset)?,
            Opcode::Div | Opcode::DivUn => self.binary(BinaryOperator::Divide, offset)?,
            Opcode::Rem | Opcode::RemUn => self.binary(BinaryOperator::Modulus, offset)?,
            Opcode::And => self.binary(BinaryOperator::BitwiseAnd, offset)?,
            Opcode::Or => self.binary(BinaryOperator::BitwiseOr, offset)?,
            Opcode::Xor => self.binary(BinaryOperator::ExclusiveOr, offset)?,
            Opcode::Shl => self.binary(BinaryOperator::LeftShift, offset)?,
            Opcode::Shr | Opcode::ShrUn => self.binary(BinaryOperator::RightShift, offset)?,
            Opcode::Neg => {
                let operand = self.pop(offset)?;
                self.push(Expression::unary(UnaryOperator::Negate, operand))
            }
            Opcode::Not => {
                let operand = self.pop(offset)?;
                self.push(Expression::unary(UnaryOperator::BitwiseNot, operand))
            }

            Opcode::Ceq => {
                let right = self.pop(offset)?;
                let left = self.pop(offset)?;
                self.push(equality(left, right))
            }
            Opcode::Cgt => self.binary(BinaryOperator::GreaterThan, offset)?,
            Opcode::CgtUn => {
                let right = self.pop(offset)?;
                let left = self.pop(offset)?;
                let expr = if right.is_null() {
                    match left {
                        // `(x as T) != null` is how `x is T` compiles
                        Expression::SafeCast { ty, operand } => Expression::CanCast { ty, operand },
                        left => Expression::binary(
                            BinaryOperator::IdentityInequality,
                            left,
                            right,
                        ),
                    }
                } else {
                    Expression::binary(BinaryOperator::GreaterThan, left, right)
                };
                self.push(expr)
            }
            Opcode::Clt | Opcode::CltUn => self.binary(BinaryOperator::LessThan, offset)?,

            Opcode::Br | Opcode::Leave => Some(Effect::Branch {
                target: self.branch_operand(insn)?,
            }),
            Opcode::Brtrue | Opcode::Brfalse => {
                let target = self.branch_operand(insn)?;
                let value = self.pop(offset)?;
                let condition = truthiness(value);
                let condition = if insn.opcode == Opcode::Brfalse {
                    condition.negate()
                } else {
                    condition
                };
                Some(Effect::ConditionalBranch { condition, target })
            }
            Opcode::Beq
            | Opcode::BneUn
            | Opcode::Bge
            | Opcode::BgeUn
            | Opcode::Bgt
            | Opcode::BgtUn
            | Opcode::Ble
            | Opcode::BleUn
            | Opcode::Blt
            | Opcode::BltUn => {
                let target = self.branch_operand(insn)?;
                let right = self.pop(offset)?;
                let left = self.pop(offset)?;
                let condition = match insn.opcode {
                    Opcode::Beq => equality(left, right),
                    Opcode::BneUn => equality(left, right).negate(),
                    Opcode::Bge | Opcode::BgeUn => {
                        Expression::binary(BinaryOperator::GreaterThanOrEqual, left, right)
                    }
                    Opcode::Bgt | Opcode::BgtUn => {
                        Expression::binary(BinaryOperator::GreaterThan, left, right)
                    }
                    Opcode::Ble | Opcode::BleUn => {
                        Expression::binary(BinaryOperator::LessThanOrEqual, left, right)
                    }
                    _ => Expression::binary(BinaryOperator::LessThan, left, right),
                };
                Some(Effect::ConditionalBranch { condition, target })
            }
            Opcode::Switch => {
                let targets = match &insn.operand {
                    Operand::Switch(targets) => targets.clone(),
                    _ => return Err(self.operand_mismatch(insn)),
                };
                let value = self.pop(offset)?;
                Some(Effect::Switch { value, targets })
            }

            Opcode::Ret => {
                if self.method.returns_void() {
                    Some(Effect::Return(None))
                } else {
                    let value = self.pop(offset)?;
                    Some(Effect::Return(Some(coerce(value, &self.method.return_type))))
                }
            }
            Opcode::Throw => Some(Effect::Throw(Some(self.pop(offset)?))),
            Opcode::Rethrow => Some(Effect::Throw(None)),
            Opcode::Endfinally => Some(Effect::EndHandler),
            Opcode::Endfilter => {
                self.pop(offset)?;
                Some(Effect::EndHandler)
            }

            Opcode::Call | Opcode::Callvirt => self.call(insn)?,
            Opcode::Newobj => {
                let constructor = self.method_operand(insn)?.clone();
                let arguments = self.arguments(&constructor, offset)?;
                self.push(Expression::ObjectCreation {
                    constructor,
                    arguments,
                })
            }
            Opcode::Newarr => {
                let element_type = self.type_operand(insn)?.clone();
                let size = self.pop(offset)?;
                self.push(Expression::ArrayCreation {
                    element_type,
                    size: Box::new(size),
                })
            }
            Opcode::Ldlen => {
                let array = self.pop(offset)?;
                self.push(Expression::MethodInvocation {
                    target: Some(Box::new(array)),
                    method: array_length(),
                    arguments: vec![],
                })
            }
            Opcode::Ldelem | Opcode::Ldelema => {
                let index = self.pop(offset)?;
                let array = self.pop(offset)?;
                self.push(Expression::ArrayIndexer {
                    array: Box::new(array),
                    index: Box::new(index),
                })
            }
            Opcode::Stelem => {
                let value = self.pop(offset)?;
                let index = self.pop(offset)?;
                let array = self.pop(offset)?;
                Some(Effect::Assign(Expression::Assign {
                    target: Box::new(Expression::ArrayIndexer {
                        array: Box::new(array),
                        index: Box::new(index),
                    }),
                    value: Box::new(value),
                }))
            }

            Opcode::Castclass | Opcode::Unbox | Opcode::UnboxAny => {
                let ty = self.type_operand(insn)?.clone();
                let operand = self.pop(offset)?;
                self.push(Expression::Cast {
                    ty,
                    operand: Box::new(operand),
                })
            }
            Opcode::Isinst => {
                let ty = self.type_operand(insn)?.clone();
                let operand = self.pop(offset)?;
                self.push(Expression::SafeCast {
                    ty,
                    operand: Box::new(operand),
                })
            }
            // boxing is invisible at source level
            Opcode::Box => {
                self.type_operand(insn)?;
                None
            }
            Opcode::ConvI1
            | Opcode::ConvI2
            | Opcode::ConvI4
            | Opcode::ConvI8
            | Opcode::ConvU1
            | Opcode::ConvU2
            | Opcode::ConvU4
            | Opcode::ConvU8
            | Opcode::ConvR4
            | Opcode::ConvR8 => {
                let operand = self.pop(offset)?;
                let ty = insn
                    .opcode
                    .conversion_type()
                    .unwrap_or_else(TypeRef::int32);
                self.push(Expression::Cast {
                    ty,
                    operand: Box::new(operand),
                })
            }
            Opcode::Ldtoken => {
                let ty = self.type_operand(insn)?.clone();
                self.push(Expression::TypeOf(ty))
            }
        };
        Ok(effect)
    }

    fn push(&mut self, expr: Expression) -> Option<Effect> {
        self.stack.push(expr);
        None
    }

    fn pop(&mut self, offset: u32) -> Result<Expression> {
        self.stack.pop().ok_or_else(|| self.underflow(offset))
    }

    fn underflow(&self, offset: u32) -> DecompileError {
        DecompileError::inconsistent_stack(self.method, offset, "pop from an empty stack")
    }

    fn binary(&mut self, op: BinaryOperator, offset: u32) -> Result<Option<Effect>> {
        let right = self.pop(offset)?;
        let left = self.pop(offset)?;
        Ok(self.push(Expression::binary(op, left, right)))
    }

    /// Store the popped value into `target`.
    ///
    /// When the value was duplicated first (`dup; stloc`), the copy left on
    /// the stack is replaced by the assignment itself, so the store becomes an
    /// embedded assignment expression instead of a statement.
    fn store(
        &mut self,
        target: Expression,
        ty: Option<TypeRef>,
        offset: u32,
    ) -> Result<Option<Effect>> {
        let value = self
            .stack
            .pop_shared()
            .ok_or_else(|| self.underflow(offset))?;
        let embedded = self
            .stack
            .peek()
            .is_some_and(|top| Rc::ptr_eq(top, &value));
        if embedded {
            self.stack.pop_shared();
        }
        let mut value = Rc::unwrap_or_clone(value);
        if let Some(ty) = &ty {
            value = coerce(value, ty);
        }
        let assign = Expression::Assign {
            target: Box::new(target),
            value: Box::new(value),
        };
        if embedded {
            Ok(self.push(assign))
        } else {
            Ok(Some(Effect::Assign(assign)))
        }
    }

    fn call(&mut self, insn: &Instruction) -> Result<Option<Effect>> {
        let method = self.method_operand(insn)?.clone();
        let mut arguments = self.arguments(&method, insn.offset)?;

        // typeof(T) compiles to ldtoken T; call Type::GetTypeFromHandle
        if !method.has_this
            && method.name == "GetTypeFromHandle"
            && method.declaring_type.full_name == "System.Type"
            && matches!(arguments.as_slice(), [Expression::TypeOf(_)])
        {
            if let Some(type_of) = arguments.pop() {
                return Ok(self.push(type_of));
            }
        }

        let target = if method.has_this {
            let receiver = self.pop(insn.offset)?;
            let receiver = if insn.opcode == Opcode::Call
                && receiver == Expression::ThisRef
                && method.declaring_type != self.method.declaring_type
            {
                Expression::BaseRef
            } else {
                receiver
            };
            Some(Box::new(receiver))
        } else {
            None
        };

        let returns_void = method.returns_void();
        let invocation = Expression::MethodInvocation {
            target,
            method,
            arguments,
        };
        if returns_void {
            Ok(Some(Effect::Invoke(invocation)))
        } else {
            Ok(self.push(invocation))
        }
    }

    /// Pop call arguments, coercing literals to the declared parameter types.
    fn arguments(&mut self, method: &MethodRef, offset: u32) -> Result<Vec<Expression>> {
        let values = self
            .stack
            .pop_many(method.parameters.len())
            .ok_or_else(|| self.underflow(offset))?;
        Ok(values
            .into_iter()
            .zip(&method.parameters)
            .map(|(value, ty)| coerce(value, ty))
            .collect())
    }

    fn argument(&self, slot: u16, offset: u32) -> Result<Expression> {
        match self.variables.argument(slot) {
            Some(ArgumentSlot::This) => Ok(Expression::ThisRef),
            Some(ArgumentSlot::Parameter(p)) => Ok(Expression::ArgumentRef(p.clone())),
            None => Err(DecompileError::malformed(
                self.method,
                offset,
                format!("argument slot {slot} is not declared"),
            )),
        }
    }

    fn local(&self, insn: &Instruction) -> Result<Expression> {
        let index = match insn.operand {
            Operand::Variable(index) => index,
            _ => return Err(self.operand_mismatch(insn)),
        };
        self.variables
            .local(index)
            .map(|v| Expression::VariableRef(v.clone()))
            .ok_or_else(|| {
                DecompileError::malformed(
                    self.method,
                    insn.offset,
                    format!("local {index} is not declared"),
                )
            })
    }

    fn argument_operand(&self, insn: &Instruction) -> Result<u16> {
        match insn.operand {
            Operand::Argument(slot) => Ok(slot),
            _ => Err(self.operand_mismatch(insn)),
        }
    }

    fn branch_operand(&self, insn: &Instruction) -> Result<u32> {
        match insn.operand {
            Operand::Branch(target) => Ok(target),
            _ => Err(self.operand_mismatch(insn)),
        }
    }

    fn field_operand<'i>(&self, insn: &'i Instruction) -> Result<&'i FieldRef> {
        match &insn.operand {
            Operand::Field(field) => Ok(field),
            _ => Err(self.operand_mismatch(insn)),
        }
    }

    fn method_operand<'i>(&self, insn: &'i Instruction) -> Result<&'i MethodRef> {
        match &insn.operand {
            Operand::Method(method) => Ok(method),
            _ => Err(self.operand_mismatch(insn)),
        }
    }

    fn type_operand<'i>(&self, insn: &'i Instruction) -> Result<&'i TypeRef> {
        match &insn.operand {
            Operand::Type(ty) => Ok(ty),
            _ => Err(self.operand_mismatch(insn)),
        }
    }

    fn operand_mismatch(&self, insn: &Instruction) -> DecompileError {
        DecompileError::malformed(
            self.method,
            insn.offset,
            format!("operand of {} has the wrong kind", insn.opcode),
        )
    }
}

/// Integer `0`/`1` stored into a boolean slot is `false`/`true`, and a
/// ternary choosing between them is its condition.
pub fn coerce(value: Expression, ty: &TypeRef) -> Expression {
    if !ty.is_boolean() {
        return value;
    }
    match value {
        Expression::Literal(Literal::Int32(0)) => Expression::boolean(false),
        Expression::Literal(Literal::Int32(1)) => Expression::boolean(true),
        Expression::Condition {
            condition,
            then_value,
            else_value,
        } => match (then_value.as_boolean_literal(), else_value.as_boolean_literal()) {
            (Some(true), Some(false)) => *condition,
            (Some(false), Some(true)) => (*condition).negate(),
            _ => Expression::Condition {
                condition,
                then_value: Box::new(coerce(*then_value, ty)),
                else_value: Box::new(coerce(*else_value, ty)),
            },
        },
        other => other,
    }
}

/// `left == right` as produced by `ceq`/`beq`.
///
/// Comparing a boolean-valued expression against zero is its negation;
/// against one it is the expression itself. Comparisons with `null` are
/// identity tests.
fn equality(left: Expression, right: Expression) -> Expression {
    if left.is_boolean_valued() {
        match right.as_boolean_literal() {
            Some(false) => return left.negate(),
            Some(true) => return left,
            None => {}
        }
    }
    if left.is_null() || right.is_null() {
        return Expression::binary(BinaryOperator::IdentityEquality, left, right);
    }
    let right = match left.static_type() {
        Some(ty) => coerce(right, &ty),
        None => right,
    };
    Expression::binary(BinaryOperator::ValueEquality, left, right)
}

/// The condition under which `brtrue` on `value` is taken.
fn truthiness(value: Expression) -> Expression {
    if value.is_boolean_valued() {
        return value;
    }
    match value {
        Expression::SafeCast { ty, operand } => Expression::CanCast { ty, operand },
        value => {
            let zero = match value.static_type() {
                Some(ty) if ty.full_name == "System.Int64" || ty.full_name == "System.UInt64" => {
                    Some(Expression::Literal(Literal::Int64(0)))
                }
                Some(ty) if ty.is_numeric() => Some(Expression::int(0)),
                _ => None,
            };
            match zero {
                Some(zero) => Expression::binary(BinaryOperator::ValueInequality, value, zero),
                None => Expression::binary(
                    BinaryOperator::IdentityInequality,
                    value,
                    Expression::null(),
                ),
            }
        }
    }
}

/// `ldlen` is the `Length` property of the array.
fn array_length() -> MethodRef {
    MethodRef::new(
        TypeRef::new("System.Array"),
        "get_Length",
        vec![],
        TypeRef::int32(),
        true,
    )
}
