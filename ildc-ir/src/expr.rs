use std::fmt;

use crate::metadata::{FieldRef, MethodRef, TypeRef};
use crate::variables::{Parameter, Variable};

/// Expression tree nodes for decompiled code.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// A local variable.
    VariableRef(Variable),
    /// A declared parameter.
    ArgumentRef(Parameter),
    /// Instance field (`target` present) or static field.
    FieldRef {
        target: Option<Box<Expression>>,
        field: FieldRef,
    },
    /// `this`
    ThisRef,
    /// `base`
    BaseRef,
    /// Binary operation: `left op right`
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Unary operation: `op operand`
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    /// Assignment: `target = value`
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    /// Method call; `target` is absent for static methods.
    MethodInvocation {
        target: Option<Box<Expression>>,
        method: MethodRef,
        arguments: Vec<Expression>,
    },
    /// `(T)operand`
    Cast { ty: TypeRef, operand: Box<Expression> },
    /// `operand as T`
    SafeCast { ty: TypeRef, operand: Box<Expression> },
    /// `operand is T`
    CanCast { ty: TypeRef, operand: Box<Expression> },
    /// `array[index]`
    ArrayIndexer {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    /// `new T[size]`
    ArrayCreation {
        element_type: TypeRef,
        size: Box<Expression>,
    },
    /// `new T(args...)`
    ObjectCreation {
        constructor: MethodRef,
        arguments: Vec<Expression>,
    },
    /// Conditional: `condition ? then : else`
    Condition {
        condition: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },
    /// `value ?? fallback`
    NullCoalesce {
        value: Box<Expression>,
        fallback: Box<Expression>,
    },
    /// `typeof(T)`
    TypeOf(TypeRef),
}

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    BitwiseAnd,
    BitwiseOr,
    ExclusiveOr,
    LeftShift,
    RightShift,
    ValueEquality,
    ValueInequality,
    IdentityEquality,
    IdentityInequality,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOperator {
    pub const ALL: [BinaryOperator; 20] = [
        BinaryOperator::Add,
        BinaryOperator::Subtract,
        BinaryOperator::Multiply,
        BinaryOperator::Divide,
        BinaryOperator::Modulus,
        BinaryOperator::BitwiseAnd,
        BinaryOperator::BitwiseOr,
        BinaryOperator::ExclusiveOr,
        BinaryOperator::LeftShift,
        BinaryOperator::RightShift,
        BinaryOperator::ValueEquality,
        BinaryOperator::ValueInequality,
        BinaryOperator::IdentityEquality,
        BinaryOperator::IdentityInequality,
        BinaryOperator::LessThan,
        BinaryOperator::LessThanOrEqual,
        BinaryOperator::GreaterThan,
        BinaryOperator::GreaterThanOrEqual,
        BinaryOperator::LogicalAnd,
        BinaryOperator::LogicalOr,
    ];

    /// The operator whose result is the boolean negation of this one.
    ///
    /// For `&&`/`||` the operands must be negated as well (De Morgan).
    /// Arithmetic and bitwise operators have no inverse.
    pub const fn inverse(self) -> Option<BinaryOperator> {
        use BinaryOperator::*;
        let inverse = match self {
            ValueEquality => ValueInequality,
            ValueInequality => ValueEquality,
            IdentityEquality => IdentityInequality,
            IdentityInequality => IdentityEquality,
            LessThan => GreaterThanOrEqual,
            GreaterThanOrEqual => LessThan,
            GreaterThan => LessThanOrEqual,
            LessThanOrEqual => GreaterThan,
            LogicalAnd => LogicalOr,
            LogicalOr => LogicalAnd,
            _ => return None,
        };
        Some(inverse)
    }

    pub const fn is_comparison(self) -> bool {
        use BinaryOperator::*;
        matches!(
            self,
            ValueEquality
                | ValueInequality
                | IdentityEquality
                | IdentityInequality
                | LessThan
                | LessThanOrEqual
                | GreaterThan
                | GreaterThanOrEqual
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr)
    }

    /// The operator yields a boolean.
    pub const fn is_boolean(self) -> bool {
        self.is_comparison() || self.is_logical()
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Negate,
    BooleanNot,
    BitwiseNot,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulus => "%",
            BinaryOperator::BitwiseAnd => "&",
            BinaryOperator::BitwiseOr => "|",
            BinaryOperator::ExclusiveOr => "^",
            BinaryOperator::LeftShift => "<<",
            BinaryOperator::RightShift => ">>",
            BinaryOperator::ValueEquality | BinaryOperator::IdentityEquality => "==",
            BinaryOperator::ValueInequality | BinaryOperator::IdentityInequality => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::LogicalAnd => "&&",
            BinaryOperator::LogicalOr => "||",
        };
        f.write_str(s)
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::BooleanNot => "!",
            UnaryOperator::BitwiseNot => "~",
            UnaryOperator::PreIncrement | UnaryOperator::PostIncrement => "++",
            UnaryOperator::PreDecrement | UnaryOperator::PostDecrement => "--",
        };
        f.write_str(s)
    }
}

impl Expression {
    pub fn int(value: i32) -> Self {
        Expression::Literal(Literal::Int32(value))
    }

    pub fn boolean(value: bool) -> Self {
        Expression::Literal(Literal::Boolean(value))
    }

    pub fn null() -> Self {
        Expression::Literal(Literal::Null)
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::binary(BinaryOperator::LogicalAnd, left, right)
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::binary(BinaryOperator::LogicalOr, left, right)
    }

    /// Boolean negation, folded through inverse operators.
    ///
    /// `!!e` cancels, comparisons flip to their inverse, `&&`/`||` follow De
    /// Morgan and boolean literals flip; anything else is wrapped in `!`.
    pub fn negate(self) -> Expression {
        match self {
            Expression::Unary {
                op: UnaryOperator::BooleanNot,
                operand,
            } => *operand,
            Expression::Binary { op, left, right } if op.is_logical() => Expression::Binary {
                op: op.inverse().unwrap_or(op),
                left: Box::new(left.negate()),
                right: Box::new(right.negate()),
            },
            Expression::Binary { op, left, right } if op.is_comparison() => Expression::Binary {
                op: op.inverse().unwrap_or(op),
                left,
                right,
            },
            Expression::Literal(Literal::Boolean(value)) => Expression::boolean(!value),
            other => Expression::unary(UnaryOperator::BooleanNot, other),
        }
    }

    /// The integer value of an `Int32`/`Int64` literal.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Expression::Literal(Literal::Int32(v)) => Some(i64::from(*v)),
            Expression::Literal(Literal::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    /// The truth value of a literal `0`/`1`/`false`/`true`.
    pub fn as_boolean_literal(&self) -> Option<bool> {
        match self {
            Expression::Literal(Literal::Boolean(b)) => Some(*b),
            Expression::Literal(Literal::Int32(0)) => Some(false),
            Expression::Literal(Literal::Int32(1)) => Some(true),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expression::Literal(Literal::Null))
    }

    /// The local variable this expression reads, if it is a bare variable.
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Expression::VariableRef(v) => Some(v),
            _ => None,
        }
    }

    /// Statically known type, where the tree says so.
    pub fn static_type(&self) -> Option<TypeRef> {
        match self {
            Expression::Literal(Literal::Null) => None,
            Expression::Literal(Literal::Boolean(_)) => Some(TypeRef::boolean()),
            Expression::Literal(Literal::Int32(_)) => Some(TypeRef::int32()),
            Expression::Literal(Literal::Int64(_)) => Some(TypeRef::int64()),
            Expression::Literal(Literal::Float32(_)) => Some(TypeRef::new("System.Single")),
            Expression::Literal(Literal::Float64(_)) => Some(TypeRef::new("System.Double")),
            Expression::Literal(Literal::String(_)) => Some(TypeRef::string()),
            Expression::VariableRef(v) => Some(v.ty.clone()),
            Expression::ArgumentRef(p) => Some(p.ty.clone()),
            Expression::FieldRef { field, .. } => Some(field.field_type.clone()),
            Expression::Binary { op, left, .. } => {
                if op.is_boolean() {
                    Some(TypeRef::boolean())
                } else {
                    left.static_type()
                }
            }
            Expression::Unary { op, operand } => match op {
                UnaryOperator::BooleanNot => Some(TypeRef::boolean()),
                _ => operand.static_type(),
            },
            Expression::Assign { value, .. } => value.static_type(),
            Expression::MethodInvocation { method, .. } => Some(method.return_type.clone()),
            Expression::Cast { ty, .. } | Expression::SafeCast { ty, .. } => Some(ty.clone()),
            Expression::CanCast { .. } => Some(TypeRef::boolean()),
            Expression::ObjectCreation { constructor, .. } => {
                Some(constructor.declaring_type.clone())
            }
            Expression::ArrayCreation { element_type, .. } => {
                Some(TypeRef::new(format!("{}[]", element_type.full_name)))
            }
            Expression::Condition { then_value, .. } => then_value.static_type(),
            Expression::NullCoalesce { value, .. } => value.static_type(),
            Expression::TypeOf(_) => Some(TypeRef::new("System.Type")),
            Expression::ThisRef | Expression::BaseRef | Expression::ArrayIndexer { .. } => None,
        }
    }

    /// The expression evaluates to a boolean.
    pub fn is_boolean_valued(&self) -> bool {
        match self {
            Expression::Binary { op, .. } => op.is_boolean(),
            Expression::Unary {
                op: UnaryOperator::BooleanNot,
                ..
            } => true,
            Expression::CanCast { .. } => true,
            Expression::Literal(Literal::Boolean(_)) => true,
            Expression::Literal(_) => false,
            other => other.static_type().is_some_and(|ty| ty.is_boolean()),
        }
    }

    /// Pre-order walk over this node and all nested expressions.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expression)) {
        f(self);
        match self {
            Expression::Literal(_)
            | Expression::VariableRef(_)
            | Expression::ArgumentRef(_)
            | Expression::ThisRef
            | Expression::BaseRef
            | Expression::TypeOf(_) => {}
            Expression::FieldRef { target, .. } => {
                if let Some(target) = target {
                    target.walk(f);
                }
            }
            Expression::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expression::Unary { operand, .. }
            | Expression::Cast { operand, .. }
            | Expression::SafeCast { operand, .. }
            | Expression::CanCast { operand, .. } => operand.walk(f),
            Expression::Assign { target, value } => {
                target.walk(f);
                value.walk(f);
            }
            Expression::MethodInvocation {
                target, arguments, ..
            } => {
                if let Some(target) = target {
                    target.walk(f);
                }
                for arg in arguments {
                    arg.walk(f);
                }
            }
            Expression::ArrayIndexer { array, index } => {
                array.walk(f);
                index.walk(f);
            }
            Expression::ArrayCreation { size, .. } => size.walk(f),
            Expression::ObjectCreation { arguments, .. } => {
                for arg in arguments {
                    arg.walk(f);
                }
            }
            Expression::Condition {
                condition,
                then_value,
                else_value,
            } => {
                condition.walk(f);
                then_value.walk(f);
                else_value.walk(f);
            }
            Expression::NullCoalesce { value, fallback } => {
                value.walk(f);
                fallback.walk(f);
            }
        }
    }

    /// The tree reads or writes local `index` somewhere.
    pub fn references_variable(&self, index: u16) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expression::VariableRef(v) = e {
                found |= v.index == index;
            }
        });
        found
    }
}
