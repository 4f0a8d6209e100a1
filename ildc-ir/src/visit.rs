//! Double-dispatch contract for AST consumers.
//!
//! A writer implements [`ExpressionVisitor`] and [`StatementVisitor`] and calls
//! `accept` on the root; it never needs to match on the node enums itself.

use crate::expr::{BinaryOperator, Expression, Literal, UnaryOperator};
use crate::metadata::{FieldRef, MethodRef, TypeRef};
use crate::stmt::{Block, CatchClause, Statement, SwitchCase};
use crate::variables::{Parameter, Variable};

pub trait ExpressionVisitor {
    type Output;

    fn visit_literal(&mut self, literal: &Literal) -> Self::Output;
    fn visit_variable(&mut self, variable: &Variable) -> Self::Output;
    fn visit_argument(&mut self, parameter: &Parameter) -> Self::Output;
    fn visit_field(&mut self, target: Option<&Expression>, field: &FieldRef) -> Self::Output;
    fn visit_this(&mut self) -> Self::Output;
    fn visit_base(&mut self) -> Self::Output;
    fn visit_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Self::Output;
    fn visit_unary(&mut self, op: UnaryOperator, operand: &Expression) -> Self::Output;
    fn visit_assign(&mut self, target: &Expression, value: &Expression) -> Self::Output;
    fn visit_invocation(
        &mut self,
        target: Option<&Expression>,
        method: &MethodRef,
        arguments: &[Expression],
    ) -> Self::Output;
    fn visit_cast(&mut self, ty: &TypeRef, operand: &Expression) -> Self::Output;
    fn visit_safe_cast(&mut self, ty: &TypeRef, operand: &Expression) -> Self::Output;
    fn visit_can_cast(&mut self, ty: &TypeRef, operand: &Expression) -> Self::Output;
    fn visit_array_indexer(&mut self, array: &Expression, index: &Expression) -> Self::Output;
    fn visit_array_creation(&mut self, element_type: &TypeRef, size: &Expression)
    -> Self::Output;
    fn visit_object_creation(
        &mut self,
        constructor: &MethodRef,
        arguments: &[Expression],
    ) -> Self::Output;
    fn visit_condition(
        &mut self,
        condition: &Expression,
        then_value: &Expression,
        else_value: &Expression,
    ) -> Self::Output;
    fn visit_null_coalesce(&mut self, value: &Expression, fallback: &Expression)
    -> Self::Output;
    fn visit_type_of(&mut self, ty: &TypeRef) -> Self::Output;
}

pub trait StatementVisitor {
    type Output;

    fn visit_block(&mut self, block: &Block) -> Self::Output;
    fn visit_expression_statement(&mut self, expr: &Expression) -> Self::Output;
    fn visit_if(
        &mut self,
        condition: &Expression,
        then_block: &Block,
        else_block: Option<&Block>,
    ) -> Self::Output;
    fn visit_while(&mut self, condition: &Expression, body: &Block) -> Self::Output;
    fn visit_do_while(&mut self, condition: &Expression, body: &Block) -> Self::Output;
    fn visit_for(
        &mut self,
        init: &Expression,
        condition: &Expression,
        increment: &Expression,
        body: &Block,
    ) -> Self::Output;
    fn visit_foreach(
        &mut self,
        variable: &Variable,
        collection: &Expression,
        body: &Block,
    ) -> Self::Output;
    fn visit_switch(
        &mut self,
        discriminant: &Expression,
        cases: &[SwitchCase],
        default: Option<&Block>,
    ) -> Self::Output;
    fn visit_try(
        &mut self,
        body: &Block,
        catches: &[CatchClause],
        finally: Option<&Block>,
    ) -> Self::Output;
    fn visit_throw(&mut self, value: Option<&Expression>) -> Self::Output;
    fn visit_return(&mut self, value: Option<&Expression>) -> Self::Output;
    fn visit_break(&mut self) -> Self::Output;
    fn visit_continue(&mut self) -> Self::Output;
    fn visit_goto(&mut self, label: &str) -> Self::Output;
    fn visit_labeled(&mut self, label: &str) -> Self::Output;
}

impl Expression {
    pub fn accept<V: ExpressionVisitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            Expression::Literal(literal) => visitor.visit_literal(literal),
            Expression::VariableRef(variable) => visitor.visit_variable(variable),
            Expression::ArgumentRef(parameter) => visitor.visit_argument(parameter),
            Expression::FieldRef { target, field } => {
                visitor.visit_field(target.as_deref(), field)
            }
            Expression::ThisRef => visitor.visit_this(),
            Expression::BaseRef => visitor.visit_base(),
            Expression::Binary { op, left, right } => visitor.visit_binary(*op, left, right),
            Expression::Unary { op, operand } => visitor.visit_unary(*op, operand),
            Expression::Assign { target, value } => visitor.visit_assign(target, value),
            Expression::MethodInvocation {
                target,
                method,
                arguments,
            } => visitor.visit_invocation(target.as_deref(), method, arguments),
            Expression::Cast { ty, operand } => visitor.visit_cast(ty, operand),
            Expression::SafeCast { ty, operand } => visitor.visit_safe_cast(ty, operand),
            Expression::CanCast { ty, operand } => visitor.visit_can_cast(ty, operand),
            Expression::ArrayIndexer { array, index } => {
                visitor.visit_array_indexer(array, index)
            }
            Expression::ArrayCreation { element_type, size } => {
                visitor.visit_array_creation(element_type, size)
            }
            Expression::ObjectCreation {
                constructor,
                arguments,
            } => visitor.visit_object_creation(constructor, arguments),
            Expression::Condition {
                condition,
                then_value,
                else_value,
            } => visitor.visit_condition(condition, then_value, else_value),
            Expression::NullCoalesce { value, fallback } => {
                visitor.visit_null_coalesce(value, fallback)
            }
            Expression::TypeOf(ty) => visitor.visit_type_of(ty),
        }
    }
}

impl Statement {
    pub fn accept<V: StatementVisitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            Statement::Block(block) => visitor.visit_block(block),
            Statement::Expression(expr) => visitor.visit_expression_statement(expr),
            Statement::If {
                condition,
                then_block,
                else_block,
            } => visitor.visit_if(condition, then_block, else_block.as_ref()),
            Statement::While { condition, body } => visitor.visit_while(condition, body),
            Statement::DoWhile { condition, body } => visitor.visit_do_while(condition, body),
            Statement::For {
                init,
                condition,
                increment,
                body,
            } => visitor.visit_for(init, condition, increment, body),
            Statement::ForEach {
                variable,
                collection,
                body,
            } => visitor.visit_foreach(variable, collection, body),
            Statement::Switch {
                discriminant,
                cases,
                default,
            } => visitor.visit_switch(discriminant, cases, default.as_ref()),
            Statement::Try {
                body,
                catches,
                finally,
            } => visitor.visit_try(body, catches, finally.as_ref()),
            Statement::Throw(value) => visitor.visit_throw(value.as_ref()),
            Statement::Return(value) => visitor.visit_return(value.as_ref()),
            Statement::Break => visitor.visit_break(),
            Statement::Continue => visitor.visit_continue(),
            Statement::Goto(label) => visitor.visit_goto(label),
            Statement::Labeled(label) => visitor.visit_labeled(label),
        }
    }
}
