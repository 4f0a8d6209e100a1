//! Source-level rewrites over structured statements: `for` and `foreach`
//! recovery. Shapes that do not match exactly are left alone.

use ildc_ir::expr::{BinaryOperator, Expression, UnaryOperator};
use ildc_ir::stmt::{Block, Statement};
use ildc_ir::variables::Variable;

/// Rewrite loop idioms throughout `block`, innermost first.
pub fn recover_idioms(block: Block) -> Block {
    let block: Block = block.into_iter().map(recover_nested).collect();
    let mut out = Vec::with_capacity(block.len());
    let mut iter = block.into_iter();
    while let Some(stmt) = iter.next() {
        let Some((next, after)) = iter.as_slice().split_first() else {
            out.push(stmt);
            break;
        };
        if let Some(foreach) = match_foreach(&stmt, next, after) {
            log::trace!("recovered foreach over {:?}", foreach_collection(&foreach));
            iter.next();
            out.push(foreach);
        } else if let Some(for_loop) = match_for(&stmt, next) {
            iter.next();
            out.push(for_loop);
        } else {
            out.push(stmt);
        }
    }
    out
}

fn recover_nested(stmt: Statement) -> Statement {
    match stmt {
        Statement::Block(body) => Statement::Block(recover_idioms(body)),
        Statement::If {
            condition,
            then_block,
            else_block,
        } => Statement::If {
            condition,
            then_block: recover_idioms(then_block),
            else_block: else_block.map(recover_idioms),
        },
        Statement::While { condition, body } => Statement::While {
            condition,
            body: recover_idioms(body),
        },
        Statement::DoWhile { condition, body } => Statement::DoWhile {
            condition,
            body: recover_idioms(body),
        },
        Statement::For {
            init,
            condition,
            increment,
            body,
        } => Statement::For {
            init,
            condition,
            increment,
            body: recover_idioms(body),
        },
        Statement::ForEach {
            variable,
            collection,
            body,
        } => Statement::ForEach {
            variable,
            collection,
            body: recover_idioms(body),
        },
        Statement::Switch {
            discriminant,
            cases,
            default,
        } => Statement::Switch {
            discriminant,
            cases: cases
                .into_iter()
                .map(|mut case| {
                    case.body = recover_idioms(case.body);
                    case
                })
                .collect(),
            default: default.map(recover_idioms),
        },
        Statement::Try {
            body,
            catches,
            finally,
        } => Statement::Try {
            body: recover_idioms(body),
            catches: catches
                .into_iter()
                .map(|mut clause| {
                    clause.body = recover_idioms(clause.body);
                    clause
                })
                .collect(),
            finally: finally.map(recover_idioms),
        },
        other => other,
    }
}

fn foreach_collection(stmt: &Statement) -> Option<&Expression> {
    match stmt {
        Statement::ForEach { collection, .. } => Some(collection),
        _ => None,
    }
}

/// `v = init; while (cond) { ...; v = step; }` with no `continue`.
fn match_for(init: &Statement, next: &Statement) -> Option<Statement> {
    let init = init.as_expression()?;
    let Expression::Assign { target, .. } = init else {
        return None;
    };
    let var = target.as_variable()?;
    let Statement::While { condition, body } = next else {
        return None;
    };
    if !condition.references_variable(var.index) || contains_continue(body) {
        return None;
    }
    let (last, rest) = body.split_last()?;
    let step = last.as_expression()?;
    let Expression::Assign {
        target: step_target,
        value,
    } = step
    else {
        return None;
    };
    if step_target.as_variable() != Some(var) {
        return None;
    }
    let increment = match value.as_ref() {
        Expression::Binary { op, left, right }
            if left.as_variable() == Some(var) && right.as_integer() == Some(1) =>
        {
            match op {
                BinaryOperator::Add => {
                    Expression::unary(UnaryOperator::PostIncrement, (**left).clone())
                }
                BinaryOperator::Subtract => {
                    Expression::unary(UnaryOperator::PostDecrement, (**left).clone())
                }
                _ => step.clone(),
            }
        }
        _ => step.clone(),
    };
    Some(Statement::For {
        init: init.clone(),
        condition: condition.clone(),
        increment,
        body: rest.to_vec(),
    })
}

/// `continue` that would bind to the loop owning `body`.
fn contains_continue(body: &[Statement]) -> bool {
    body.iter().any(|stmt| match stmt {
        Statement::Continue => true,
        Statement::Block(inner) => contains_continue(inner),
        Statement::If {
            then_block,
            else_block,
            ..
        } => contains_continue(then_block) || else_block.as_deref().is_some_and(contains_continue),
        Statement::Switch { cases, default, .. } => {
            cases.iter().any(|c| contains_continue(&c.body))
                || default.as_deref().is_some_and(contains_continue)
        }
        Statement::Try {
            body,
            catches,
            finally,
        } => {
            contains_continue(body)
                || catches.iter().any(|c| contains_continue(&c.body))
                || finally.as_deref().is_some_and(contains_continue)
        }
        _ => false,
    })
}

/// The enumerator protocol compiled from `foreach`:
///
/// ```text
/// e = src.GetEnumerator();
/// try {
///     while (e.MoveNext()) { x = e.Current; rest }
/// } finally {
///     if (e != null) { e.Dispose(); }
/// }
/// ```
///
/// `after` holds the statements following the `try`; none may read `e`.
fn match_foreach(init: &Statement, next: &Statement, after: &[Statement]) -> Option<Statement> {
    let Expression::Assign { target, value } = init.as_expression()? else {
        return None;
    };
    let enumerator = target.as_variable()?;
    let collection = match value.as_ref() {
        Expression::MethodInvocation {
            target: Some(src),
            method,
            arguments,
        } if method.name == "GetEnumerator" && arguments.is_empty() => src.as_ref(),
        _ => return None,
    };
    if collection.references_variable(enumerator.index) {
        return None;
    }

    let Statement::Try {
        body,
        catches,
        finally: Some(finally),
    } = next
    else {
        return None;
    };
    if !catches.is_empty() || !is_dispose_block(finally, enumerator) {
        return None;
    }
    let [Statement::While { condition, body }] = body.as_slice() else {
        return None;
    };
    if !is_call_on(condition, enumerator, "MoveNext") {
        return None;
    }
    let (first, rest) = body.split_first()?;
    let Expression::Assign {
        target: item_target,
        value: item_value,
    } = first.as_expression()?
    else {
        return None;
    };
    let item = item_target.as_variable()?;
    let current = match item_value.as_ref() {
        Expression::Cast { operand, .. } => operand.as_ref(),
        other => other,
    };
    if item == enumerator || !is_call_on(current, enumerator, "get_Current") {
        return None;
    }
    if rest
        .iter()
        .chain(after)
        .any(|stmt| statement_references(stmt, enumerator.index))
    {
        return None;
    }
    Some(Statement::ForEach {
        variable: item.clone(),
        collection: collection.clone(),
        body: rest.to_vec(),
    })
}

/// `e.name()` with no arguments, the receiver possibly cast.
fn is_call_on(expr: &Expression, receiver: &Variable, name: &str) -> bool {
    match expr {
        Expression::MethodInvocation {
            target: Some(target),
            method,
            arguments,
        } => method.name == name && arguments.is_empty() && is_variable(target, receiver),
        _ => false,
    }
}

fn is_variable(expr: &Expression, variable: &Variable) -> bool {
    match expr {
        Expression::VariableRef(v) => v == variable,
        Expression::Cast { operand, .. } => is_variable(operand, variable),
        _ => false,
    }
}

/// Exactly `if (e != null) { e.Dispose(); }`.
fn is_dispose_block(block: &[Statement], enumerator: &Variable) -> bool {
    let [
        Statement::If {
            condition,
            then_block,
            else_block: None,
        },
    ] = block
    else {
        return false;
    };
    let guarded = matches!(
        condition,
        Expression::Binary {
            op: BinaryOperator::IdentityInequality | BinaryOperator::ValueInequality,
            left,
            right,
        } if is_variable(left, enumerator) && right.is_null()
    );
    guarded
        && matches!(
            then_block.as_slice(),
            [Statement::Expression(call)] if is_call_on(call, enumerator, "Dispose")
        )
}

fn statement_references(stmt: &Statement, index: u16) -> bool {
    let block_refs = |block: &[Statement]| block.iter().any(|s| statement_references(s, index));
    let expr_refs = |e: &Expression| e.references_variable(index);
    match stmt {
        Statement::Block(body) => block_refs(body),
        Statement::Expression(e) => expr_refs(e),
        Statement::If {
            condition,
            then_block,
            else_block,
        } => {
            expr_refs(condition)
                || block_refs(then_block)
                || else_block.as_deref().is_some_and(block_refs)
        }
        Statement::While { condition, body } | Statement::DoWhile { condition, body } => {
            expr_refs(condition) || block_refs(body)
        }
        Statement::For {
            init,
            condition,
            increment,
            body,
        } => expr_refs(init) || expr_refs(condition) || expr_refs(increment) || block_refs(body),
        Statement::ForEach {
            variable,
            collection,
            body,
        } => variable.index == index || expr_refs(collection) || block_refs(body),
        Statement::Switch {
            discriminant,
            cases,
            default,
        } => {
            expr_refs(discriminant)
                || cases
                    .iter()
                    .any(|c| expr_refs(&c.value) || block_refs(&c.body))
                || default.as_deref().is_some_and(block_refs)
        }
        Statement::Try {
            body,
            catches,
            finally,
        } => {
            block_refs(body)
                || catches.iter().any(|c| {
                    c.variable.as_ref().is_some_and(|v| v.index == index) || block_refs(&c.body)
                })
                || finally.as_deref().is_some_and(block_refs)
        }
        Statement::Throw(value) | Statement::Return(value) => value.as_ref().is_some_and(expr_refs),
        Statement::Break | Statement::Continue | Statement::Goto(_) | Statement::Labeled(_) => {
            false
        }
    }
}
