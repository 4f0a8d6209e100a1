use crate::expr::Expression;
use crate::metadata::TypeRef;
use crate::variables::Variable;

/// A statement sequence.
pub type Block = Vec<Statement>;

/// Statement nodes for decompiled code.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Nested block: `{ ... }`
    Block(Block),
    /// Expression statement: `expr;`
    Expression(Expression),
    If {
        condition: Expression,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        condition: Expression,
        body: Block,
    },
    DoWhile {
        condition: Expression,
        body: Block,
    },
    /// `for (init; condition; increment) body`
    For {
        init: Expression,
        condition: Expression,
        increment: Expression,
        body: Block,
    },
    /// `foreach (variable in collection) body`
    ForEach {
        variable: Variable,
        collection: Expression,
        body: Block,
    },
    Switch {
        discriminant: Expression,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    /// `throw expr;`, or a bare rethrow.
    Throw(Option<Expression>),
    Return(Option<Expression>),
    Break,
    Continue,
    Goto(String),
    /// Jump target marker: `label:`
    Labeled(String),
}

/// A single case label in a switch statement.
///
/// A case that `falls_through` has an empty body and shares the body of the
/// next case (stacked labels).
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: Expression,
    pub body: Block,
    pub falls_through: bool,
}

/// One `catch` clause of a try statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub exception_type: TypeRef,
    /// Local the exception is stored into, if any.
    pub variable: Option<Variable>,
    pub body: Block,
}

impl Statement {
    /// Control never reaches the statement that follows.
    pub fn is_terminal(&self) -> bool {
        match self {
            Statement::Return(_)
            | Statement::Throw(_)
            | Statement::Break
            | Statement::Continue
            | Statement::Goto(_) => true,
            Statement::Block(block) => ends_in_terminal(block),
            Statement::If {
                then_block,
                else_block: Some(else_block),
                ..
            } => ends_in_terminal(then_block) && ends_in_terminal(else_block),
            _ => false,
        }
    }

    /// The expression of an expression statement.
    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            Statement::Expression(expr) => Some(expr),
            _ => None,
        }
    }
}

/// The last statement of `block` is terminal.
pub fn ends_in_terminal(block: &[Statement]) -> bool {
    block.last().is_some_and(Statement::is_terminal)
}
