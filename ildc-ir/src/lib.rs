pub mod builder;
pub mod cfg;
pub mod error;
pub mod expr;
pub mod instruction;
pub mod metadata;
pub mod stack;
pub mod stmt;
pub mod variables;
pub mod visit;

pub use builder::{Handler, Label, MethodBody, MethodBuilder, MethodSource};
pub use error::IrError;
pub use expr::{BinaryOperator, Expression, Literal, UnaryOperator};
pub use instruction::{ExceptionRegion, Instruction, Opcode, OpcodeFlags, Operand, RegionKind};
pub use metadata::{FieldRef, MethodRef, TypeRef};
pub use stmt::{Block, CatchClause, Statement, SwitchCase};
pub use variables::{Parameter, Variable, VariableTable};
