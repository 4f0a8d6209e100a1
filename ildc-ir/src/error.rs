use thiserror::Error;

/// Failures while assembling, annotating or partitioning a method body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("instruction at {offset:#06x} targets {target:#06x}, which is not an instruction boundary")]
    UnresolvedTarget { offset: u32, target: u32 },

    #[error("instruction at {offset:#06x} falls through past the end of the method body")]
    FallsOffEnd { offset: u32 },

    #[error("stack underflow at {offset:#06x}: needs {needed}, has {available}")]
    StackUnderflow {
        offset: u32,
        needed: usize,
        available: usize,
    },

    #[error("stack depth mismatch at {offset:#06x}: reached with {first} and {second}")]
    StackMismatch { offset: u32, first: u16, second: u16 },

    #[error("operand of {opcode} at {offset:#06x} has the wrong kind")]
    OperandMismatch { offset: u32, opcode: &'static str },

    #[error("label {0} used but never marked")]
    UnmarkedLabel(usize),

    #[error("label {0} marked twice")]
    DuplicateLabel(usize),

    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
}

pub type Result<T> = std::result::Result<T, IrError>;
