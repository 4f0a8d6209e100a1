use ildc_ir::error::IrError;
use ildc_ir::metadata::MethodRef;
use thiserror::Error;

/// Why decompiling one method failed. Every variant names the method and the
/// offending instruction offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompileError {
    #[error("{method}: malformed bytecode at IL_{offset:04x}: {reason}")]
    MalformedBytecode {
        method: String,
        offset: u32,
        reason: String,
    },

    #[error("{method}: inconsistent stack at IL_{offset:04x}: {reason}")]
    InconsistentStack {
        method: String,
        offset: u32,
        reason: String,
    },

    #[error("{method}: unrecognized value-producing branch shape at IL_{offset:04x}")]
    UnknownExpressionPattern { method: String, offset: u32 },

    #[error("{method}: unsupported construct at IL_{offset:04x}: {reason}")]
    UnsupportedConstruct {
        method: String,
        offset: u32,
        reason: String,
    },
}

impl DecompileError {
    pub fn malformed(method: &MethodRef, offset: u32, reason: impl Into<String>) -> Self {
        DecompileError::MalformedBytecode {
            method: method.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    pub fn inconsistent_stack(method: &MethodRef, offset: u32, reason: impl Into<String>) -> Self {
        DecompileError::InconsistentStack {
            method: method.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    pub fn unknown_pattern(method: &MethodRef, offset: u32) -> Self {
        DecompileError::UnknownExpressionPattern {
            method: method.to_string(),
            offset,
        }
    }

    pub fn unsupported(method: &MethodRef, offset: u32, reason: impl Into<String>) -> Self {
        DecompileError::UnsupportedConstruct {
            method: method.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    /// Attribute a model-level failure to `method`.
    pub fn from_ir(method: &MethodRef, err: IrError) -> Self {
        match err {
            IrError::StackUnderflow { offset, .. } | IrError::StackMismatch { offset, .. } => {
                DecompileError::inconsistent_stack(method, offset, err.to_string())
            }
            IrError::UnresolvedTarget { offset, .. }
            | IrError::FallsOffEnd { offset }
            | IrError::OperandMismatch { offset, .. } => {
                DecompileError::malformed(method, offset, err.to_string())
            }
            IrError::UnmarkedLabel(_) | IrError::DuplicateLabel(_) | IrError::UnknownMnemonic(_) => {
                DecompileError::malformed(method, 0, err.to_string())
            }
        }
    }

    /// Byte offset of the instruction the failure was detected at.
    pub fn offset(&self) -> u32 {
        match self {
            DecompileError::MalformedBytecode { offset, .. }
            | DecompileError::InconsistentStack { offset, .. }
            | DecompileError::UnknownExpressionPattern { offset, .. }
            | DecompileError::UnsupportedConstruct { offset, .. } => *offset,
        }
    }

    /// `Type::Name` of the method that failed.
    pub fn method(&self) -> &str {
        match self {
            DecompileError::MalformedBytecode { method, .. }
            | DecompileError::InconsistentStack { method, .. }
            | DecompileError::UnknownExpressionPattern { method, .. }
            | DecompileError::UnsupportedConstruct { method, .. } => method,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecompileError>;
