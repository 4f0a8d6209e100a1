use std::fmt;

use bitflags::bitflags;

use crate::metadata::{FieldRef, MethodRef, TypeRef};

bitflags! {
    /// Static control-flow properties of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u8 {
        /// Transfers control to an operand-specified target.
        const JUMP = 1 << 0;
        /// The jump is taken only when the popped condition holds.
        const CONDITIONAL = 1 << 1;
        const RETURN = 1 << 2;
        const THROW = 1 << 3;
        /// Indexed multi-way jump; falls through when the index is out of range.
        const SWITCH = 1 << 4;
        /// Leaves a protected region, emptying the evaluation stack.
        const LEAVE = 1 << 5;
        /// Ends a finally, fault or filter handler.
        const END_HANDLER = 1 << 6;
    }
}

/// The closed opcode set understood by the decompiler.
///
/// Short and macro forms (`ldloc.0`, `br.s`, `ldc.i4.m1`, ...) are normalised by
/// the loader into the long form with an explicit operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Nop,
    Dup,
    Pop,
    Ldarg,
    Ldarga,
    Starg,
    Ldloc,
    Ldloca,
    Stloc,
    Ldnull,
    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    Ldstr,
    Ldfld,
    Ldflda,
    Stfld,
    Ldsfld,
    Stsfld,
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    Neg,
    Not,
    Ceq,
    Cgt,
    CgtUn,
    Clt,
    CltUn,
    Br,
    Brtrue,
    Brfalse,
    Beq,
    BneUn,
    Bge,
    BgeUn,
    Bgt,
    BgtUn,
    Ble,
    BleUn,
    Blt,
    BltUn,
    Switch,
    Leave,
    Ret,
    Throw,
    Rethrow,
    Endfinally,
    Endfilter,
    Call,
    Callvirt,
    Newobj,
    Newarr,
    Ldlen,
    Ldelem,
    Ldelema,
    Stelem,
    Castclass,
    Isinst,
    Box,
    Unbox,
    UnboxAny,
    ConvI1,
    ConvI2,
    ConvI4,
    ConvI8,
    ConvU1,
    ConvU2,
    ConvU4,
    ConvU8,
    ConvR4,
    ConvR8,
    Ldtoken,
}

impl Opcode {
    /// Every opcode, in declaration order.
    pub const ALL: [Opcode; 84] = [
        Opcode::Nop,
        Opcode::Dup,
        Opcode::Pop,
        Opcode::Ldarg,
        Opcode::Ldarga,
        Opcode::Starg,
        Opcode::Ldloc,
        Opcode::Ldloca,
        Opcode::Stloc,
        Opcode::Ldnull,
        Opcode::LdcI4,
        Opcode::LdcI8,
        Opcode::LdcR4,
        Opcode::LdcR8,
        Opcode::Ldstr,
        Opcode::Ldfld,
        Opcode::Ldflda,
        Opcode::Stfld,
        Opcode::Ldsfld,
        Opcode::Stsfld,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::DivUn,
        Opcode::Rem,
        Opcode::RemUn,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::ShrUn,
        Opcode::Neg,
        Opcode::Not,
        Opcode::Ceq,
        Opcode::Cgt,
        Opcode::CgtUn,
        Opcode::Clt,
        Opcode::CltUn,
        Opcode::Br,
        Opcode::Brtrue,
        Opcode::Brfalse,
        Opcode::Beq,
        Opcode::BneUn,
        Opcode::Bge,
        Opcode::BgeUn,
        Opcode::Bgt,
        Opcode::BgtUn,
        Opcode::Ble,
        Opcode::BleUn,
        Opcode::Blt,
        Opcode::BltUn,
        Opcode::Switch,
        Opcode::Leave,
        Opcode::Ret,
        Opcode::Throw,
        Opcode::Rethrow,
        Opcode::Endfinally,
        Opcode::Endfilter,
        Opcode::Call,
        Opcode::Callvirt,
        Opcode::Newobj,
        Opcode::Newarr,
        Opcode::Ldlen,
        Opcode::Ldelem,
        Opcode::Ldelema,
        Opcode::Stelem,
        Opcode::Castclass,
        Opcode::Isinst,
        Opcode::Box,
        Opcode::Unbox,
        Opcode::UnboxAny,
        Opcode::ConvI1,
        Opcode::ConvI2,
        Opcode::ConvI4,
        Opcode::ConvI8,
        Opcode::ConvU1,
        Opcode::ConvU2,
        Opcode::ConvU4,
        Opcode::ConvU8,
        Opcode::ConvR4,
        Opcode::ConvR8,
        Opcode::Ldtoken,
    ];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Ldarg => "ldarg",
            Opcode::Ldarga => "ldarga",
            Opcode::Starg => "starg",
            Opcode::Ldloc => "ldloc",
            Opcode::Ldloca => "ldloca",
            Opcode::Stloc => "stloc",
            Opcode::Ldnull => "ldnull",
            Opcode::LdcI4 => "ldc.i4",
            Opcode::LdcI8 => "ldc.i8",
            Opcode::LdcR4 => "ldc.r4",
            Opcode::LdcR8 => "ldc.r8",
            Opcode::Ldstr => "ldstr",
            Opcode::Ldfld => "ldfld",
            Opcode::Ldflda => "ldflda",
            Opcode::Stfld => "stfld",
            Opcode::Ldsfld => "ldsfld",
            Opcode::Stsfld => "stsfld",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::DivUn => "div.un",
            Opcode::Rem => "rem",
            Opcode::RemUn => "rem.un",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::ShrUn => "shr.un",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Ceq => "ceq",
            Opcode::Cgt => "cgt",
            Opcode::CgtUn => "cgt.un",
            Opcode::Clt => "clt",
            Opcode::CltUn => "clt.un",
            Opcode::Br => "br",
            Opcode::Brtrue => "brtrue",
            Opcode::Brfalse => "brfalse",
            Opcode::Beq => "beq",
            Opcode::BneUn => "bne.un",
            Opcode::Bge => "bge",
            Opcode::BgeUn => "bge.un",
            Opcode::Bgt => "bgt",
            Opcode::BgtUn => "bgt.un",
            Opcode::Ble => "ble",
            Opcode::BleUn => "ble.un",
            Opcode::Blt => "blt",
            Opcode::BltUn => "blt.un",
            Opcode::Switch => "switch",
            Opcode::Leave => "leave",
            Opcode::Ret => "ret",
            Opcode::Throw => "throw",
            Opcode::Rethrow => "rethrow",
            Opcode::Endfinally => "endfinally",
            Opcode::Endfilter => "endfilter",
            Opcode::Call => "call",
            Opcode::Callvirt => "callvirt",
            Opcode::Newobj => "newobj",
            Opcode::Newarr => "newarr",
            Opcode::Ldlen => "ldlen",
            Opcode::Ldelem => "ldelem",
            Opcode::Ldelema => "ldelema",
            Opcode::Stelem => "stelem",
            Opcode::Castclass => "castclass",
            Opcode::Isinst => "isinst",
            Opcode::Box => "box",
            Opcode::Unbox => "unbox",
            Opcode::UnboxAny => "unbox.any",
            Opcode::ConvI1 => "conv.i1",
            Opcode::ConvI2 => "conv.i2",
            Opcode::ConvI4 => "conv.i4",
            Opcode::ConvI8 => "conv.i8",
            Opcode::ConvU1 => "conv.u1",
            Opcode::ConvU2 => "conv.u2",
            Opcode::ConvU4 => "conv.u4",
            Opcode::ConvU8 => "conv.u8",
            Opcode::ConvR4 => "conv.r4",
            Opcode::ConvR8 => "conv.r8",
            Opcode::Ldtoken => "ldtoken",
        }
    }

    /// Parse a mnemonic. Short-branch/short-index spellings (`br.s`, `ldloc.s`) map
    /// to the long form.
    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        let text = text.strip_suffix(".s").unwrap_or(text);
        Opcode::ALL.iter().copied().find(|op| op.mnemonic() == text)
    }

    pub const fn flags(self) -> OpcodeFlags {
        match self {
            Opcode::Br => OpcodeFlags::JUMP,
            Opcode::Leave => OpcodeFlags::JUMP.union(OpcodeFlags::LEAVE),
            Opcode::Brtrue
            | Opcode::Brfalse
            | Opcode::Beq
            | Opcode::BneUn
            | Opcode::Bge
            | Opcode::BgeUn
            | Opcode::Bgt
            | Opcode::BgtUn
            | Opcode::Ble
            | Opcode::BleUn
            | Opcode::Blt
            | Opcode::BltUn => OpcodeFlags::JUMP.union(OpcodeFlags::CONDITIONAL),
            Opcode::Switch => OpcodeFlags::JUMP.union(OpcodeFlags::SWITCH),
            Opcode::Ret => OpcodeFlags::RETURN,
            Opcode::Throw | Opcode::Rethrow => OpcodeFlags::THROW,
            Opcode::Endfinally | Opcode::Endfilter => OpcodeFlags::END_HANDLER,
            _ => OpcodeFlags::empty(),
        }
    }

    pub fn is_jump(self) -> bool {
        self.flags().contains(OpcodeFlags::JUMP)
    }

    pub fn is_conditional(self) -> bool {
        self.flags().contains(OpcodeFlags::CONDITIONAL)
    }

    /// Execution never continues with the next instruction.
    pub fn ends_flow(self) -> bool {
        let flags = self.flags();
        flags.intersects(OpcodeFlags::RETURN | OpcodeFlags::THROW | OpcodeFlags::END_HANDLER)
            || (flags.contains(OpcodeFlags::JUMP)
                && !flags.intersects(OpcodeFlags::CONDITIONAL | OpcodeFlags::SWITCH))
    }

    /// Target type of a `conv.*` opcode.
    pub fn conversion_type(self) -> Option<TypeRef> {
        let name = match self {
            Opcode::ConvI1 => "System.SByte",
            Opcode::ConvI2 => "System.Int16",
            Opcode::ConvI4 => "System.Int32",
            Opcode::ConvI8 => "System.Int64",
            Opcode::ConvU1 => "System.Byte",
            Opcode::ConvU2 => "System.UInt16",
            Opcode::ConvU4 => "System.UInt32",
            Opcode::ConvU8 => "System.UInt64",
            Opcode::ConvR4 => "System.Single",
            Opcode::ConvR8 => "System.Double",
            _ => return None,
        };
        Some(TypeRef::new(name))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A decoded operand with references already resolved by the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Local variable index.
    Variable(u16),
    /// Argument slot (slot 0 is `this` for instance methods).
    Argument(u16),
    Field(FieldRef),
    Method(MethodRef),
    Type(TypeRef),
    /// Absolute byte offset of the branch target.
    Branch(u32),
    /// Absolute byte offsets of the switch table entries.
    Switch(Vec<u32>),
}

impl Operand {
    /// Bytes the operand occupies in the encoded stream.
    pub fn encoded_size(&self) -> u32 {
        match self {
            Operand::None => 0,
            Operand::Variable(_) | Operand::Argument(_) => 2,
            Operand::Int32(_)
            | Operand::Float32(_)
            | Operand::String(_)
            | Operand::Field(_)
            | Operand::Method(_)
            | Operand::Type(_)
            | Operand::Branch(_) => 4,
            Operand::Int64(_) | Operand::Float64(_) => 8,
            Operand::Switch(targets) => 4 + 4 * targets.len() as u32,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, "{v}"),
            Operand::Int64(v) => write!(f, "{v}"),
            Operand::Float32(v) => write!(f, "{v}"),
            Operand::Float64(v) => write!(f, "{v}"),
            Operand::String(s) => write!(f, "{s:?}"),
            Operand::Variable(i) => write!(f, "V_{i}"),
            Operand::Argument(i) => write!(f, "A_{i}"),
            Operand::Field(field) => write!(f, "{field}"),
            Operand::Method(method) => write!(f, "{method}"),
            Operand::Type(ty) => write!(f, "{ty}"),
            Operand::Branch(target) => write!(f, "IL_{target:04x}"),
            Operand::Switch(targets) => {
                f.write_str("(")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "IL_{target:04x}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A single instruction with resolved operand and stack-depth annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset within the method body.
    pub offset: u32,
    pub opcode: Opcode,
    pub operand: Operand,
    /// Evaluation-stack depth before executing this instruction.
    pub stack_before: u16,
    /// Evaluation-stack depth after executing this instruction.
    pub stack_after: u16,
}

impl Instruction {
    /// Total encoded size: one opcode byte plus the operand.
    pub fn size(&self) -> u32 {
        1 + self.operand.encoded_size()
    }

    /// Offset of the instruction that follows in the stream.
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size()
    }

    /// Every jump target named by the operand.
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => vec![],
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        if self.operand != Operand::None {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}

/// Handler kind of an exception region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionKind {
    /// Typed catch handler.
    Catch(TypeRef),
    /// Filter block starting at the given offset, followed by the handler.
    Filter { filter_start: u32 },
    Finally,
    Fault,
}

/// A protected range together with one of its handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    pub try_start: u32,
    /// Exclusive.
    pub try_end: u32,
    pub handler_start: u32,
    /// Exclusive.
    pub handler_end: u32,
    pub kind: RegionKind,
}

impl ExceptionRegion {
    pub fn try_contains(&self, offset: u32) -> bool {
        offset >= self.try_start && offset < self.try_end
    }

    pub fn handler_contains(&self, offset: u32) -> bool {
        let start = match self.kind {
            RegionKind::Filter { filter_start } => filter_start,
            _ => self.handler_start,
        };
        offset >= start && offset < self.handler_end
    }

    /// Handler entered with the exception object on the stack.
    pub fn receives_exception(&self) -> bool {
        matches!(self.kind, RegionKind::Catch(_) | RegionKind::Filter { .. })
    }
}
