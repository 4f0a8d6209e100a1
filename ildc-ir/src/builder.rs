//! Method body assembly from symbolic labels.
//!
//! [`MethodBuilder`] stands in for the metadata loader: it produces a
//! [`MethodBody`] whose instructions carry final byte offsets, resolved branch
//! targets and stack-depth annotations, exactly as the decompiler expects
//! from a real loader.

use crate::error::{IrError, Result};
use crate::instruction::{ExceptionRegion, Instruction, Opcode, Operand, RegionKind};
use crate::metadata::{FieldRef, MethodRef, TypeRef};
use crate::stack;
use crate::variables::{Parameter, Variable, VariableTable};

/// Interface the decompiler consumes for one method body.
pub trait MethodSource {
    /// Identity and signature of the method.
    fn method(&self) -> &MethodRef;
    /// Instructions in offset order, annotated with stack depths.
    fn instructions(&self) -> &[Instruction];
    fn exception_regions(&self) -> &[ExceptionRegion];
    fn variables(&self) -> &VariableTable;
}

/// A fully decoded method body.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub method: MethodRef,
    pub instructions: Vec<Instruction>,
    pub exception_regions: Vec<ExceptionRegion>,
    pub variables: VariableTable,
}

impl MethodSource for MethodBody {
    fn method(&self) -> &MethodRef {
        &self.method
    }

    fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    fn exception_regions(&self) -> &[ExceptionRegion] {
        &self.exception_regions
    }

    fn variables(&self) -> &VariableTable {
        &self.variables
    }
}

/// Opaque handle for a code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Handler kind for [`MethodBuilder::region`].
#[derive(Debug, Clone)]
pub enum Handler {
    Catch(TypeRef),
    /// Filter code starts at the label; the handler follows it.
    Filter(Label),
    Finally,
    Fault,
}

#[derive(Debug, Clone)]
enum PendingOperand {
    Ready(Operand),
    Branch(Label),
    Switch(Vec<Label>),
}

impl PendingOperand {
    fn encoded_size(&self) -> u32 {
        match self {
            PendingOperand::Ready(operand) => operand.encoded_size(),
            PendingOperand::Branch(_) => 4,
            PendingOperand::Switch(targets) => 4 + 4 * targets.len() as u32,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRegion {
    handler: Handler,
    try_start: Label,
    try_end: Label,
    handler_start: Label,
    handler_end: Label,
}

/// Label-based method body emitter.
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    declaring_type: TypeRef,
    name: String,
    return_type: TypeRef,
    variables: VariableTable,
    code: Vec<(Opcode, PendingOperand)>,
    /// Instruction index each label is bound to.
    labels: Vec<Option<usize>>,
    regions: Vec<PendingRegion>,
    duplicate_label: Option<usize>,
}

impl MethodBuilder {
    pub fn new(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        return_type: TypeRef,
        is_static: bool,
    ) -> Self {
        MethodBuilder {
            declaring_type: TypeRef::new(declaring_type),
            name: name.into(),
            return_type,
            variables: VariableTable::new(!is_static),
            code: Vec::new(),
            labels: Vec::new(),
            regions: Vec::new(),
            duplicate_label: None,
        }
    }

    /// Declare a parameter; returns its argument slot.
    pub fn param(&mut self, name: impl Into<String>, ty: TypeRef) -> u16 {
        let index = self.variables.parameters.len() as u16;
        self.variables.parameters.push(Parameter {
            index,
            name: name.into(),
            ty,
        });
        self.variables.argument_slot(index)
    }

    /// Declare a local; returns its index.
    pub fn local(&mut self, name: impl Into<String>, ty: TypeRef) -> u16 {
        let index = self.variables.locals.len() as u16;
        self.variables.locals.push(Variable {
            index,
            name: name.into(),
            ty,
        });
        index
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction (or the end of the body).
    pub fn mark(&mut self, label: Label) -> &mut Self {
        if self.labels[label.0].is_some() {
            self.duplicate_label.get_or_insert(label.0);
        }
        self.labels[label.0] = Some(self.code.len());
        self
    }

    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.emit_with(opcode, Operand::None)
    }

    pub fn emit_with(&mut self, opcode: Opcode, operand: Operand) -> &mut Self {
        self.code.push((opcode, PendingOperand::Ready(operand)));
        self
    }

    pub fn branch(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        self.code.push((opcode, PendingOperand::Branch(target)));
        self
    }

    pub fn switch(&mut self, targets: &[Label]) -> &mut Self {
        self.code
            .push((Opcode::Switch, PendingOperand::Switch(targets.to_vec())));
        self
    }

    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.emit_with(Opcode::LdcI4, Operand::Int32(value))
    }

    pub fn ldstr(&mut self, value: impl Into<String>) -> &mut Self {
        self.emit_with(Opcode::Ldstr, Operand::String(value.into()))
    }

    pub fn ldloc(&mut self, index: u16) -> &mut Self {
        self.emit_with(Opcode::Ldloc, Operand::Variable(index))
    }

    pub fn stloc(&mut self, index: u16) -> &mut Self {
        self.emit_with(Opcode::Stloc, Operand::Variable(index))
    }

    pub fn ldarg(&mut self, slot: u16) -> &mut Self {
        self.emit_with(Opcode::Ldarg, Operand::Argument(slot))
    }

    pub fn starg(&mut self, slot: u16) -> &mut Self {
        self.emit_with(Opcode::Starg, Operand::Argument(slot))
    }

    pub fn call(&mut self, method: MethodRef) -> &mut Self {
        self.emit_with(Opcode::Call, Operand::Method(method))
    }

    pub fn callvirt(&mut self, method: MethodRef) -> &mut Self {
        self.emit_with(Opcode::Callvirt, Operand::Method(method))
    }

    pub fn newobj(&mut self, constructor: MethodRef) -> &mut Self {
        self.emit_with(Opcode::Newobj, Operand::Method(constructor))
    }

    pub fn ldfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit_with(Opcode::Ldfld, Operand::Field(field))
    }

    pub fn stfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit_with(Opcode::Stfld, Operand::Field(field))
    }

    pub fn ldsfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit_with(Opcode::Ldsfld, Operand::Field(field))
    }

    pub fn stsfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit_with(Opcode::Stsfld, Operand::Field(field))
    }

    /// Declare an exception region; end labels are exclusive.
    pub fn region(
        &mut self,
        handler: Handler,
        try_start: Label,
        try_end: Label,
        handler_start: Label,
        handler_end: Label,
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            handler,
            try_start,
            try_end,
            handler_start,
            handler_end,
        });
        self
    }

    /// Signature of the method being built.
    pub fn method_ref(&self) -> MethodRef {
        MethodRef {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
            parameters: self
                .variables
                .parameters
                .iter()
                .map(|p| p.ty.clone())
                .collect(),
            return_type: self.return_type.clone(),
            has_this: self.variables.has_this,
        }
    }

    /// Lay out offsets, resolve labels and annotate stack depths.
    pub fn build(&self) -> Result<MethodBody> {
        if let Some(label) = self.duplicate_label {
            return Err(IrError::DuplicateLabel(label));
        }

        let mut offsets = Vec::with_capacity(self.code.len() + 1);
        let mut offset = 0u32;
        for (_, operand) in &self.code {
            offsets.push(offset);
            offset += 1 + operand.encoded_size();
        }
        offsets.push(offset);

        let resolve = |label: Label| -> Result<u32> {
            self.labels[label.0]
                .map(|idx| offsets[idx])
                .ok_or(IrError::UnmarkedLabel(label.0))
        };

        let mut instructions = Vec::with_capacity(self.code.len());
        for (i, (opcode, pending)) in self.code.iter().enumerate() {
            let operand = match pending {
                PendingOperand::Ready(operand) => operand.clone(),
                PendingOperand::Branch(target) => Operand::Branch(resolve(*target)?),
                PendingOperand::Switch(targets) => Operand::Switch(
                    targets
                        .iter()
                        .map(|&t| resolve(t))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            instructions.push(Instruction {
                offset: offsets[i],
                opcode: *opcode,
                operand,
                stack_before: 0,
                stack_after: 0,
            });
        }

        let mut exception_regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let kind = match &region.handler {
                Handler::Catch(ty) => RegionKind::Catch(ty.clone()),
                Handler::Filter(start) => RegionKind::Filter {
                    filter_start: resolve(*start)?,
                },
                Handler::Finally => RegionKind::Finally,
                Handler::Fault => RegionKind::Fault,
            };
            exception_regions.push(ExceptionRegion {
                try_start: resolve(region.try_start)?,
                try_end: resolve(region.try_end)?,
                handler_start: resolve(region.handler_start)?,
                handler_end: resolve(region.handler_end)?,
                kind,
            });
        }

        let method = self.method_ref();
        stack::annotate(&mut instructions, &exception_regions, &method)?;

        Ok(MethodBody {
            method,
            instructions,
            exception_regions,
            variables: self.variables.clone(),
        })
    }
}
