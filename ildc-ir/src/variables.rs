use crate::metadata::TypeRef;

/// A local variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub index: u16,
    pub name: String,
    pub ty: TypeRef,
}

/// A declared parameter. `index` is the position in the signature, not the
/// argument slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub index: u16,
    pub name: String,
    pub ty: TypeRef,
}

/// What an argument slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSlot<'a> {
    This,
    Parameter(&'a Parameter),
}

/// Index -> (name, type) mapping for one method body.
///
/// Built once by the loader; never mutated during decompilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableTable {
    pub locals: Vec<Variable>,
    pub parameters: Vec<Parameter>,
    pub has_this: bool,
}

impl VariableTable {
    pub fn new(has_this: bool) -> Self {
        VariableTable {
            locals: Vec::new(),
            parameters: Vec::new(),
            has_this,
        }
    }

    pub fn local(&self, index: u16) -> Option<&Variable> {
        self.locals.get(index as usize)
    }

    /// Resolve an argument slot, accounting for the implicit `this`.
    pub fn argument(&self, slot: u16) -> Option<ArgumentSlot<'_>> {
        if self.has_this {
            if slot == 0 {
                return Some(ArgumentSlot::This);
            }
            self.parameters
                .get(slot as usize - 1)
                .map(ArgumentSlot::Parameter)
        } else {
            self.parameters
                .get(slot as usize)
                .map(ArgumentSlot::Parameter)
        }
    }

    /// Argument slot of the parameter at signature position `index`.
    pub fn argument_slot(&self, index: u16) -> u16 {
        index + u16::from(self.has_this)
    }
}
