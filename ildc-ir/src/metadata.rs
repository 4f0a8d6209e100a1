//! Read-only references into the metadata model supplied by the loader.

use std::fmt;

/// A type reference by its fully qualified name (e.g. `System.Int32`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeRef {
    pub full_name: String,
}

impl TypeRef {
    pub fn new(full_name: impl Into<String>) -> Self {
        TypeRef {
            full_name: full_name.into(),
        }
    }

    pub fn void() -> Self {
        TypeRef::new("System.Void")
    }

    pub fn boolean() -> Self {
        TypeRef::new("System.Boolean")
    }

    pub fn int32() -> Self {
        TypeRef::new("System.Int32")
    }

    pub fn int64() -> Self {
        TypeRef::new("System.Int64")
    }

    pub fn string() -> Self {
        TypeRef::new("System.String")
    }

    pub fn object() -> Self {
        TypeRef::new("System.Object")
    }

    pub fn is_void(&self) -> bool {
        self.full_name == "System.Void"
    }

    pub fn is_boolean(&self) -> bool {
        self.full_name == "System.Boolean"
    }

    /// The root of the type hierarchy; a catch clause of this type catches everything.
    pub fn is_object(&self) -> bool {
        self.full_name == "System.Object"
    }

    /// Numeric and character primitives, i.e. types whose truthiness is a test against zero.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.full_name.as_str(),
            "System.SByte"
                | "System.Byte"
                | "System.Int16"
                | "System.UInt16"
                | "System.Int32"
                | "System.UInt32"
                | "System.Int64"
                | "System.UInt64"
                | "System.Single"
                | "System.Double"
                | "System.Char"
                | "System.IntPtr"
                | "System.UIntPtr"
        )
    }

    /// The last dotted segment of the name (`System.Collections.IEnumerator` -> `IEnumerator`).
    pub fn name(&self) -> &str {
        match self.full_name.rfind('.') {
            Some(pos) => &self.full_name[pos + 1..],
            None => &self.full_name,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// A resolved method reference: declaring type, name and signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub parameters: Vec<TypeRef>,
    pub return_type: TypeRef,
    /// Instance method: the receiver is passed before the declared parameters.
    pub has_this: bool,
}

impl MethodRef {
    pub fn new(
        declaring_type: TypeRef,
        name: impl Into<String>,
        parameters: Vec<TypeRef>,
        return_type: TypeRef,
        has_this: bool,
    ) -> Self {
        MethodRef {
            declaring_type,
            name: name.into(),
            parameters,
            return_type,
            has_this,
        }
    }

    pub fn returns_void(&self) -> bool {
        self.return_type.is_void()
    }

    pub fn returns_boolean(&self) -> bool {
        self.return_type.is_boolean()
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Number of evaluation-stack slots a call consumes.
    pub fn pop_count(&self) -> usize {
        self.parameters.len() + usize::from(self.has_this)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// A resolved field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub field_type: TypeRef,
    pub is_static: bool,
}

impl FieldRef {
    pub fn new(
        declaring_type: TypeRef,
        name: impl Into<String>,
        field_type: TypeRef,
        is_static: bool,
    ) -> Self {
        FieldRef {
            declaring_type,
            name: name.into(),
            field_type,
            is_static,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}
