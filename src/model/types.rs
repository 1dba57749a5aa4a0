use super::{DeclId, DeclarationSnapshot};

/// Structural reference to a type as it appears in a signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(NamedType),
    Parameter(TypeParameter),
    Array { element: Box<TypeRef>, rank: u8 },
    Pointer { pointee: Box<TypeRef> },
    Dynamic,
    /// Function pointers are opaque to substitution.
    FunctionPointer { signature: String },
}

/// A (possibly constructed) named type.
///
/// `definition` is always the unbound original definition. Nested generic types
/// carry their constructed containing type so that outer type parameters can be
/// substituted at the right nesting level.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamedType {
    pub definition: DeclId,
    pub args: Vec<TypeRef>,
    pub containing: Option<Box<NamedType>>,
}

/// Type parameter, identified by its declaring definition and position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeParameter {
    pub owner: DeclId,
    pub ordinal: usize,
    pub name: String,
}

impl TypeRef {
    #[must_use]
    pub fn named(definition: DeclId) -> Self {
        Self::Named(NamedType::new(definition, Vec::new()))
    }

    #[must_use]
    pub fn generic(definition: DeclId, args: Vec<TypeRef>) -> Self {
        Self::Named(NamedType::new(definition, args))
    }

    #[must_use]
    pub fn param(owner: DeclId, ordinal: usize, name: impl Into<String>) -> Self {
        Self::Parameter(TypeParameter {
            owner,
            ordinal,
            name: name.into(),
        })
    }

    #[must_use]
    pub fn array(element: TypeRef) -> Self {
        Self::Array {
            element: Box::new(element),
            rank: 1,
        }
    }

    #[must_use]
    pub fn pointer(pointee: TypeRef) -> Self {
        Self::Pointer {
            pointee: Box::new(pointee),
        }
    }

    #[must_use]
    pub fn as_named(&self) -> Option<&NamedType> {
        match self {
            TypeRef::Named(named) => Some(named),
            _ => None,
        }
    }

    #[must_use]
    pub fn definition(&self) -> Option<DeclId> {
        self.as_named().map(|named| named.definition)
    }

    /// Returns `false` only when the structure provably references no type parameter.
    #[must_use]
    pub fn contains_type_parameter(&self) -> bool {
        match self {
            TypeRef::Parameter(_) => true,
            TypeRef::Named(named) => named.contains_type_parameter(),
            TypeRef::Array { element, .. } => element.contains_type_parameter(),
            TypeRef::Pointer { pointee } => pointee.contains_type_parameter(),
            TypeRef::Dynamic | TypeRef::FunctionPointer { .. } => false,
        }
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TypeRef::Dynamic)
    }

    /// Render the type using declaration names from `snapshot`.
    #[must_use]
    pub fn display(&self, snapshot: &DeclarationSnapshot) -> String {
        let mut out = String::new();
        self.write_to(snapshot, &mut out);
        out
    }

    fn write_to(&self, snapshot: &DeclarationSnapshot, out: &mut String) {
        match self {
            TypeRef::Named(named) => named.write_to(snapshot, out),
            TypeRef::Parameter(param) => out.push_str(&param.name),
            TypeRef::Array { element, rank } => {
                element.write_to(snapshot, out);
                out.push('[');
                for _ in 1..*rank {
                    out.push(',');
                }
                out.push(']');
            }
            TypeRef::Pointer { pointee } => {
                pointee.write_to(snapshot, out);
                out.push('*');
            }
            TypeRef::Dynamic => out.push_str("dynamic"),
            TypeRef::FunctionPointer { signature } => {
                out.push_str("delegate*<");
                out.push_str(signature);
                out.push('>');
            }
        }
    }
}

impl NamedType {
    #[must_use]
    pub fn new(definition: DeclId, args: Vec<TypeRef>) -> Self {
        Self {
            definition,
            args,
            containing: None,
        }
    }

    #[must_use]
    pub fn nested_in(mut self, containing: NamedType) -> Self {
        self.containing = Some(Box::new(containing));
        self
    }

    #[must_use]
    pub fn contains_type_parameter(&self) -> bool {
        self.args.iter().any(TypeRef::contains_type_parameter)
            || self
                .containing
                .as_deref()
                .is_some_and(NamedType::contains_type_parameter)
    }

    /// True when no level of the nesting chain carries type arguments.
    #[must_use]
    pub fn is_unconstructed(&self) -> bool {
        self.args.is_empty()
            && self
                .containing
                .as_deref()
                .is_none_or(NamedType::is_unconstructed)
    }

    fn write_to(&self, snapshot: &DeclarationSnapshot, out: &mut String) {
        if let Some(containing) = &self.containing {
            containing.write_to(snapshot, out);
            out.push('.');
        }
        match snapshot.get(self.definition) {
            Some(decl) => out.push_str(&decl.name),
            None => out.push_str(&self.definition.to_string()),
        }
        if !self.args.is_empty() {
            out.push('<');
            for (index, arg) in self.args.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                arg.write_to(snapshot, out);
            }
            out.push('>');
        }
    }
}
