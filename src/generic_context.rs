//! Type-parameter substitution for advice that touches generic declarations.
//!
//! A [`GenericContext`] is an immutable value. Contexts built from existing
//! instantiations match parameters against the unbound definition at each
//! nesting level; contexts built for introduced declarations match by the
//! originating declaration and chain to a parent for outer scopes.

use std::borrow::Cow;
use std::sync::Arc;

use crate::model::{DeclId, DeclarationSnapshot, NamedType, TypeParameter, TypeRef};

/// A concrete instantiation of a generic method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodInstance {
    pub definition: DeclId,
    pub args: Vec<TypeRef>,
}

impl MethodInstance {
    #[must_use]
    pub fn new(definition: DeclId, args: Vec<TypeRef>) -> Self {
        Self { definition, args }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolGenericContext {
    type_instance: Option<NamedType>,
    method: Option<MethodInstance>,
}

impl SymbolGenericContext {
    #[must_use]
    pub fn type_instance(&self) -> Option<&NamedType> {
        self.type_instance.as_ref()
    }

    #[must_use]
    pub fn method(&self) -> Option<&MethodInstance> {
        self.method.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IntroducedGenericContext {
    origin: DeclId,
    args: Vec<TypeRef>,
    parent: GenericContext,
}

impl IntroducedGenericContext {
    #[must_use]
    pub fn origin(&self) -> DeclId {
        self.origin
    }

    #[must_use]
    pub fn args(&self) -> &[TypeRef] {
        &self.args
    }

    #[must_use]
    pub fn parent(&self) -> &GenericContext {
        &self.parent
    }
}

/// Immutable mapping from type parameters to type arguments.
///
/// Equality and hashing are structural: two contexts are equal exactly when
/// they substitute every parameter identically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum GenericContext {
    #[default]
    Null,
    Symbol(Arc<SymbolGenericContext>),
    Introduced(Arc<IntroducedGenericContext>),
}

impl GenericContext {
    /// Context of a constructed type and optionally a constructed method on it.
    ///
    /// Collapses to [`GenericContext::Null`] when nothing is constructed.
    #[must_use]
    pub fn for_instance(type_instance: NamedType, method: Option<MethodInstance>) -> Self {
        let method = method.filter(|method| !method.args.is_empty());
        let type_instance = (!type_instance.is_unconstructed()).then_some(type_instance);
        if type_instance.is_none() && method.is_none() {
            return GenericContext::Null;
        }
        GenericContext::Symbol(Arc::new(SymbolGenericContext {
            type_instance,
            method,
        }))
    }

    /// Context of a declaration seen through its own definition.
    ///
    /// Non-generic scopes get the null context; generic ones map every
    /// parameter to itself.
    #[must_use]
    pub fn for_symbol(snapshot: &DeclarationSnapshot, id: DeclId) -> Self {
        if !snapshot.is_generic_scope(id) {
            return GenericContext::Null;
        }
        let Some(decl) = snapshot.get(id) else {
            return GenericContext::Null;
        };
        let (type_id, method) = match decl.as_method() {
            Some(method) => {
                let args = method
                    .generic_params
                    .iter()
                    .enumerate()
                    .map(|(ordinal, name)| TypeRef::param(id, ordinal, name.clone()))
                    .collect();
                (decl.declaring_type, Some(MethodInstance::new(id, args)))
            }
            None if decl.as_type().is_some() => (Some(id), None),
            None => (decl.declaring_type, None),
        };
        let instance = match type_id {
            Some(type_id) => snapshot.self_type(type_id),
            None => NamedType::new(id, Vec::new()),
        };
        Self::for_instance(instance, method)
    }

    /// Context whose arguments belong to the introduced declaration `origin`.
    #[must_use]
    pub fn introduced(origin: DeclId, args: Vec<TypeRef>, parent: GenericContext) -> Self {
        if args.is_empty() && parent.is_null() {
            return GenericContext::Null;
        }
        GenericContext::Introduced(Arc::new(IntroducedGenericContext {
            origin,
            args,
            parent,
        }))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, GenericContext::Null)
    }

    /// Substitute every mapped type parameter in `ty`.
    ///
    /// Types that provably reference no type parameter are returned borrowed.
    #[must_use]
    pub fn map<'t>(&self, ty: &'t TypeRef) -> Cow<'t, TypeRef> {
        if self.is_null() || !ty.contains_type_parameter() {
            return Cow::Borrowed(ty);
        }
        Cow::Owned(self.substitute(ty))
    }

    /// Argument bound to `param`, or `None` when it belongs to an unbound scope.
    #[must_use]
    pub fn map_parameter(&self, param: &TypeParameter) -> Option<&TypeRef> {
        match self {
            GenericContext::Null => None,
            GenericContext::Symbol(symbol) => {
                if let Some(method) = &symbol.method
                    && method.definition == param.owner
                {
                    return method.args.get(param.ordinal);
                }
                let mut level = symbol.type_instance.as_ref();
                while let Some(named) = level {
                    if named.definition == param.owner {
                        return named.args.get(param.ordinal);
                    }
                    level = named.containing.as_deref();
                }
                None
            }
            GenericContext::Introduced(introduced) => {
                if introduced.origin == param.owner {
                    introduced.args.get(param.ordinal)
                } else {
                    introduced.parent.map_parameter(param)
                }
            }
        }
    }

    fn substitute(&self, ty: &TypeRef) -> TypeRef {
        match ty {
            TypeRef::Parameter(param) => self
                .map_parameter(param)
                .cloned()
                .unwrap_or_else(|| ty.clone()),
            TypeRef::Named(named) => TypeRef::Named(self.substitute_named(named)),
            TypeRef::Array { element, rank } => TypeRef::Array {
                element: Box::new(self.map(element).into_owned()),
                rank: *rank,
            },
            TypeRef::Pointer { pointee } => TypeRef::Pointer {
                pointee: Box::new(self.map(pointee).into_owned()),
            },
            TypeRef::Dynamic | TypeRef::FunctionPointer { .. } => ty.clone(),
        }
    }

    fn substitute_named(&self, named: &NamedType) -> NamedType {
        NamedType {
            definition: named.definition,
            args: named
                .args
                .iter()
                .map(|arg| self.map(arg).into_owned())
                .collect(),
            containing: named
                .containing
                .as_deref()
                .map(|outer| Box::new(self.substitute_named(outer))),
        }
    }
}
