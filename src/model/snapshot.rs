use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{
    DeclId, DeclKind, DeclRef, Declaration, NamedType, SnapshotId, TypeDecl, TypeDeclKind,
    TypeRef,
};
use crate::generic_context::GenericContext;

/// Declarations every snapshot knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreTypes {
    pub void: DeclId,
    pub object: DeclId,
    pub boolean: DeclId,
    pub int: DeclId,
    pub string: DeclId,
    pub task: DeclId,
    pub task_of_t: DeclId,
    pub value_task: DeclId,
    pub value_task_of_t: DeclId,
    pub enumerable: DeclId,
    pub enumerable_of_t: DeclId,
    pub enumerator: DeclId,
    pub enumerator_of_t: DeclId,
    pub async_enumerable_of_t: DeclId,
    pub async_enumerator_of_t: DeclId,
}

impl CoreTypes {
    #[must_use]
    pub fn void_type(&self) -> TypeRef {
        TypeRef::named(self.void)
    }

    #[must_use]
    pub fn object_type(&self) -> TypeRef {
        TypeRef::named(self.object)
    }

    #[must_use]
    pub fn int_type(&self) -> TypeRef {
        TypeRef::named(self.int)
    }

    #[must_use]
    pub fn string_type(&self) -> TypeRef {
        TypeRef::named(self.string)
    }

    #[must_use]
    pub fn bool_type(&self) -> TypeRef {
        TypeRef::named(self.boolean)
    }
}

/// Where an interface implementation of a type comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceImplementation {
    NotImplemented,
    /// Listed by the type itself (directly or through an interface it lists).
    Declared,
    /// Only implemented through a base class.
    Inherited { by: DeclId },
}

/// Immutable, versioned view of a program's declarations.
///
/// Snapshots are cheap to clone and safe to share across threads; a successor
/// snapshot shares unchanged declarations with its predecessor.
#[derive(Clone, Debug)]
pub struct DeclarationSnapshot {
    id: SnapshotId,
    version: u32,
    decls: Arc<HashMap<DeclId, Arc<Declaration>>>,
    type_names: Arc<HashMap<String, DeclId>>,
    core: CoreTypes,
    next_id: Arc<AtomicU32>,
}

impl DeclarationSnapshot {
    pub(crate) fn from_parts(
        decls: HashMap<DeclId, Arc<Declaration>>,
        type_names: HashMap<String, DeclId>,
        core: CoreTypes,
        next_id: u32,
    ) -> Self {
        Self {
            id: SnapshotId::fresh(),
            version: 0,
            decls: Arc::new(decls),
            type_names: Arc::new(type_names),
            core,
            next_id: Arc::new(AtomicU32::new(next_id)),
        }
    }

    #[must_use]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn core(&self) -> &CoreTypes {
        &self.core
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Allocate an identity for a declaration that is not yet committed.
    ///
    /// Identities are shared by the whole lineage, so concurrent aspect
    /// instances never hand out the same id.
    #[must_use]
    pub fn allocate_id(&self) -> DeclId {
        DeclId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Hand out a reference bound to this snapshot.
    #[must_use]
    pub fn reference(&self, id: DeclId) -> DeclRef {
        DeclRef::new(id, self.id)
    }

    #[must_use]
    pub fn get(&self, id: DeclId) -> Option<&Declaration> {
        self.decls.get(&id).map(AsRef::as_ref)
    }

    /// Resolve a reference against this snapshot, whichever snapshot produced it.
    #[must_use]
    pub fn resolve(&self, reference: DeclRef) -> Option<&Declaration> {
        self.get(reference.id())
    }

    /// Look up a type by qualified name (`Outer.Inner`) and generic arity.
    #[must_use]
    pub fn lookup_type(&self, name: &str, arity: usize) -> Option<DeclRef> {
        self.type_names
            .get(&type_key(name, arity))
            .map(|id| self.reference(*id))
    }

    #[must_use]
    pub fn type_decl(&self, id: DeclId) -> Option<&TypeDecl> {
        self.get(id).and_then(Declaration::as_type)
    }

    #[must_use]
    pub fn is_interface(&self, id: DeclId) -> bool {
        self.type_decl(id).is_some_and(TypeDecl::is_interface)
    }

    /// Members declared directly by `type_id`, in declaration order.
    pub fn members(&self, type_id: DeclId) -> impl Iterator<Item = &Declaration> + '_ {
        self.type_decl(type_id)
            .map(|ty| ty.members.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.get(*id))
    }

    pub fn members_named<'a>(
        &'a self,
        type_id: DeclId,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Declaration> + 'a {
        self.members(type_id).filter(move |decl| decl.name == name)
    }

    /// Generic arity of a declaration, not counting its declaring types.
    #[must_use]
    pub fn generic_arity(&self, id: DeclId) -> usize {
        self.get(id).map_or(0, |decl| decl.generic_params().len())
    }

    /// True when the declaration or any declaring type has type parameters.
    #[must_use]
    pub fn is_generic_scope(&self, id: DeclId) -> bool {
        let mut current = Some(id);
        let mut guard = 0;
        while let Some(id) = current {
            let Some(decl) = self.get(id) else {
                return false;
            };
            if !decl.generic_params().is_empty() {
                return true;
            }
            current = decl.declaring_type;
            guard += 1;
            if guard > 64 {
                return false;
            }
        }
        false
    }

    /// The definition of `type_id` constructed over its own type parameters.
    #[must_use]
    pub fn self_type(&self, type_id: DeclId) -> NamedType {
        let Some(decl) = self.get(type_id) else {
            return NamedType::new(type_id, Vec::new());
        };
        let args = decl
            .generic_params()
            .iter()
            .enumerate()
            .map(|(ordinal, name)| TypeRef::param(type_id, ordinal, name.clone()))
            .collect();
        let named = NamedType::new(type_id, args);
        match decl.declaring_type {
            Some(outer) if outer != type_id && self.type_decl(outer).is_some() => {
                named.nested_in(self.self_type(outer))
            }
            _ => named,
        }
    }

    /// Class base chain of `type_id`, nearest first, as constructed types
    /// expressed in terms of `type_id`'s own type parameters.
    #[must_use]
    pub fn base_chain(&self, type_id: DeclId) -> Vec<NamedType> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(type_id);
        let mut context = GenericContext::Null;
        let mut current = self.type_decl(type_id).and_then(|ty| ty.base.clone());
        while let Some(TypeRef::Named(base)) = current {
            let base = match context.map(&TypeRef::Named(base.clone())).into_owned() {
                TypeRef::Named(mapped) => mapped,
                _ => base,
            };
            if !visited.insert(base.definition) {
                break;
            }
            let Some(info) = self.type_decl(base.definition) else {
                break;
            };
            if !matches!(info.kind, TypeDeclKind::Class | TypeDeclKind::Struct) {
                break;
            }
            context = GenericContext::for_instance(base.clone(), None);
            current = info.base.clone();
            chain.push(base);
        }
        chain
    }

    /// Every interface implemented by `type_id` itself (not through a base class),
    /// including base interfaces of the listed ones.
    #[must_use]
    pub fn declared_interfaces(&self, type_id: DeclId) -> Vec<NamedType> {
        let Some(ty) = self.type_decl(type_id) else {
            return Vec::new();
        };
        self.interface_closure(&ty.interfaces, &GenericContext::Null)
    }

    fn interface_closure(&self, roots: &[TypeRef], context: &GenericContext) -> Vec<NamedType> {
        let mut closure = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NamedType> = roots
            .iter()
            .filter_map(|root| match context.map(root).into_owned() {
                TypeRef::Named(named) => Some(named),
                _ => None,
            })
            .collect();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(info) = self.type_decl(current.definition)
                && info.is_interface()
            {
                let inner = GenericContext::for_instance(current.clone(), None);
                for base in &info.interfaces {
                    if let TypeRef::Named(named) = inner.map(base).into_owned() {
                        queue.push_back(named);
                    }
                }
            }
            closure.push(current);
        }
        closure
    }

    /// Whether `type_id` implements the interface definition `interface`.
    #[must_use]
    pub fn implements_interface(&self, type_id: DeclId, interface: DeclId) -> InterfaceImplementation {
        if self
            .declared_interfaces(type_id)
            .iter()
            .any(|iface| iface.definition == interface)
        {
            return InterfaceImplementation::Declared;
        }
        for base in self.base_chain(type_id) {
            let Some(info) = self.type_decl(base.definition) else {
                continue;
            };
            let context = GenericContext::for_instance(base.clone(), None);
            if self
                .interface_closure(&info.interfaces, &context)
                .iter()
                .any(|iface| iface.definition == interface)
            {
                return InterfaceImplementation::Inherited {
                    by: base.definition,
                };
            }
        }
        InterfaceImplementation::NotImplemented
    }

    /// Build a successor snapshot in which `additions` are committed.
    ///
    /// Each added member is appended to its declaring type's member list. The
    /// receiver stays valid and unchanged.
    #[must_use]
    pub fn successor(&self, additions: Vec<Declaration>) -> DeclarationSnapshot {
        let mut decls: HashMap<DeclId, Arc<Declaration>> = (*self.decls).clone();
        let mut type_names: HashMap<String, DeclId> = (*self.type_names).clone();
        for decl in additions {
            if let Some(owner) = decl.declaring_type
                && let Some(existing) = decls.get(&owner)
            {
                let mut owner_decl = Declaration::clone(existing);
                if let DeclKind::Type(ty) = &mut owner_decl.kind
                    && !ty.members.contains(&decl.id)
                {
                    ty.members.push(decl.id);
                }
                decls.insert(owner, Arc::new(owner_decl));
            }
            if let DeclKind::Type(ty) = &decl.kind {
                type_names.insert(type_key(&decl.name, ty.generic_params.len()), decl.id);
            }
            decls.insert(decl.id, Arc::new(decl));
        }
        Self {
            id: SnapshotId::fresh(),
            version: self.version + 1,
            decls: Arc::new(decls),
            type_names: Arc::new(type_names),
            core: self.core,
            next_id: Arc::clone(&self.next_id),
        }
    }

    /// Fully qualified display name of a declaration (`Outer.Inner.Member`).
    #[must_use]
    pub fn display_name(&self, id: DeclId) -> String {
        let Some(decl) = self.get(id) else {
            return id.to_string();
        };
        match decl.declaring_type {
            Some(owner) if owner != id => format!("{}.{}", self.display_name(owner), decl.name),
            _ => decl.name.clone(),
        }
    }
}

pub(crate) fn type_key(name: &str, arity: usize) -> String {
    if arity == 0 {
        name.to_string()
    } else {
        format!("{name}`{arity}")
    }
}
