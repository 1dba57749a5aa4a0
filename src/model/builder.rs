use std::collections::HashMap;
use std::sync::Arc;

use super::snapshot::type_key;
use super::{
    Accessor, Awaitable, Body, CoreTypes, DeclId, DeclKind, DeclOrigin, Declaration,
    DeclarationSnapshot, EventDecl, FieldDecl, MemberDispatch, MethodDecl, Parameter,
    PropertyDecl, SpecialType, TypeDecl, TypeDeclKind, TypeRef, Visibility,
};

/// Mutable staging area producing the first snapshot of a lineage.
#[derive(Debug)]
pub struct SnapshotBuilder {
    decls: HashMap<DeclId, Declaration>,
    type_names: HashMap<String, DeclId>,
    next_id: u32,
    core: CoreTypes,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    /// A builder pre-populated with the core library types.
    #[must_use]
    pub fn new() -> Self {
        let placeholder = DeclId::new(0);
        let mut builder = Self {
            decls: HashMap::new(),
            type_names: HashMap::new(),
            next_id: 0,
            core: CoreTypes {
                void: placeholder,
                object: placeholder,
                boolean: placeholder,
                int: placeholder,
                string: placeholder,
                task: placeholder,
                task_of_t: placeholder,
                value_task: placeholder,
                value_task_of_t: placeholder,
                enumerable: placeholder,
                enumerable_of_t: placeholder,
                enumerator: placeholder,
                enumerator_of_t: placeholder,
                async_enumerable_of_t: placeholder,
                async_enumerator_of_t: placeholder,
            },
        };
        builder.core = CoreTypes {
            void: builder.core_type("void", 0, Some(SpecialType::Void), None),
            object: builder.core_type("object", 0, Some(SpecialType::Object), None),
            boolean: builder.core_type("bool", 0, None, None),
            int: builder.core_type("int", 0, None, None),
            string: builder.core_type("string", 0, None, None),
            task: builder.core_type("Task", 0, Some(SpecialType::Task), Some(true)),
            task_of_t: builder.core_type("Task", 1, Some(SpecialType::Task), Some(true)),
            value_task: builder.core_type("ValueTask", 0, Some(SpecialType::ValueTask), Some(true)),
            value_task_of_t: builder.core_type(
                "ValueTask",
                1,
                Some(SpecialType::ValueTask),
                Some(true),
            ),
            enumerable: builder.core_type("IEnumerable", 0, Some(SpecialType::Enumerable), None),
            enumerable_of_t: builder.core_type(
                "IEnumerable",
                1,
                Some(SpecialType::Enumerable),
                None,
            ),
            enumerator: builder.core_type("IEnumerator", 0, Some(SpecialType::Enumerator), None),
            enumerator_of_t: builder.core_type(
                "IEnumerator",
                1,
                Some(SpecialType::Enumerator),
                None,
            ),
            async_enumerable_of_t: builder.core_type(
                "IAsyncEnumerable",
                1,
                Some(SpecialType::AsyncEnumerable),
                None,
            ),
            async_enumerator_of_t: builder.core_type(
                "IAsyncEnumerator",
                1,
                Some(SpecialType::AsyncEnumerator),
                None,
            ),
        };
        builder
    }

    fn core_type(
        &mut self,
        name: &str,
        arity: usize,
        special: Option<SpecialType>,
        method_builder: Option<bool>,
    ) -> DeclId {
        let kind = match special {
            Some(
                SpecialType::Enumerable
                | SpecialType::Enumerator
                | SpecialType::AsyncEnumerable
                | SpecialType::AsyncEnumerator,
            ) => TypeDeclKind::Interface,
            Some(SpecialType::Task | SpecialType::ValueTask) => TypeDeclKind::Class,
            Some(SpecialType::Void | SpecialType::Object) | None => TypeDeclKind::Primitive,
        };
        let mut ty = TypeDecl::new(kind);
        ty.generic_params = match arity {
            0 => Vec::new(),
            1 => vec!["T".to_string()],
            n => (0..n).map(|index| format!("T{index}")).collect(),
        };
        ty.special = special;
        ty.awaitable = method_builder.map(|has_method_builder| Awaitable { has_method_builder });
        let id = self.allocate();
        self.insert_type(id, name, None, DeclOrigin::External, ty);
        id
    }

    #[must_use]
    pub fn core(&self) -> &CoreTypes {
        &self.core
    }

    fn allocate(&mut self) -> DeclId {
        let id = DeclId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert_type(
        &mut self,
        id: DeclId,
        name: &str,
        declaring_type: Option<DeclId>,
        origin: DeclOrigin,
        ty: TypeDecl,
    ) {
        let qualified = match declaring_type {
            Some(outer) => format!("{}.{name}", self.qualified_name(outer)),
            None => name.to_string(),
        };
        self.type_names
            .insert(type_key(&qualified, ty.generic_params.len()), id);
        self.insert(Declaration {
            id,
            name: name.to_string(),
            declaring_type,
            visibility: Visibility::Public,
            is_static: false,
            dispatch: MemberDispatch::default(),
            origin,
            kind: DeclKind::Type(ty),
        });
    }

    fn insert(&mut self, decl: Declaration) {
        if let Some(owner) = decl.declaring_type
            && let Some(owner_decl) = self.decls.get_mut(&owner)
            && let DeclKind::Type(ty) = &mut owner_decl.kind
        {
            ty.members.push(decl.id);
        }
        self.decls.insert(decl.id, decl);
    }

    fn qualified_name(&self, id: DeclId) -> String {
        match self.decls.get(&id) {
            Some(decl) => match decl.declaring_type {
                Some(outer) if outer != id => format!("{}.{}", self.qualified_name(outer), decl.name),
                _ => decl.name.clone(),
            },
            None => id.to_string(),
        }
    }

    /// Look up an already declared type by qualified name and arity.
    #[must_use]
    pub fn find_type(&self, name: &str, arity: usize) -> Option<DeclId> {
        self.type_names.get(&type_key(name, arity)).copied()
    }

    #[must_use]
    pub fn generic_params_of(&self, id: DeclId) -> Vec<String> {
        self.decls
            .get(&id)
            .map(|decl| decl.generic_params().to_vec())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn declaring_type_of(&self, id: DeclId) -> Option<DeclId> {
        self.decls.get(&id).and_then(|decl| decl.declaring_type)
    }

    pub fn class(&mut self, name: &str) -> TypeBuilder<'_> {
        self.type_builder(name, TypeDeclKind::Class, None)
    }

    pub fn structure(&mut self, name: &str) -> TypeBuilder<'_> {
        self.type_builder(name, TypeDeclKind::Struct, None)
    }

    pub fn interface(&mut self, name: &str) -> TypeBuilder<'_> {
        self.type_builder(name, TypeDeclKind::Interface, None)
    }

    pub fn nested_class(&mut self, outer: DeclId, name: &str) -> TypeBuilder<'_> {
        self.type_builder(name, TypeDeclKind::Class, Some(outer))
    }

    fn type_builder(
        &mut self,
        name: &str,
        kind: TypeDeclKind,
        declaring_type: Option<DeclId>,
    ) -> TypeBuilder<'_> {
        let id = self.allocate();
        TypeBuilder {
            builder: self,
            id,
            name: name.to_string(),
            declaring_type,
            origin: DeclOrigin::Source,
            ty: TypeDecl::new(kind),
        }
    }

    pub fn method(&mut self, owner: DeclId, name: &str) -> MethodBuilder<'_> {
        let id = self.allocate();
        let void = self.core.void_type();
        MethodBuilder {
            builder: self,
            decl: Declaration {
                id,
                name: name.to_string(),
                declaring_type: Some(owner),
                visibility: Visibility::Public,
                is_static: false,
                dispatch: MemberDispatch::default(),
                origin: DeclOrigin::Source,
                kind: DeclKind::Method(MethodDecl {
                    generic_params: Vec::new(),
                    params: Vec::new(),
                    return_type: void,
                    is_async: false,
                    is_iterator: false,
                    body: Some(Body::default()),
                }),
            },
        }
    }

    pub fn property(&mut self, owner: DeclId, name: &str, ty: TypeRef) -> PropertyBuilder<'_> {
        let id = self.allocate();
        PropertyBuilder {
            builder: self,
            decl: Declaration {
                id,
                name: name.to_string(),
                declaring_type: Some(owner),
                visibility: Visibility::Public,
                is_static: false,
                dispatch: MemberDispatch::default(),
                origin: DeclOrigin::Source,
                kind: DeclKind::Property(PropertyDecl {
                    ty,
                    getter: None,
                    setter: None,
                }),
            },
        }
    }

    pub fn field(&mut self, owner: DeclId, name: &str, ty: TypeRef) -> DeclId {
        self.member(owner, name, DeclKind::Field(FieldDecl {
            ty,
            is_readonly: false,
        }))
    }

    pub fn event(&mut self, owner: DeclId, name: &str, handler_type: TypeRef) -> DeclId {
        self.member(owner, name, DeclKind::Event(EventDecl { handler_type }))
    }

    /// Add an arbitrary member declaration with default modifiers.
    pub fn member(&mut self, owner: DeclId, name: &str, kind: DeclKind) -> DeclId {
        let id = self.allocate();
        self.insert(Declaration {
            id,
            name: name.to_string(),
            declaring_type: Some(owner),
            visibility: Visibility::Public,
            is_static: false,
            dispatch: MemberDispatch::default(),
            origin: DeclOrigin::Source,
            kind,
        });
        id
    }

    /// Adjust an inserted declaration in place (modifiers, visibility, origin).
    pub fn edit(&mut self, id: DeclId, edit: impl FnOnce(&mut Declaration)) {
        if let Some(decl) = self.decls.get_mut(&id) {
            edit(decl);
        }
    }

    pub fn set_base(&mut self, id: DeclId, base: TypeRef) {
        self.edit(id, |decl| {
            if let DeclKind::Type(ty) = &mut decl.kind {
                ty.base = Some(base);
            }
        });
    }

    pub fn add_interface(&mut self, id: DeclId, interface: TypeRef) {
        self.edit(id, |decl| {
            if let DeclKind::Type(ty) = &mut decl.kind {
                ty.interfaces.push(interface);
            }
        });
    }

    #[must_use]
    pub fn build(self) -> DeclarationSnapshot {
        let decls = self
            .decls
            .into_iter()
            .map(|(id, decl)| (id, Arc::new(decl)))
            .collect();
        DeclarationSnapshot::from_parts(decls, self.type_names, self.core, self.next_id)
    }
}

pub struct TypeBuilder<'a> {
    builder: &'a mut SnapshotBuilder,
    id: DeclId,
    name: String,
    declaring_type: Option<DeclId>,
    origin: DeclOrigin,
    ty: TypeDecl,
}

impl TypeBuilder<'_> {
    #[must_use]
    pub fn id(&self) -> DeclId {
        self.id
    }

    #[must_use]
    pub fn generic(mut self, params: &[&str]) -> Self {
        self.ty.generic_params = params.iter().map(|param| (*param).to_string()).collect();
        self
    }

    /// Reference to this type's own type parameter at `ordinal`.
    #[must_use]
    pub fn type_param(&self, ordinal: usize) -> TypeRef {
        let name = self
            .ty
            .generic_params
            .get(ordinal)
            .cloned()
            .unwrap_or_else(|| format!("T{ordinal}"));
        TypeRef::param(self.id, ordinal, name)
    }

    #[must_use]
    pub fn base(mut self, base: TypeRef) -> Self {
        self.ty.base = Some(base);
        self
    }

    #[must_use]
    pub fn implements(mut self, interface: TypeRef) -> Self {
        self.ty.interfaces.push(interface);
        self
    }

    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.ty.is_sealed = true;
        self
    }

    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.ty.is_abstract = true;
        self
    }

    #[must_use]
    pub fn external(mut self) -> Self {
        self.origin = DeclOrigin::External;
        self
    }

    #[must_use]
    pub fn awaitable(mut self, has_method_builder: bool) -> Self {
        self.ty.awaitable = Some(Awaitable { has_method_builder });
        self
    }

    pub fn finish(self) -> DeclId {
        let TypeBuilder {
            builder,
            id,
            name,
            declaring_type,
            origin,
            ty,
        } = self;
        builder.insert_type(id, &name, declaring_type, origin, ty);
        id
    }
}

pub struct MethodBuilder<'a> {
    builder: &'a mut SnapshotBuilder,
    decl: Declaration,
}

impl MethodBuilder<'_> {
    #[must_use]
    pub fn id(&self) -> DeclId {
        self.decl.id
    }

    fn method_mut(&mut self) -> Option<&mut MethodDecl> {
        match &mut self.decl.kind {
            DeclKind::Method(method) => Some(method),
            _ => None,
        }
    }

    #[must_use]
    pub fn generic(mut self, params: &[&str]) -> Self {
        if let Some(method) = self.method_mut() {
            method.generic_params = params.iter().map(|param| (*param).to_string()).collect();
        }
        self
    }

    #[must_use]
    pub fn type_param(&self, ordinal: usize) -> TypeRef {
        let name = self
            .decl
            .generic_params()
            .get(ordinal)
            .cloned()
            .unwrap_or_else(|| format!("U{ordinal}"));
        TypeRef::param(self.decl.id, ordinal, name)
    }

    #[must_use]
    pub fn param(mut self, name: &str, ty: TypeRef) -> Self {
        if let Some(method) = self.method_mut() {
            method.params.push(Parameter::new(name, ty));
        }
        self
    }

    #[must_use]
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        if let Some(method) = self.method_mut() {
            method.params.push(parameter);
        }
        self
    }

    #[must_use]
    pub fn returns(mut self, ty: TypeRef) -> Self {
        if let Some(method) = self.method_mut() {
            method.return_type = ty;
        }
        self
    }

    #[must_use]
    pub fn exits(mut self, exit_points: u32) -> Self {
        if let Some(method) = self.method_mut() {
            method.body = Some(Body::with_exits(exit_points));
        }
        self
    }

    #[must_use]
    pub fn async_(mut self) -> Self {
        if let Some(method) = self.method_mut() {
            method.is_async = true;
        }
        self
    }

    #[must_use]
    pub fn iterator(mut self) -> Self {
        if let Some(method) = self.method_mut() {
            method.is_iterator = true;
        }
        self
    }

    #[must_use]
    pub fn virtual_(mut self) -> Self {
        self.decl.dispatch.is_virtual = true;
        self
    }

    #[must_use]
    pub fn override_(mut self) -> Self {
        self.decl.dispatch.is_override = true;
        self
    }

    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.decl.dispatch.is_sealed = true;
        self
    }

    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.decl.dispatch.is_abstract = true;
        if let Some(method) = self.method_mut() {
            method.body = None;
        }
        self
    }

    #[must_use]
    pub fn static_(mut self) -> Self {
        self.decl.is_static = true;
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.decl.visibility = visibility;
        self
    }

    pub fn finish(self) -> DeclId {
        let id = self.decl.id;
        self.builder.insert(self.decl);
        id
    }
}

pub struct PropertyBuilder<'a> {
    builder: &'a mut SnapshotBuilder,
    decl: Declaration,
}

impl PropertyBuilder<'_> {
    fn property_mut(&mut self) -> Option<&mut PropertyDecl> {
        match &mut self.decl.kind {
            DeclKind::Property(property) => Some(property),
            _ => None,
        }
    }

    #[must_use]
    pub fn getter(self) -> Self {
        self.getter_with_exits(1)
    }

    #[must_use]
    pub fn getter_with_exits(mut self, exit_points: u32) -> Self {
        if let Some(property) = self.property_mut() {
            property.getter = Some(Accessor::with_body(Body::with_exits(exit_points)));
        }
        self
    }

    #[must_use]
    pub fn iterator_getter(mut self) -> Self {
        if let Some(property) = self.property_mut() {
            let mut accessor = Accessor::with_body(Body::default());
            accessor.is_iterator = true;
            property.getter = Some(accessor);
        }
        self
    }

    #[must_use]
    pub fn setter(mut self) -> Self {
        if let Some(property) = self.property_mut() {
            property.setter = Some(Accessor::with_body(Body::default()));
        }
        self
    }

    #[must_use]
    pub fn virtual_(mut self) -> Self {
        self.decl.dispatch.is_virtual = true;
        self
    }

    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.decl.dispatch.is_sealed = true;
        self
    }

    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.decl.dispatch.is_abstract = true;
        if let Some(property) = self.property_mut() {
            for accessor in [&mut property.getter, &mut property.setter].into_iter().flatten() {
                accessor.body = None;
            }
        }
        self
    }

    #[must_use]
    pub fn static_(mut self) -> Self {
        self.decl.is_static = true;
        self
    }

    pub fn finish(self) -> DeclId {
        let id = self.decl.id;
        self.builder.insert(self.decl);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InterfaceImplementation;

    #[test]
    fn core_types_are_registered_by_name_and_arity() {
        let builder = SnapshotBuilder::new();
        let core = *builder.core();
        let snapshot = builder.build();
        assert_eq!(
            snapshot.lookup_type("Task", 1).map(|r| r.id()),
            Some(core.task_of_t)
        );
        assert_eq!(snapshot.lookup_type("Task", 0).map(|r| r.id()), Some(core.task));
        assert!(snapshot.is_interface(core.enumerable_of_t));
    }

    #[test]
    fn base_chain_substitutes_arguments_level_by_level() {
        let mut builder = SnapshotBuilder::new();
        let int = builder.core().int_type();
        let root = builder.class("Root").generic(&["R"]).finish();
        let middle = builder.class("Middle").generic(&["M"]).finish();
        let m = TypeRef::param(middle, 0, "M");
        builder.set_base(middle, TypeRef::generic(root, vec![TypeRef::array(m)]));
        let leaf = builder
            .class("Leaf")
            .base(TypeRef::generic(middle, vec![int.clone()]))
            .finish();
        let snapshot = builder.build();

        let chain = snapshot.base_chain(leaf);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].definition, middle);
        assert_eq!(chain[0].args, vec![int.clone()]);
        assert_eq!(chain[1].definition, root);
        assert_eq!(chain[1].args, vec![TypeRef::array(int)]);
    }

    #[test]
    fn interface_implementation_distinguishes_declared_and_inherited() {
        let mut builder = SnapshotBuilder::new();
        let disposable = builder.interface("IDisposable").finish();
        let base = builder
            .class("Base")
            .implements(TypeRef::named(disposable))
            .finish();
        let derived = builder.class("Derived").base(TypeRef::named(base)).finish();
        let snapshot = builder.build();

        assert_eq!(
            snapshot.implements_interface(base, disposable),
            InterfaceImplementation::Declared
        );
        assert_eq!(
            snapshot.implements_interface(derived, disposable),
            InterfaceImplementation::Inherited { by: base }
        );
    }

    #[test]
    fn successor_commits_members_without_touching_predecessor() {
        let mut builder = SnapshotBuilder::new();
        let widget = builder.class("Widget").finish();
        let snapshot = builder.build();
        let id = snapshot.allocate_id();
        let added = Declaration {
            id,
            name: "Added".into(),
            declaring_type: Some(widget),
            visibility: Visibility::Public,
            is_static: false,
            dispatch: MemberDispatch::default(),
            origin: DeclOrigin::Introduced,
            kind: DeclKind::Field(FieldDecl {
                ty: snapshot.core().int_type(),
                is_readonly: false,
            }),
        };
        let next = snapshot.successor(vec![added]);

        assert_eq!(next.version(), snapshot.version() + 1);
        assert_ne!(next.id(), snapshot.id());
        assert_eq!(snapshot.members(widget).count(), 0);
        assert_eq!(next.members(widget).count(), 1);

        let reference = snapshot.reference(widget);
        assert!(next.resolve(reference.rebase(&next)).is_some());
        assert!(snapshot.resolve(snapshot.reference(id)).is_none());
    }
}
