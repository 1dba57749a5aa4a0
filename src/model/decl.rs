use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DeclId, TypeRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Internal,
    ProtectedInternal,
    PrivateProtected,
    Private,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Internal => "internal",
            Visibility::ProtectedInternal => "protected internal",
            Visibility::PrivateProtected => "private protected",
            Visibility::Private => "private",
        }
    }

    /// Whether a member with this visibility can be seen from a derived type.
    #[must_use]
    pub fn visible_to_derived(self) -> bool {
        !matches!(self, Visibility::Private)
    }
}

/// Virtual dispatch modifiers of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberDispatch {
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_sealed: bool,
    pub is_abstract: bool,
}

impl MemberDispatch {
    /// A member a derived type may legally override.
    #[must_use]
    pub fn is_overridable(self) -> bool {
        (self.is_virtual || self.is_override || self.is_abstract) && !self.is_sealed
    }

    #[must_use]
    pub fn is_virtual_candidate(self) -> bool {
        self.is_virtual || self.is_override || self.is_abstract
    }
}

/// Where a declaration comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeclOrigin {
    #[default]
    Source,
    /// Declared in a referenced library; never modified by weaving.
    External,
    /// Introduced by advice and committed into a successor snapshot.
    Introduced,
}

/// Closed set of declaration kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberKind {
    Type,
    Method,
    Field,
    Property,
    Indexer,
    Event,
}

impl MemberKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemberKind::Type => "type",
            MemberKind::Method => "method",
            MemberKind::Field => "field",
            MemberKind::Property => "property",
            MemberKind::Indexer => "indexer",
            MemberKind::Event => "event",
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeDeclKind {
    Class,
    Struct,
    Interface,
    Primitive,
}

/// Types the engine needs to recognise when classifying member shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialType {
    Void,
    Object,
    Task,
    ValueTask,
    Enumerable,
    Enumerator,
    AsyncEnumerable,
    AsyncEnumerator,
}

/// Awaitable pattern of a type (`GetAwaiter` plus, optionally, an async method builder).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Awaitable {
    pub has_method_builder: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
    pub kind: TypeDeclKind,
    pub generic_params: Vec<String>,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub is_sealed: bool,
    pub is_abstract: bool,
    pub special: Option<SpecialType>,
    pub awaitable: Option<Awaitable>,
    pub members: Vec<DeclId>,
}

impl TypeDecl {
    #[must_use]
    pub fn new(kind: TypeDeclKind) -> Self {
        Self {
            kind,
            generic_params: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            is_sealed: false,
            is_abstract: false,
            special: None,
            awaitable: None,
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        matches!(self.kind, TypeDeclKind::Interface)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    Ref,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeRef,
    pub mode: ParameterMode,
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            mode: ParameterMode::In,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ParameterMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Shape of an implementation body relevant to statement placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Body {
    /// Number of `return`/exit points, always at least one.
    pub exit_points: u32,
}

impl Body {
    #[must_use]
    pub fn with_exits(exit_points: u32) -> Self {
        Self {
            exit_points: exit_points.max(1),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self { exit_points: 1 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDecl {
    pub generic_params: Vec<String>,
    pub params: Vec<Parameter>,
    pub return_type: TypeRef,
    pub is_async: bool,
    pub is_iterator: bool,
    pub body: Option<Body>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub ty: TypeRef,
    pub is_readonly: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Accessor {
    pub visibility: Visibility,
    pub body: Option<Body>,
    pub is_iterator: bool,
}

impl Accessor {
    #[must_use]
    pub fn with_body(body: Body) -> Self {
        Self {
            visibility: Visibility::Public,
            body: Some(body),
            is_iterator: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDecl {
    pub ty: TypeRef,
    pub getter: Option<Accessor>,
    pub setter: Option<Accessor>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexerDecl {
    pub ty: TypeRef,
    pub params: Vec<Parameter>,
    pub getter: Option<Accessor>,
    pub setter: Option<Accessor>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventDecl {
    pub handler_type: TypeRef,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeclKind {
    Type(TypeDecl),
    Method(MethodDecl),
    Field(FieldDecl),
    Property(PropertyDecl),
    Indexer(IndexerDecl),
    Event(EventDecl),
}

impl DeclKind {
    #[must_use]
    pub fn tag(&self) -> MemberKind {
        match self {
            DeclKind::Type(_) => MemberKind::Type,
            DeclKind::Method(_) => MemberKind::Method,
            DeclKind::Field(_) => MemberKind::Field,
            DeclKind::Property(_) => MemberKind::Property,
            DeclKind::Indexer(_) => MemberKind::Indexer,
            DeclKind::Event(_) => MemberKind::Event,
        }
    }
}

/// One named program element inside a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    pub id: DeclId,
    pub name: String,
    pub declaring_type: Option<DeclId>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub dispatch: MemberDispatch,
    pub origin: DeclOrigin,
    pub kind: DeclKind,
}

impl Declaration {
    #[must_use]
    pub fn member_kind(&self) -> MemberKind {
        self.kind.tag()
    }

    #[must_use]
    pub fn as_type(&self) -> Option<&TypeDecl> {
        match &self.kind {
            DeclKind::Type(ty) => Some(ty),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_method(&self) -> Option<&MethodDecl> {
        match &self.kind {
            DeclKind::Method(method) => Some(method),
            _ => None,
        }
    }

    #[must_use]
    pub fn generic_params(&self) -> &[String] {
        match &self.kind {
            DeclKind::Type(ty) => &ty.generic_params,
            DeclKind::Method(method) => &method.generic_params,
            DeclKind::Field(_)
            | DeclKind::Property(_)
            | DeclKind::Indexer(_)
            | DeclKind::Event(_) => &[],
        }
    }

    /// Abstract members, or members without an implementation body.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        if self.dispatch.is_abstract {
            return true;
        }
        match &self.kind {
            DeclKind::Type(ty) => ty.is_abstract || ty.is_interface(),
            DeclKind::Method(method) => method.body.is_none(),
            DeclKind::Property(property) => {
                accessor_is_abstract(property.getter.as_ref())
                    && accessor_is_abstract(property.setter.as_ref())
            }
            DeclKind::Indexer(indexer) => {
                accessor_is_abstract(indexer.getter.as_ref())
                    && accessor_is_abstract(indexer.setter.as_ref())
            }
            DeclKind::Field(_) | DeclKind::Event(_) => false,
        }
    }

    /// Type of the value carried by a field, property, indexer or event.
    #[must_use]
    pub fn value_type(&self) -> Option<&TypeRef> {
        match &self.kind {
            DeclKind::Field(field) => Some(&field.ty),
            DeclKind::Property(property) => Some(&property.ty),
            DeclKind::Indexer(indexer) => Some(&indexer.ty),
            DeclKind::Event(event) => Some(&event.handler_type),
            DeclKind::Method(method) => Some(&method.return_type),
            DeclKind::Type(_) => None,
        }
    }
}

fn accessor_is_abstract(accessor: Option<&Accessor>) -> bool {
    accessor.is_none_or(|accessor| accessor.body.is_none())
}
