//! In-memory declaration model consumed by the weaving engine.
//!
//! A [`DeclarationSnapshot`] is an immutable, versioned view of a program's
//! declarations. Declarations are addressed through [`DeclRef`] handles that
//! must be resolved against a concrete snapshot before use.

mod builder;
mod decl;
mod ids;
mod shape;
mod snapshot;
mod types;

pub use builder::{MethodBuilder, PropertyBuilder, SnapshotBuilder, TypeBuilder};
pub use decl::{
    Accessor, Awaitable, Body, DeclKind, DeclOrigin, Declaration, EventDecl, FieldDecl,
    IndexerDecl, MemberDispatch, MemberKind, MethodDecl, Parameter, ParameterMode, PropertyDecl,
    SpecialType, TypeDecl, TypeDeclKind, Visibility,
};
pub use ids::{DeclId, DeclRef, SnapshotId};
pub use shape::{AsyncInfo, IteratorInfo, IteratorKind, TargetShape, iterator_kind};
pub use snapshot::{CoreTypes, DeclarationSnapshot, InterfaceImplementation};
pub use types::{NamedType, TypeParameter, TypeRef};
