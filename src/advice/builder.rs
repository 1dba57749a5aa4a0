use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{first_foreign_parameter, type_scope_owners};
use crate::conflicts::MemberSignature;
use crate::error::{Error, Result};
use crate::generic_context::GenericContext;
use crate::model::{
    Accessor, Body, DeclId, DeclKind, DeclOrigin, Declaration, DeclarationSnapshot, EventDecl,
    FieldDecl, MemberDispatch, MemberKind, MethodDecl, Parameter, PropertyDecl, TypeRef,
    Visibility,
};
use crate::templates::TemplateMember;

/// The not-yet-committed declaration behind an introduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntroducedMember {
    pub id: DeclId,
    pub declaring_type: DeclId,
    pub kind: MemberKind,
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub generic_params: Vec<String>,
    pub params: Vec<Parameter>,
    /// Return type of a method, value type of a field or property, handler type of an event.
    pub value_type: TypeRef,
    pub has_getter: bool,
    pub has_setter: bool,
}

impl IntroducedMember {
    #[must_use]
    pub fn signature(&self) -> MemberSignature {
        MemberSignature::from_parts(
            self.id,
            &self.name,
            self.kind,
            self.is_static,
            self.generic_params.len(),
            &self.params,
            Some(&self.value_type),
            &GenericContext::Null,
        )
    }

    /// Name of the first type parameter that is neither the member's own nor
    /// one of its declaring type's.
    #[must_use]
    pub fn unbound_parameter(&self, snapshot: &DeclarationSnapshot) -> Option<String> {
        let mut owners = type_scope_owners(snapshot, self.declaring_type);
        owners.push(self.id);
        self.params
            .iter()
            .map(|param| &param.ty)
            .chain(std::iter::once(&self.value_type))
            .find_map(|ty| first_foreign_parameter(ty, &owners))
            .map(str::to_string)
    }

    /// Declaration committed into a successor snapshot.
    #[must_use]
    pub fn to_declaration(&self) -> Declaration {
        let kind = match self.kind {
            MemberKind::Method => DeclKind::Method(MethodDecl {
                generic_params: self.generic_params.clone(),
                params: self.params.clone(),
                return_type: self.value_type.clone(),
                is_async: false,
                is_iterator: false,
                body: Some(Body::default()),
            }),
            MemberKind::Property | MemberKind::Indexer => DeclKind::Property(PropertyDecl {
                ty: self.value_type.clone(),
                getter: self.has_getter.then(|| Accessor::with_body(Body::default())),
                setter: self.has_setter.then(|| Accessor::with_body(Body::default())),
            }),
            MemberKind::Event => DeclKind::Event(EventDecl {
                handler_type: self.value_type.clone(),
            }),
            MemberKind::Field | MemberKind::Type => DeclKind::Field(FieldDecl {
                ty: self.value_type.clone(),
                is_readonly: false,
            }),
        };
        Declaration {
            id: self.id,
            name: self.name.clone(),
            declaring_type: Some(self.declaring_type),
            visibility: self.visibility,
            is_static: self.is_static,
            dispatch: MemberDispatch {
                is_virtual: self.is_virtual,
                ..MemberDispatch::default()
            },
            origin: DeclOrigin::Introduced,
            kind,
        }
    }
}

#[derive(Debug)]
struct BuilderState {
    template: Option<TemplateMember>,
    member: RwLock<IntroducedMember>,
    frozen: AtomicBool,
}

/// Customisation handle for an introduced member.
///
/// Clones share state. Every setter fails with [`Error::Usage`] once the
/// owning factory has finished.
#[derive(Clone, Debug)]
pub struct MemberBuilder {
    inner: Arc<BuilderState>,
}

impl MemberBuilder {
    pub(crate) fn new(member: IntroducedMember, template: Option<TemplateMember>) -> Self {
        Self {
            inner: Arc::new(BuilderState {
                template,
                member: RwLock::new(member),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    /// Copy of the current state of the introduced member.
    #[must_use]
    pub fn snapshot(&self) -> IntroducedMember {
        self.inner
            .member
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn id(&self) -> DeclId {
        self.read(|member| member.id)
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.read(|member| member.name.clone())
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.read(|member| member.visibility)
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.read(|member| member.is_static)
    }

    #[must_use]
    pub fn parameters(&self) -> Vec<Parameter> {
        self.read(|member| member.params.clone())
    }

    #[must_use]
    pub fn return_type(&self) -> TypeRef {
        self.read(|member| member.value_type.clone())
    }

    #[must_use]
    pub fn template_ref(&self) -> Option<&TemplateMember> {
        self.inner.template.as_ref()
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::usage("introduced member name cannot be empty"));
        }
        self.write(|member| member.name = name)
    }

    pub fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        self.write(|member| member.visibility = visibility)
    }

    pub fn set_static(&self, is_static: bool) -> Result<()> {
        self.write(|member| member.is_static = is_static)
    }

    pub fn set_virtual(&self, is_virtual: bool) -> Result<()> {
        self.write(|member| member.is_virtual = is_virtual)
    }

    pub fn add_parameter(&self, parameter: Parameter) -> Result<()> {
        self.require_kind(&[MemberKind::Method], "parameters")?;
        self.write(|member| member.params.push(parameter))
    }

    pub fn set_parameters(&self, parameters: Vec<Parameter>) -> Result<()> {
        self.require_kind(&[MemberKind::Method], "parameters")?;
        self.write(|member| member.params = parameters)
    }

    /// Return type of a method, or the value type of a field, property or event.
    pub fn set_return_type(&self, ty: TypeRef) -> Result<()> {
        self.write(|member| member.value_type = ty)
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    fn require_kind(&self, kinds: &[MemberKind], what: &str) -> Result<()> {
        let kind = self.read(|member| member.kind);
        if kinds.contains(&kind) {
            Ok(())
        } else {
            Err(Error::usage(format!("an introduced {kind} has no {what}")))
        }
    }

    fn read<T>(&self, f: impl FnOnce(&IntroducedMember) -> T) -> T {
        f(&self.inner.member.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self, f: impl FnOnce(&mut IntroducedMember)) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::usage(format!(
                "introduced member `{}` can no longer be changed: its aspect has finished",
                self.name()
            )));
        }
        f(&mut self.inner.member.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}
