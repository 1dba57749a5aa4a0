use std::collections::HashMap;

use super::{TemplateAttributeKind, TemplateMember, TemplateShape};
use crate::error::{Error, Result};
use crate::model::{DeclId, DeclKind, DeclarationSnapshot, MemberKind};

/// What the registry knows about one member of an aspect class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateDescriptor {
    pub class: String,
    pub name: String,
    pub declaration: DeclId,
    pub attribute: TemplateAttributeKind,
    pub is_abstract: bool,
    pub member_kind: MemberKind,
    pub parameter_count: usize,
}

impl TemplateDescriptor {
    /// Bind the descriptor to `shape`, resolving its declaration against `snapshot`.
    #[must_use]
    pub fn bind(&self, snapshot: &DeclarationSnapshot, shape: TemplateShape) -> TemplateMember {
        TemplateMember {
            reference: snapshot.reference(self.declaration),
            class: self.class.clone(),
            name: self.name.clone(),
            shape,
            attribute: self.attribute,
            member_kind: self.member_kind,
            parameter_count: self.parameter_count,
        }
    }
}

/// Outcome of looking up `(class, member)`.
///
/// A missing member and an abstract one are distinct outcomes: the first is an
/// aspect-authoring mistake, the second must never reach template selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateResolution<'r> {
    NotFound,
    Abstract(&'r TemplateDescriptor),
    Found(&'r TemplateDescriptor),
}

/// Read-only lookup of template members by aspect class and member name.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    entries: HashMap<(String, String), TemplateDescriptor>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: TemplateDescriptor) {
        self.entries.insert(
            (descriptor.class.clone(), descriptor.name.clone()),
            descriptor,
        );
    }

    /// Register a member declared by an aspect class in `snapshot`.
    pub fn register_member(
        &mut self,
        snapshot: &DeclarationSnapshot,
        member: DeclId,
        attribute: TemplateAttributeKind,
    ) -> Result<()> {
        let decl = snapshot
            .get(member)
            .ok_or_else(|| Error::internal(format!("template member {member} is not declared")))?;
        let class = decl
            .declaring_type
            .map(|owner| snapshot.display_name(owner))
            .ok_or_else(|| {
                Error::config(format!(
                    "template `{}` must be declared inside an aspect class",
                    decl.name
                ))
            })?;
        let parameter_count = match &decl.kind {
            DeclKind::Method(method) => method.params.len(),
            DeclKind::Indexer(indexer) => indexer.params.len(),
            DeclKind::Type(_) | DeclKind::Field(_) | DeclKind::Property(_) | DeclKind::Event(_) => 0,
        };
        self.register(TemplateDescriptor {
            class,
            name: decl.name.clone(),
            declaration: member,
            attribute,
            is_abstract: decl.is_abstract(),
            member_kind: decl.member_kind(),
            parameter_count,
        });
        Ok(())
    }

    #[must_use]
    pub fn resolve(&self, class: &str, name: &str) -> TemplateResolution<'_> {
        match self.entries.get(&(class.to_string(), name.to_string())) {
            None => TemplateResolution::NotFound,
            Some(descriptor) if descriptor.is_abstract => TemplateResolution::Abstract(descriptor),
            Some(descriptor) => TemplateResolution::Found(descriptor),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
