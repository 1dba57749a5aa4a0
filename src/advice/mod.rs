//! Advice requests produced by aspect instances.

mod builder;
mod factory;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use builder::{IntroducedMember, MemberBuilder};
pub use factory::{AdviceFactory, AdviceList, AdviceOptions, WeavingServices};

use crate::conflicts::{ConflictOutcome, InterfaceAction, MemberSignature, OverrideStrategy};
use crate::contracts::{ContractDirection, ContractTarget};
use crate::diagnostics::{Diagnostic, codes};
use crate::error::{Error, Result};
use crate::model::{DeclId, DeclRef, DeclarationSnapshot, NamedType, TypeRef};
use crate::templates::{SelectedTemplate, TemplateMember};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdviceKind {
    OverrideMethod,
    OverrideFieldOrProperty,
    IntroduceMethod,
    IntroduceField,
    IntroduceProperty,
    IntroduceEvent,
    ImplementInterface,
    AddContract,
}

impl AdviceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AdviceKind::OverrideMethod => "override-method",
            AdviceKind::OverrideFieldOrProperty => "override-field-or-property",
            AdviceKind::IntroduceMethod => "introduce-method",
            AdviceKind::IntroduceField => "introduce-field",
            AdviceKind::IntroduceProperty => "introduce-property",
            AdviceKind::IntroduceEvent => "introduce-event",
            AdviceKind::ImplementInterface => "implement-interface",
            AdviceKind::AddContract => "add-contract",
        }
    }

    #[must_use]
    pub fn is_introduction(self) -> bool {
        matches!(
            self,
            AdviceKind::IntroduceMethod
                | AdviceKind::IntroduceField
                | AdviceKind::IntroduceProperty
                | AdviceKind::IntroduceEvent
        )
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form value passed through to template expansion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<TagValue>),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

pub type Tags = BTreeMap<String, TagValue>;

/// One interface carried by an implement-interface advice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub interface: NamedType,
    pub action: InterfaceAction,
}

/// Kind-specific content of an [`Advice`].
#[derive(Clone, Debug)]
pub enum AdvicePayload {
    OverrideMethod {
        selected: SelectedTemplate,
    },
    OverrideFieldOrProperty {
        getter: Option<SelectedTemplate>,
        setter: Option<TemplateMember>,
    },
    Introduce {
        member: MemberBuilder,
        outcome: ConflictOutcome,
        /// Existing member the outcome was decided against.
        against: Option<DeclRef>,
        /// Signature the conflict outcome was computed for.
        resolved: MemberSignature,
    },
    ImplementInterface {
        interfaces: Vec<InterfaceSpec>,
    },
    AddContract {
        target: ContractTarget,
        direction: ContractDirection,
        template: TemplateMember,
    },
}

/// A validated weaving request. Immutable once appended to an advice list.
#[derive(Clone, Debug)]
pub struct Advice {
    pub kind: AdviceKind,
    pub aspect: String,
    pub target: DeclRef,
    pub tags: Tags,
    pub strategy: Option<OverrideStrategy>,
    pub payload: AdvicePayload,
}

impl Advice {
    /// Every template the advice expands, in slot order.
    #[must_use]
    pub fn templates(&self) -> Vec<&TemplateMember> {
        match &self.payload {
            AdvicePayload::OverrideMethod { selected } => vec![&selected.template],
            AdvicePayload::OverrideFieldOrProperty { getter, setter } => getter
                .iter()
                .map(|selected| &selected.template)
                .chain(setter.iter())
                .collect(),
            AdvicePayload::Introduce { member, .. } => member.template_ref().into_iter().collect(),
            AdvicePayload::ImplementInterface { .. } => Vec::new(),
            AdvicePayload::AddContract { template, .. } => vec![template],
        }
    }

    #[must_use]
    pub fn builder(&self) -> Option<&MemberBuilder> {
        match &self.payload {
            AdvicePayload::Introduce { member, .. } => Some(member),
            _ => None,
        }
    }

    /// Validate the constructed advice against `snapshot`.
    ///
    /// Dangling references are engine defects and fail with
    /// [`Error::Internal`]; everything else is reported as diagnostics.
    pub fn initialize(&self, snapshot: &DeclarationSnapshot) -> Result<Vec<Diagnostic>> {
        if snapshot.resolve(self.target).is_none() {
            return Err(Error::internal(format!(
                "{} advice targets {} which does not resolve in {}",
                self.kind,
                self.target,
                snapshot.id()
            )));
        }
        for template in self.templates() {
            if snapshot.resolve(template.reference).is_none() {
                return Err(Error::internal(format!(
                    "template `{}` does not resolve in {}",
                    template.qualified_name(),
                    snapshot.id()
                )));
            }
        }

        let mut diagnostics = Vec::new();
        match &self.payload {
            AdvicePayload::OverrideMethod { selected } => {
                note_reinterpreted(selected, &mut diagnostics);
            }
            AdvicePayload::OverrideFieldOrProperty { getter, .. } => {
                if let Some(selected) = getter {
                    note_reinterpreted(selected, &mut diagnostics);
                }
            }
            AdvicePayload::Introduce { member, .. } => {
                let introduced = member.snapshot();
                if let Some(param) = introduced.unbound_parameter(snapshot) {
                    diagnostics.push(
                        codes::error(
                            codes::UNBOUND_TYPE_PARAMETER,
                            format!(
                                "introduced {} `{}` references type parameter `{}` that is not in scope of `{}`",
                                introduced.kind,
                                introduced.name,
                                param,
                                snapshot.display_name(introduced.declaring_type)
                            ),
                        )
                        .with_target(self.target, snapshot.display_name(self.target.id())),
                    );
                }
            }
            AdvicePayload::ImplementInterface { interfaces } => {
                if interfaces.is_empty() {
                    return Err(Error::internal(
                        "implement-interface advice without any interface",
                    ));
                }
            }
            AdvicePayload::AddContract { .. } => {}
        }
        Ok(diagnostics)
    }
}

fn note_reinterpreted(selected: &SelectedTemplate, diagnostics: &mut Vec<Diagnostic>) {
    if selected.template.shape != selected.interpreted_shape {
        diagnostics.push(codes::note(format!(
            "template `{}` written for {} targets is applied to a {} target",
            selected.template.qualified_name(),
            selected.template.shape,
            selected.interpreted_shape
        )));
    }
}

/// Type parameters in scope of members declared by `type_id`.
pub(crate) fn type_scope_owners(snapshot: &DeclarationSnapshot, type_id: DeclId) -> Vec<DeclId> {
    let mut owners = Vec::new();
    let mut current = Some(type_id);
    while let Some(id) = current {
        if owners.contains(&id) {
            break;
        }
        owners.push(id);
        current = snapshot.get(id).and_then(|decl| decl.declaring_type);
    }
    owners
}

/// First type parameter in `ty` whose owner is not in `owners`.
pub(crate) fn first_foreign_parameter<'t>(ty: &'t TypeRef, owners: &[DeclId]) -> Option<&'t str> {
    match ty {
        TypeRef::Parameter(param) => (!owners.contains(&param.owner)).then_some(param.name.as_str()),
        TypeRef::Named(named) => {
            let mut level = Some(named);
            while let Some(current) = level {
                if let Some(found) = current
                    .args
                    .iter()
                    .find_map(|arg| first_foreign_parameter(arg, owners))
                {
                    return Some(found);
                }
                level = current.containing.as_deref();
            }
            None
        }
        TypeRef::Array { element, .. } => first_foreign_parameter(element, owners),
        TypeRef::Pointer { pointee } => first_foreign_parameter(pointee, owners),
        TypeRef::Dynamic | TypeRef::FunctionPointer { .. } => None,
    }
}
