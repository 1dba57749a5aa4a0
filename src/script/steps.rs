use serde::Deserialize;

use super::resolve_type;
use crate::advice::{AdviceFactory, MemberBuilder, Tags};
use crate::aspect::Aspect;
use crate::conflicts::OverrideStrategy;
use crate::contracts::{ContractDirection, ContractTarget};
use crate::error::{Error, Result};
use crate::model::{DeclKind, DeclRef, DeclarationSnapshot, Visibility};
use crate::templates::{GetterTemplateSelector, MethodTemplateSelector};

/// Highest generic arity tried when a path names a type without arguments.
const MAX_PATH_ARITY: usize = 8;

/// One advice request of a scripted aspect.
///
/// Targets are paths: `Type` for introductions and interfaces, `Type.Member`
/// for overrides, and `Type.Method(param)` / `Type.Method(return)` for
/// parameter contracts.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    OverrideMethod {
        target: String,
        templates: MethodTemplateSelector,
        #[serde(default)]
        tags: Tags,
    },
    OverrideProperty {
        target: String,
        #[serde(default)]
        getter: Option<GetterTemplateSelector>,
        #[serde(default)]
        setter: Option<String>,
        #[serde(default)]
        tags: Tags,
    },
    IntroduceMethod {
        target: String,
        template: String,
        #[serde(default)]
        strategy: Option<OverrideStrategy>,
        #[serde(default)]
        customize: Customization,
        #[serde(default)]
        tags: Tags,
    },
    IntroduceField {
        target: String,
        name: String,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        strategy: Option<OverrideStrategy>,
        #[serde(default)]
        customize: Customization,
        #[serde(default)]
        tags: Tags,
    },
    IntroduceProperty {
        target: String,
        template: String,
        #[serde(default)]
        strategy: Option<OverrideStrategy>,
        #[serde(default)]
        customize: Customization,
        #[serde(default)]
        tags: Tags,
    },
    IntroduceEvent {
        target: String,
        template: String,
        #[serde(default)]
        strategy: Option<OverrideStrategy>,
        #[serde(default)]
        customize: Customization,
        #[serde(default)]
        tags: Tags,
    },
    ImplementInterface {
        target: String,
        interface: String,
        #[serde(default)]
        strategy: Option<OverrideStrategy>,
        #[serde(default)]
        tags: Tags,
    },
    AddContract {
        target: String,
        template: String,
        #[serde(default)]
        direction: ContractDirection,
        #[serde(default)]
        tags: Tags,
    },
}

/// Builder edits applied right after an introduction is accepted.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Customization {
    pub name: Option<String>,
    pub visibility: Option<Visibility>,
    #[serde(rename = "static")]
    pub is_static: Option<bool>,
    #[serde(rename = "virtual")]
    pub is_virtual: Option<bool>,
    pub return_type: Option<String>,
}

impl Customization {
    fn apply(&self, snapshot: &DeclarationSnapshot, builder: &MemberBuilder) -> Result<()> {
        if let Some(name) = &self.name {
            builder.set_name(name.clone())?;
        }
        if let Some(visibility) = self.visibility {
            builder.set_visibility(visibility)?;
        }
        if let Some(is_static) = self.is_static {
            builder.set_static(is_static)?;
        }
        if let Some(is_virtual) = self.is_virtual {
            builder.set_virtual(is_virtual)?;
        }
        if let Some(ty) = &self.return_type {
            builder.set_return_type(resolve_type(snapshot, ty)?)?;
        }
        Ok(())
    }
}

impl Step {
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Step::OverrideMethod { .. } => "override-method",
            Step::OverrideProperty { .. } => "override-property",
            Step::IntroduceMethod { .. } => "introduce-method",
            Step::IntroduceField { .. } => "introduce-field",
            Step::IntroduceProperty { .. } => "introduce-property",
            Step::IntroduceEvent { .. } => "introduce-event",
            Step::ImplementInterface { .. } => "implement-interface",
            Step::AddContract { .. } => "add-contract",
        }
    }

    pub fn run(&self, factory: &mut AdviceFactory<'_>) -> Result<()> {
        let snapshot = factory.snapshot();
        match self {
            Step::OverrideMethod {
                target,
                templates,
                tags,
            } => factory.override_method(member_path(snapshot, target)?, templates, tags.clone()),
            Step::OverrideProperty {
                target,
                getter,
                setter,
                tags,
            } => {
                let applied = factory.override_field_or_property(
                    member_path(snapshot, target)?,
                    getter.as_ref(),
                    setter.as_deref(),
                    tags.clone(),
                )?;
                if !applied {
                    tracing::debug!(target: "script", path = %target, "no accessor of the target could be overridden");
                }
                Ok(())
            }
            Step::IntroduceMethod {
                target,
                template,
                strategy,
                customize,
                tags,
            } => {
                let builder =
                    factory.introduce_method(type_path(snapshot, target)?, template, *strategy, tags.clone())?;
                customize.apply(snapshot, &builder)
            }
            Step::IntroduceField {
                target,
                name,
                ty,
                strategy,
                customize,
                tags,
            } => {
                let ty = resolve_type(snapshot, ty)?;
                let builder =
                    factory.introduce_field(type_path(snapshot, target)?, name, ty, *strategy, tags.clone())?;
                customize.apply(snapshot, &builder)
            }
            Step::IntroduceProperty {
                target,
                template,
                strategy,
                customize,
                tags,
            } => {
                let builder =
                    factory.introduce_property(type_path(snapshot, target)?, template, *strategy, tags.clone())?;
                customize.apply(snapshot, &builder)
            }
            Step::IntroduceEvent {
                target,
                template,
                strategy,
                customize,
                tags,
            } => {
                let builder =
                    factory.introduce_event(type_path(snapshot, target)?, template, *strategy, tags.clone())?;
                customize.apply(snapshot, &builder)
            }
            Step::ImplementInterface {
                target,
                interface,
                strategy,
                tags,
            } => {
                let interface = resolve_type(snapshot, interface)?;
                factory.implement_interface(type_path(snapshot, target)?, &interface, *strategy, tags.clone())
            }
            Step::AddContract {
                target,
                template,
                direction,
                tags,
            } => factory.add_contract(contract_path(snapshot, target)?, template, *direction, tags.clone()),
        }
    }
}

/// Aspect whose advice requests are read from a fixture.
#[derive(Clone, Debug)]
pub struct ScriptedAspect {
    name: String,
    steps: Vec<Step>,
}

impl ScriptedAspect {
    #[must_use]
    pub fn new(name: String, steps: Vec<Step>) -> Self {
        Self { name, steps }
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl Aspect for ScriptedAspect {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, factory: &mut AdviceFactory<'_>) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            tracing::trace!(target: "script", aspect = %self.name, step = index, op = step.op(), "running step");
            step.run(factory)?;
        }
        Ok(())
    }
}

pub(crate) fn type_path(snapshot: &DeclarationSnapshot, path: &str) -> Result<DeclRef> {
    let path = path.trim();
    (0..=MAX_PATH_ARITY)
        .find_map(|arity| snapshot.lookup_type(path, arity))
        .ok_or_else(|| Error::config(format!("unknown type `{path}`")))
}

pub(crate) fn member_path(snapshot: &DeclarationSnapshot, path: &str) -> Result<DeclRef> {
    let path = path.trim();
    let (owner, name) = path
        .rsplit_once('.')
        .ok_or_else(|| Error::config(format!("member path `{path}` must look like `Type.Member`")))?;
    let owner = type_path(snapshot, owner)?;
    let mut candidates = snapshot
        .members_named(owner.id(), name)
        .filter(|decl| !matches!(decl.kind, DeclKind::Type(_)));
    match (candidates.next(), candidates.next()) {
        (Some(decl), None) => Ok(snapshot.reference(decl.id)),
        (None, _) => Err(Error::config(format!("type `{}` has no member `{name}`", snapshot.display_name(owner.id())))),
        (Some(_), Some(_)) => Err(Error::config(format!("member path `{path}` is ambiguous"))),
    }
}

pub(crate) fn contract_path(snapshot: &DeclarationSnapshot, path: &str) -> Result<ContractTarget> {
    let path = path.trim();
    let Some((member, rest)) = path.split_once('(') else {
        return Ok(ContractTarget::FieldOrProperty(member_path(snapshot, path)?));
    };
    let parameter = rest
        .strip_suffix(')')
        .map(str::trim)
        .ok_or_else(|| Error::config(format!("contract path `{path}` is missing `)`")))?;
    let method = member_path(snapshot, member)?;
    if parameter == "return" {
        return Ok(ContractTarget::ReturnParameter { method });
    }
    let ordinal = snapshot
        .resolve(method)
        .and_then(|decl| decl.as_method())
        .and_then(|decl| decl.params.iter().position(|param| param.name == parameter))
        .ok_or_else(|| {
            Error::config(format!(
                "`{}` has no parameter named `{parameter}`",
                snapshot.display_name(method.id())
            ))
        })?;
    Ok(ContractTarget::Parameter { method, ordinal })
}
