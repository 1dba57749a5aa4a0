//! YAML fixtures: a declaration model, its aspect classes, and the aspect
//! instances to run against it.
//!
//! ```yaml
//! types:
//!   - name: Service
//!     members:
//!       - { kind: method, name: Run, modifiers: [virtual] }
//!   - name: Logging
//!     members:
//!       - { kind: method, name: OverrideMethod, returns: dynamic, template: template }
//! aspects:
//!   - aspect: Logging
//!     steps:
//!       - { op: override-method, target: Service.Run, templates: { default: OverrideMethod } }
//! ```

mod steps;
mod types;


use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

pub use steps::{ScriptedAspect, Step};
pub(crate) use types::{ParamScopes, TypeExpr};

use crate::aspect::AspectInstance;
use crate::error::{Error, Result};
use crate::model::{
    Accessor, Body, DeclId, DeclKind, DeclOrigin, DeclarationSnapshot, EventDecl, FieldDecl,
    IndexerDecl, MemberDispatch, MethodDecl, Parameter, ParameterMode, PropertyDecl,
    SnapshotBuilder, TypeRef, Visibility,
};
use crate::templates::{TemplateAttributeKind, TemplateRegistry};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fixture {
    pub types: Vec<TypeSpec>,
    pub aspects: Vec<AspectSpec>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeSpecKind {
    #[default]
    Class,
    Struct,
    Interface,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modifier {
    Abstract,
    Virtual,
    Override,
    Sealed,
    Static,
    Readonly,
    External,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default)]
    pub kind: TypeSpecKind,
    #[serde(default)]
    pub generic: Vec<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Awaitable types; `true` when the type also has a method builder.
    #[serde(default)]
    pub awaitable: Option<bool>,
    #[serde(default)]
    pub members: Vec<MemberSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberSpecKind {
    Method,
    Field,
    Property,
    Indexer,
    Event,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MemberSpec {
    pub kind: MemberSpecKind,
    pub name: String,
    /// Value type of fields, properties, indexers and events.
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub returns: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub generic: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default, rename = "iterator")]
    pub is_iterator: bool,
    #[serde(default)]
    pub exits: Option<u32>,
    #[serde(default)]
    pub get: bool,
    #[serde(default)]
    pub set: bool,
    #[serde(default)]
    pub template: Option<TemplateAttributeKind>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub mode: ParameterMode,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AspectSpec {
    /// Aspect class holding the templates.
    pub aspect: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Model, templates and instances built from a fixture.
#[derive(Debug)]
pub struct LoadedFixture {
    pub snapshot: DeclarationSnapshot,
    pub registry: TemplateRegistry,
    pub instances: Vec<AspectInstance>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            Error::config(format!("failed to read fixture `{}`: {err}", path.display()))
        })?;
        Self::parse(&text).map_err(|err| match err {
            Error::Config { message } => Error::config(format!("{}: {message}", path.display())),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn build(&self) -> Result<LoadedFixture> {
        let mut builder = SnapshotBuilder::new();
        let mut declared = Vec::with_capacity(self.types.len());
        for spec in &self.types {
            declared.push(declare_type(&mut builder, spec)?);
        }
        for (spec, &id) in self.types.iter().zip(&declared) {
            let scopes = ParamScopes::default().with(id, &spec.generic);
            if let Some(base) = &spec.base {
                let base = resolve_in(&builder, base, &scopes)?;
                builder.set_base(id, base);
            }
            for interface in &spec.implements {
                let interface = resolve_in(&builder, interface, &scopes)?;
                builder.add_interface(id, interface);
            }
        }
        let mut templates = Vec::new();
        for (spec, &id) in self.types.iter().zip(&declared) {
            let external = spec.modifiers.contains(&Modifier::External);
            for member in &spec.members {
                let member_id = declare_member(&mut builder, id, &spec.generic, member, external)?;
                if let Some(attribute) = member.template {
                    templates.push((member_id, attribute));
                }
            }
        }

        let snapshot = builder.build();
        let mut registry = TemplateRegistry::new();
        for (member, attribute) in templates {
            registry.register_member(&snapshot, member, attribute)?;
        }
        let instances = self
            .aspects
            .iter()
            .map(|spec| {
                let instance = AspectInstance::shared(Arc::new(ScriptedAspect::new(
                    spec.aspect.clone(),
                    spec.steps.clone(),
                )));
                match &spec.label {
                    Some(label) => instance.with_label(label.clone()),
                    None => instance,
                }
            })
            .collect();
        tracing::debug!(
            target: "script",
            types = self.types.len(),
            templates = registry.len(),
            instances = self.aspects.len(),
            "fixture built"
        );
        Ok(LoadedFixture {
            snapshot,
            registry,
            instances,
        })
    }
}

fn declare_type(builder: &mut SnapshotBuilder, spec: &TypeSpec) -> Result<DeclId> {
    if builder.find_type(&spec.name, spec.generic.len()).is_some() {
        return Err(Error::config(format!(
            "type `{}` with {} type parameter(s) is declared twice",
            spec.name,
            spec.generic.len()
        )));
    }
    let generic: Vec<&str> = spec.generic.iter().map(String::as_str).collect();
    let mut ty = match spec.kind {
        TypeSpecKind::Class => builder.class(&spec.name),
        TypeSpecKind::Struct => builder.structure(&spec.name),
        TypeSpecKind::Interface => builder.interface(&spec.name),
    }
    .generic(&generic);
    for modifier in &spec.modifiers {
        ty = match modifier {
            Modifier::Abstract => ty.abstract_(),
            Modifier::Sealed => ty.sealed(),
            Modifier::External => ty.external(),
            other => {
                return Err(Error::config(format!(
                    "modifier `{other:?}` does not apply to type `{}`",
                    spec.name
                )));
            }
        };
    }
    if let Some(has_method_builder) = spec.awaitable {
        ty = ty.awaitable(has_method_builder);
    }
    Ok(ty.finish())
}

fn declare_member(
    builder: &mut SnapshotBuilder,
    owner: DeclId,
    owner_generic: &[String],
    spec: &MemberSpec,
    external: bool,
) -> Result<DeclId> {
    let void = builder.core().void_type();
    let placeholder = match spec.kind {
        MemberSpecKind::Method => DeclKind::Method(MethodDecl {
            generic_params: spec.generic.clone(),
            params: Vec::new(),
            return_type: void,
            is_async: spec.is_async,
            is_iterator: spec.is_iterator,
            body: Some(Body::with_exits(spec.exits.unwrap_or(1))),
        }),
        _ => DeclKind::Field(FieldDecl {
            ty: TypeRef::Dynamic,
            is_readonly: false,
        }),
    };
    let id = builder.member(owner, &spec.name, placeholder);
    let scopes = ParamScopes::default()
        .with(id, &spec.generic)
        .with(owner, owner_generic);
    let value_type = |text: Option<&String>| -> Result<TypeRef> {
        text.map_or(Ok(TypeRef::Dynamic), |text| resolve_in(builder, text, &scopes))
    };
    let params = spec
        .params
        .iter()
        .map(|param| {
            Ok(Parameter::new(param.name.clone(), resolve_in(builder, &param.ty, &scopes)?).with_mode(param.mode))
        })
        .collect::<Result<Vec<_>>>()?;

    let has = |modifier: Modifier| spec.modifiers.contains(&modifier);
    let is_abstract = has(Modifier::Abstract);
    let body = (!is_abstract).then(|| Body::with_exits(spec.exits.unwrap_or(1)));
    let accessor = |present: bool, is_iterator: bool| {
        present.then(|| Accessor {
            visibility: Visibility::Public,
            body,
            is_iterator,
        })
    };
    let kind = match spec.kind {
        MemberSpecKind::Method => DeclKind::Method(MethodDecl {
            generic_params: spec.generic.clone(),
            params,
            return_type: match &spec.returns {
                Some(text) => resolve_in(builder, text, &scopes)?,
                None => void_of(builder),
            },
            is_async: spec.is_async,
            is_iterator: spec.is_iterator,
            body,
        }),
        MemberSpecKind::Field => DeclKind::Field(FieldDecl {
            ty: value_type(spec.ty.as_ref())?,
            is_readonly: has(Modifier::Readonly),
        }),
        MemberSpecKind::Property => DeclKind::Property(PropertyDecl {
            ty: value_type(spec.ty.as_ref())?,
            getter: accessor(spec.get, spec.is_iterator),
            setter: accessor(spec.set, false),
        }),
        MemberSpecKind::Indexer => DeclKind::Indexer(IndexerDecl {
            ty: value_type(spec.ty.as_ref())?,
            params,
            getter: accessor(spec.get, spec.is_iterator),
            setter: accessor(spec.set, false),
        }),
        MemberSpecKind::Event => DeclKind::Event(EventDecl {
            handler_type: value_type(spec.ty.as_ref())?,
        }),
    };
    if matches!(spec.kind, MemberSpecKind::Property | MemberSpecKind::Indexer) && !spec.get && !spec.set {
        return Err(Error::config(format!(
            "{} `{}` needs a getter or a setter",
            if spec.kind == MemberSpecKind::Property { "property" } else { "indexer" },
            spec.name
        )));
    }
    builder.edit(id, |decl| {
        decl.kind = kind;
        decl.visibility = spec.visibility;
        decl.is_static = has(Modifier::Static);
        decl.dispatch = MemberDispatch {
            is_virtual: has(Modifier::Virtual),
            is_override: has(Modifier::Override),
            is_sealed: has(Modifier::Sealed),
            is_abstract,
        };
        if external {
            decl.origin = DeclOrigin::External;
        }
    });
    Ok(id)
}

fn void_of(builder: &SnapshotBuilder) -> TypeRef {
    builder.core().void_type()
}

fn resolve_in(builder: &SnapshotBuilder, text: &str, scopes: &ParamScopes) -> Result<TypeRef> {
    TypeExpr::parse(text)?.resolve(&|name, arity| builder.find_type(name, arity), scopes)
}

/// Resolve a type expression against a built snapshot, outside any generic scope.
pub fn resolve_type(snapshot: &DeclarationSnapshot, text: &str) -> Result<TypeRef> {
    TypeExpr::parse(text)?.resolve(
        &|name, arity| snapshot.lookup_type(name, arity).map(|reference| reference.id()),
        &ParamScopes::default(),
    )
}
