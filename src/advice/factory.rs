use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, trace};

use super::{Advice, AdviceKind, AdvicePayload, InterfaceSpec, IntroducedMember, MemberBuilder, Tags};
use crate::conflicts::{ConflictOutcome, ConflictResolver, ExistingMember, InterfaceAction, OverrideStrategy};
use crate::contracts::{self, ContractDirection, ContractTarget};
use crate::diagnostics::{Diagnostic, DiagnosticSink, InstanceIndex, codes, has_errors};
use crate::error::{AdviceError, Error, Result};
use crate::generic_context::GenericContext;
use crate::model::{
    DeclId, DeclKind, DeclOrigin, DeclRef, Declaration, DeclarationSnapshot, MemberDispatch,
    MemberKind, TargetShape, TypeRef, Visibility,
};
use crate::templates::{
    BoundGetterTemplates, BoundMethodTemplates, GetterTemplateSelector, MethodTemplateSelector,
    TemplateAttributeKind, TemplateMember, TemplateRegistry, TemplateResolution, TemplateShape,
    select_getter_template, select_method_template,
};

/// Engine-wide defaults applied when an aspect does not say otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AdviceOptions {
    pub use_async_template_for_any_awaitable: bool,
    pub use_enumerable_template_for_any_enumerable: bool,
    pub default_introduction_strategy: OverrideStrategy,
}

/// Read-only services shared by every factory of one weaving stage.
#[derive(Debug)]
pub struct WeavingServices {
    pub snapshot: DeclarationSnapshot,
    pub registry: Arc<TemplateRegistry>,
    pub sink: Arc<DiagnosticSink>,
    pub options: AdviceOptions,
}

impl WeavingServices {
    #[must_use]
    pub fn new(snapshot: DeclarationSnapshot, registry: Arc<TemplateRegistry>, options: AdviceOptions) -> Self {
        Self {
            snapshot,
            registry,
            sink: Arc::new(DiagnosticSink::default()),
            options,
        }
    }

    /// Open a factory for the aspect instance at `instance`.
    #[must_use]
    pub fn factory(&self, aspect: impl Into<String>, instance: InstanceIndex) -> AdviceFactory<'_> {
        AdviceFactory::new(self, aspect, instance)
    }
}

/// Ordered advices produced by one aspect instance.
#[derive(Clone, Debug)]
pub struct AdviceList {
    aspect: String,
    instance: InstanceIndex,
    advices: Vec<Advice>,
}

impl AdviceList {
    #[must_use]
    pub fn aspect(&self) -> &str {
        &self.aspect
    }

    #[must_use]
    pub fn instance(&self) -> InstanceIndex {
        self.instance
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Advice> {
        self.advices.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.advices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.advices.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Advice> {
        self.advices
    }
}

impl<'a> IntoIterator for &'a AdviceList {
    type Item = &'a Advice;
    type IntoIter = std::slice::Iter<'a, Advice>;

    fn into_iter(self) -> Self::IntoIter {
        self.advices.iter()
    }
}

/// Entry point through which one aspect instance requests advice.
///
/// Every operation either appends exactly one validated advice (or merges into
/// an existing implement-interface advice) or appends nothing and fails.
pub struct AdviceFactory<'w> {
    services: &'w WeavingServices,
    aspect: String,
    instance: InstanceIndex,
    advices: Vec<Advice>,
    interface_index: HashMap<DeclId, usize>,
}

impl<'w> AdviceFactory<'w> {
    #[must_use]
    pub fn new(services: &'w WeavingServices, aspect: impl Into<String>, instance: InstanceIndex) -> Self {
        Self {
            services,
            aspect: aspect.into(),
            instance,
            advices: Vec::new(),
            interface_index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn aspect(&self) -> &str {
        &self.aspect
    }

    #[must_use]
    pub fn snapshot(&self) -> &'w DeclarationSnapshot {
        &self.services.snapshot
    }

    /// Advices appended so far, in request order.
    #[must_use]
    pub fn advices(&self) -> &[Advice] {
        &self.advices
    }

    /// Replace the body of `target` with the template matching its shape.
    pub fn override_method(
        &mut self,
        target: DeclRef,
        selector: &MethodTemplateSelector,
        tags: Tags,
    ) -> Result<()> {
        const KIND: AdviceKind = AdviceKind::OverrideMethod;
        let snapshot = self.snapshot();
        self.check_snapshot(&[target])?;
        let resolver = ConflictResolver::new(snapshot);
        let Some(decl) = snapshot.resolve(target) else {
            return Err(self.fail(KIND, resolver.check_override_target(target, &[MemberKind::Method])));
        };
        if decl.member_kind() != MemberKind::Method {
            return Err(Error::usage(format!(
                "override_method cannot target {} `{}`",
                decl.member_kind(),
                snapshot.display_name(decl.id)
            )));
        }
        if decl.is_abstract() {
            return Err(Error::usage(format!(
                "cannot override abstract method `{}`: it has no body to replace",
                snapshot.display_name(decl.id)
            )));
        }
        let mut diagnostics = resolver.check_override_target(target, &[MemberKind::Method]);
        diagnostics.extend(resolver.check_overridable(target));

        let default = self.resolve_template(
            &selector.default_template,
            TemplateAttributeKind::Template,
            TemplateShape::Default,
            true,
            &mut diagnostics,
        )?;
        let mut optional = Vec::new();
        for (shape, name) in selector.optional_slots() {
            if let Some(template) = self.resolve_template(
                name,
                TemplateAttributeKind::Template,
                shape,
                false,
                &mut diagnostics,
            )? {
                optional.push(template);
            }
        }
        let Some(default) = default else {
            return Err(self.fail(KIND, diagnostics));
        };

        let target_params = decl.as_method().map_or(0, |method| method.params.len());
        let mut bound = BoundMethodTemplates::only_default(default);
        for template in optional {
            bound.bind(template);
        }
        for template in bound.iter() {
            check_template_kind(template, &[MemberKind::Method], target, snapshot, &mut diagnostics);
            if template.member_kind == MemberKind::Method
                && template.parameter_count != 0
                && template.parameter_count != target_params
            {
                diagnostics.push(
                    codes::error(
                        codes::TEMPLATE_SIGNATURE_MISMATCH,
                        format!(
                            "template `{}` takes {} parameters but `{}` takes {target_params}",
                            template.qualified_name(),
                            template.parameter_count,
                            snapshot.display_name(decl.id)
                        ),
                    )
                    .with_target(target, snapshot.display_name(decl.id)),
                );
            } else if template.member_kind == MemberKind::Method
                && template.parameter_count != 0
                && let Some(message) = self.parameter_mismatch(template, decl)?
            {
                diagnostics.push(
                    codes::error(codes::TEMPLATE_SIGNATURE_MISMATCH, message)
                        .with_target(target, snapshot.display_name(decl.id)),
                );
            }
        }
        if has_errors(&diagnostics) {
            return Err(self.fail(KIND, diagnostics));
        }
        bound.use_async_for_any_awaitable = selector
            .use_async_template_for_any_awaitable
            .unwrap_or(self.services.options.use_async_template_for_any_awaitable);
        bound.use_enumerable_for_any_enumerable = selector
            .use_enumerable_template_for_any_enumerable
            .unwrap_or(self.services.options.use_enumerable_template_for_any_enumerable);

        let shape = TargetShape::of_method(snapshot, decl)
            .ok_or_else(|| Error::internal("method target lost its method shape"))?;
        let selected = select_method_template(&bound, shape)?;
        trace!(
            target: "advice",
            aspect = %self.aspect,
            method = %snapshot.display_name(decl.id),
            template = %selected.template.qualified_name(),
            shape = %selected.interpreted_shape,
            "method template selected"
        );
        self.commit(
            Advice {
                kind: KIND,
                aspect: self.aspect.clone(),
                target,
                tags,
                strategy: None,
                payload: AdvicePayload::OverrideMethod { selected },
            },
            diagnostics,
        )
    }

    /// Override the accessors of a field, property or indexer.
    ///
    /// A slot whose accessor does not exist on the target is skipped. Returns
    /// `false` when no slot applied and nothing was appended.
    pub fn override_field_or_property(
        &mut self,
        target: DeclRef,
        getter: Option<&GetterTemplateSelector>,
        setter: Option<&str>,
        tags: Tags,
    ) -> Result<bool> {
        const KIND: AdviceKind = AdviceKind::OverrideFieldOrProperty;
        const KINDS: [MemberKind; 3] = [MemberKind::Field, MemberKind::Property, MemberKind::Indexer];
        let snapshot = self.snapshot();
        self.check_snapshot(&[target])?;
        let resolver = ConflictResolver::new(snapshot);
        let Some(decl) = snapshot.resolve(target) else {
            return Err(self.fail(KIND, resolver.check_override_target(target, &KINDS)));
        };
        if !KINDS.contains(&decl.member_kind()) {
            return Err(Error::usage(format!(
                "override_field_or_property cannot target {} `{}`",
                decl.member_kind(),
                snapshot.display_name(decl.id)
            )));
        }
        if decl.dispatch.is_abstract {
            return Err(Error::usage(format!(
                "cannot override abstract {} `{}`",
                decl.member_kind(),
                snapshot.display_name(decl.id)
            )));
        }
        let mut diagnostics = resolver.check_override_target(target, &KINDS);
        diagnostics.extend(resolver.check_overridable(target));

        let getter_shape = getter.and_then(|_| TargetShape::of_getter(snapshot, decl));
        let getter = match (getter, getter_shape) {
            (Some(selector), Some(shape)) => self
                .bind_getter(selector, &mut diagnostics)?
                .map(|bound| (bound, shape)),
            _ => None,
        };
        let setter = match setter {
            Some(name) if has_setter(decl) => self.resolve_template(
                name,
                TemplateAttributeKind::Template,
                TemplateShape::Default,
                true,
                &mut diagnostics,
            )?,
            _ => None,
        };

        for (template, max_params) in getter
            .iter()
            .flat_map(|(bound, _)| {
                std::iter::once(&bound.default)
                    .chain(bound.enumerable.iter())
                    .chain(bound.enumerator.iter())
                    .map(|template| (template, 0))
            })
            .chain(setter.iter().map(|template| (template, 1)))
        {
            check_template_kind(
                template,
                &[MemberKind::Method, MemberKind::Property],
                target,
                snapshot,
                &mut diagnostics,
            );
            if template.member_kind == MemberKind::Method && template.parameter_count > max_params {
                diagnostics.push(
                    codes::error(
                        codes::TEMPLATE_SIGNATURE_MISMATCH,
                        format!(
                            "accessor template `{}` takes {} parameters, at most {max_params} allowed",
                            template.qualified_name(),
                            template.parameter_count
                        ),
                    )
                    .with_target(target, snapshot.display_name(decl.id)),
                );
            }
        }
        if has_errors(&diagnostics) {
            return Err(self.fail(KIND, diagnostics));
        }

        let getter = match getter {
            Some((bound, shape)) => Some(select_getter_template(&bound, shape)?),
            None => None,
        };
        if getter.is_none() && setter.is_none() {
            debug!(
                target: "advice",
                aspect = %self.aspect,
                member = %snapshot.display_name(decl.id),
                "no accessor to override"
            );
            self.services.sink.report_all(self.instance, diagnostics);
            return Ok(false);
        }
        self.commit(
            Advice {
                kind: KIND,
                aspect: self.aspect.clone(),
                target,
                tags,
                strategy: None,
                payload: AdvicePayload::OverrideFieldOrProperty { getter, setter },
            },
            diagnostics,
        )?;
        Ok(true)
    }

    fn bind_getter(
        &self,
        selector: &GetterTemplateSelector,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<BoundGetterTemplates>> {
        let default = self.resolve_template(
            &selector.default_template,
            TemplateAttributeKind::Template,
            TemplateShape::Default,
            true,
            diagnostics,
        )?;
        let mut bound = default.map(|default| BoundGetterTemplates {
            default,
            enumerable: None,
            enumerator: None,
            use_enumerable_for_any_enumerable: selector
                .use_enumerable_template_for_any_enumerable
                .unwrap_or(self.services.options.use_enumerable_template_for_any_enumerable),
        });
        for (shape, name) in selector.optional_slots() {
            let template =
                self.resolve_template(name, TemplateAttributeKind::Template, shape, false, diagnostics)?;
            if let Some(bound) = bound.as_mut() {
                match shape {
                    TemplateShape::Enumerable => bound.enumerable = template,
                    TemplateShape::Enumerator => bound.enumerator = template,
                    TemplateShape::Default
                    | TemplateShape::Async
                    | TemplateShape::AsyncEnumerable
                    | TemplateShape::AsyncEnumerator => {}
                }
            }
        }
        Ok(bound)
    }

    /// Introduce a copy of the method template `template` into `target_type`.
    pub fn introduce_method(
        &mut self,
        target_type: DeclRef,
        template: &str,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
    ) -> Result<MemberBuilder> {
        const KIND: AdviceKind = AdviceKind::IntroduceMethod;
        let (type_id, mut diagnostics) = self.introduction_target(target_type, KIND)?;
        let Some(template) = self.resolve_template(
            template,
            TemplateAttributeKind::Introduction,
            TemplateShape::Default,
            true,
            &mut diagnostics,
        )?
        else {
            return Err(self.fail(KIND, diagnostics));
        };
        check_template_kind(&template, &[MemberKind::Method], target_type, self.snapshot(), &mut diagnostics);
        if has_errors(&diagnostics) {
            return Err(self.fail(KIND, diagnostics));
        }
        let source = self.template_decl(&template)?;
        let method = source
            .as_method()
            .ok_or_else(|| Error::internal(format!("template `{}` lost its method", template.qualified_name())))?;

        let id = self.snapshot().allocate_id();
        let own_params: Vec<TypeRef> = method
            .generic_params
            .iter()
            .enumerate()
            .map(|(ordinal, name)| TypeRef::param(id, ordinal, name.clone()))
            .collect();
        let context = GenericContext::introduced(source.id, own_params, self.template_context(source));
        let member = IntroducedMember {
            id,
            declaring_type: type_id,
            kind: MemberKind::Method,
            name: source.name.clone(),
            visibility: source.visibility,
            is_static: source.is_static,
            is_virtual: source.dispatch.is_virtual,
            generic_params: method.generic_params.clone(),
            params: method
                .params
                .iter()
                .map(|param| {
                    let mut param = param.clone();
                    param.ty = context.map(&param.ty).into_owned();
                    param
                })
                .collect(),
            value_type: context.map(&method.return_type).into_owned(),
            has_getter: false,
            has_setter: false,
        };
        self.introduce(KIND, target_type, member, Some(template), strategy, tags, diagnostics)
    }

    /// Introduce a field named `name` of type `ty` into `target_type`.
    pub fn introduce_field(
        &mut self,
        target_type: DeclRef,
        name: &str,
        ty: TypeRef,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
    ) -> Result<MemberBuilder> {
        const KIND: AdviceKind = AdviceKind::IntroduceField;
        if name.is_empty() {
            return Err(Error::usage("introduced field name cannot be empty"));
        }
        let (type_id, diagnostics) = self.introduction_target(target_type, KIND)?;
        let member = IntroducedMember {
            id: self.snapshot().allocate_id(),
            declaring_type: type_id,
            kind: MemberKind::Field,
            name: name.to_string(),
            visibility: Visibility::Private,
            is_static: false,
            is_virtual: false,
            generic_params: Vec::new(),
            params: Vec::new(),
            value_type: ty,
            has_getter: true,
            has_setter: true,
        };
        self.introduce(KIND, target_type, member, None, strategy, tags, diagnostics)
    }

    /// Introduce a copy of the property (or field) template `template` into `target_type`.
    pub fn introduce_property(
        &mut self,
        target_type: DeclRef,
        template: &str,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
    ) -> Result<MemberBuilder> {
        self.introduce_value_member(
            AdviceKind::IntroduceProperty,
            &[MemberKind::Property, MemberKind::Field],
            target_type,
            template,
            strategy,
            tags,
        )
    }

    /// Introduce a copy of the event template `template` into `target_type`.
    pub fn introduce_event(
        &mut self,
        target_type: DeclRef,
        template: &str,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
    ) -> Result<MemberBuilder> {
        self.introduce_value_member(
            AdviceKind::IntroduceEvent,
            &[MemberKind::Event],
            target_type,
            template,
            strategy,
            tags,
        )
    }

    fn introduce_value_member(
        &mut self,
        kind: AdviceKind,
        expected: &[MemberKind],
        target_type: DeclRef,
        template: &str,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
    ) -> Result<MemberBuilder> {
        let (type_id, mut diagnostics) = self.introduction_target(target_type, kind)?;
        let Some(template) = self.resolve_template(
            template,
            TemplateAttributeKind::Introduction,
            TemplateShape::Default,
            true,
            &mut diagnostics,
        )?
        else {
            return Err(self.fail(kind, diagnostics));
        };
        check_template_kind(&template, expected, target_type, self.snapshot(), &mut diagnostics);
        if has_errors(&diagnostics) {
            return Err(self.fail(kind, diagnostics));
        }
        let source = self.template_decl(&template)?;
        let (has_getter, has_setter) = match &source.kind {
            DeclKind::Property(property) => (property.getter.is_some(), property.setter.is_some()),
            DeclKind::Field(field) => (true, !field.is_readonly),
            DeclKind::Event(_) => (false, false),
            DeclKind::Type(_) | DeclKind::Method(_) | DeclKind::Indexer(_) => {
                return Err(Error::internal(format!(
                    "template `{}` passed the kind check as a {}",
                    template.qualified_name(),
                    source.member_kind()
                )));
            }
        };
        let value_type = source
            .value_type()
            .map(|ty| self.template_context(source).map(ty).into_owned())
            .ok_or_else(|| Error::internal(format!("template `{}` has no value type", template.qualified_name())))?;
        let member = IntroducedMember {
            id: self.snapshot().allocate_id(),
            declaring_type: type_id,
            kind: source.member_kind(),
            name: source.name.clone(),
            visibility: source.visibility,
            is_static: source.is_static,
            is_virtual: source.dispatch.is_virtual,
            generic_params: Vec::new(),
            params: Vec::new(),
            value_type,
            has_getter,
            has_setter,
        };
        self.introduce(kind, target_type, member, Some(template), strategy, tags, diagnostics)
    }

    /// Validate an introduction target and return its type id.
    fn introduction_target(&self, target_type: DeclRef, kind: AdviceKind) -> Result<(DeclId, Vec<Diagnostic>)> {
        self.check_snapshot(&[target_type])?;
        let snapshot = self.snapshot();
        let decl = snapshot.resolve(target_type).ok_or_else(|| {
            Error::usage(format!("{kind} targets {target_type}, which does not exist"))
        })?;
        let Some(ty) = decl.as_type() else {
            return Err(Error::usage(format!(
                "{kind} needs a type target, `{}` is a {}",
                snapshot.display_name(decl.id),
                decl.member_kind()
            )));
        };
        if ty.is_interface() && kind != AdviceKind::IntroduceMethod {
            return Err(Error::usage(format!(
                "{kind} cannot target interface `{}`",
                snapshot.display_name(decl.id)
            )));
        }
        let mut diagnostics = Vec::new();
        if decl.origin == DeclOrigin::External {
            diagnostics.push(
                codes::error(
                    codes::INTRODUCTION_INTO_EXTERNAL,
                    format!(
                        "cannot introduce members into external type `{}`",
                        snapshot.display_name(decl.id)
                    ),
                )
                .with_target(target_type, snapshot.display_name(decl.id)),
            );
        }
        Ok((decl.id, diagnostics))
    }

    #[allow(clippy::too_many_arguments)]
    fn introduce(
        &mut self,
        kind: AdviceKind,
        target_type: DeclRef,
        member: IntroducedMember,
        template: Option<TemplateMember>,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<MemberBuilder> {
        if has_errors(&diagnostics) {
            return Err(self.fail(kind, diagnostics));
        }
        let effective = strategy.unwrap_or(self.services.options.default_introduction_strategy);
        let signature = member.signature();
        let pending = self.pending(member.declaring_type, None);
        let resolution = ConflictResolver::new(self.snapshot()).resolve_introduction(
            member.declaring_type,
            &signature,
            effective,
            &pending,
        );
        diagnostics.extend(resolution.diagnostics);
        let against = resolution.against.map(|existing| existing.reference);
        let superseded = self.superseded(resolution.outcome, against);
        let (outcome, against) = match superseded {
            Some((_, outcome, against)) => (outcome, against),
            None => (resolution.outcome, against),
        };
        debug!(
            target: "advice",
            aspect = %self.aspect,
            member = %member.name,
            strategy = %effective,
            outcome = %outcome,
            "introduction resolved"
        );
        let builder = MemberBuilder::new(member, template);
        self.commit(
            Advice {
                kind,
                aspect: self.aspect.clone(),
                target: target_type,
                tags,
                strategy,
                payload: AdvicePayload::Introduce {
                    member: builder.clone(),
                    outcome,
                    against,
                    resolved: signature,
                },
            },
            diagnostics,
        )?;
        if let Some((index, ..)) = superseded {
            self.retire(index);
        }
        Ok(builder)
    }

    /// The pending introduction an Override outcome replaces, if `against`
    /// names a member this instance introduces.
    ///
    /// The replacing introduction takes over that advice's outcome and target.
    fn superseded(
        &self,
        outcome: ConflictOutcome,
        against: Option<DeclRef>,
    ) -> Option<(usize, ConflictOutcome, Option<DeclRef>)> {
        if outcome != ConflictOutcome::Override {
            return None;
        }
        let against = against?;
        self.advices
            .iter()
            .enumerate()
            .find_map(|(index, advice)| match &advice.payload {
                AdvicePayload::Introduce {
                    member,
                    outcome,
                    against: earlier,
                    ..
                } if outcome.emits() && member.id() == against.id() => Some((index, *outcome, *earlier)),
                _ => None,
            })
    }

    /// Stop the introduction at `index` from emitting; a later one replaced it.
    fn retire(&mut self, index: usize) {
        if let AdvicePayload::Introduce { member, outcome, against, .. } = &mut self.advices[index].payload {
            debug!(
                target: "advice",
                aspect = %self.aspect,
                member = %member.name(),
                "pending introduction superseded"
            );
            *outcome = ConflictOutcome::Ignore;
            *against = None;
        }
    }

    /// Members this instance already introduces into `type_id`.
    fn pending(&self, type_id: DeclId, exclude: Option<usize>) -> Vec<ExistingMember> {
        let snapshot = self.snapshot();
        self.advices
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != exclude)
            .filter_map(|(_, advice)| match &advice.payload {
                AdvicePayload::Introduce { member, outcome, .. } if outcome.emits() => {
                    Some(member.snapshot())
                }
                _ => None,
            })
            .filter(|member| member.declaring_type == type_id)
            .map(|member| {
                let signature = member.signature();
                ExistingMember {
                    reference: snapshot.reference(member.id),
                    declaring_type: type_id,
                    is_same_type: true,
                    dispatch: MemberDispatch {
                        is_virtual: member.is_virtual,
                        ..MemberDispatch::default()
                    },
                    display: format!(
                        "{}.{}",
                        snapshot.display_name(type_id),
                        signature.display(snapshot)
                    ),
                    signature,
                }
            })
            .collect()
    }

    /// Make `target_type` implement `interface`.
    ///
    /// Requests for the same target merge into one advice.
    pub fn implement_interface(
        &mut self,
        target_type: DeclRef,
        interface: &TypeRef,
        strategy: Option<OverrideStrategy>,
        tags: Tags,
    ) -> Result<()> {
        const KIND: AdviceKind = AdviceKind::ImplementInterface;
        self.check_snapshot(&[target_type])?;
        let snapshot = self.snapshot();
        let decl = snapshot.resolve(target_type).ok_or_else(|| {
            Error::usage(format!("implement_interface targets {target_type}, which does not exist"))
        })?;
        let Some(ty) = decl.as_type() else {
            return Err(Error::usage(format!(
                "implement_interface needs a type target, `{}` is a {}",
                snapshot.display_name(decl.id),
                decl.member_kind()
            )));
        };
        if ty.is_interface() {
            return Err(Error::usage(format!(
                "cannot implement an interface on interface `{}`",
                snapshot.display_name(decl.id)
            )));
        }
        let target_display = snapshot.display_name(decl.id);
        let named = match interface.as_named() {
            Some(named) if snapshot.is_interface(named.definition) => named,
            _ => {
                return Err(self.fail(
                    KIND,
                    vec![
                        codes::error(
                            codes::NOT_AN_INTERFACE,
                            format!("`{}` is not an interface", interface.display(snapshot)),
                        )
                        .with_target(target_type, target_display),
                    ],
                ));
            }
        };
        if named.contains_type_parameter() || named.args.len() != snapshot.generic_arity(named.definition) {
            return Err(self.fail(
                KIND,
                vec![
                    codes::error(
                        codes::OPEN_GENERIC_INTERFACE,
                        format!(
                            "interface `{}` must be fully constructed to be implemented",
                            interface.display(snapshot)
                        ),
                    )
                    .with_target(target_type, target_display),
                ],
            ));
        }

        let existing = self.interface_index.get(&decl.id).copied();
        if let Some(index) = existing
            && let Some(AdvicePayload::ImplementInterface { interfaces }) =
                self.advices.get(index).map(|advice| &advice.payload)
            && interfaces.iter().any(|spec| spec.interface.definition == named.definition)
        {
            trace!(
                target: "advice",
                aspect = %self.aspect,
                interface = %interface.display(snapshot),
                "interface already requested"
            );
            return Ok(());
        }

        let effective = strategy.unwrap_or(self.services.options.default_introduction_strategy);
        let resolution =
            ConflictResolver::new(snapshot).resolve_interface(decl.id, named.definition, effective);
        let diagnostics = resolution.diagnostics;
        if has_errors(&diagnostics) {
            return Err(self.fail(KIND, diagnostics));
        }
        if resolution.action == InterfaceAction::Skip {
            debug!(
                target: "advice",
                aspect = %self.aspect,
                interface = %interface.display(snapshot),
                "interface skipped"
            );
            self.services.sink.report_all(self.instance, diagnostics);
            return Ok(());
        }
        let spec = InterfaceSpec {
            interface: named.clone(),
            action: resolution.action,
        };

        if let Some(index) = existing
            && let Some(advice) = self.advices.get_mut(index)
            && let AdvicePayload::ImplementInterface { interfaces } = &mut advice.payload
        {
            interfaces.push(spec);
            for (key, value) in tags {
                advice.tags.entry(key).or_insert(value);
            }
            self.services.sink.report_all(self.instance, diagnostics);
            return Ok(());
        }
        self.commit(
            Advice {
                kind: KIND,
                aspect: self.aspect.clone(),
                target: target_type,
                tags,
                strategy,
                payload: AdvicePayload::ImplementInterface {
                    interfaces: vec![spec],
                },
            },
            diagnostics,
        )?;
        self.interface_index.insert(decl.id, self.advices.len() - 1);
        Ok(())
    }

    /// Attach the validation template `template` to `target`.
    pub fn add_contract(
        &mut self,
        target: ContractTarget,
        template: &str,
        direction: ContractDirection,
        tags: Tags,
    ) -> Result<()> {
        const KIND: AdviceKind = AdviceKind::AddContract;
        const KINDS: [MemberKind; 4] = [
            MemberKind::Method,
            MemberKind::Field,
            MemberKind::Property,
            MemberKind::Indexer,
        ];
        let declaration = target.declaration();
        self.check_snapshot(&[declaration])?;
        let snapshot = self.snapshot();
        let direction = contracts::resolve_direction(snapshot, target, direction)?;
        let mut diagnostics = ConflictResolver::new(snapshot).check_override_target(declaration, &KINDS);

        let Some(template) = self.resolve_template(
            template,
            TemplateAttributeKind::Template,
            TemplateShape::Default,
            true,
            &mut diagnostics,
        )?
        else {
            return Err(self.fail(KIND, diagnostics));
        };
        check_template_kind(&template, &[MemberKind::Method], declaration, snapshot, &mut diagnostics);
        let display = target.describe(snapshot);
        if template.member_kind == MemberKind::Method && template.parameter_count != 1 {
            diagnostics.push(
                codes::error(
                    codes::TEMPLATE_SIGNATURE_MISMATCH,
                    format!(
                        "contract template `{}` must take exactly one value parameter, it takes {}",
                        template.qualified_name(),
                        template.parameter_count
                    ),
                )
                .with_target(declaration, display.clone()),
            );
        }
        if !has_errors(&diagnostics)
            && let Some(mismatch) = self.contract_type_mismatch(target, &template)?
        {
            diagnostics.push(
                codes::error(codes::CONTRACT_TYPE_MISMATCH, format!("{mismatch} for {display}"))
                    .with_target(declaration, display),
            );
        }
        if has_errors(&diagnostics) {
            return Err(self.fail(KIND, diagnostics));
        }
        self.commit(
            Advice {
                kind: KIND,
                aspect: self.aspect.clone(),
                target: declaration,
                tags,
                strategy: None,
                payload: AdvicePayload::AddContract {
                    target,
                    direction,
                    template,
                },
            },
            diagnostics,
        )
    }

    /// Describe why the template's value parameter cannot accept the target's values.
    fn contract_type_mismatch(&self, target: ContractTarget, template: &TemplateMember) -> Result<Option<String>> {
        let snapshot = self.snapshot();
        let source = self.template_decl(template)?;
        let Some(accepted) = source
            .as_method()
            .and_then(|method| method.params.first())
            .map(|param| &param.ty)
        else {
            return Ok(None);
        };
        let accepted = self.template_context(source).map(accepted);
        let decl = snapshot
            .resolve(target.declaration())
            .ok_or_else(|| Error::internal("contract target vanished after validation"))?;
        let value = match (target, &decl.kind) {
            (ContractTarget::Parameter { ordinal, .. }, DeclKind::Method(method)) => {
                method.params.get(ordinal).map(|param| &param.ty)
            }
            (ContractTarget::ReturnParameter { .. }, DeclKind::Method(method)) => Some(&method.return_type),
            _ => decl.value_type(),
        };
        let Some(value) = value else {
            return Ok(None);
        };
        // Targets are declarations: their own parameters stay unbound.
        let value = GenericContext::for_symbol(snapshot, decl.id).map(value);
        if accepts(snapshot, source, &accepted, &value) {
            return Ok(None);
        }
        Ok(Some(format!(
            "template `{}` validates `{}` but the value is `{}`",
            template.qualified_name(),
            accepted.display(snapshot),
            value.display(snapshot)
        )))
    }

    /// Close the session: revalidate customised introductions and freeze every builder.
    pub fn finish(mut self) -> Result<AdviceList> {
        for index in 0..self.advices.len() {
            let (kind, type_id, current, stale) = match &self.advices[index].payload {
                AdvicePayload::Introduce { member, resolved, .. } => {
                    let current = member.snapshot();
                    let signature = current.signature();
                    let stale = signature != *resolved;
                    (self.advices[index].kind, current.declaring_type, signature, stale)
                }
                _ => continue,
            };
            if !stale {
                continue;
            }
            let strategy = self.advices[index]
                .strategy
                .unwrap_or(self.services.options.default_introduction_strategy);
            let pending = self.pending(type_id, Some(index));
            let resolution =
                ConflictResolver::new(self.snapshot()).resolve_introduction(type_id, &current, strategy, &pending);
            let mut diagnostics = resolution.diagnostics;
            diagnostics.extend(self.advices[index].initialize(self.snapshot())?);
            if has_errors(&diagnostics) {
                return Err(self.fail(kind, diagnostics));
            }
            debug!(
                target: "advice",
                aspect = %self.aspect,
                outcome = %resolution.outcome,
                "customised introduction re-resolved"
            );
            let against = resolution.against.map(|existing| existing.reference);
            let superseded = self.superseded(resolution.outcome, against);
            if let AdvicePayload::Introduce {
                outcome,
                against: target,
                resolved,
                ..
            } = &mut self.advices[index].payload
            {
                (*outcome, *target) = match superseded {
                    Some((_, earlier, earlier_against)) => (earlier, earlier_against),
                    None => (resolution.outcome, against),
                };
                *resolved = current;
            }
            if let Some((earlier, ..)) = superseded {
                self.retire(earlier);
            }
            self.services.sink.report_all(self.instance, diagnostics);
        }
        for advice in &self.advices {
            if let Some(builder) = advice.builder() {
                builder.freeze();
            }
        }
        debug!(
            target: "advice",
            aspect = %self.aspect,
            instance = self.instance,
            advices = self.advices.len(),
            "advice factory finished"
        );
        Ok(AdviceList {
            aspect: self.aspect,
            instance: self.instance,
            advices: self.advices,
        })
    }

    fn commit(&mut self, advice: Advice, mut diagnostics: Vec<Diagnostic>) -> Result<()> {
        diagnostics.extend(advice.initialize(self.snapshot())?);
        if has_errors(&diagnostics) {
            return Err(self.fail(advice.kind, diagnostics));
        }
        debug!(
            target: "advice",
            aspect = %self.aspect,
            kind = %advice.kind,
            target_decl = %self.snapshot().display_name(advice.target.id()),
            diagnostics = diagnostics.len(),
            "advice appended"
        );
        self.services.sink.report_all(self.instance, diagnostics);
        self.advices.push(advice);
        Ok(())
    }

    fn fail(&self, kind: AdviceKind, diagnostics: Vec<Diagnostic>) -> Error {
        debug!(
            target: "advice",
            aspect = %self.aspect,
            kind = %kind,
            errors = diagnostics.iter().filter(|diagnostic| diagnostic.is_error()).count(),
            "advice rejected"
        );
        Error::Advice(AdviceError::new(kind, self.aspect.clone(), diagnostics))
    }

    fn check_snapshot(&self, references: &[DeclRef]) -> Result<()> {
        let current = self.snapshot().id();
        match references.iter().find(|reference| reference.snapshot() != current) {
            Some(reference) => Err(Error::internal(format!(
                "reference {reference} was obtained from another snapshot than the factory's {current}"
            ))),
            None => Ok(()),
        }
    }

    fn template_decl(&self, template: &TemplateMember) -> Result<&'w Declaration> {
        self.snapshot().resolve(template.reference).ok_or_else(|| {
            Error::internal(format!(
                "template `{}` is registered but not declared",
                template.qualified_name()
            ))
        })
    }

    /// Look `name` up on the aspect class, then on its base classes nearest first.
    fn lookup_template(&self, name: &str) -> TemplateResolution<'w> {
        let services = self.services;
        let found = services.registry.resolve(&self.aspect, name);
        if found != TemplateResolution::NotFound {
            return found;
        }
        let snapshot = self.snapshot();
        let Some(aspect) = snapshot.lookup_type(&self.aspect, 0) else {
            return found;
        };
        snapshot
            .base_chain(aspect.id())
            .iter()
            .map(|base| services.registry.resolve(&snapshot.display_name(base.definition), name))
            .find(|resolution| *resolution != TemplateResolution::NotFound)
            .unwrap_or(TemplateResolution::NotFound)
    }

    /// Generic context of a template member seen from the aspect class.
    ///
    /// A template declared by a constructed base of the aspect sees that base's
    /// arguments; one declared by the aspect itself maps nothing.
    fn template_context(&self, source: &Declaration) -> GenericContext {
        let snapshot = self.snapshot();
        let (Some(owner), Some(aspect)) = (source.declaring_type, snapshot.lookup_type(&self.aspect, 0)) else {
            return GenericContext::Null;
        };
        snapshot
            .base_chain(aspect.id())
            .into_iter()
            .find(|base| base.definition == owner)
            .map_or(GenericContext::Null, |base| GenericContext::for_instance(base, None))
    }

    /// First parameter of `template` that cannot take the matching parameter of `target`.
    fn parameter_mismatch(&self, template: &TemplateMember, target: &Declaration) -> Result<Option<String>> {
        let snapshot = self.snapshot();
        let source = self.template_decl(template)?;
        let (Some(ours), Some(theirs)) = (source.as_method(), target.as_method()) else {
            return Ok(None);
        };
        let context = self.template_context(source);
        let target_context = GenericContext::for_symbol(snapshot, target.id);
        for (accepted, value) in ours.params.iter().zip(&theirs.params) {
            let accepted_type = context.map(&accepted.ty);
            let value_type = target_context.map(&value.ty);
            if !accepts(snapshot, source, &accepted_type, &value_type) {
                return Ok(Some(format!(
                    "template `{}` takes `{}` as `{}` but `{}` passes `{}`",
                    template.qualified_name(),
                    accepted_type.display(snapshot),
                    accepted.name,
                    snapshot.display_name(target.id),
                    value_type.display(snapshot)
                )));
            }
        }
        Ok(None)
    }

    /// Look `name` up on the aspect class with an exact attribute match.
    ///
    /// Optional abstract templates count as not supplied.
    fn resolve_template(
        &self,
        name: &str,
        attribute: TemplateAttributeKind,
        shape: TemplateShape,
        required: bool,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<TemplateMember>> {
        let snapshot = self.snapshot();
        match self.lookup_template(name) {
            TemplateResolution::NotFound => {
                diagnostics.push(codes::error(
                    codes::TEMPLATE_NOT_FOUND,
                    format!("aspect `{}` has no template member `{name}`", self.aspect),
                ));
                Ok(None)
            }
            TemplateResolution::Abstract(descriptor) => {
                if required {
                    Err(Error::internal(format!(
                        "required template `{}.{}` is abstract",
                        descriptor.class, descriptor.name
                    )))
                } else {
                    Ok(None)
                }
            }
            TemplateResolution::Found(descriptor) if descriptor.attribute == TemplateAttributeKind::None => {
                diagnostics.push(
                    codes::error(
                        codes::TEMPLATE_NOT_MARKED,
                        format!(
                            "`{}.{name}` is not marked as a template; add an {} attribute",
                            self.aspect, attribute
                        ),
                    )
                    .with_target(snapshot.reference(descriptor.declaration), snapshot.display_name(descriptor.declaration)),
                );
                Ok(None)
            }
            TemplateResolution::Found(descriptor) if descriptor.attribute != attribute => {
                diagnostics.push(
                    codes::error(
                        codes::TEMPLATE_ATTRIBUTE_MISMATCH,
                        format!(
                            "`{}.{name}` is marked as {} but this advice needs a {} template",
                            self.aspect, descriptor.attribute, attribute
                        ),
                    )
                    .with_target(snapshot.reference(descriptor.declaration), snapshot.display_name(descriptor.declaration)),
                );
                Ok(None)
            }
            TemplateResolution::Found(descriptor) => Ok(Some(descriptor.bind(snapshot, shape))),
        }
    }
}

/// Whether a template slot of type `accepted` takes a value of type `value`.
fn accepts(snapshot: &DeclarationSnapshot, template: &Declaration, accepted: &TypeRef, value: &TypeRef) -> bool {
    accepted.is_dynamic()
        || value.is_dynamic()
        || *accepted == snapshot.core().object_type()
        || matches!(accepted, TypeRef::Parameter(param) if param.owner == template.id)
        || accepted == value
}

fn check_template_kind(
    template: &TemplateMember,
    expected: &[MemberKind],
    target: DeclRef,
    snapshot: &DeclarationSnapshot,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !expected.contains(&template.member_kind) {
        diagnostics.push(
            codes::error(
                codes::TEMPLATE_KIND_MISMATCH,
                format!(
                    "template `{}` is a {} and cannot be applied here",
                    template.qualified_name(),
                    template.member_kind
                ),
            )
            .with_target(target, snapshot.display_name(target.id())),
        );
    }
}

fn has_setter(decl: &Declaration) -> bool {
    match &decl.kind {
        DeclKind::Field(field) => !field.is_readonly,
        DeclKind::Property(property) => property.setter.is_some(),
        DeclKind::Indexer(indexer) => indexer.setter.is_some(),
        DeclKind::Type(_) | DeclKind::Method(_) | DeclKind::Event(_) => false,
    }
}
