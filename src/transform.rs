//! Merging advice lists of all aspect instances into per-target transformations.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::advice::{Advice, AdviceList, AdvicePayload, IntroducedMember};
use crate::conflicts::{ConflictOutcome, InterfaceAction};
use crate::contracts::{ContractExpander, ContractWeaver, InsertionPoint, StatementPlacement};
use crate::diagnostics::{Diagnostic, InstanceIndex};
use crate::error::{Error, Result};
use crate::model::{DeclId, DeclKind, DeclRef, Declaration, DeclarationSnapshot, NamedType, TypeRef};
use crate::templates::{SelectedTemplate, TemplateMember, TemplateShape};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessorSlot {
    Getter,
    Setter,
}

/// One concrete change to one declaration.
#[derive(Clone, Debug)]
pub enum TransformationKind {
    ReplaceBody {
        selected: SelectedTemplate,
    },
    ReplaceAccessor {
        slot: AccessorSlot,
        template: TemplateMember,
        interpreted_shape: Option<TemplateShape>,
    },
    IntroduceMember {
        member: IntroducedMember,
        outcome: ConflictOutcome,
        /// Member replaced in place (same type) or hidden/overridden (base type).
        against: Option<DeclRef>,
        template: Option<TemplateMember>,
    },
    ImplementInterface {
        interface: NamedType,
        reimplement: bool,
    },
    InsertStatements {
        placement: StatementPlacement,
        template: String,
    },
}

impl TransformationKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            TransformationKind::ReplaceBody { .. } => "override-body",
            TransformationKind::ReplaceAccessor { .. } => "override-accessor",
            TransformationKind::IntroduceMember { outcome, .. } => match outcome {
                ConflictOutcome::New => "introduce-new",
                ConflictOutcome::Override => "introduce-override",
                ConflictOutcome::Default | ConflictOutcome::Ignore | ConflictOutcome::Error => {
                    "introduce"
                }
            },
            TransformationKind::ImplementInterface { .. } => "implement-interface",
            TransformationKind::InsertStatements { .. } => "insert-statements",
        }
    }

    fn describe(&self, snapshot: &DeclarationSnapshot) -> String {
        match self {
            TransformationKind::ReplaceBody { selected } => format!(
                "{} as {}",
                selected.template.qualified_name(),
                selected.interpreted_shape
            ),
            TransformationKind::ReplaceAccessor { slot, template, .. } => {
                let slot = match slot {
                    AccessorSlot::Getter => "get",
                    AccessorSlot::Setter => "set",
                };
                format!("{slot} with {}", template.qualified_name())
            }
            TransformationKind::IntroduceMember { member, against, .. } => {
                let mut out = format!(
                    "{} {} {}",
                    member.visibility.as_str(),
                    member.kind,
                    member.signature().display(snapshot)
                );
                if let TypeRef::Named(_) | TypeRef::Parameter(_) | TypeRef::Array { .. } = member.value_type {
                    let _ = write!(out, ": {}", member.value_type.display(snapshot));
                }
                if let Some(against) = against {
                    let _ = write!(out, " (over {})", snapshot.display_name(against.id()));
                }
                out
            }
            TransformationKind::ImplementInterface { interface, reimplement } => {
                let rendered = TypeRef::Named(interface.clone()).display(snapshot);
                if *reimplement {
                    format!("{rendered} (reimplemented)")
                } else {
                    rendered
                }
            }
            TransformationKind::InsertStatements { placement, .. } => {
                let point = match &placement.point {
                    InsertionPoint::MethodEntry => "at entry".to_string(),
                    InsertionPoint::SetterEntry => "at setter entry".to_string(),
                    InsertionPoint::BeforeReturn { exit } => {
                        format!("before return #{exit}")
                    }
                    InsertionPoint::BeforeGetterReturn { exit } => {
                        format!("before getter return #{exit}")
                    }
                };
                format!("{point}: {}", placement.block.statements.join(" "))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Transformation {
    pub aspect: String,
    pub instance: InstanceIndex,
    pub kind: TransformationKind,
}

/// Transformations of a stage grouped by the declaration they change.
///
/// Within one target, transformations keep instance order, then advice order.
#[derive(Clone, Debug, Default)]
pub struct TransformationSet {
    by_target: BTreeMap<DeclId, Vec<Transformation>>,
}

impl TransformationSet {
    /// Merge `lists` (any order) into one set, expanding contracts with `expander`.
    ///
    /// Returns the set and the diagnostics of skipped contract directions.
    pub fn build<E: ContractExpander>(
        snapshot: &DeclarationSnapshot,
        lists: &[AdviceList],
        expander: &E,
    ) -> Result<(Self, Vec<Diagnostic>)> {
        let mut ordered: Vec<&AdviceList> = lists.iter().collect();
        ordered.sort_by_key(|list| list.instance());
        let weaver = ContractWeaver::new(snapshot, expander);
        let mut set = Self::default();
        let mut diagnostics = Vec::new();
        for list in ordered {
            for advice in list {
                set.add_advice(snapshot, list.instance(), advice, &weaver, &mut diagnostics)?;
            }
        }
        debug!(
            target: "advice",
            targets = set.by_target.len(),
            transformations = set.len(),
            "transformation set built"
        );
        Ok((set, diagnostics))
    }

    fn add_advice<E: ContractExpander>(
        &mut self,
        snapshot: &DeclarationSnapshot,
        instance: InstanceIndex,
        advice: &Advice,
        weaver: &ContractWeaver<'_, E>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        if snapshot.resolve(advice.target).is_none() {
            return Err(Error::internal(format!(
                "{} advice of `{}` targets {} which is unknown to {}",
                advice.kind,
                advice.aspect,
                advice.target,
                snapshot.id()
            )));
        }
        let target = advice.target.id();
        let mut push = |target: DeclId, kind: TransformationKind| {
            self.by_target.entry(target).or_default().push(Transformation {
                aspect: advice.aspect.clone(),
                instance,
                kind,
            });
        };
        match &advice.payload {
            AdvicePayload::OverrideMethod { selected } => push(
                target,
                TransformationKind::ReplaceBody {
                    selected: selected.clone(),
                },
            ),
            AdvicePayload::OverrideFieldOrProperty { getter, setter } => {
                if let Some(selected) = getter {
                    push(
                        target,
                        TransformationKind::ReplaceAccessor {
                            slot: AccessorSlot::Getter,
                            template: selected.template.clone(),
                            interpreted_shape: Some(selected.interpreted_shape),
                        },
                    );
                }
                if let Some(template) = setter {
                    push(
                        target,
                        TransformationKind::ReplaceAccessor {
                            slot: AccessorSlot::Setter,
                            template: template.clone(),
                            interpreted_shape: None,
                        },
                    );
                }
            }
            AdvicePayload::Introduce {
                member,
                outcome,
                against,
                ..
            } => {
                if outcome.emits() {
                    push(
                        target,
                        TransformationKind::IntroduceMember {
                            member: member.snapshot(),
                            outcome: *outcome,
                            against: *against,
                            template: member.template_ref().cloned(),
                        },
                    );
                }
            }
            AdvicePayload::ImplementInterface { interfaces } => {
                for spec in interfaces {
                    if spec.action == InterfaceAction::Skip {
                        continue;
                    }
                    push(
                        target,
                        TransformationKind::ImplementInterface {
                            interface: spec.interface.clone(),
                            reimplement: spec.action == InterfaceAction::Reimplement,
                        },
                    );
                }
            }
            AdvicePayload::AddContract { template, .. } => {
                let plan = weaver.weave(std::iter::once(advice))?;
                diagnostics.extend(plan.diagnostics);
                for placement in plan.placements {
                    push(
                        placement.target.id(),
                        TransformationKind::InsertStatements {
                            placement,
                            template: template.qualified_name(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn for_target(&self, target: DeclId) -> &[Transformation] {
        self.by_target.get(&target).map_or(&[], Vec::as_slice)
    }

    pub fn targets(&self) -> impl Iterator<Item = DeclId> + '_ {
        self.by_target.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }

    /// Human-readable listing, targets sorted by display name.
    #[must_use]
    pub fn render(&self, snapshot: &DeclarationSnapshot) -> String {
        let mut out = String::new();
        for entry in self.report(snapshot).targets {
            let _ = writeln!(out, "{}", entry.target);
            for item in entry.transformations {
                let _ = writeln!(
                    out,
                    "  {:<20} {} [{}#{}]",
                    item.kind, item.detail, item.aspect, item.instance
                );
            }
        }
        out
    }

    #[must_use]
    pub fn report(&self, snapshot: &DeclarationSnapshot) -> TransformationReport {
        let mut targets: Vec<TargetReport> = self
            .by_target
            .iter()
            .map(|(target, transformations)| TargetReport {
                target: snapshot.display_name(*target),
                transformations: transformations
                    .iter()
                    .map(|transformation| TransformationEntry {
                        kind: transformation.kind.label(),
                        detail: transformation.kind.describe(snapshot),
                        aspect: transformation.aspect.clone(),
                        instance: transformation.instance,
                    })
                    .collect(),
            })
            .collect();
        targets.sort_by(|left, right| left.target.cmp(&right.target));
        TransformationReport {
            snapshot_version: snapshot.version(),
            transformations: self.len(),
            targets,
        }
    }

    /// Commit introduced members and interfaces into a successor snapshot.
    ///
    /// A member replacing a same-type member takes over its identity.
    pub fn commit(&self, snapshot: &DeclarationSnapshot) -> Result<DeclarationSnapshot> {
        let mut retyped: BTreeMap<DeclId, Declaration> = BTreeMap::new();
        let mut members = Vec::new();
        for (target, transformations) in &self.by_target {
            for transformation in transformations {
                match &transformation.kind {
                    TransformationKind::ImplementInterface { interface, .. } => {
                        let decl = match retyped.entry(*target) {
                            Entry::Occupied(entry) => entry.into_mut(),
                            Entry::Vacant(entry) => {
                                let original = snapshot.get(*target).ok_or_else(|| {
                                    Error::internal(format!("interface target {target} vanished"))
                                })?;
                                entry.insert(original.clone())
                            }
                        };
                        if let DeclKind::Type(ty) = &mut decl.kind {
                            let interface = TypeRef::Named(interface.clone());
                            if !ty.interfaces.contains(&interface) {
                                ty.interfaces.push(interface);
                            }
                        }
                    }
                    TransformationKind::IntroduceMember {
                        member,
                        outcome,
                        against,
                        ..
                    } => {
                        let mut decl = member.to_declaration();
                        if *outcome == ConflictOutcome::Override
                            && let Some(against) = against
                            && snapshot
                                .get(against.id())
                                .is_some_and(|existing| existing.declaring_type == Some(member.declaring_type))
                        {
                            decl.id = against.id();
                        } else if *outcome == ConflictOutcome::Override {
                            decl.dispatch.is_override = true;
                        }
                        members.push(decl);
                    }
                    TransformationKind::ReplaceBody { .. }
                    | TransformationKind::ReplaceAccessor { .. }
                    | TransformationKind::InsertStatements { .. } => {}
                }
            }
        }
        let additions: Vec<Declaration> = retyped.into_values().chain(members).collect();
        debug!(
            target: "advice",
            from = snapshot.version(),
            declarations = additions.len(),
            "committing transformations"
        );
        Ok(snapshot.successor(additions))
    }
}

/// Serialisable view of a [`TransformationSet`].
#[derive(Clone, Debug, Serialize)]
pub struct TransformationReport {
    pub snapshot_version: u32,
    pub transformations: usize,
    pub targets: Vec<TargetReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub transformations: Vec<TransformationEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TransformationEntry {
    pub kind: &'static str,
    pub detail: String,
    pub aspect: String,
    pub instance: InstanceIndex,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use expect_test::expect;

    use super::*;
    use crate::advice::{AdviceOptions, Tags, WeavingServices};
    use crate::conflicts::OverrideStrategy;
    use crate::contracts::{ContractDirection, ContractTarget, TemplateInvocationExpander};
    use crate::model::{MemberKind, SnapshotBuilder};
    use crate::templates::{MethodTemplateSelector, TemplateAttributeKind, TemplateRegistry};

    struct Fixture {
        services: WeavingServices,
        service: DeclId,
        run: DeclId,
        disposable: DeclId,
        name: DeclId,
    }

    fn fixture() -> Fixture {
        let mut builder = SnapshotBuilder::new();
        let string = builder.core().string_type();
        let disposable = builder.interface("IDisposable").finish();
        let service = builder.class("Service").finish();
        let run = builder.method(service, "Run").virtual_().finish();
        let name = builder.property(service, "Name", string.clone()).getter().setter().finish();
        let aspect = builder.class("Audit").finish();
        let log = builder.method(aspect, "Log").returns(TypeRef::Dynamic).finish();
        let run_template = builder.method(aspect, "Run").finish();
        let dispose = builder.method(aspect, "Dispose").finish();
        let not_null = builder.method(aspect, "NotNull").param("value", TypeRef::Dynamic).finish();
        let snapshot = builder.build();

        let mut registry = TemplateRegistry::new();
        for (id, attribute) in [
            (log, TemplateAttributeKind::Template),
            (run_template, TemplateAttributeKind::Introduction),
            (dispose, TemplateAttributeKind::Introduction),
            (not_null, TemplateAttributeKind::Template),
        ] {
            registry.register_member(&snapshot, id, attribute).expect("register");
        }
        Fixture {
            services: WeavingServices::new(snapshot, Arc::new(registry), AdviceOptions::default()),
            service,
            run,
            disposable,
            name,
        }
    }

    fn lists(fx: &Fixture) -> Vec<AdviceList> {
        let snapshot = &fx.services.snapshot;
        let mut second = fx.services.factory("Audit", 1);
        second
            .override_method(snapshot.reference(fx.run), &MethodTemplateSelector::new("Log"), Tags::new())
            .expect("override");
        second
            .add_contract(
                ContractTarget::FieldOrProperty(snapshot.reference(fx.name)),
                "NotNull",
                ContractDirection::Both,
                Tags::new(),
            )
            .expect("contract");

        let mut first = fx.services.factory("Audit", 0);
        first
            .implement_interface(snapshot.reference(fx.service), &TypeRef::named(fx.disposable), None, Tags::new())
            .expect("interface");
        first
            .introduce_method(snapshot.reference(fx.service), "Dispose", None, Tags::new())
            .expect("dispose");
        first
            .introduce_method(snapshot.reference(fx.service), "Run", Some(OverrideStrategy::Ignore), Tags::new())
            .expect("ignored run");
        vec![second.finish().expect("second"), first.finish().expect("first")]
    }

    #[test]
    fn renders_targets_in_instance_then_advice_order() {
        let fx = fixture();
        let snapshot = &fx.services.snapshot;
        let (set, diagnostics) =
            TransformationSet::build(snapshot, &lists(&fx), &TemplateInvocationExpander).expect("build");
        assert!(diagnostics.is_empty());
        assert_eq!(set.len(), 5);
        expect![[r#"
            Service
              implement-interface  IDisposable [Audit#0]
              introduce            public method Dispose(): void [Audit#0]
            Service.Name
              insert-statements    at setter entry: Audit.NotNull(value); [Audit#1]
              insert-statements    before getter return #0: Audit.NotNull(value); [Audit#1]
            Service.Run
              override-body        Audit.Log as default [Audit#1]
        "#]]
        .assert_eq(&set.render(snapshot));
    }

    #[test]
    fn commit_produces_successor_with_introductions() {
        let fx = fixture();
        let snapshot = &fx.services.snapshot;
        let (set, _) =
            TransformationSet::build(snapshot, &lists(&fx), &TemplateInvocationExpander).expect("build");
        let next = set.commit(snapshot).expect("commit");

        assert_eq!(next.version(), snapshot.version() + 1);
        let dispose: Vec<MemberKind> = next
            .members_named(fx.service, "Dispose")
            .map(Declaration::member_kind)
            .collect();
        assert_eq!(dispose, vec![MemberKind::Method]);
        assert_eq!(next.members_named(fx.service, "Run").count(), 1);
        assert!(matches!(
            next.implements_interface(fx.service, fx.disposable),
            crate::model::InterfaceImplementation::Declared
        ));
        assert_eq!(snapshot.members_named(fx.service, "Dispose").count(), 0);
    }

    #[test]
    fn repeated_introduction_from_one_instance_commits_one_member() {
        let fx = fixture();
        let snapshot = &fx.services.snapshot;
        let service = snapshot.reference(fx.service);
        let int = snapshot.core().int_type();
        let mut factory = fx.services.factory("Audit", 0);
        factory
            .introduce_field(service, "count", int.clone(), None, Tags::new())
            .expect("first count");
        let second = factory
            .introduce_field(service, "count", int.clone(), None, Tags::new())
            .expect("second count");
        factory
            .introduce_field(service, "total", int.clone(), None, Tags::new())
            .expect("total");
        factory
            .introduce_field(service, "spare", int, None, Tags::new())
            .expect("spare")
            .set_name("total")
            .expect("rename onto total");
        let lists = vec![factory.finish().expect("finish")];

        let (set, _) = TransformationSet::build(snapshot, &lists, &TemplateInvocationExpander).expect("build");
        assert_eq!(set.len(), 2);
        let rendered = set.render(snapshot);
        assert!(!rendered.contains("introduce-override"), "{rendered}");

        let next = set.commit(snapshot).expect("commit");
        let count: Vec<(DeclId, bool)> = next
            .members_named(fx.service, "count")
            .map(|decl| (decl.id, decl.dispatch.is_override))
            .collect();
        assert_eq!(count, vec![(second.id(), false)]);
        assert_eq!(next.members_named(fx.service, "total").count(), 1);
        assert_eq!(next.len(), snapshot.len() + 2);
    }

    #[test]
    fn report_serialises_to_json() {
        let fx = fixture();
        let snapshot = &fx.services.snapshot;
        let (set, _) =
            TransformationSet::build(snapshot, &lists(&fx), &TemplateInvocationExpander).expect("build");
        let value = serde_json::to_value(set.report(snapshot)).expect("json");
        assert_eq!(value["transformations"], 5);
        assert_eq!(value["targets"][0]["target"], "Service");
        assert_eq!(value["targets"][0]["transformations"][1]["kind"], "introduce");
    }
}
