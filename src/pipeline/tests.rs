use std::collections::HashSet;
use std::sync::Arc;

use super::*;
use crate::advice::{AdviceFactory, AdviceKind, AdviceOptions, Tags};
use crate::aspect::FnAspect;
use crate::model::{DeclId, SnapshotBuilder};
use crate::templates::{MethodTemplateSelector, TemplateAttributeKind, TemplateRegistry};

struct Fixture {
    services: WeavingServices,
    service: DeclId,
    run: DeclId,
}

fn fixture() -> Fixture {
    let mut builder = SnapshotBuilder::new();
    let int = builder.core().int_type();
    let service = builder.class("Service").finish();
    let run = builder.method(service, "Run").virtual_().finish();
    let aspect = builder.class("Tracing").finish();
    let override_template = builder.method(aspect, "OverrideMethod").finish();
    let ping = builder.method(aspect, "Ping").returns(int).finish();
    let snapshot = builder.build();

    let mut registry = TemplateRegistry::new();
    registry
        .register_member(&snapshot, override_template, TemplateAttributeKind::Template)
        .expect("register override");
    registry
        .register_member(&snapshot, ping, TemplateAttributeKind::Introduction)
        .expect("register introduction");
    Fixture {
        services: WeavingServices::new(snapshot, Arc::new(registry), AdviceOptions::default()),
        service,
        run,
    }
}

fn instances(fx: &Fixture) -> Vec<AspectInstance> {
    let service = fx.services.snapshot.reference(fx.service);
    let run = fx.services.snapshot.reference(fx.run);
    let mut instances = vec![AspectInstance::new(FnAspect::new(
        "Tracing",
        move |factory: &mut AdviceFactory<'_>| {
            factory.override_method(run, &MethodTemplateSelector::new("OverrideMethod"), Tags::new())
        },
    ))
    .with_label("override")];
    instances.push(
        AspectInstance::new(FnAspect::new("Tracing", move |factory: &mut AdviceFactory<'_>| {
            factory.introduce_method(service, "Missing", None, Tags::new())?;
            Ok(())
        }))
        .with_label("missing"),
    );
    for slot in 0..6 {
        instances.push(
            AspectInstance::new(FnAspect::new("Tracing", move |factory: &mut AdviceFactory<'_>| {
                let int = factory.snapshot().core().int_type();
                factory.introduce_field(service, &format!("slot{slot}"), int, None, Tags::new())?;
                Ok(())
            }))
            .with_label(format!("field-{slot}")),
        );
    }
    instances
}

fn summary(outcome: &StageOutcome) -> Vec<(usize, Vec<AdviceKind>)> {
    outcome
        .lists
        .iter()
        .map(|list| (list.instance(), list.iter().map(|advice| advice.kind).collect()))
        .collect()
}

#[test]
fn every_mode_yields_the_same_instance_ordered_result() {
    let mut summaries = Vec::new();
    for mode in [
        ExecutionMode::Sequential,
        ExecutionMode::Randomized { seed: 11 },
        ExecutionMode::Parallel { max_workers: 4 },
    ] {
        let fx = fixture();
        let outcome = WeavingStage::new(&fx.services, mode).run(&instances(&fx));
        assert_eq!(outcome.failures.len(), 1, "{mode}");
        summaries.push(summary(&outcome));
    }
    assert_eq!(summaries[0], summaries[1]);
    assert_eq!(summaries[0], summaries[2]);
    let indices: Vec<usize> = summaries[0].iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![0, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn failing_instance_contributes_no_advice() {
    let fx = fixture();
    let outcome = WeavingStage::new(&fx.services, ExecutionMode::Sequential).run(&instances(&fx));
    assert!(!outcome.is_success());
    let failure = &outcome.failures[0];
    assert_eq!(failure.instance, 1);
    assert_eq!(failure.aspect, "missing");
    assert!(matches!(failure.error, Error::Advice(_)));
    assert!(outcome.lists.iter().all(|list| list.instance() != 1));
    assert_eq!(outcome.advice_count(), 7);
    assert!(
        outcome
            .diagnostics
            .iter()
            .any(|diagnostic| diagnostic.code_str() == "ADV101")
    );
}

#[test]
fn failed_instance_keeps_its_earlier_warnings_and_errors_only() {
    let mut builder = SnapshotBuilder::new();
    let disposable = builder.interface("IDisposable").finish();
    let service = builder
        .class("Service")
        .implements(crate::model::TypeRef::named(disposable))
        .finish();
    let snapshot = builder.build();
    let services = WeavingServices::new(snapshot, Arc::new(TemplateRegistry::new()), AdviceOptions::default());
    let before = services.snapshot.len();
    let target = services.snapshot.reference(service);
    let iface = crate::model::TypeRef::named(disposable);
    let instances = vec![
        AspectInstance::new(FnAspect::new("Tracing", move |factory: &mut AdviceFactory<'_>| {
            let int = factory.snapshot().core().int_type();
            factory.introduce_field(target, "scratch", int, None, Tags::new())?;
            factory.implement_interface(target, &iface, None, Tags::new())?;
            factory.introduce_method(target, "Missing", None, Tags::new())?;
            Ok(())
        })),
        AspectInstance::new(FnAspect::new("Tracing", move |factory: &mut AdviceFactory<'_>| {
            let int = factory.snapshot().core().int_type();
            factory.introduce_field(target, "count", int, None, Tags::new())?;
            Ok(())
        })),
    ];

    let outcome = WeavingStage::new(&services, ExecutionMode::Sequential).run(&instances);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].instance, 0);
    let reported: Vec<(&str, bool)> = outcome
        .diagnostics
        .iter()
        .map(|diagnostic| (diagnostic.code_str(), diagnostic.is_error()))
        .collect();
    assert_eq!(reported, vec![("ADV211", false), ("ADV101", true)]);

    // Ids the failed instance allocated stay unused; nothing it built is committed.
    assert_eq!(services.snapshot.len(), before);
    let (set, _) = outcome
        .transformations(&services, &crate::contracts::TemplateInvocationExpander)
        .expect("transformations");
    let next = set.commit(&services.snapshot).expect("commit");
    assert_eq!(next.len(), before + 1);
    assert_eq!(next.members_named(service, "scratch").count(), 0);
    assert_eq!(next.members_named(service, "count").count(), 1);
}

#[test]
fn concurrent_introductions_get_distinct_identities() {
    let fx = fixture();
    let outcome =
        WeavingStage::new(&fx.services, ExecutionMode::Parallel { max_workers: 3 }).run(&instances(&fx));
    let ids: Vec<DeclId> = outcome
        .lists
        .iter()
        .flat_map(|list| list.iter())
        .filter_map(|advice| advice.builder())
        .map(|builder| builder.id())
        .collect();
    assert_eq!(ids.len(), 6);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 6);
}

#[test]
fn cancelled_stage_runs_nothing() {
    let fx = fixture();
    let token = CancellationToken::new();
    token.cancel();
    let outcome = WeavingStage::new(&fx.services, ExecutionMode::Parallel { max_workers: 2 })
        .with_cancellation(token)
        .run(&instances(&fx));
    assert!(outcome.cancelled);
    assert!(outcome.lists.is_empty());
    assert_eq!(outcome.failures.len(), 8);
    assert!(
        outcome
            .failures
            .iter()
            .all(|failure| matches!(failure.error, Error::Cancelled))
    );
}

#[test]
fn panicking_aspect_becomes_internal_failure() {
    let fx = fixture();
    let instances = vec![AspectInstance::new(FnAspect::new(
        "Tracing",
        |_: &mut AdviceFactory<'_>| -> Result<()> { panic!("template table corrupted") },
    ))];
    let outcome = WeavingStage::new(&fx.services, ExecutionMode::Sequential).run(&instances);
    let failure = &outcome.failures[0];
    assert!(failure.error.is_internal());
    assert_eq!(
        failure.error.to_string(),
        "internal error: aspect `Tracing` panicked: template table corrupted"
    );
}

#[test]
fn transformations_follow_instance_order() {
    let fx = fixture();
    let outcome = WeavingStage::new(&fx.services, ExecutionMode::Randomized { seed: 3 }).run(&instances(&fx));
    let (set, diagnostics) = outcome
        .transformations(&fx.services, &crate::contracts::TemplateInvocationExpander)
        .expect("transformations");
    assert!(diagnostics.is_empty());
    let instances: Vec<usize> = set
        .for_target(fx.service)
        .iter()
        .map(|transformation| transformation.instance)
        .collect();
    assert_eq!(instances, vec![2, 3, 4, 5, 6, 7]);
}
