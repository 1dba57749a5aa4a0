use std::sync::Arc;

use super::*;
use crate::contracts::{ContractWeaver, InsertionPoint, TemplateInvocationExpander};
use crate::diagnostics::Severity;
use crate::model::{DeclId, MemberKind, SnapshotBuilder, TypeRef, Visibility};
use crate::templates::{
    GetterTemplateSelector, MethodTemplateSelector, TemplateAttributeKind, TemplateRegistry,
};

struct Fixture {
    services: WeavingServices,
    service: DeclId,
    worker: DeclId,
    disposable: DeclId,
    runnable: DeclId,
    run: DeclId,
    fetch: DeclId,
    items: DeclId,
    add: DeclId,
    name: DeclId,
    id: DeclId,
    repository: DeclId,
}

/// Aspect class `Logging` with its templates, and the types it is applied to.
fn fixture() -> Fixture {
    let mut builder = SnapshotBuilder::new();
    let core = *builder.core();
    let int = core.int_type();
    let string = core.string_type();

    let disposable = builder.interface("IDisposable").finish();
    let runnable = builder.interface("IRunnable").finish();
    let repository = builder.interface("IRepository").generic(&["T"]).finish();

    let service = builder.class("Service").finish();
    let run = builder.method(service, "Run").virtual_().finish();
    let fetch = builder
        .method(service, "Fetch")
        .virtual_()
        .async_()
        .returns(TypeRef::named(core.task))
        .finish();
    let items = builder
        .method(service, "Items")
        .virtual_()
        .iterator()
        .returns(TypeRef::generic(core.enumerable_of_t, vec![int.clone()]))
        .finish();
    let add = builder.method(service, "Add").param("amount", int.clone()).finish();
    let name = builder.property(service, "Name", string.clone()).getter().setter().finish();
    let id = builder.property(service, "Id", int.clone()).getter().virtual_().finish();

    let worker = builder.class("Worker").abstract_().implements(TypeRef::named(disposable)).finish();
    builder.method(worker, "Work").abstract_().finish();

    let aspect = builder.class("Logging").finish();
    let mut templates = Vec::new();
    let mut template = |id: DeclId, attribute: TemplateAttributeKind| templates.push((id, attribute));
    template(builder.method(aspect, "OverrideMethod").returns(TypeRef::Dynamic).finish(), TemplateAttributeKind::Template);
    template(builder.method(aspect, "OverrideAsync").returns(TypeRef::Dynamic).finish(), TemplateAttributeKind::Template);
    template(
        builder.method(aspect, "OverrideEnumerable").returns(TypeRef::Dynamic).finish(),
        TemplateAttributeKind::Template,
    );
    template(builder.method(aspect, "Hook").abstract_().finish(), TemplateAttributeKind::Template);
    template(builder.method(aspect, "Helper").finish(), TemplateAttributeKind::None);
    template(builder.method(aspect, "Run").finish(), TemplateAttributeKind::Introduction);
    template(
        builder.method(aspect, "Greet").param("who", string.clone()).finish(),
        TemplateAttributeKind::Introduction,
    );
    template(
        builder.property(aspect, "Counter", int.clone()).getter().setter().finish(),
        TemplateAttributeKind::Introduction,
    );
    template(builder.event(aspect, "Changed", TypeRef::Dynamic), TemplateAttributeKind::Introduction);
    template(
        builder.method(aspect, "NotNull").param("value", TypeRef::Dynamic).finish(),
        TemplateAttributeKind::Template,
    );
    template(
        builder.method(aspect, "NotEmpty").param("value", string).finish(),
        TemplateAttributeKind::Template,
    );
    template(builder.method(aspect, "Getter").returns(TypeRef::Dynamic).finish(), TemplateAttributeKind::Template);
    template(
        builder.method(aspect, "Setter").param("value", TypeRef::Dynamic).finish(),
        TemplateAttributeKind::Template,
    );

    let snapshot = builder.build();
    let mut registry = TemplateRegistry::new();
    for (id, attribute) in templates {
        registry
            .register_member(&snapshot, id, attribute)
            .expect("register template");
    }
    Fixture {
        services: WeavingServices::new(snapshot, Arc::new(registry), AdviceOptions::default()),
        service,
        worker,
        disposable,
        runnable,
        run,
        fetch,
        items,
        add,
        name,
        id,
        repository,
    }
}

impl Fixture {
    fn at(&self, id: DeclId) -> DeclRef {
        self.services.snapshot.reference(id)
    }
}

fn advice_codes(error: &Error) -> Vec<&str> {
    error.diagnostics().iter().map(|diagnostic| diagnostic.code_str()).collect()
}

#[test]
fn implement_interface_merges_requests_for_one_target() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let target = fx.at(fx.service);
    factory
        .implement_interface(target, &TypeRef::named(fx.disposable), None, Tags::new())
        .expect("first interface");
    factory
        .implement_interface(target, &TypeRef::named(fx.runnable), None, Tags::new())
        .expect("second interface");
    factory
        .implement_interface(target, &TypeRef::named(fx.disposable), None, Tags::new())
        .expect("repeated interface");

    let list = factory.finish().expect("finish");
    assert_eq!(list.len(), 1);
    let Some(AdvicePayload::ImplementInterface { interfaces }) = list.iter().next().map(|advice| &advice.payload)
    else {
        panic!("expected an implement-interface advice");
    };
    let definitions: Vec<DeclId> = interfaces.iter().map(|spec| spec.interface.definition).collect();
    assert_eq!(definitions, vec![fx.disposable, fx.runnable]);
}

#[test]
fn implement_interface_rejects_open_generic_and_non_interfaces() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let target = fx.at(fx.service);

    let open = factory
        .implement_interface(target, &TypeRef::named(fx.repository), None, Tags::new())
        .expect_err("open generic");
    assert_eq!(advice_codes(&open), vec!["ADV402"]);

    let class = factory
        .implement_interface(target, &TypeRef::named(fx.worker), None, Tags::new())
        .expect_err("not an interface");
    assert_eq!(advice_codes(&class), vec!["ADV401"]);

    let closed = TypeRef::generic(fx.repository, vec![fx.services.snapshot.core().int_type()]);
    factory
        .implement_interface(target, &closed, None, Tags::new())
        .expect("constructed interface");
}

#[test]
fn already_implemented_interface_is_skipped_with_warning() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 3);
    factory
        .implement_interface(fx.at(fx.worker), &TypeRef::named(fx.disposable), None, Tags::new())
        .expect("skip is not a failure");
    assert!(factory.advices().is_empty());

    let reported = fx.services.sink.drain();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].severity, Severity::Warning);
    assert_eq!(reported[0].code_str(), "ADV211");
}

#[test]
fn fail_strategy_names_the_conflicting_member() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let error = factory
        .introduce_method(fx.at(fx.service), "Run", Some(OverrideStrategy::Fail), Tags::new())
        .expect_err("Run already exists");
    assert_eq!(advice_codes(&error), vec!["ADV201"]);
    assert!(
        error.diagnostics()[0].message.contains("`Service.Run()`"),
        "{}",
        error.diagnostics()[0].message
    );
    assert!(factory.advices().is_empty());
    assert!(fx.services.sink.is_empty());
}

#[test]
fn default_strategy_overrides_same_type_member() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    factory
        .introduce_method(fx.at(fx.service), "Run", None, Tags::new())
        .expect("introduce");
    let list = factory.finish().expect("finish");
    let Some(AdvicePayload::Introduce { outcome, against, .. }) = list.iter().next().map(|advice| &advice.payload)
    else {
        panic!("expected an introduction");
    };
    assert_eq!(*outcome, crate::conflicts::ConflictOutcome::Override);
    assert_eq!(against.map(DeclRef::id), Some(fx.run));
}

#[test]
fn ignore_strategy_keeps_existing_member() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    factory
        .introduce_method(fx.at(fx.service), "Run", Some(OverrideStrategy::Ignore), Tags::new())
        .expect("ignored introduction still succeeds");
    let list = factory.finish().expect("finish");
    let Some(AdvicePayload::Introduce { outcome, .. }) = list.iter().next().map(|advice| &advice.payload) else {
        panic!("expected an introduction");
    };
    assert!(!outcome.emits());
}

#[test]
fn override_of_abstract_method_is_usage_error_before_diagnostics() {
    let fx = fixture();
    let work = fx
        .services
        .snapshot
        .members_named(fx.worker, "Work")
        .next()
        .map(|decl| decl.id)
        .expect("Work declared");
    let mut factory = fx.services.factory("Logging", 0);
    let error = factory
        .override_method(fx.at(work), &MethodTemplateSelector::new("DoesNotExist"), Tags::new())
        .expect_err("abstract target");
    assert!(matches!(error, Error::Usage { .. }), "{error}");
    assert!(fx.services.sink.is_empty());
}

#[test]
fn template_resolution_failures_are_diagnostics() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let run = fx.at(fx.run);

    let missing = factory
        .override_method(run, &MethodTemplateSelector::new("DoesNotExist"), Tags::new())
        .expect_err("missing template");
    assert_eq!(advice_codes(&missing), vec!["ADV101"]);
    assert!(missing.diagnostics()[0].message.contains("aspect `Logging`"));

    let wrong_attribute = factory
        .override_method(run, &MethodTemplateSelector::new("Greet"), Tags::new())
        .expect_err("introduction template");
    assert_eq!(advice_codes(&wrong_attribute), vec!["ADV102"]);

    let unmarked = factory
        .override_method(run, &MethodTemplateSelector::new("Helper"), Tags::new())
        .expect_err("unmarked member");
    assert_eq!(advice_codes(&unmarked), vec!["ADV103"]);

    let abstract_ = factory
        .override_method(run, &MethodTemplateSelector::new("Hook"), Tags::new())
        .expect_err("abstract template");
    assert!(abstract_.is_internal(), "{abstract_}");
    assert!(factory.advices().is_empty());
}

#[test]
fn override_method_follows_target_shape() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let selector = MethodTemplateSelector::new("OverrideMethod")
        .with_async("OverrideAsync")
        .with_enumerable("OverrideEnumerable");
    for target in [fx.run, fx.fetch, fx.items] {
        factory
            .override_method(fx.at(target), &selector, Tags::new())
            .expect("override");
    }
    let list = factory.finish().expect("finish");
    let chosen: Vec<String> = list
        .iter()
        .map(|advice| advice.templates()[0].name.clone())
        .collect();
    assert_eq!(chosen, vec!["OverrideMethod", "OverrideAsync", "OverrideEnumerable"]);
}

#[test]
fn override_requires_virtual_unsealed_target() {
    let mut builder = SnapshotBuilder::new();
    let base = builder.class("Base").finish();
    let locked = builder.method(base, "Locked").override_().sealed().finish();
    let plain = builder.method(base, "Plain").finish();
    let open = builder.method(base, "Open").virtual_().finish();
    let aspect = builder.class("Logging").finish();
    let template = builder.method(aspect, "OverrideMethod").returns(TypeRef::Dynamic).finish();
    let snapshot = builder.build();
    let mut registry = TemplateRegistry::new();
    registry
        .register_member(&snapshot, template, TemplateAttributeKind::Template)
        .expect("register template");
    let services = WeavingServices::new(snapshot, Arc::new(registry), AdviceOptions::default());
    let selector = MethodTemplateSelector::new("OverrideMethod");
    let mut factory = services.factory("Logging", 0);

    let sealed = factory
        .override_method(services.snapshot.reference(locked), &selector, Tags::new())
        .expect_err("sealed target");
    assert_eq!(advice_codes(&sealed), vec!["ADV205"]);
    assert!(sealed.diagnostics()[0].message.contains("`Base.Locked`"));

    let non_virtual = factory
        .override_method(services.snapshot.reference(plain), &selector, Tags::new())
        .expect_err("non-virtual target");
    assert_eq!(advice_codes(&non_virtual), vec!["ADV204"]);

    factory
        .override_method(services.snapshot.reference(open), &selector, Tags::new())
        .expect("virtual target");
    assert_eq!(factory.advices().len(), 1);
}

#[test]
fn accessor_override_requires_virtual_property() {
    let mut builder = SnapshotBuilder::new();
    let int = builder.core().int_type();
    let base = builder.class("Base").finish();
    let count = builder.property(base, "Count", int.clone()).getter().finish();
    let total = builder.field(base, "total", int);
    let aspect = builder.class("Logging").finish();
    let template = builder.method(aspect, "Getter").returns(TypeRef::Dynamic).finish();
    let snapshot = builder.build();
    let mut registry = TemplateRegistry::new();
    registry
        .register_member(&snapshot, template, TemplateAttributeKind::Template)
        .expect("register template");
    let services = WeavingServices::new(snapshot, Arc::new(registry), AdviceOptions::default());
    let getter = GetterTemplateSelector::new("Getter");
    let mut factory = services.factory("Logging", 0);

    let error = factory
        .override_field_or_property(services.snapshot.reference(count), Some(&getter), None, Tags::new())
        .expect_err("non-virtual property");
    assert_eq!(advice_codes(&error), vec!["ADV204"]);
    let applied = factory
        .override_field_or_property(services.snapshot.reference(total), Some(&getter), None, Tags::new())
        .expect("fields carry no dispatch modifiers");
    assert!(applied);
}

#[test]
fn references_from_another_snapshot_are_internal_errors() {
    let fx = fixture();
    let other = SnapshotBuilder::new().build();
    let mut factory = fx.services.factory("Logging", 0);
    let error = factory
        .override_method(other.reference(fx.run), &MethodTemplateSelector::new("OverrideMethod"), Tags::new())
        .expect_err("foreign reference");
    assert!(error.is_internal());
}

#[test]
fn builders_freeze_when_factory_finishes() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let field = factory
        .introduce_field(
            fx.at(fx.service),
            "calls",
            fx.services.snapshot.core().int_type(),
            None,
            Tags::new(),
        )
        .expect("introduce field");
    field.set_visibility(Visibility::Protected).expect("still open");
    factory.finish().expect("finish");

    assert!(field.is_frozen());
    assert_eq!(field.visibility(), Visibility::Protected);
    let error = field.set_name("renamed").expect_err("frozen");
    assert!(matches!(error, Error::Usage { .. }));
}

#[test]
fn renamed_introduction_is_resolved_again_on_finish() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let greet = factory
        .introduce_method(fx.at(fx.service), "Greet", Some(OverrideStrategy::Fail), Tags::new())
        .expect("no conflict yet");
    greet.set_parameters(Vec::new()).expect("drop parameter");
    greet.set_name("Run").expect("rename");
    let error = factory.finish().expect_err("now clashes with Service.Run");
    assert_eq!(advice_codes(&error), vec!["ADV201"]);
}

#[test]
fn introductions_from_one_instance_conflict_with_each_other() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let target = fx.at(fx.service);
    let int = fx.services.snapshot.core().int_type();
    factory
        .introduce_field(target, "count", int.clone(), None, Tags::new())
        .expect("first");
    let error = factory
        .introduce_field(target, "count", int, Some(OverrideStrategy::Fail), Tags::new())
        .expect_err("second");
    assert_eq!(advice_codes(&error), vec!["ADV201"]);
}

#[test]
fn value_members_cannot_be_introduced_into_interfaces() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let error = factory
        .introduce_property(fx.at(fx.disposable), "Counter", None, Tags::new())
        .expect_err("interface target");
    assert!(matches!(error, Error::Usage { .. }));

    let event = factory
        .introduce_event(fx.at(fx.service), "Changed", None, Tags::new())
        .expect("event");
    assert_eq!(event.snapshot().kind, MemberKind::Event);
}

#[test]
fn accessor_override_skips_missing_accessors() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let getter = GetterTemplateSelector::new("Getter");

    let applied = factory
        .override_field_or_property(fx.at(fx.id), Some(&getter), Some("Setter"), Tags::new())
        .expect("get-only property");
    assert!(applied);
    let applied = factory
        .override_field_or_property(fx.at(fx.id), None, Some("Setter"), Tags::new())
        .expect("setter only");
    assert!(!applied);

    let list = factory.finish().expect("finish");
    assert_eq!(list.len(), 1);
    let Some(AdvicePayload::OverrideFieldOrProperty { getter, setter }) =
        list.iter().next().map(|advice| &advice.payload)
    else {
        panic!("expected an accessor override");
    };
    assert!(getter.is_some());
    assert!(setter.is_none());
}

#[test]
fn contract_on_read_write_property_in_both_directions_yields_two_blocks() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    factory
        .add_contract(
            ContractTarget::FieldOrProperty(fx.at(fx.name)),
            "NotNull",
            ContractDirection::Both,
            Tags::new(),
        )
        .expect("contract");
    let list = factory.finish().expect("finish");

    let expander = TemplateInvocationExpander;
    let plan = ContractWeaver::new(&fx.services.snapshot, &expander)
        .weave(&list)
        .expect("weave");
    let points: Vec<&InsertionPoint> = plan.placements.iter().map(|placement| &placement.point).collect();
    assert_eq!(
        points,
        vec![&InsertionPoint::SetterEntry, &InsertionPoint::BeforeGetterReturn { exit: 0 }]
    );
    assert!(plan.diagnostics.is_empty());
}

/// `Positive : Validator<int>` inherits its templates from a generic base aspect.
fn inherited_template_services() -> (WeavingServices, DeclId, DeclId, DeclId, DeclId) {
    let mut builder = SnapshotBuilder::new();
    let int = builder.core().int_type();
    let string = builder.core().string_type();
    let account = builder.class("Account").finish();
    let deposit = builder.method(account, "Deposit").param("amount", int.clone()).virtual_().finish();
    let rename = builder.method(account, "Rename").param("name", string).virtual_().finish();
    let ledger = builder.class("Ledger").generic(&["T"]).finish();
    let entry = TypeRef::param(ledger, 0, "T");
    let post = builder.method(ledger, "Post").param("entry", entry).virtual_().finish();

    let validator = builder.class("Validator").generic(&["T"]).finish();
    let value = TypeRef::param(validator, 0, "T");
    let check = builder.method(validator, "Check").param("value", value.clone()).finish();
    let around = builder
        .method(validator, "Around")
        .param("value", value.clone())
        .returns(TypeRef::Dynamic)
        .finish();
    let echo = builder.method(validator, "Echo").param("value", value.clone()).returns(value).finish();
    builder.class("Positive").base(TypeRef::generic(validator, vec![int])).finish();
    let snapshot = builder.build();

    let mut registry = TemplateRegistry::new();
    for (id, attribute) in [
        (check, TemplateAttributeKind::Template),
        (around, TemplateAttributeKind::Template),
        (echo, TemplateAttributeKind::Introduction),
    ] {
        registry.register_member(&snapshot, id, attribute).expect("register template");
    }
    (
        WeavingServices::new(snapshot, Arc::new(registry), AdviceOptions::default()),
        account,
        deposit,
        rename,
        post,
    )
}

#[test]
fn inherited_template_sees_aspect_base_arguments() {
    let (services, account, deposit, rename, post) = inherited_template_services();
    let snapshot = &services.snapshot;
    let parameter = |method: DeclId| ContractTarget::Parameter {
        method: snapshot.reference(method),
        ordinal: 0,
    };
    let mut factory = services.factory("Positive", 0);

    factory
        .add_contract(parameter(deposit), "Check", ContractDirection::Default, Tags::new())
        .expect("T is int through Validator<int>");
    let error = factory
        .add_contract(parameter(rename), "Check", ContractDirection::Default, Tags::new())
        .expect_err("int template on string parameter");
    assert_eq!(advice_codes(&error), vec!["ADV301"]);
    assert!(error.diagnostics()[0].message.contains("validates `int`"), "{}", error.diagnostics()[0].message);

    // Ledger<T>.Post is seen through its own definition, so its T stays unbound.
    let unbound = factory
        .add_contract(parameter(post), "Check", ContractDirection::Default, Tags::new())
        .expect_err("int template on unbound T");
    assert_eq!(advice_codes(&unbound), vec!["ADV301"]);

    let around = MethodTemplateSelector::new("Around");
    factory
        .override_method(snapshot.reference(deposit), &around, Tags::new())
        .expect("int parameter matches");
    let mismatch = factory
        .override_method(snapshot.reference(rename), &around, Tags::new())
        .expect_err("string parameter");
    assert_eq!(advice_codes(&mismatch), vec!["ADV104"]);

    let echo = factory
        .introduce_method(snapshot.reference(account), "Echo", None, Tags::new())
        .expect("introduce");
    let int = snapshot.core().int_type();
    assert_eq!(echo.return_type(), int);
    assert_eq!(echo.parameters()[0].ty, int);
}

#[test]
fn contract_template_must_accept_target_type() {
    let fx = fixture();
    let mut factory = fx.services.factory("Logging", 0);
    let target = ContractTarget::Parameter {
        method: fx.at(fx.add),
        ordinal: 0,
    };
    let error = factory
        .add_contract(target, "NotEmpty", ContractDirection::Default, Tags::new())
        .expect_err("string template on int parameter");
    assert_eq!(advice_codes(&error), vec!["ADV301"]);

    let output = factory
        .add_contract(target, "NotNull", ContractDirection::Output, Tags::new())
        .expect_err("in-parameter has no outgoing value");
    assert!(matches!(output, Error::Usage { .. }));

    factory
        .add_contract(target, "NotNull", ContractDirection::Default, Tags::new())
        .expect("dynamic template accepts anything");
}
