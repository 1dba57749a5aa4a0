use super::{ConflictOutcome, MemberSignature, OverrideStrategy};
use crate::diagnostics::{Diagnostic, codes};
use crate::generic_context::GenericContext;
use crate::model::{
    DeclId, DeclOrigin, DeclRef, DeclarationSnapshot, InterfaceImplementation, MemberDispatch,
    MemberKind,
};

/// A member that already occupies the slot an advice wants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistingMember {
    pub reference: DeclRef,
    pub declaring_type: DeclId,
    pub is_same_type: bool,
    pub dispatch: MemberDispatch,
    pub signature: MemberSignature,
    /// Qualified display name, e.g. `Base.Run(int)`.
    pub display: String,
}

impl ExistingMember {
    fn describe(&self) -> String {
        format!("{} `{}`", self.signature.kind, self.display)
    }
}

/// Outcome of resolving one introduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictResolution {
    pub outcome: ConflictOutcome,
    /// The member the outcome was decided against, if any.
    pub against: Option<ExistingMember>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ConflictResolution {
    fn free() -> Self {
        Self {
            outcome: ConflictOutcome::Default,
            against: None,
            diagnostics: Vec::new(),
        }
    }

    fn decided(outcome: ConflictOutcome, against: &ExistingMember) -> Self {
        Self {
            outcome,
            against: Some(against.clone()),
            diagnostics: Vec::new(),
        }
    }

    fn failed(against: &ExistingMember, diagnostic: Diagnostic) -> Self {
        Self {
            outcome: ConflictOutcome::Error,
            against: Some(against.clone()),
            diagnostics: vec![diagnostic],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceAction {
    Implement,
    /// Implement again although a base class already does.
    Reimplement,
    Skip,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceResolution {
    pub action: InterfaceAction,
    pub diagnostics: Vec<Diagnostic>,
}

/// Applies [`OverrideStrategy`] policies against one snapshot.
pub struct ConflictResolver<'s> {
    snapshot: &'s DeclarationSnapshot,
}

impl<'s> ConflictResolver<'s> {
    #[must_use]
    pub fn new(snapshot: &'s DeclarationSnapshot) -> Self {
        Self { snapshot }
    }

    /// Members of `target_type` and its base classes clashing with `signature`.
    ///
    /// Same-type members come first, then inherited ones nearest first.
    /// Private inherited members are invisible and never clash.
    #[must_use]
    pub fn find_conflicts(&self, target_type: DeclId, signature: &MemberSignature) -> Vec<ExistingMember> {
        let mut found = Vec::new();
        for decl in self.snapshot.members_named(target_type, &signature.name) {
            let existing = MemberSignature::of(decl, &GenericContext::Null);
            if signature.clashes_with(&existing) {
                found.push(self.existing(decl.id, target_type, true, decl.dispatch, existing));
            }
        }
        for base in self.snapshot.base_chain(target_type) {
            let context = GenericContext::for_instance(base.clone(), None);
            for decl in self.snapshot.members_named(base.definition, &signature.name) {
                if !decl.visibility.visible_to_derived() {
                    continue;
                }
                let existing = MemberSignature::of(decl, &context);
                if signature.clashes_with(&existing) {
                    found.push(self.existing(decl.id, base.definition, false, decl.dispatch, existing));
                }
            }
        }
        found
    }

    fn existing(
        &self,
        id: DeclId,
        declaring_type: DeclId,
        is_same_type: bool,
        dispatch: MemberDispatch,
        signature: MemberSignature,
    ) -> ExistingMember {
        let display = format!(
            "{}.{}",
            self.snapshot.display_name(declaring_type),
            signature.display(self.snapshot)
        );
        ExistingMember {
            reference: self.snapshot.reference(id),
            declaring_type,
            is_same_type,
            dispatch,
            signature,
            display,
        }
    }

    /// Decide how an introduction of `signature` into `target_type` proceeds.
    ///
    /// `pending` holds members introduced earlier by the same aspect instance;
    /// they behave as same-type members.
    #[must_use]
    pub fn resolve_introduction(
        &self,
        target_type: DeclId,
        signature: &MemberSignature,
        strategy: OverrideStrategy,
        pending: &[ExistingMember],
    ) -> ConflictResolution {
        let mut conflicts: Vec<ExistingMember> = pending
            .iter()
            .filter(|member| signature.clashes_with(&member.signature))
            .cloned()
            .collect();
        conflicts.extend(self.find_conflicts(target_type, signature));

        let same_type = conflicts.iter().find(|member| member.is_same_type);
        let inherited = conflicts.iter().find(|member| !member.is_same_type);
        let Some(first) = same_type.or(inherited) else {
            return ConflictResolution::free();
        };
        let target = self.snapshot.display_name(target_type);

        match strategy {
            OverrideStrategy::Fail => ConflictResolution::failed(
                first,
                self.at(
                    first,
                    codes::error(
                        codes::MEMBER_CONFLICT,
                        format!(
                            "cannot introduce {} `{}` into `{target}`: {} already exists",
                            signature.kind,
                            signature.display(self.snapshot),
                            first.describe()
                        ),
                    ),
                ),
            ),
            OverrideStrategy::Ignore => ConflictResolution::decided(ConflictOutcome::Ignore, first),
            OverrideStrategy::New => match (same_type, inherited) {
                (Some(member), _) => ConflictResolution::failed(
                    member,
                    self.at(
                        member,
                        codes::error(
                            codes::NEW_ON_SAME_TYPE,
                            format!(
                                "cannot introduce `{}` as a new member: {} is declared in `{target}` itself",
                                signature.display(self.snapshot),
                                member.describe()
                            ),
                        ),
                    ),
                ),
                (None, Some(member)) => self.hide(signature, member),
                (None, None) => ConflictResolution::free(),
            },
            OverrideStrategy::Override => match (same_type, inherited) {
                (Some(member), _) => self.replace(signature, member),
                (None, Some(member)) => self.override_inherited(signature, member),
                (None, None) => ConflictResolution::free(),
            },
            // Same-type wins when both kinds of conflict exist: that member
            // already hides the inherited one.
            OverrideStrategy::Default => match (same_type, inherited) {
                (Some(member), _) => self.replace(signature, member),
                (None, Some(member)) => self.hide(signature, member),
                (None, None) => ConflictResolution::free(),
            },
        }
    }

    fn hide(&self, signature: &MemberSignature, member: &ExistingMember) -> ConflictResolution {
        if let Some(diagnostic) = self.kind_mismatch(signature, member) {
            return ConflictResolution::failed(member, diagnostic);
        }
        ConflictResolution::decided(ConflictOutcome::New, member)
    }

    fn replace(&self, signature: &MemberSignature, member: &ExistingMember) -> ConflictResolution {
        if let Some(diagnostic) = self.kind_mismatch(signature, member) {
            return ConflictResolution::failed(member, diagnostic);
        }
        ConflictResolution::decided(ConflictOutcome::Override, member)
    }

    fn override_inherited(
        &self,
        signature: &MemberSignature,
        member: &ExistingMember,
    ) -> ConflictResolution {
        let diagnostics = self.inherited_override_checks(signature, member);
        if diagnostics.is_empty() {
            ConflictResolution::decided(ConflictOutcome::Override, member)
        } else {
            ConflictResolution {
                outcome: ConflictOutcome::Error,
                against: Some(member.clone()),
                diagnostics,
            }
        }
    }

    /// Virtual, sealed, kind, static and type checks for overriding `member`.
    fn inherited_override_checks(
        &self,
        signature: &MemberSignature,
        member: &ExistingMember,
    ) -> Vec<Diagnostic> {
        if let Some(diagnostic) = self.kind_mismatch(signature, member) {
            return vec![diagnostic];
        }
        let mut diagnostics = Vec::new();
        if member.dispatch.is_sealed {
            diagnostics.push(self.at(
                member,
                codes::error(
                    codes::MEMBER_SEALED,
                    format!("cannot override sealed {}", member.describe()),
                ),
            ));
        } else if !member.dispatch.is_virtual_candidate() {
            diagnostics.push(self.at(
                member,
                codes::error(
                    codes::MEMBER_NOT_VIRTUAL,
                    format!(
                        "cannot override {}: it is not virtual, abstract or override",
                        member.describe()
                    ),
                ),
            ));
        }
        if signature.is_static != member.signature.is_static {
            diagnostics.push(self.at(
                member,
                codes::error(
                    codes::STATIC_MISMATCH,
                    format!(
                        "static modifier of `{}` does not match {}",
                        signature.display(self.snapshot),
                        member.describe()
                    ),
                ),
            ));
        }
        if let (Some(ours), Some(theirs)) = (&signature.value_type, &member.signature.value_type)
            && ours != theirs
            && !ours.is_dynamic()
        {
            diagnostics.push(self.at(
                member,
                codes::error(
                    codes::MEMBER_TYPE_MISMATCH,
                    format!(
                        "type `{}` of the overriding member does not match type `{}` of {}",
                        ours.display(self.snapshot),
                        theirs.display(self.snapshot),
                        member.describe()
                    ),
                ),
            ));
        }
        diagnostics
    }

    fn kind_mismatch(&self, signature: &MemberSignature, member: &ExistingMember) -> Option<Diagnostic> {
        (!signature.kind_compatible(&member.signature)).then(|| {
            self.at(
                member,
                codes::error(
                    codes::INCOMPATIBLE_MEMBER_KIND,
                    format!(
                        "cannot introduce {} `{}`: {} has an incompatible kind",
                        signature.kind,
                        signature.display(self.snapshot),
                        member.describe()
                    ),
                ),
            )
        })
    }

    fn at(&self, member: &ExistingMember, diagnostic: Diagnostic) -> Diagnostic {
        diagnostic.with_target(member.reference, member.display.clone())
    }

    /// Validate the member an `override_*` or `add_contract` advice targets:
    /// it must exist, match one of `expected` and live in a source type.
    #[must_use]
    pub fn check_override_target(&self, target: DeclRef, expected: &[MemberKind]) -> Vec<Diagnostic> {
        let Some(decl) = self.snapshot.resolve(target) else {
            return vec![
                codes::error(
                    codes::OVERRIDE_TARGET_NOT_FOUND,
                    format!("override target {} does not exist in {}", target.id(), self.snapshot.id()),
                ),
            ];
        };
        let display = self.snapshot.display_name(decl.id);
        let mut diagnostics = Vec::new();
        if !expected.contains(&decl.member_kind()) {
            diagnostics.push(
                codes::error(
                    codes::TEMPLATE_KIND_MISMATCH,
                    format!("`{display}` is a {}, which this advice cannot override", decl.member_kind()),
                )
                .with_target(target, display.clone()),
            );
        }
        let external = decl
            .declaring_type
            .and_then(|owner| self.snapshot.get(owner))
            .is_some_and(|owner| owner.origin == DeclOrigin::External)
            || decl.origin == DeclOrigin::External;
        if external {
            diagnostics.push(
                codes::error(
                    codes::OVERRIDE_TARGET_EXTERNAL,
                    format!("`{display}` is declared in an external type and cannot be overridden"),
                )
                .with_target(target, display),
            );
        }
        diagnostics
    }

    /// Dispatch checks for the member an `override_*` advice replaces.
    ///
    /// Methods, properties and indexers must be virtual, abstract or override
    /// and not sealed. Fields carry no dispatch modifiers and pass.
    #[must_use]
    pub fn check_overridable(&self, target: DeclRef) -> Vec<Diagnostic> {
        let Some(decl) = self.snapshot.resolve(target) else {
            return Vec::new();
        };
        if decl.member_kind() == MemberKind::Field {
            return Vec::new();
        }
        let display = self.snapshot.display_name(decl.id);
        let kind = decl.member_kind();
        let diagnostic = if decl.dispatch.is_sealed {
            codes::error(codes::MEMBER_SEALED, format!("cannot override sealed {kind} `{display}`"))
        } else if !decl.dispatch.is_virtual_candidate() {
            codes::error(
                codes::MEMBER_NOT_VIRTUAL,
                format!("cannot override {kind} `{display}`: it is not virtual, abstract or override"),
            )
        } else {
            return Vec::new();
        };
        vec![diagnostic.with_target(target, display)]
    }

    /// Decide whether `interface` must be implemented on `target_type`.
    #[must_use]
    pub fn resolve_interface(
        &self,
        target_type: DeclId,
        interface: DeclId,
        strategy: OverrideStrategy,
    ) -> InterfaceResolution {
        let implementation = self.snapshot.implements_interface(target_type, interface);
        let target = self.snapshot.display_name(target_type);
        let iface = self.snapshot.display_name(interface);
        let reference = self.snapshot.reference(target_type);
        let already = |by: &str| {
            codes::error(
                codes::INTERFACE_ALREADY_IMPLEMENTED,
                format!("`{target}` already implements `{iface}`{by}"),
            )
            .with_target(reference, target.clone())
        };
        let (action, diagnostics) = match (implementation, strategy) {
            (InterfaceImplementation::NotImplemented, _) => (InterfaceAction::Implement, Vec::new()),
            (_, OverrideStrategy::Ignore) => (InterfaceAction::Skip, Vec::new()),
            (InterfaceImplementation::Declared, OverrideStrategy::Fail | OverrideStrategy::New) => {
                (InterfaceAction::Skip, vec![already("")])
            }
            (InterfaceImplementation::Declared, OverrideStrategy::Default | OverrideStrategy::Override) => (
                InterfaceAction::Skip,
                vec![
                    codes::warning(
                        codes::INTERFACE_SKIPPED,
                        format!("`{target}` already implements `{iface}`; the interface is not introduced again"),
                    )
                    .with_target(reference, target.clone()),
                ],
            ),
            (InterfaceImplementation::Inherited { by }, OverrideStrategy::Fail) => (
                InterfaceAction::Skip,
                vec![already(&format!(" through base `{}`", self.snapshot.display_name(by)))],
            ),
            (
                InterfaceImplementation::Inherited { .. },
                OverrideStrategy::Default | OverrideStrategy::Override | OverrideStrategy::New,
            ) => (InterfaceAction::Reimplement, Vec::new()),
        };
        InterfaceResolution { action, diagnostics }
    }
}
