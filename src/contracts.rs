//! Placement of pre/post-condition statements produced by add-contract advice.
//!
//! Input statements run at entry with the template's value parameter bound to
//! the incoming value; output statements run before every exit with the value
//! parameter bound to the outgoing value.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::advice::{Advice, AdvicePayload, Tags, TagValue};
use crate::diagnostics::{Diagnostic, codes};
use crate::error::{Error, Result};
use crate::model::{
    Accessor, Body, DeclKind, DeclRef, Declaration, DeclarationSnapshot, ParameterMode,
};
use crate::templates::TemplateMember;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractDirection {
    /// Input for in-parameters, fields and properties; output for return values
    /// and out-parameters.
    #[default]
    Default,
    Input,
    Output,
    Both,
}

impl ContractDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContractDirection::Default => "default",
            ContractDirection::Input => "input",
            ContractDirection::Output => "output",
            ContractDirection::Both => "both",
        }
    }

    #[must_use]
    pub fn includes_input(self) -> bool {
        matches!(self, ContractDirection::Input | ContractDirection::Both)
    }

    #[must_use]
    pub fn includes_output(self) -> bool {
        matches!(self, ContractDirection::Output | ContractDirection::Both)
    }
}

impl fmt::Display for ContractDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value a contract validates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContractTarget {
    Parameter { method: DeclRef, ordinal: usize },
    ReturnParameter { method: DeclRef },
    FieldOrProperty(DeclRef),
}

impl ContractTarget {
    /// Declaration that receives the statements.
    #[must_use]
    pub fn declaration(self) -> DeclRef {
        match self {
            ContractTarget::Parameter { method, .. } | ContractTarget::ReturnParameter { method } => {
                method
            }
            ContractTarget::FieldOrProperty(member) => member,
        }
    }

    #[must_use]
    pub fn describe(self, snapshot: &DeclarationSnapshot) -> String {
        let owner = snapshot.display_name(self.declaration().id());
        match self {
            ContractTarget::Parameter { ordinal, .. } => {
                let name = snapshot
                    .resolve(self.declaration())
                    .and_then(Declaration::as_method)
                    .and_then(|method| method.params.get(ordinal))
                    .map_or_else(|| format!("#{ordinal}"), |param| param.name.clone());
                format!("parameter `{name}` of `{owner}`")
            }
            ContractTarget::ReturnParameter { .. } => format!("return value of `{owner}`"),
            ContractTarget::FieldOrProperty(_) => format!("`{owner}`"),
        }
    }
}

/// Capabilities of a contract target, derived from the declaration model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Capabilities {
    can_input: bool,
    can_output: bool,
    default: ContractDirection,
}

fn capabilities(snapshot: &DeclarationSnapshot, target: ContractTarget) -> Result<Capabilities> {
    let decl = snapshot.resolve(target.declaration()).ok_or_else(|| {
        Error::usage(format!(
            "contract target {} does not exist",
            target.declaration()
        ))
    })?;
    match (target, &decl.kind) {
        (ContractTarget::Parameter { ordinal, .. }, DeclKind::Method(method)) => {
            let param = method.params.get(ordinal).ok_or_else(|| {
                Error::usage(format!(
                    "method `{}` has no parameter at position {ordinal}",
                    snapshot.display_name(decl.id)
                ))
            })?;
            Ok(match param.mode {
                ParameterMode::In => Capabilities {
                    can_input: true,
                    can_output: false,
                    default: ContractDirection::Input,
                },
                ParameterMode::Out => Capabilities {
                    can_input: false,
                    can_output: true,
                    default: ContractDirection::Output,
                },
                ParameterMode::Ref => Capabilities {
                    can_input: true,
                    can_output: true,
                    default: ContractDirection::Input,
                },
            })
        }
        (ContractTarget::ReturnParameter { .. }, DeclKind::Method(method)) => {
            if method.return_type == snapshot.core().void_type() {
                return Err(Error::usage(format!(
                    "method `{}` returns void and has no return value to validate",
                    snapshot.display_name(decl.id)
                )));
            }
            Ok(Capabilities {
                can_input: false,
                can_output: true,
                default: ContractDirection::Output,
            })
        }
        (ContractTarget::FieldOrProperty(_), DeclKind::Field(field)) => Ok(Capabilities {
            can_input: !field.is_readonly,
            can_output: true,
            default: ContractDirection::Input,
        }),
        (ContractTarget::FieldOrProperty(_), DeclKind::Property(property)) => Ok(Capabilities {
            can_input: property.setter.is_some(),
            can_output: property.getter.is_some(),
            default: ContractDirection::Input,
        }),
        (ContractTarget::FieldOrProperty(_), DeclKind::Indexer(indexer)) => Ok(Capabilities {
            can_input: indexer.setter.is_some(),
            can_output: indexer.getter.is_some(),
            default: ContractDirection::Input,
        }),
        (_, kind) => Err(Error::usage(format!(
            "`{}` is a {} and cannot carry this contract",
            snapshot.display_name(decl.id),
            kind.tag()
        ))),
    }
}

/// Resolve `Default` and check the target can carry `direction`.
pub fn resolve_direction(
    snapshot: &DeclarationSnapshot,
    target: ContractTarget,
    direction: ContractDirection,
) -> Result<ContractDirection> {
    let capabilities = capabilities(snapshot, target)?;
    let resolved = match direction {
        ContractDirection::Default => capabilities.default,
        explicit => explicit,
    };
    if resolved.includes_input() && !capabilities.can_input {
        return Err(Error::usage(format!(
            "{} cannot carry an input contract: it has no setter or incoming value",
            target.describe(snapshot)
        )));
    }
    if resolved.includes_output() && !capabilities.can_output {
        return Err(Error::usage(format!(
            "{} cannot carry an output contract: it has no getter or outgoing value",
            target.describe(snapshot)
        )));
    }
    Ok(resolved)
}

/// Where a contract statement block is inserted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "at", rename_all = "kebab-case")]
pub enum InsertionPoint {
    MethodEntry,
    BeforeReturn { exit: u32 },
    SetterEntry,
    BeforeGetterReturn { exit: u32 },
}

/// What the template's value parameter is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "value", rename_all = "kebab-case")]
pub enum ValueBinding {
    Parameter { name: String },
    ReturnValue,
    SetterValue,
    GetterValue,
}

impl fmt::Display for ValueBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueBinding::Parameter { name } => f.write_str(name),
            ValueBinding::ReturnValue => f.write_str("returnValue"),
            ValueBinding::SetterValue => f.write_str("value"),
            ValueBinding::GetterValue => f.write_str("value"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractFlow {
    Input,
    Output,
}

/// Everything an expander needs to produce one direction's statements.
#[derive(Clone, Copy, Debug)]
pub struct ExpansionRequest<'a> {
    pub aspect: &'a str,
    pub template: &'a TemplateMember,
    pub flow: ContractFlow,
    pub binding: &'a ValueBinding,
    pub tags: &'a Tags,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ExpandedBlock {
    pub statements: Vec<String>,
}

/// Expansion produced nothing for one direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpansionSkipped {
    pub reason: String,
}

/// Turns a validation template into statements.
pub trait ContractExpander: Sync {
    fn expand(&self, request: &ExpansionRequest<'_>) -> std::result::Result<ExpandedBlock, ExpansionSkipped>;
}

/// Expands a contract into a single call of its template.
///
/// A boolean tag `skip-input` or `skip-output` set to `true` marks that
/// direction as a provable no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateInvocationExpander;

impl ContractExpander for TemplateInvocationExpander {
    fn expand(&self, request: &ExpansionRequest<'_>) -> std::result::Result<ExpandedBlock, ExpansionSkipped> {
        let skip_tag = match request.flow {
            ContractFlow::Input => "skip-input",
            ContractFlow::Output => "skip-output",
        };
        if request.tags.get(skip_tag) == Some(&TagValue::Bool(true)) {
            return Err(ExpansionSkipped {
                reason: format!("`{skip_tag}` tag marks the statement as a no-op"),
            });
        }
        Ok(ExpandedBlock {
            statements: vec![format!(
                "{}.{}({});",
                request.template.class, request.template.name, request.binding
            )],
        })
    }
}

/// One statement block at one insertion point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatementPlacement {
    /// Declaration receiving the statements.
    #[serde(skip)]
    pub target: DeclRef,
    pub point: InsertionPoint,
    pub binding: ValueBinding,
    pub flow: ContractFlow,
    pub block: ExpandedBlock,
}

/// Placements for a set of contract advices, in advice order.
#[derive(Clone, Debug, Default)]
pub struct ContractPlan {
    pub placements: Vec<StatementPlacement>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct ContractWeaver<'a, E: ContractExpander> {
    snapshot: &'a DeclarationSnapshot,
    expander: &'a E,
}

impl<'a, E: ContractExpander> ContractWeaver<'a, E> {
    #[must_use]
    pub fn new(snapshot: &'a DeclarationSnapshot, expander: &'a E) -> Self {
        Self { snapshot, expander }
    }

    /// Place every add-contract advice in `advices`; other kinds are ignored.
    pub fn weave<'b>(&self, advices: impl IntoIterator<Item = &'b Advice>) -> Result<ContractPlan> {
        let mut plan = ContractPlan::default();
        for advice in advices {
            let AdvicePayload::AddContract {
                target,
                direction,
                template,
            } = &advice.payload
            else {
                continue;
            };
            self.weave_one(advice, *target, *direction, template, &mut plan)?;
        }
        Ok(plan)
    }

    fn weave_one(
        &self,
        advice: &Advice,
        target: ContractTarget,
        direction: ContractDirection,
        template: &TemplateMember,
        plan: &mut ContractPlan,
    ) -> Result<()> {
        let decl = self.snapshot.resolve(target.declaration()).ok_or_else(|| {
            Error::internal(format!(
                "contract target {} does not resolve in {}",
                target.declaration(),
                self.snapshot.id()
            ))
        })?;
        let direction = match direction {
            ContractDirection::Default => resolve_direction(self.snapshot, target, direction)?,
            resolved => resolved,
        };
        let flows = [
            (direction.includes_input(), ContractFlow::Input),
            (direction.includes_output(), ContractFlow::Output),
        ];
        for (enabled, flow) in flows {
            if !enabled {
                continue;
            }
            let (binding, points) = self.points(decl, target, flow)?;
            let request = ExpansionRequest {
                aspect: &advice.aspect,
                template,
                flow,
                binding: &binding,
                tags: &advice.tags,
            };
            match self.expander.expand(&request) {
                Ok(block) => {
                    debug!(
                        target: "advice",
                        aspect = %advice.aspect,
                        template = %template.qualified_name(),
                        flow = ?flow,
                        points = points.len(),
                        "contract placed"
                    );
                    for point in points {
                        plan.placements.push(StatementPlacement {
                            target: target.declaration(),
                            point,
                            binding: binding.clone(),
                            flow,
                            block: block.clone(),
                        });
                    }
                }
                Err(skipped) => {
                    plan.diagnostics.push(
                        codes::warning(
                            codes::CONTRACT_EXPANSION_SKIPPED,
                            format!(
                                "{:?} statements of contract `{}` on {} are omitted: {}",
                                flow,
                                template.qualified_name(),
                                target.describe(self.snapshot),
                                skipped.reason
                            ),
                        )
                        .with_target(target.declaration(), self.snapshot.display_name(decl.id)),
                    );
                }
            }
        }
        Ok(())
    }

    fn points(
        &self,
        decl: &Declaration,
        target: ContractTarget,
        flow: ContractFlow,
    ) -> Result<(ValueBinding, Vec<InsertionPoint>)> {
        match (target, &decl.kind, flow) {
            (ContractTarget::Parameter { ordinal, .. }, DeclKind::Method(method), flow) => {
                let name = method
                    .params
                    .get(ordinal)
                    .map(|param| param.name.clone())
                    .ok_or_else(|| Error::internal(format!("parameter #{ordinal} vanished from {}", decl.id)))?;
                let binding = ValueBinding::Parameter { name };
                let points = match flow {
                    ContractFlow::Input => vec![InsertionPoint::MethodEntry],
                    ContractFlow::Output => {
                        exits(method.body, before_return)
                    }
                };
                Ok((binding, points))
            }
            (ContractTarget::ReturnParameter { .. }, DeclKind::Method(method), ContractFlow::Output) => Ok((
                ValueBinding::ReturnValue,
                exits(method.body, before_return),
            )),
            (ContractTarget::FieldOrProperty(_), DeclKind::Field(_), ContractFlow::Input) => {
                Ok((ValueBinding::SetterValue, vec![InsertionPoint::SetterEntry]))
            }
            (ContractTarget::FieldOrProperty(_), DeclKind::Field(_), ContractFlow::Output) => Ok((
                ValueBinding::GetterValue,
                vec![InsertionPoint::BeforeGetterReturn { exit: 0 }],
            )),
            (ContractTarget::FieldOrProperty(_), DeclKind::Property(property), ContractFlow::Input) => {
                setter_entry(property.setter.as_ref(), decl)
            }
            (ContractTarget::FieldOrProperty(_), DeclKind::Indexer(indexer), ContractFlow::Input) => {
                setter_entry(indexer.setter.as_ref(), decl)
            }
            (ContractTarget::FieldOrProperty(_), DeclKind::Property(property), ContractFlow::Output) => {
                let getter = property.getter.as_ref().ok_or_else(|| missing_accessor(decl, "getter"))?;
                Ok((
                    ValueBinding::GetterValue,
                    exits(getter.body, before_getter_return),
                ))
            }
            (ContractTarget::FieldOrProperty(_), DeclKind::Indexer(indexer), ContractFlow::Output) => {
                let getter = indexer.getter.as_ref().ok_or_else(|| missing_accessor(decl, "getter"))?;
                Ok((
                    ValueBinding::GetterValue,
                    exits(getter.body, before_getter_return),
                ))
            }
            (_, kind, flow) => Err(Error::internal(format!(
                "no {flow:?} insertion point for a contract on a {}",
                kind.tag()
            ))),
        }
    }
}

fn exits(body: Option<Body>, make: fn(u32) -> InsertionPoint) -> Vec<InsertionPoint> {
    let count = body.map_or(1, |body| body.exit_points).max(1);
    (0..count).map(make).collect()
}

fn before_return(exit: u32) -> InsertionPoint {
    InsertionPoint::BeforeReturn { exit }
}

fn before_getter_return(exit: u32) -> InsertionPoint {
    InsertionPoint::BeforeGetterReturn { exit }
}

fn setter_entry(
    setter: Option<&Accessor>,
    decl: &Declaration,
) -> Result<(ValueBinding, Vec<InsertionPoint>)> {
    setter
        .map(|_| (ValueBinding::SetterValue, vec![InsertionPoint::SetterEntry]))
        .ok_or_else(|| missing_accessor(decl, "setter"))
}

fn missing_accessor(decl: &Declaration, accessor: &str) -> Error {
    Error::internal(format!(
        "contract on `{}` passed validation without a {accessor}",
        decl.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeclId, MemberKind, Parameter, SnapshotBuilder, TypeRef};
    use crate::templates::{TemplateAttributeKind, TemplateShape};

    #[test]
    fn default_direction_depends_on_target() {
        let mut builder = SnapshotBuilder::new();
        let int = builder.core().int_type();
        let owner = builder.class("Account").finish();
        let method = builder
            .method(owner, "Withdraw")
            .param("amount", int.clone())
            .parameter(Parameter::new("balance", int.clone()).with_mode(ParameterMode::Out))
            .returns(int.clone())
            .finish();
        let property = builder.property(owner, "Owner", int).getter().setter().finish();
        let snapshot = builder.build();
        let method = snapshot.reference(method);

        let resolve = |target| resolve_direction(&snapshot, target, ContractDirection::Default).expect("resolvable");
        assert_eq!(
            resolve(ContractTarget::Parameter { method, ordinal: 0 }),
            ContractDirection::Input
        );
        assert_eq!(
            resolve(ContractTarget::Parameter { method, ordinal: 1 }),
            ContractDirection::Output
        );
        assert_eq!(
            resolve(ContractTarget::ReturnParameter { method }),
            ContractDirection::Output
        );
        assert_eq!(
            resolve(ContractTarget::FieldOrProperty(snapshot.reference(property))),
            ContractDirection::Input
        );
    }

    #[test]
    fn output_requires_getter() {
        let mut builder = SnapshotBuilder::new();
        let owner = builder.class("Sink").finish();
        let write_only = builder
            .property(owner, "Value", TypeRef::Dynamic)
            .setter()
            .finish();
        let snapshot = builder.build();
        let error = resolve_direction(
            &snapshot,
            ContractTarget::FieldOrProperty(snapshot.reference(write_only)),
            ContractDirection::Both,
        )
        .expect_err("no getter");
        assert!(matches!(error, Error::Usage { .. }), "{error}");
    }

    #[test]
    fn invocation_expander_honours_skip_tags() {
        let snapshot = SnapshotBuilder::new().build();
        let template = TemplateMember {
            reference: snapshot.reference(DeclId::new(1)),
            class: "NotNull".into(),
            name: "Validate".into(),
            shape: TemplateShape::Default,
            attribute: TemplateAttributeKind::Template,
            member_kind: MemberKind::Method,
            parameter_count: 1,
        };
        let mut tags = Tags::new();
        tags.insert("skip-output".into(), TagValue::Bool(true));
        let binding = ValueBinding::ReturnValue;
        let request = |flow| ExpansionRequest {
            aspect: "NotNull",
            template: &template,
            flow,
            binding: &binding,
            tags: &tags,
        };
        let expander = TemplateInvocationExpander;
        assert_eq!(
            expander.expand(&request(ContractFlow::Input)).map(|block| block.statements),
            Ok(vec!["NotNull.Validate(returnValue);".to_string()])
        );
        assert!(expander.expand(&request(ContractFlow::Output)).is_err());
    }
}
