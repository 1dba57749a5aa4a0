use crate::generic_context::GenericContext;
use crate::model::{
    DeclId, DeclKind, Declaration, DeclarationSnapshot, MemberKind, Parameter, ParameterMode,
    TypeRef,
};

/// Comparable shape of a member, with generic parameters normalised.
///
/// Method-level type parameters are rewritten to [`DeclId::CANONICAL_METHOD`]
/// so that `void M<T>(T)` declared on two types compares equal; type-level
/// parameters are substituted through the context the member is seen from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberSignature {
    pub name: String,
    pub kind: MemberKind,
    pub is_static: bool,
    pub generic_arity: usize,
    pub parameters: Vec<(TypeRef, ParameterMode)>,
    /// Return type of methods, value type of fields, properties, indexers and events.
    pub value_type: Option<TypeRef>,
}

impl MemberSignature {
    /// Signature of `decl` as seen through `context`.
    #[must_use]
    pub fn of(decl: &Declaration, context: &GenericContext) -> Self {
        let (arity, params): (usize, &[Parameter]) = match &decl.kind {
            DeclKind::Method(method) => (method.generic_params.len(), &method.params),
            DeclKind::Indexer(indexer) => (0, &indexer.params),
            DeclKind::Type(_) | DeclKind::Field(_) | DeclKind::Property(_) | DeclKind::Event(_) => {
                (0, &[])
            }
        };
        Self::from_parts(
            decl.id,
            &decl.name,
            decl.member_kind(),
            decl.is_static,
            arity,
            params,
            decl.value_type(),
            context,
        )
    }

    /// Signature of a member that may not be committed to any snapshot yet.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_parts(
        owner: DeclId,
        name: &str,
        kind: MemberKind,
        is_static: bool,
        generic_arity: usize,
        params: &[Parameter],
        value_type: Option<&TypeRef>,
        context: &GenericContext,
    ) -> Self {
        let canonical = canonical_context(owner, generic_arity, context);
        Self {
            name: name.to_string(),
            kind,
            is_static,
            generic_arity,
            parameters: params
                .iter()
                .map(|param| (canonical.map(&param.ty).into_owned(), param.mode))
                .collect(),
            value_type: value_type.map(|ty| canonical.map(ty).into_owned()),
        }
    }

    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, MemberKind::Method | MemberKind::Indexer)
    }

    /// Whether a member with this signature occupies the same slot as `other`.
    ///
    /// Non-callable members clash on name alone; methods and indexers only
    /// when their parameter lists and generic arity are identical too.
    #[must_use]
    pub fn clashes_with(&self, other: &MemberSignature) -> bool {
        if self.name != other.name {
            return false;
        }
        if self.is_callable() && other.is_callable() {
            return self.generic_arity == other.generic_arity && self.parameters == other.parameters;
        }
        true
    }

    /// Whether `other` may be hidden or overridden by a member of this kind.
    #[must_use]
    pub fn kind_compatible(&self, other: &MemberSignature) -> bool {
        self.kind == other.kind
            || matches!(
                (self.kind, other.kind),
                (MemberKind::Field, MemberKind::Property) | (MemberKind::Property, MemberKind::Field)
            )
    }

    #[must_use]
    pub fn display(&self, snapshot: &DeclarationSnapshot) -> String {
        if !self.is_callable() {
            return self.name.clone();
        }
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(ty, mode)| match mode {
                ParameterMode::In => ty.display(snapshot),
                ParameterMode::Out => format!("out {}", ty.display(snapshot)),
                ParameterMode::Ref => format!("ref {}", ty.display(snapshot)),
            })
            .collect();
        let arity = if self.generic_arity > 0 {
            format!("`{}", self.generic_arity)
        } else {
            String::new()
        };
        if self.kind == MemberKind::Indexer {
            format!("this[{}]", params.join(", "))
        } else {
            format!("{}{arity}({})", self.name, params.join(", "))
        }
    }
}

fn canonical_context(owner: DeclId, generic_arity: usize, parent: &GenericContext) -> GenericContext {
    if generic_arity == 0 {
        return parent.clone();
    }
    let args = (0..generic_arity)
        .map(|ordinal| TypeRef::param(DeclId::CANONICAL_METHOD, ordinal, format!("!!{ordinal}")))
        .collect();
    GenericContext::introduced(owner, args, parent.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SnapshotBuilder;

    #[test]
    fn generic_methods_compare_equal_across_declaring_types() {
        let mut builder = SnapshotBuilder::new();
        let a = builder.class("A").finish();
        let b = builder.class("B").finish();
        let first = builder.method(a, "Map").generic(&["T"]);
        let t = first.type_param(0);
        let first = first.param("value", t.clone()).returns(t).finish();
        let second = builder.method(b, "Map").generic(&["U"]);
        let u = second.type_param(0);
        let second = second.param("value", u).finish();
        let snapshot = builder.build();

        let first = MemberSignature::of(snapshot.get(first).expect("first"), &GenericContext::Null);
        let second = MemberSignature::of(snapshot.get(second).expect("second"), &GenericContext::Null);
        assert!(first.clashes_with(&second));
        assert_ne!(first.value_type, second.value_type);
        assert_eq!(first.display(&snapshot), "Map`1(!!0)");
    }

    #[test]
    fn overloads_do_not_clash_but_fields_do() {
        let mut builder = SnapshotBuilder::new();
        let int = builder.core().int_type();
        let string = builder.core().string_type();
        let owner = builder.class("Owner").finish();
        let by_int = builder.method(owner, "Run").param("x", int.clone()).finish();
        let by_string = builder.method(owner, "Run").param("x", string).finish();
        let field = builder.field(owner, "Run", int);
        let snapshot = builder.build();

        let sig = |id| MemberSignature::of(snapshot.get(id).expect("declared"), &GenericContext::Null);
        assert!(!sig(by_int).clashes_with(&sig(by_string)));
        assert!(sig(field).clashes_with(&sig(by_int)));
        assert!(!sig(field).kind_compatible(&sig(by_int)));
    }
}
