//! Async and iterator classification of methods and accessors.

use super::{Declaration, DeclKind, DeclarationSnapshot, SpecialType, TypeRef};

/// Iterator kind inferred from a return type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IteratorKind {
    #[default]
    None,
    Enumerable,
    Enumerator,
    AsyncEnumerable,
    AsyncEnumerator,
}

impl IteratorKind {
    #[must_use]
    pub fn is_async(self) -> bool {
        matches!(
            self,
            IteratorKind::AsyncEnumerable | IteratorKind::AsyncEnumerator
        )
    }

    #[must_use]
    pub fn is_some(self) -> bool {
        !matches!(self, IteratorKind::None)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsyncInfo {
    /// Declared with the `async` modifier.
    pub is_async: bool,
    /// Return type follows the awaitable pattern.
    pub is_awaitable: bool,
    /// Return type can be produced by an async method builder.
    pub has_method_builder: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IteratorInfo {
    /// Body is implemented with `yield`.
    pub is_iterator: bool,
    pub kind: IteratorKind,
}

impl IteratorInfo {
    #[must_use]
    pub fn is_async_iterator(self) -> bool {
        self.is_iterator && self.kind.is_async()
    }
}

/// Combined async/iterator shape of a target method or getter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TargetShape {
    pub async_info: AsyncInfo,
    pub iterator: IteratorInfo,
}

impl TargetShape {
    /// Shape of a method declaration; `None` for other kinds.
    #[must_use]
    pub fn of_method(snapshot: &DeclarationSnapshot, decl: &Declaration) -> Option<Self> {
        let DeclKind::Method(method) = &decl.kind else {
            return None;
        };
        let (is_awaitable, has_method_builder) = awaitable_info(snapshot, &method.return_type);
        Some(Self {
            async_info: AsyncInfo {
                is_async: method.is_async,
                is_awaitable,
                has_method_builder,
            },
            iterator: IteratorInfo {
                is_iterator: method.is_iterator,
                kind: iterator_kind(snapshot, &method.return_type),
            },
        })
    }

    /// Shape of the getter of a property, indexer or field; `None` when there is no getter.
    #[must_use]
    pub fn of_getter(snapshot: &DeclarationSnapshot, decl: &Declaration) -> Option<Self> {
        let (ty, is_iterator) = match &decl.kind {
            DeclKind::Property(property) => (&property.ty, property.getter.as_ref()?.is_iterator),
            DeclKind::Indexer(indexer) => (&indexer.ty, indexer.getter.as_ref()?.is_iterator),
            DeclKind::Field(field) => (&field.ty, false),
            DeclKind::Type(_) | DeclKind::Method(_) | DeclKind::Event(_) => return None,
        };
        Some(Self {
            async_info: AsyncInfo::default(),
            iterator: IteratorInfo {
                is_iterator,
                kind: iterator_kind(snapshot, ty),
            },
        })
    }
}

/// Classify a return type by the well-known enumerable interfaces.
#[must_use]
pub fn iterator_kind(snapshot: &DeclarationSnapshot, ty: &TypeRef) -> IteratorKind {
    let Some(definition) = ty.definition() else {
        return IteratorKind::None;
    };
    match snapshot.type_decl(definition).and_then(|info| info.special) {
        Some(SpecialType::Enumerable) => IteratorKind::Enumerable,
        Some(SpecialType::Enumerator) => IteratorKind::Enumerator,
        Some(SpecialType::AsyncEnumerable) => IteratorKind::AsyncEnumerable,
        Some(SpecialType::AsyncEnumerator) => IteratorKind::AsyncEnumerator,
        Some(
            SpecialType::Void | SpecialType::Object | SpecialType::Task | SpecialType::ValueTask,
        )
        | None => IteratorKind::None,
    }
}

fn awaitable_info(snapshot: &DeclarationSnapshot, ty: &TypeRef) -> (bool, bool) {
    let Some(info) = ty.definition().and_then(|id| snapshot.type_decl(id)) else {
        return (false, false);
    };
    match info.awaitable {
        Some(awaitable) => (true, awaitable.has_method_builder),
        None => (false, false),
    }
}
