use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Identity of a declaration. Stable across every snapshot of one lineage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeclId(u32);

impl DeclId {
    /// Owner used when method-level type parameters are normalised for signature comparison.
    pub const CANONICAL_METHOD: DeclId = DeclId(u32::MAX);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identity of one immutable snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(u64);

impl SnapshotId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// Opaque handle to a declaration, tagged with the snapshot it was obtained from.
///
/// A reference is only a name: it must be resolved against a concrete
/// [`DeclarationSnapshot`](super::DeclarationSnapshot) before use, and the same
/// reference may resolve differently as the pipeline produces successor snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeclRef {
    id: DeclId,
    snapshot: SnapshotId,
}

impl DeclRef {
    pub(crate) const fn new(id: DeclId, snapshot: SnapshotId) -> Self {
        Self { id, snapshot }
    }

    #[must_use]
    pub const fn id(self) -> DeclId {
        self.id
    }

    #[must_use]
    pub const fn snapshot(self) -> SnapshotId {
        self.snapshot
    }

    /// Re-target this reference at another snapshot of the same lineage.
    #[must_use]
    pub fn rebase(self, snapshot: &super::DeclarationSnapshot) -> Self {
        Self {
            id: self.id,
            snapshot: snapshot.id(),
        }
    }
}

impl fmt::Display for DeclRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.snapshot)
    }
}
