//! Conflict resolution between advice and pre-existing members.

mod resolver;
mod signature;


use std::fmt;

use serde::{Deserialize, Serialize};

pub use resolver::{
    ConflictResolution, ConflictResolver, ExistingMember, InterfaceAction, InterfaceResolution,
};
pub use signature::MemberSignature;

/// Policy applied when an introduction meets a same-named member.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideStrategy {
    /// Introduce when free, override a same-type member, hide an inherited one.
    #[default]
    Default,
    Fail,
    Ignore,
    New,
    Override,
}

impl OverrideStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OverrideStrategy::Default => "default",
            OverrideStrategy::Fail => "fail",
            OverrideStrategy::Ignore => "ignore",
            OverrideStrategy::New => "new",
            OverrideStrategy::Override => "override",
        }
    }
}

impl fmt::Display for OverrideStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying an [`OverrideStrategy`] to one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOutcome {
    /// No conflict: plain introduction.
    Default,
    /// Hide an inherited member.
    New,
    /// Override an inherited virtual member, or replace a same-type member.
    Override,
    /// Keep the existing member; emit nothing.
    Ignore,
    Error,
}

impl ConflictOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictOutcome::Default => "default",
            ConflictOutcome::New => "new",
            ConflictOutcome::Override => "override",
            ConflictOutcome::Ignore => "ignore",
            ConflictOutcome::Error => "error",
        }
    }

    /// Whether a transformation is emitted for this outcome.
    #[must_use]
    pub fn emits(self) -> bool {
        matches!(
            self,
            ConflictOutcome::Default | ConflictOutcome::New | ConflictOutcome::Override
        )
    }
}

impl fmt::Display for ConflictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
