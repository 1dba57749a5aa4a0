//! Template members authored in aspect classes, their registry and shape selection.

pub mod registry;
pub mod selector;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{DeclRef, MemberKind};

pub use registry::{TemplateDescriptor, TemplateRegistry, TemplateResolution};
pub use selector::{
    BoundGetterTemplates, BoundMethodTemplates, GetterTemplateSelector, MethodTemplateSelector,
    SelectedTemplate, select_getter_template, select_method_template,
};

/// Marker attribute carried by a template member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateAttributeKind {
    /// Usable by `introduce_*` operations.
    Introduction,
    /// Usable by `override_*` and `add_contract`.
    Template,
    /// Member of an aspect class without any template marker.
    None,
}

impl TemplateAttributeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateAttributeKind::Introduction => "introduction",
            TemplateAttributeKind::Template => "template",
            TemplateAttributeKind::None => "none",
        }
    }
}

impl fmt::Display for TemplateAttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync/async/iterator variant a template body is written for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateShape {
    #[default]
    Default,
    Async,
    Enumerable,
    Enumerator,
    AsyncEnumerable,
    AsyncEnumerator,
}

impl TemplateShape {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateShape::Default => "default",
            TemplateShape::Async => "async",
            TemplateShape::Enumerable => "enumerable",
            TemplateShape::Enumerator => "enumerator",
            TemplateShape::AsyncEnumerable => "async-enumerable",
            TemplateShape::AsyncEnumerator => "async-enumerator",
        }
    }
}

impl fmt::Display for TemplateShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved template bound to one shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemplateMember {
    pub reference: DeclRef,
    pub class: String,
    pub name: String,
    pub shape: TemplateShape,
    pub attribute: TemplateAttributeKind,
    pub member_kind: MemberKind,
    /// Declared parameter count; zero for non-method templates.
    pub parameter_count: usize,
}

impl TemplateMember {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class, self.name)
    }
}

impl fmt::Display for TemplateMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.class, self.name, self.shape)
    }
}
