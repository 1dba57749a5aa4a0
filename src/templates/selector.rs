//! Selection of the template variant matching a target's async/iterator shape.

use serde::Deserialize;

use super::{TemplateMember, TemplateShape};
use crate::error::{Error, Result};
use crate::model::{IteratorKind, TargetShape};

/// Template names an aspect supplies for overriding a method.
///
/// Only `default` is required. The two flags fall back to the configured
/// defaults when left unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MethodTemplateSelector {
    #[serde(rename = "default")]
    pub default_template: String,
    #[serde(rename = "async", default)]
    pub async_template: Option<String>,
    #[serde(rename = "enumerable", default)]
    pub enumerable_template: Option<String>,
    #[serde(rename = "enumerator", default)]
    pub enumerator_template: Option<String>,
    #[serde(rename = "async-enumerable", default)]
    pub async_enumerable_template: Option<String>,
    #[serde(rename = "async-enumerator", default)]
    pub async_enumerator_template: Option<String>,
    #[serde(default)]
    pub use_async_template_for_any_awaitable: Option<bool>,
    #[serde(default)]
    pub use_enumerable_template_for_any_enumerable: Option<bool>,
}

impl MethodTemplateSelector {
    #[must_use]
    pub fn new(default_template: impl Into<String>) -> Self {
        Self {
            default_template: default_template.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_async(mut self, name: impl Into<String>) -> Self {
        self.async_template = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_enumerable(mut self, name: impl Into<String>) -> Self {
        self.enumerable_template = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_enumerator(mut self, name: impl Into<String>) -> Self {
        self.enumerator_template = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_async_enumerable(mut self, name: impl Into<String>) -> Self {
        self.async_enumerable_template = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_async_enumerator(mut self, name: impl Into<String>) -> Self {
        self.async_enumerator_template = Some(name.into());
        self
    }

    #[must_use]
    pub fn use_async_for_any_awaitable(mut self, enabled: bool) -> Self {
        self.use_async_template_for_any_awaitable = Some(enabled);
        self
    }

    #[must_use]
    pub fn use_enumerable_for_any_enumerable(mut self, enabled: bool) -> Self {
        self.use_enumerable_template_for_any_enumerable = Some(enabled);
        self
    }

    /// Optional template names paired with the shape they are written for.
    pub fn optional_slots(&self) -> impl Iterator<Item = (TemplateShape, &str)> {
        [
            (TemplateShape::Async, &self.async_template),
            (TemplateShape::Enumerable, &self.enumerable_template),
            (TemplateShape::Enumerator, &self.enumerator_template),
            (TemplateShape::AsyncEnumerable, &self.async_enumerable_template),
            (TemplateShape::AsyncEnumerator, &self.async_enumerator_template),
        ]
        .into_iter()
        .filter_map(|(shape, name)| name.as_deref().map(|name| (shape, name)))
    }
}

/// Template names for a getter override; async shapes do not apply to getters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GetterTemplateSelector {
    #[serde(rename = "default")]
    pub default_template: String,
    #[serde(rename = "enumerable", default)]
    pub enumerable_template: Option<String>,
    #[serde(rename = "enumerator", default)]
    pub enumerator_template: Option<String>,
    #[serde(default)]
    pub use_enumerable_template_for_any_enumerable: Option<bool>,
}

impl GetterTemplateSelector {
    #[must_use]
    pub fn new(default_template: impl Into<String>) -> Self {
        Self {
            default_template: default_template.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_enumerable(mut self, name: impl Into<String>) -> Self {
        self.enumerable_template = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_enumerator(mut self, name: impl Into<String>) -> Self {
        self.enumerator_template = Some(name.into());
        self
    }

    pub fn optional_slots(&self) -> impl Iterator<Item = (TemplateShape, &str)> {
        [
            (TemplateShape::Enumerable, &self.enumerable_template),
            (TemplateShape::Enumerator, &self.enumerator_template),
        ]
        .into_iter()
        .filter_map(|(shape, name)| name.as_deref().map(|name| (shape, name)))
    }
}

/// Resolved method templates with the selection flags settled.
#[derive(Clone, Debug)]
pub struct BoundMethodTemplates {
    pub default: TemplateMember,
    pub async_: Option<TemplateMember>,
    pub enumerable: Option<TemplateMember>,
    pub enumerator: Option<TemplateMember>,
    pub async_enumerable: Option<TemplateMember>,
    pub async_enumerator: Option<TemplateMember>,
    pub use_async_for_any_awaitable: bool,
    pub use_enumerable_for_any_enumerable: bool,
}

impl BoundMethodTemplates {
    #[must_use]
    pub fn only_default(default: TemplateMember) -> Self {
        Self {
            default,
            async_: None,
            enumerable: None,
            enumerator: None,
            async_enumerable: None,
            async_enumerator: None,
            use_async_for_any_awaitable: false,
            use_enumerable_for_any_enumerable: false,
        }
    }

    /// Store `member` in the slot matching its shape.
    pub fn bind(&mut self, member: TemplateMember) {
        let slot = match member.shape {
            TemplateShape::Default => {
                self.default = member;
                return;
            }
            TemplateShape::Async => &mut self.async_,
            TemplateShape::Enumerable => &mut self.enumerable,
            TemplateShape::Enumerator => &mut self.enumerator,
            TemplateShape::AsyncEnumerable => &mut self.async_enumerable,
            TemplateShape::AsyncEnumerator => &mut self.async_enumerator,
        };
        *slot = Some(member);
    }

    /// Every bound template, default first.
    pub fn iter(&self) -> impl Iterator<Item = &TemplateMember> {
        std::iter::once(&self.default).chain(
            [
                &self.async_,
                &self.enumerable,
                &self.enumerator,
                &self.async_enumerable,
                &self.async_enumerator,
            ]
            .into_iter()
            .flatten(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct BoundGetterTemplates {
    pub default: TemplateMember,
    pub enumerable: Option<TemplateMember>,
    pub enumerator: Option<TemplateMember>,
    pub use_enumerable_for_any_enumerable: bool,
}

/// The template chosen for one target, with the shape its body is interpreted as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedTemplate {
    pub template: TemplateMember,
    pub interpreted_shape: TemplateShape,
}

/// Choose the method template for a target of shape `target`.
pub fn select_method_template(
    templates: &BoundMethodTemplates,
    target: TargetShape,
) -> Result<SelectedTemplate> {
    let interpreted_shape = natural_shape(target)?;
    let mut selected = &templates.default;

    let awaitable_with_builder = target.async_info.is_awaitable && target.async_info.has_method_builder;
    if (target.async_info.is_async
        || (templates.use_async_for_any_awaitable && awaitable_with_builder)
        || target.iterator.is_async_iterator())
        && let Some(async_template) = &templates.async_
    {
        selected = async_template;
    }

    if target.iterator.is_iterator
        || (target.iterator.kind.is_some() && templates.use_enumerable_for_any_enumerable)
    {
        let by_kind = match target.iterator.kind {
            IteratorKind::Enumerable => templates.enumerable.as_ref(),
            IteratorKind::Enumerator => templates.enumerator.as_ref(),
            IteratorKind::AsyncEnumerable => templates.async_enumerable.as_ref(),
            IteratorKind::AsyncEnumerator => templates.async_enumerator.as_ref(),
            IteratorKind::None => {
                return Err(Error::internal(
                    "iterator target without an enumerable return type reached template selection",
                ));
            }
        };
        if let Some(template) = by_kind {
            return Ok(SelectedTemplate {
                template: template.clone(),
                interpreted_shape,
            });
        }
    }

    Ok(SelectedTemplate {
        template: selected.clone(),
        interpreted_shape,
    })
}

/// Choose the getter template; only the synchronous iterator shapes apply.
pub fn select_getter_template(
    templates: &BoundGetterTemplates,
    target: TargetShape,
) -> Result<SelectedTemplate> {
    let kind = target.iterator.kind;
    let interpreted_shape = match kind {
        IteratorKind::Enumerable if target.iterator.is_iterator => TemplateShape::Enumerable,
        IteratorKind::Enumerator if target.iterator.is_iterator => TemplateShape::Enumerator,
        IteratorKind::None if target.iterator.is_iterator => {
            return Err(Error::internal(
                "iterator getter without an enumerable type reached template selection",
            ));
        }
        _ => TemplateShape::Default,
    };
    if target.iterator.is_iterator || (kind.is_some() && templates.use_enumerable_for_any_enumerable) {
        let by_kind = match kind {
            IteratorKind::Enumerable => templates.enumerable.as_ref(),
            IteratorKind::Enumerator => templates.enumerator.as_ref(),
            IteratorKind::AsyncEnumerable | IteratorKind::AsyncEnumerator | IteratorKind::None => {
                None
            }
        };
        if let Some(template) = by_kind {
            return Ok(SelectedTemplate {
                template: template.clone(),
                interpreted_shape,
            });
        }
    }
    Ok(SelectedTemplate {
        template: templates.default.clone(),
        interpreted_shape,
    })
}

/// Shape a template body must adapt to when woven into `target`.
fn natural_shape(target: TargetShape) -> Result<TemplateShape> {
    if target.iterator.is_iterator {
        return match target.iterator.kind {
            IteratorKind::Enumerable => Ok(TemplateShape::Enumerable),
            IteratorKind::Enumerator => Ok(TemplateShape::Enumerator),
            IteratorKind::AsyncEnumerable => Ok(TemplateShape::AsyncEnumerable),
            IteratorKind::AsyncEnumerator => Ok(TemplateShape::AsyncEnumerator),
            IteratorKind::None => Err(Error::internal(
                "iterator target without an enumerable return type reached template selection",
            )),
        };
    }
    if target.async_info.is_async {
        Ok(TemplateShape::Async)
    } else {
        Ok(TemplateShape::Default)
    }
}
