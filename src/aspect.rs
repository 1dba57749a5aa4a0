//! Aspects and the instances a weaving stage runs.

use std::fmt;
use std::sync::Arc;

use crate::advice::AdviceFactory;
use crate::error::Result;

/// Behaviour that requests advice through an [`AdviceFactory`].
///
/// Implementations are shared between worker threads and must not rely on
/// being applied in any particular order relative to other instances.
pub trait Aspect: Send + Sync {
    /// Template class name; templates are looked up on this class.
    fn name(&self) -> &str;

    fn apply(&self, factory: &mut AdviceFactory<'_>) -> Result<()>;
}

/// One application of an aspect, identified by its position in the stage.
#[derive(Clone)]
pub struct AspectInstance {
    aspect: Arc<dyn Aspect>,
    label: Option<String>,
}

impl AspectInstance {
    pub fn new(aspect: impl Aspect + 'static) -> Self {
        Self::shared(Arc::new(aspect))
    }

    pub fn shared(aspect: Arc<dyn Aspect>) -> Self {
        Self {
            aspect,
            label: None,
        }
    }

    /// Name shown in logs and reports instead of the aspect name.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn aspect(&self) -> &dyn Aspect {
        self.aspect.as_ref()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| self.aspect.name())
    }
}

impl fmt::Debug for AspectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectInstance")
            .field("aspect", &self.aspect.name())
            .field("label", &self.label)
            .finish()
    }
}

/// Aspect backed by a closure; handy for tests and embedding.
pub struct FnAspect<F> {
    name: String,
    apply: F,
}

impl<F> FnAspect<F>
where
    F: Fn(&mut AdviceFactory<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, apply: F) -> Self {
        Self {
            name: name.into(),
            apply,
        }
    }
}

impl<F> Aspect for FnAspect<F>
where
    F: Fn(&mut AdviceFactory<'_>) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, factory: &mut AdviceFactory<'_>) -> Result<()> {
        (self.apply)(factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_defaults_to_aspect_name() {
        let instance = AspectInstance::new(FnAspect::new("Logging", |_: &mut AdviceFactory<'_>| Ok(())));
        assert_eq!(instance.label(), "Logging");
        let labelled = instance.with_label("Logging#audit");
        assert_eq!(labelled.label(), "Logging#audit");
        assert_eq!(labelled.aspect().name(), "Logging");
    }
}
