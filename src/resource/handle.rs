use crate::backend::ResourceId;
use crate::error::{LifecycleError, Result};

/// A backend id with a debug name and a single-shot destroyed flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle<I> {
    id: I,
    label: String,
    destroyed: bool,
}

impl<I: ResourceId> ResourceHandle<I> {
    pub fn new(id: I, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            destroyed: false,
        }
    }

    pub fn id(&self) -> I {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// The id, or [`LifecycleError::UseAfterDestroy`] once destroyed.
    pub fn ensure_alive(&self) -> Result<I> {
        if self.destroyed {
            return Err(LifecycleError::UseAfterDestroy {
                kind: I::KIND,
                label: self.label.clone(),
            });
        }
        Ok(self.id)
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }
}
