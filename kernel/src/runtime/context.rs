//! Per-evaluation extension state.
//!
//! Each extension gets at most one context value per message, created on
//! first use and dropped with the evaluation.

use std::any::Any;
use std::collections::BTreeMap;

use crate::error::RuntimeError;
use crate::registry::ExtensionId;

#[derive(Default)]
pub struct ExtensionContexts {
    slots: BTreeMap<ExtensionId, Box<dyn Any + Send>>,
}

impl ExtensionContexts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The context of `ext`, created by `init` if absent.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Extension`] if a context of another type was already
    /// stored under `ext`.
    pub fn get_or_insert_with<T, F>(&mut self, ext: ExtensionId, init: F) -> Result<&mut T, RuntimeError>
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        let slot = self.slots.entry(ext).or_insert_with(|| Box::new(init()));
        slot.downcast_mut::<T>().ok_or_else(|| RuntimeError::Extension {
            name: format!("#{}", ext.0),
            detail: format!(
                "context is not a {}",
                std::any::type_name::<T>()
            ),
        })
    }

    #[must_use]
    pub fn get<T: Any + Send>(&self, ext: ExtensionId) -> Option<&T> {
        self.slots.get(&ext).and_then(|b| b.downcast_ref::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for ExtensionContexts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContexts")
            .field("extensions", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_once_then_reused() {
        let mut ctx = ExtensionContexts::new();
        *ctx.get_or_insert_with(ExtensionId(2), || 0u32).unwrap() += 1;
        *ctx.get_or_insert_with(ExtensionId(2), || 100u32).unwrap() += 1;
        assert_eq!(ctx.get::<u32>(ExtensionId(2)), Some(&2));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn type_mismatch_is_an_extension_error() {
        let mut ctx = ExtensionContexts::new();
        ctx.get_or_insert_with(ExtensionId(1), || 5u8).unwrap();
        let err = ctx
            .get_or_insert_with(ExtensionId(1), String::new)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Extension { .. }));
    }
}
