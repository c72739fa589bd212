//! Replaceable slot for callbacks configured after the pool is running.
//!
//! Readers clone the `Arc` out and release the lock before calling it, so a
//! slow handler never blocks reconfiguration. A poisoned lock is recovered: the
//! slot only ever holds a fully constructed value.

use std::sync::RwLock;

pub(crate) struct HookCell<V> {
    inner: RwLock<Option<V>>,
}

impl<V: Clone> HookCell<V> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub(crate) fn set(&self, value: Option<V>) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = value;
    }

    pub(crate) fn get(&self) -> Option<V> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
