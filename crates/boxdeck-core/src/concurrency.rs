use boxdeck_schema::ComponentName;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-component mutual exclusion for lifecycle operations.
///
/// Acquisition never waits: a second operation on a held name fails fast.
#[derive(Clone, Default)]
pub struct OperationLocks {
    held: Arc<Mutex<HashSet<ComponentName>>>,
}

/// Releases its component name on drop.
pub struct OperationGuard {
    name: ComponentName,
    held: Arc<Mutex<HashSet<ComponentName>>>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, name: &str) -> Option<OperationGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(ComponentName::new(name)) {
            return None;
        }
        Some(OperationGuard {
            name: ComponentName::new(name),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

impl OperationGuard {
    pub fn name(&self) -> &ComponentName {
        &self.name
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}
