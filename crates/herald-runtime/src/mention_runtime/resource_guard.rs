use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

/// Process-local set of resource ids currently being worked on.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl ResourceGuard {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // A poisoned set still holds valid ids; keep serving it.
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims `resource_id`, or returns `None` when another lease holds it.
    pub(crate) fn try_acquire(&self, resource_id: &str) -> Option<ResourceLease> {
        let mut active = self.lock();
        if !active.insert(resource_id.to_string()) {
            return None;
        }
        Some(ResourceLease {
            guard: self.clone(),
            resource_id: resource_id.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_busy(&self, resource_id: &str) -> bool {
        self.lock().contains(resource_id)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.lock().len()
    }
}

/// Held for the lifetime of one work item; releases the resource on drop.
#[derive(Debug)]
pub(crate) struct ResourceLease {
    guard: ResourceGuard,
    resource_id: String,
}

impl ResourceLease {
    pub(crate) fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.resource_id);
    }
}
