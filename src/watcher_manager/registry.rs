use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use super::EventSink;
use crate::ListOptions;

/// One admitted subscription, keyed by a manager-assigned id so removal
/// is O(1) and independent of subscriber-held references.
pub(crate) struct RegisteredWatcher<T> {
    pub(crate) id: String,
    /// A fired token means the subscription is finished; its slot is
    /// reclaimed lazily on the next sweep or dispatch touch.
    pub(crate) token: CancellationToken,
    pub(crate) sink: Arc<dyn EventSink<T>>,
    pub(crate) options: ListOptions,
    /// Admission slot, released when the entry is dropped.
    pub(crate) _permit: OwnedSemaphorePermit,
}

/// The subscriber registry: reads for dispatch iteration, writes for
/// add/remove.
pub(crate) struct Registry<T> {
    watchers: RwLock<HashMap<String, Arc<RegisteredWatcher<T>>>>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(
        &self,
        watcher: RegisteredWatcher<T>,
    ) {
        self.watchers
            .write()
            .insert(watcher.id.clone(), Arc::new(watcher));
    }

    pub(crate) fn remove(
        &self,
        id: &str,
    ) {
        if let Some(watcher) = self.watchers.write().remove(id) {
            // wake a protocol driver still blocked on its token; a
            // no-op when the token already fired
            watcher.token.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.watchers.read().len()
    }

    /// Point-in-time view of the live entries, for one fan-out pass.
    pub(crate) fn snapshot(&self) -> Vec<Arc<RegisteredWatcher<T>>> {
        self.watchers.read().values().cloned().collect()
    }

    /// Ids whose cancellation token has fired.
    pub(crate) fn expired(&self) -> Vec<String> {
        self.watchers
            .read()
            .values()
            .filter(|watcher| watcher.token.is_cancelled())
            .map(|watcher| watcher.id.clone())
            .collect()
    }
}
