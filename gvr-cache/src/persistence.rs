//! Fire-and-forget persistence writes
//!
//! Writes to the persistent tier never block the controller. Each write
//! runs on a detached task keyed by session; scheduling a newer write for
//! the same session aborts the older one, so at most one write per session
//! is ever in flight. Dropping the writer aborts whatever is still pending.

use crate::models::{SessionDataset, SessionId};
use crate::store::DatasetTier;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct PersistenceWriter {
    tier: Arc<dyn DatasetTier>,
    pending: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl PersistenceWriter {
    pub fn new(tier: Arc<dyn DatasetTier>) -> Self {
        Self {
            tier,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `dataset` for the persistent tier (must be called inside a runtime)
    pub fn schedule(&self, session: SessionId, dataset: Arc<SessionDataset>) {
        let mut pending = self.lock();
        pending.retain(|_, handle| !handle.is_finished());

        if let Some(previous) = pending.remove(&session) {
            debug!(session = %session, "Superseding in-flight cache write");
            previous.abort();
        }

        let tier = Arc::clone(&self.tier);
        let key = session.clone();
        let handle = tokio::spawn(async move {
            tier.save(&key, &dataset).await;
            debug!(session = %key, genes = dataset.genes.len(), "Dataset persisted");
        });
        pending.insert(session, handle);
    }

    /// Detach the pending write for `session` so the caller can wait it out
    pub fn take(&self, session: &SessionId) -> Option<JoinHandle<()>> {
        self.lock().remove(session)
    }

    /// Writes scheduled but not yet finished
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every pending write to finish
    pub async fn flush(&self) {
        let handles: Vec<_> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            // An aborted write is not an error worth surfacing
            let _ = handle.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }
}
