use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-transaction lock registry.
///
/// Every state transition is a read-modify-write against the transaction
/// store; holding the transaction's lock across that cycle makes transitions
/// linearizable per transaction id. Locks for different ids never contend.
///
/// Entries are never reclaimed; transactions have no delete path, so the
/// registry is bounded by the number of transactions created in-process.
#[derive(Default)]
pub(crate) struct TransactionLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TransactionLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
