use crate::application::locks::TransactionLocks;
use crate::domain::ports::TransactionStoreRef;
use crate::domain::transaction::TransactionStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Delay before a scheduled verification fires. Stands in for the round trip
/// to an external payment gateway.
pub const DEFAULT_VERIFICATION_DELAY: Duration = Duration::from_secs(2);

/// Simulated asynchronous payment verification.
///
/// `pay` moves a transaction into PAYMENT_VERIFICATION and schedules a task
/// here. When the task fires it re-reads the record under the transaction
/// lock and applies FUNDS_HELD only if the status is still
/// PAYMENT_VERIFICATION; a transaction that vanished or moved on leaves the
/// task a no-op, so firing late or twice cannot corrupt state. A failure to
/// persist the outcome has no caller left to report to and is converted into
/// a terminal PAYMENT_REJECTED.
pub struct PaymentVerifier {
    transactions: TransactionStoreRef,
    locks: Arc<TransactionLocks>,
    delay: Duration,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl PaymentVerifier {
    pub(crate) fn new(
        transactions: TransactionStoreRef,
        locks: Arc<TransactionLocks>,
        delay: Duration,
    ) -> Self {
        Self {
            transactions,
            locks,
            delay,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules verification for a transaction currently in
    /// PAYMENT_VERIFICATION. Rescheduling replaces the pending task.
    pub async fn schedule(&self, transaction_id: Uuid) {
        let transactions = self.transactions.clone();
        let locks = self.locks.clone();
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::finish(transactions, locks, transaction_id).await;
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(transaction_id, handle) {
            previous.abort();
        }
    }

    async fn finish(
        transactions: TransactionStoreRef,
        locks: Arc<TransactionLocks>,
        transaction_id: Uuid,
    ) {
        let _guard = locks.acquire(transaction_id).await;

        let mut tx = match transactions.get(transaction_id).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!(%transaction_id, "verification fired for a missing transaction");
                return;
            }
            Err(error) => {
                warn!(%transaction_id, %error, "verification could not read the transaction");
                return;
            }
        };

        if tx.status != TransactionStatus::PaymentVerification {
            debug!(%transaction_id, status = %tx.status, "verification fired after a status change");
            return;
        }

        tx.status = TransactionStatus::FundsHeld;
        tx.touch();
        if let Err(error) = transactions.store(tx.clone()).await {
            warn!(%transaction_id, %error, "verification could not persist FUNDS_HELD");
            tx.status = TransactionStatus::PaymentRejected;
            tx.resolution_details = Some("Automatic payment verification failed.".to_string());
            tx.touch();
            if let Err(error) = transactions.store(tx).await {
                warn!(%transaction_id, %error, "verification could not persist PAYMENT_REJECTED");
            }
            return;
        }
        debug!(%transaction_id, "payment verified, funds held");
    }

    /// Aborts a pending verification, if any.
    pub async fn cancel(&self, transaction_id: Uuid) {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.remove(&transaction_id) {
            handle.abort();
        }
    }

    /// Waits for every pending verification to run to completion. Used by
    /// harnesses that need deterministic ordering between commands.
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            // Aborted tasks surface a JoinError; nothing to do about it here.
            let _ = handle.await;
        }
    }
}
