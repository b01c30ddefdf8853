use crate::application::locks::TransactionLocks;
use crate::application::verification::{DEFAULT_VERIFICATION_DELAY, PaymentVerifier};
use crate::domain::money::Amount;
use crate::domain::ports::{TransactionStoreRef, UserStoreRef};
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{EscrowError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// The transaction state machine.
///
/// Every action validates the acting party and the current status against the
/// transition table, then mutates the store — all under a per-transaction
/// lock, so concurrent callers on the same transaction see exactly one
/// success. A rejected action leaves the record untouched.
pub struct EscrowEngine {
    users: UserStoreRef,
    transactions: TransactionStoreRef,
    locks: Arc<TransactionLocks>,
    verifier: PaymentVerifier,
}

impl EscrowEngine {
    pub fn new(users: UserStoreRef, transactions: TransactionStoreRef) -> Self {
        Self::with_verification_delay(users, transactions, DEFAULT_VERIFICATION_DELAY)
    }

    /// Engine with a custom payment-verification delay. Harnesses and tests
    /// use short delays; the default mirrors the 2 s gateway round trip.
    pub fn with_verification_delay(
        users: UserStoreRef,
        transactions: TransactionStoreRef,
        delay: Duration,
    ) -> Self {
        let locks = Arc::new(TransactionLocks::new());
        let verifier = PaymentVerifier::new(transactions.clone(), locks.clone(), delay);
        Self {
            users,
            transactions,
            locks,
            verifier,
        }
    }

    pub fn verifier(&self) -> &PaymentVerifier {
        &self.verifier
    }

    /// Waits for all pending payment verifications to finish.
    pub async fn settle_pending(&self) {
        self.verifier.settle().await;
    }

    /// Creates a transaction whose buyer is already known. Initial status is
    /// PENDING_BUYER_ACCEPTANCE.
    pub async fn create_direct(
        &self,
        seller_id: Uuid,
        buyer_id: Uuid,
        item_name: &str,
        item_description: &str,
        price: Amount,
    ) -> Result<Transaction> {
        if seller_id == buyer_id {
            return Err(EscrowError::SellerIsBuyer);
        }
        let seller = self
            .users
            .get(seller_id)
            .await?
            .ok_or(EscrowError::UserNotFound)?;
        let buyer = self
            .users
            .get(buyer_id)
            .await?
            .ok_or(EscrowError::UserNotFound)?;

        let tx = Transaction::direct(seller, buyer, item_name, item_description, price);
        self.transactions.store(tx.clone()).await?;
        info!(transaction_id = %tx.id, item = %tx.item_name, "direct transaction created");
        Ok(tx)
    }

    /// Creates a transaction for a buyer who has no account yet, bound to a
    /// single-use invite token. Initial status is AWAITING_BUYER_CLAIM.
    pub async fn create_invite(
        &self,
        seller_id: Uuid,
        buyer_name: &str,
        item_name: &str,
        item_description: &str,
        price: Amount,
    ) -> Result<Transaction> {
        if buyer_name.trim().is_empty() {
            return Err(EscrowError::EmptyInput("buyer name"));
        }
        let seller = self
            .users
            .get(seller_id)
            .await?
            .ok_or(EscrowError::UserNotFound)?;

        let tx = Transaction::invited(seller, buyer_name, item_name, item_description, price);
        self.transactions.store(tx.clone()).await?;
        info!(transaction_id = %tx.id, item = %tx.item_name, "invite transaction created");
        Ok(tx)
    }

    /// Claims an invite: binds the claiming user as buyer, moves to
    /// PENDING_BUYER_ACCEPTANCE, and clears the invite fields in one write.
    ///
    /// The token precondition is re-checked while holding the transaction
    /// lock, which is what makes the claim at-most-once under racing callers:
    /// the loser re-reads a record whose token is already gone.
    pub async fn claim_invite(&self, token: &str, user_id: Uuid) -> Result<Transaction> {
        let candidate = self
            .transactions
            .find_by_invite_token(token)
            .await?
            .ok_or(EscrowError::InvalidToken)?;

        let _guard = self.locks.acquire(candidate.id).await;
        let mut tx = self
            .transactions
            .get(candidate.id)
            .await?
            .ok_or(EscrowError::InvalidToken)?;

        if tx.invite_token.as_deref() != Some(token)
            || tx.status != TransactionStatus::AwaitingBuyerClaim
            || tx.buyer_id.is_some()
        {
            return Err(EscrowError::InvalidToken);
        }
        let claimant = self
            .users
            .get(user_id)
            .await?
            .ok_or(EscrowError::UserNotFound)?;
        if tx.is_seller(user_id) {
            return Err(EscrowError::SelfClaim);
        }

        tx.buyer_id = Some(claimant.id);
        tx.buyer = Some(claimant);
        tx.status = TransactionStatus::PendingBuyerAcceptance;
        tx.invite_token = None;
        tx.buyer_name_for_invite = None;
        tx.touch();
        self.transactions.store(tx.clone()).await?;
        info!(transaction_id = %tx.id, buyer_id = %user_id, "invite claimed");
        Ok(tx)
    }

    /// Buyer accepts the terms: PENDING_BUYER_ACCEPTANCE -> AWAITING_PAYMENT.
    pub async fn accept(&self, id: Uuid, user_id: Uuid) -> Result<Transaction> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.load(id).await?;

        if !tx.is_buyer(user_id) || tx.status != TransactionStatus::PendingBuyerAcceptance {
            return Err(EscrowError::InvalidTransition {
                action: "accept",
                status: tx.status,
            });
        }

        tx.status = TransactionStatus::AwaitingPayment;
        tx.touch();
        self.transactions.store(tx.clone()).await?;
        Ok(tx)
    }

    /// Buyer submits payment proof: AWAITING_PAYMENT -> PAYMENT_VERIFICATION,
    /// then the verifier moves the record on asynchronously.
    pub async fn pay(&self, id: Uuid, user_id: Uuid, payment_proof: &str) -> Result<Transaction> {
        let tx = {
            let _guard = self.locks.acquire(id).await;
            let mut tx = self.load(id).await?;

            if !tx.is_buyer(user_id) || tx.status != TransactionStatus::AwaitingPayment {
                return Err(EscrowError::InvalidTransition {
                    action: "pay",
                    status: tx.status,
                });
            }
            if payment_proof.trim().is_empty() {
                return Err(EscrowError::EmptyInput("payment proof"));
            }

            tx.status = TransactionStatus::PaymentVerification;
            tx.payment_proof = Some(payment_proof.trim().to_string());
            tx.touch();
            self.transactions.store(tx.clone()).await?;
            tx
        };

        // Scheduled outside the lock; the verifier takes it again when it fires.
        self.verifier.schedule(tx.id).await;
        info!(transaction_id = %tx.id, "payment submitted, verification scheduled");
        Ok(tx)
    }

    /// Seller ships the item: FUNDS_HELD -> ITEM_SHIPPED.
    pub async fn ship(&self, id: Uuid, user_id: Uuid, tracking_info: &str) -> Result<Transaction> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.load(id).await?;

        if !tx.is_seller(user_id) || tx.status != TransactionStatus::FundsHeld {
            return Err(EscrowError::InvalidTransition {
                action: "ship",
                status: tx.status,
            });
        }
        if tracking_info.trim().is_empty() {
            return Err(EscrowError::EmptyInput("tracking info"));
        }

        tx.status = TransactionStatus::ItemShipped;
        tx.tracking_info = Some(tracking_info.trim().to_string());
        tx.touch();
        self.transactions.store(tx.clone()).await?;
        Ok(tx)
    }

    /// Buyer confirms delivery: ITEM_SHIPPED -> COMPLETED (terminal).
    pub async fn confirm_receipt(&self, id: Uuid, user_id: Uuid) -> Result<Transaction> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.load(id).await?;

        if !tx.is_buyer(user_id) || tx.status != TransactionStatus::ItemShipped {
            return Err(EscrowError::InvalidTransition {
                action: "confirm_receipt",
                status: tx.status,
            });
        }

        tx.status = TransactionStatus::Completed;
        tx.touch();
        self.transactions.store(tx.clone()).await?;
        info!(transaction_id = %tx.id, "transaction completed");
        Ok(tx)
    }

    /// Cancels the transaction (terminal). The seller may cancel from
    /// AWAITING_BUYER_CLAIM, PENDING_BUYER_ACCEPTANCE, or AWAITING_PAYMENT;
    /// the buyer only from the latter two.
    pub async fn cancel(&self, id: Uuid, user_id: Uuid) -> Result<Transaction> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.load(id).await?;

        let allowed = if tx.is_seller(user_id) {
            matches!(
                tx.status,
                TransactionStatus::AwaitingBuyerClaim
                    | TransactionStatus::PendingBuyerAcceptance
                    | TransactionStatus::AwaitingPayment
            )
        } else if tx.is_buyer(user_id) {
            matches!(
                tx.status,
                TransactionStatus::PendingBuyerAcceptance | TransactionStatus::AwaitingPayment
            )
        } else {
            false
        };
        if !allowed {
            return Err(EscrowError::InvalidTransition {
                action: "cancel",
                status: tx.status,
            });
        }

        tx.status = TransactionStatus::Cancelled;
        tx.touch();
        self.transactions.store(tx.clone()).await?;
        info!(transaction_id = %tx.id, "transaction cancelled");
        Ok(tx)
    }

    /// Buyer raises a dispute from FUNDS_HELD, ITEM_SHIPPED, or COMPLETED.
    pub async fn dispute(&self, id: Uuid, user_id: Uuid, reason: &str) -> Result<Transaction> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.load(id).await?;

        if !tx.is_buyer(user_id)
            || !matches!(
                tx.status,
                TransactionStatus::FundsHeld
                    | TransactionStatus::ItemShipped
                    | TransactionStatus::Completed
            )
        {
            return Err(EscrowError::InvalidTransition {
                action: "dispute",
                status: tx.status,
            });
        }
        if reason.trim().is_empty() {
            return Err(EscrowError::EmptyInput("dispute reason"));
        }

        tx.status = TransactionStatus::Disputed;
        tx.dispute_reason = Some(reason.trim().to_string());
        tx.touch();
        self.transactions.store(tx.clone()).await?;
        info!(transaction_id = %tx.id, "dispute raised");
        Ok(tx)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        match self.transactions.get(id).await? {
            Some(tx) => Ok(Some(self.hydrate(tx).await?)),
            None => Ok(None),
        }
    }

    /// Transactions where the user is seller or buyer, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let mut txs = self.transactions.for_user(user_id).await?;
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut hydrated = Vec::with_capacity(txs.len());
        for tx in txs {
            hydrated.push(self.hydrate(tx).await?);
        }
        Ok(hydrated)
    }

    async fn load(&self, id: Uuid) -> Result<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or(EscrowError::TransactionNotFound)
    }

    /// Re-populates the denormalized buyer snapshot on read paths.
    async fn hydrate(&self, mut tx: Transaction) -> Result<Transaction> {
        if let Some(buyer_id) = tx.buyer_id
            && tx.buyer.is_none()
        {
            tx.buyer = self.users.get(buyer_id).await?;
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{TransactionStore, UserStore};
    use crate::domain::user::User;
    use crate::infrastructure::in_memory::{InMemoryTransactionStore, InMemoryUserStore};
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: Arc<EscrowEngine>,
        transactions: Arc<InMemoryTransactionStore>,
        seller: User,
        buyer: User,
    }

    async fn fixture() -> Fixture {
        let users = Arc::new(InMemoryUserStore::new());
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let seller = User::new("Budi Martami", "budi@example.com", "hash".into());
        let buyer = User::new("Siti Aminah", "siti@example.com", "hash".into());
        users.store(seller.clone()).await.unwrap();
        users.store(buyer.clone()).await.unwrap();

        let engine = Arc::new(EscrowEngine::with_verification_delay(
            users,
            transactions.clone(),
            Duration::from_millis(20),
        ));
        Fixture {
            engine,
            transactions,
            seller,
            buyer,
        }
    }

    fn price() -> Amount {
        Amount::new(dec!(1000000)).unwrap()
    }

    async fn force_status(f: &Fixture, id: Uuid, status: TransactionStatus) {
        let mut tx = f.transactions.get(id).await.unwrap().unwrap();
        tx.status = status;
        f.transactions.store(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_creation_rejects_same_party() {
        let f = fixture().await;
        let result = f
            .engine
            .create_direct(f.seller.id, f.seller.id, "Laptop", "", price())
            .await;
        assert!(matches!(result, Err(EscrowError::SellerIsBuyer)));
    }

    #[tokio::test]
    async fn test_full_direct_flow_reaches_completed() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "RTX 4080", price())
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::PendingBuyerAcceptance);

        f.engine.accept(tx.id, f.buyer.id).await.unwrap();
        let paid = f.engine.pay(tx.id, f.buyer.id, "receipt.png").await.unwrap();
        assert_eq!(paid.status, TransactionStatus::PaymentVerification);

        f.engine.settle_pending().await;
        let held = f.engine.get(tx.id).await.unwrap().unwrap();
        assert_eq!(held.status, TransactionStatus::FundsHeld);

        f.engine.ship(tx.id, f.seller.id, "JNE-123").await.unwrap();
        let done = f.engine.confirm_receipt(tx.id, f.buyer.id).await.unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);
        assert_eq!(done.payment_proof.as_deref(), Some("receipt.png"));
        assert_eq!(done.tracking_info.as_deref(), Some("JNE-123"));
    }

    #[tokio::test]
    async fn test_claim_then_flow_round_trip() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_invite(f.seller.id, "Siti Aminah", "Kamera", "", price())
            .await
            .unwrap();
        let token = tx.invite_token.clone().unwrap();

        let claimed = f.engine.claim_invite(&token, f.buyer.id).await.unwrap();
        assert_eq!(claimed.status, TransactionStatus::PendingBuyerAcceptance);
        assert_eq!(claimed.buyer_id, Some(f.buyer.id));
        assert!(claimed.invite_token.is_none());
        assert!(claimed.buyer_name_for_invite.is_none());

        f.engine.accept(tx.id, f.buyer.id).await.unwrap();
        f.engine.pay(tx.id, f.buyer.id, "bukti.png").await.unwrap();
        f.engine.settle_pending().await;
        f.engine.ship(tx.id, f.seller.id, "SICEPAT-9").await.unwrap();
        let done = f.engine.confirm_receipt(tx.id, f.buyer.id).await.unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);
        assert_eq!(done.buyer_id, Some(f.buyer.id));
    }

    #[tokio::test]
    async fn test_self_claim_is_rejected() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_invite(f.seller.id, "Dewi", "Jasa", "", price())
            .await
            .unwrap();
        let token = tx.invite_token.clone().unwrap();

        let result = f.engine.claim_invite(&token, f.seller.id).await;
        assert!(matches!(result, Err(EscrowError::SelfClaim)));

        let unchanged = f.engine.get(tx.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TransactionStatus::AwaitingBuyerClaim);
        assert!(unchanged.invite_token.is_some());
    }

    #[tokio::test]
    async fn test_consumed_token_cannot_be_claimed_again() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_invite(f.seller.id, "Siti", "Jasa", "", price())
            .await
            .unwrap();
        let token = tx.invite_token.clone().unwrap();

        f.engine.claim_invite(&token, f.buyer.id).await.unwrap();
        let result = f.engine.claim_invite(&token, f.buyer.id).await;
        assert!(matches!(result, Err(EscrowError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_pay_requires_proof() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();
        f.engine.accept(tx.id, f.buyer.id).await.unwrap();

        let result = f.engine.pay(tx.id, f.buyer.id, "   ").await;
        assert!(matches!(result, Err(EscrowError::EmptyInput("payment proof"))));
        let unchanged = f.engine.get(tx.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TransactionStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_dispute_gating() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();
        f.engine.accept(tx.id, f.buyer.id).await.unwrap();

        // Not allowed from AWAITING_PAYMENT.
        let early = f.engine.dispute(tx.id, f.buyer.id, "barang rusak").await;
        assert!(matches!(early, Err(EscrowError::InvalidTransition { .. })));

        force_status(&f, tx.id, TransactionStatus::FundsHeld).await;
        let blank = f.engine.dispute(tx.id, f.buyer.id, "  ").await;
        assert!(matches!(blank, Err(EscrowError::EmptyInput("dispute reason"))));

        let disputed = f
            .engine
            .dispute(tx.id, f.buyer.id, "barang tidak sesuai")
            .await
            .unwrap();
        assert_eq!(disputed.status, TransactionStatus::Disputed);
        assert_eq!(disputed.dispute_reason.as_deref(), Some("barang tidak sesuai"));

        // Also allowed from COMPLETED.
        force_status(&f, tx.id, TransactionStatus::Completed).await;
        let from_completed = f.engine.dispute(tx.id, f.buyer.id, "refund").await.unwrap();
        assert_eq!(from_completed.status, TransactionStatus::Disputed);
    }

    #[tokio::test]
    async fn test_seller_cannot_dispute() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();
        force_status(&f, tx.id, TransactionStatus::FundsHeld).await;

        let result = f.engine.dispute(tx.id, f.seller.id, "alasan").await;
        assert!(matches!(result, Err(EscrowError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_asymmetry() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();

        // Both parties can cancel while awaiting payment.
        f.engine.accept(tx.id, f.buyer.id).await.unwrap();
        let cancelled = f.engine.cancel(tx.id, f.buyer.id).await.unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);

        // Neither party can cancel once funds are held.
        let tx2 = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Kamera", "", price())
            .await
            .unwrap();
        force_status(&f, tx2.id, TransactionStatus::FundsHeld).await;
        assert!(matches!(
            f.engine.cancel(tx2.id, f.buyer.id).await,
            Err(EscrowError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.engine.cancel(tx2.id, f.seller.id).await,
            Err(EscrowError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_completeness() {
        use TransactionStatus::*;
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();

        let statuses = [
            AwaitingBuyerClaim,
            PendingBuyerAcceptance,
            AwaitingPayment,
            PaymentVerification,
            FundsHeld,
            ItemShipped,
            Completed,
            Disputed,
            Cancelled,
            PaymentRejected,
            Refunded,
        ];
        let actions = ["accept", "pay", "ship", "confirm_receipt", "cancel", "dispute"];

        // Mirrors the transition table: (action, is_seller, status) -> allowed.
        let allowed = |action: &str, as_seller: bool, status: TransactionStatus| match (
            action, as_seller,
        ) {
            ("accept", false) => status == PendingBuyerAcceptance,
            ("pay", false) => status == AwaitingPayment,
            ("ship", true) => status == FundsHeld,
            ("confirm_receipt", false) => status == ItemShipped,
            ("cancel", true) => {
                matches!(status, AwaitingBuyerClaim | PendingBuyerAcceptance | AwaitingPayment)
            }
            ("cancel", false) => matches!(status, PendingBuyerAcceptance | AwaitingPayment),
            ("dispute", false) => matches!(status, FundsHeld | ItemShipped | Completed),
            _ => false,
        };

        for status in statuses {
            for action in actions {
                for (actor, as_seller) in [(f.seller.id, true), (f.buyer.id, false)] {
                    if allowed(action, as_seller, status) {
                        continue;
                    }
                    force_status(&f, tx.id, status).await;
                    let before = f.engine.get(tx.id).await.unwrap().unwrap();

                    let result = match action {
                        "accept" => f.engine.accept(tx.id, actor).await,
                        "pay" => f.engine.pay(tx.id, actor, "proof").await,
                        "ship" => f.engine.ship(tx.id, actor, "track").await,
                        "confirm_receipt" => f.engine.confirm_receipt(tx.id, actor).await,
                        "cancel" => f.engine.cancel(tx.id, actor).await,
                        "dispute" => f.engine.dispute(tx.id, actor, "reason").await,
                        _ => unreachable!(),
                    };

                    assert!(
                        matches!(result, Err(EscrowError::InvalidTransition { .. })),
                        "{action} as {} should be invalid from {status}",
                        if as_seller { "seller" } else { "buyer" },
                    );
                    let after = f.engine.get(tx.id).await.unwrap().unwrap();
                    assert_eq!(after.status, before.status);
                    assert_eq!(after.updated_at, before.updated_at);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_verification_is_noop_after_external_change() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();
        f.engine.accept(tx.id, f.buyer.id).await.unwrap();
        f.engine.pay(tx.id, f.buyer.id, "receipt.png").await.unwrap();

        // Simulate an out-of-band status change before the timer fires.
        force_status(&f, tx.id, TransactionStatus::Cancelled).await;
        f.engine.settle_pending().await;

        let after = f.engine.get(tx.id).await.unwrap().unwrap();
        assert_eq!(after.status, TransactionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_verification_leaves_status_untouched() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();
        f.engine.accept(tx.id, f.buyer.id).await.unwrap();
        f.engine.pay(tx.id, f.buyer.id, "receipt.png").await.unwrap();

        f.engine.verifier().cancel(tx.id).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let after = f.engine.get(tx.id).await.unwrap().unwrap();
        assert_eq!(after.status, TransactionStatus::PaymentVerification);
    }

    #[tokio::test]
    async fn test_list_for_user_is_newest_first_and_hydrated() {
        let f = fixture().await;
        let first = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Kamera", "", price())
            .await
            .unwrap();

        // Drop the denormalized buyer to prove the read path restores it.
        let mut stored = f.transactions.get(first.id).await.unwrap().unwrap();
        stored.buyer = None;
        f.transactions.store(stored).await.unwrap();

        let listed = f.engine.list_for_user(f.buyer.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(listed[1].buyer.as_ref().map(|b| b.id), Some(f.buyer.id));
    }

    #[tokio::test]
    async fn test_concurrent_accept_yields_one_success() {
        let f = fixture().await;
        let tx = f
            .engine
            .create_direct(f.seller.id, f.buyer.id, "Laptop", "", price())
            .await
            .unwrap();

        let a = {
            let engine = f.engine.clone();
            let buyer = f.buyer.id;
            tokio::spawn(async move { engine.accept(tx.id, buyer).await })
        };
        let b = {
            let engine = f.engine.clone();
            let buyer = f.buyer.id;
            tokio::spawn(async move { engine.accept(tx.id, buyer).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(EscrowError::InvalidTransition { .. })
        )));
    }

    #[tokio::test]
    async fn test_concurrent_claim_is_at_most_once() {
        let f = fixture().await;
        let users = [
            User::new("Agus", "agus@example.com", "hash".into()),
            User::new("Dewi", "dewi@example.com", "hash".into()),
        ];
        // Reach the shared user store through a fresh fixture-level handle.
        let store = Arc::new(InMemoryUserStore::new());
        let transactions = Arc::new(InMemoryTransactionStore::new());
        store.store(f.seller.clone()).await.unwrap();
        for u in &users {
            store.store(u.clone()).await.unwrap();
        }
        let engine = Arc::new(EscrowEngine::with_verification_delay(
            store,
            transactions,
            Duration::from_millis(20),
        ));

        let tx = engine
            .create_invite(f.seller.id, "Siapa Saja", "Jasa", "", price())
            .await
            .unwrap();
        let token = tx.invite_token.clone().unwrap();

        let handles: Vec<_> = users
            .iter()
            .map(|u| {
                let engine = engine.clone();
                let token = token.clone();
                let uid = u.id;
                tokio::spawn(async move { engine.claim_invite(&token, uid).await })
            })
            .collect();

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(claimed) => {
                    winners += 1;
                    assert!(claimed.buyer_id.is_some());
                }
                Err(EscrowError::InvalidToken) => losers += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(losers, 1);

        let settled = engine.get(tx.id).await.unwrap().unwrap();
        assert!(settled.buyer_id.is_some());
        assert!(settled.invite_token.is_none());
    }
}
