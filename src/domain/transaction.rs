use crate::domain::money::{Amount, escrow_fee};
use crate::domain::user::User;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of an escrow transaction.
///
/// COMPLETED, CANCELLED, and REFUNDED are terminal; DISPUTED can still be
/// entered from FUNDS_HELD, ITEM_SHIPPED, and COMPLETED. All other movement
/// between statuses goes through `EscrowEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
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
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AwaitingBuyerClaim => "AWAITING_BUYER_CLAIM",
            Self::PendingBuyerAcceptance => "PENDING_BUYER_ACCEPTANCE",
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::PaymentVerification => "PAYMENT_VERIFICATION",
            Self::FundsHeld => "FUNDS_HELD",
            Self::ItemShipped => "ITEM_SHIPPED",
            Self::Completed => "COMPLETED",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
            Self::PaymentRejected => "PAYMENT_REJECTED",
            Self::Refunded => "REFUNDED",
        };
        write!(f, "{label}")
    }
}

/// The entity at the center of the system.
///
/// `seller`, `price`, `escrow_fee`, and `total_amount` are fixed at creation.
/// `buyer_id` moves from `None` to a concrete id exactly once (invite claim)
/// or is set directly at creation. `buyer` is a denormalized snapshot that
/// read paths re-populate whenever `buyer_id` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub seller: User,
    pub buyer_id: Option<Uuid>,
    pub buyer: Option<User>,
    /// Display name the seller supplied for an invited buyer. Present only
    /// while the status is AWAITING_BUYER_CLAIM.
    pub buyer_name_for_invite: Option<String>,
    /// Single-use claim token. Cleared in the same write that sets the buyer.
    pub invite_token: Option<String>,
    pub item_name: String,
    pub item_description: String,
    pub price: Amount,
    pub escrow_fee: Amount,
    pub total_amount: Amount,
    pub status: TransactionStatus,
    pub payment_proof: Option<String>,
    pub tracking_info: Option<String>,
    pub dispute_reason: Option<String>,
    pub resolution_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A transaction whose buyer is known up front.
    pub fn direct(
        seller: User,
        buyer: User,
        item_name: &str,
        item_description: &str,
        price: Amount,
    ) -> Self {
        let mut tx = Self::base(seller, item_name, item_description, price);
        tx.buyer_id = Some(buyer.id);
        tx.buyer = Some(buyer);
        tx.status = TransactionStatus::PendingBuyerAcceptance;
        tx
    }

    /// A transaction created before the buyer's identity is known, bound to a
    /// single-use invite token.
    pub fn invited(
        seller: User,
        buyer_name: &str,
        item_name: &str,
        item_description: &str,
        price: Amount,
    ) -> Self {
        let mut tx = Self::base(seller, item_name, item_description, price);
        tx.buyer_name_for_invite = Some(buyer_name.trim().to_string());
        tx.invite_token = Some(generate_invite_token());
        tx.status = TransactionStatus::AwaitingBuyerClaim;
        tx
    }

    fn base(seller: User, item_name: &str, item_description: &str, price: Amount) -> Self {
        let fee = escrow_fee(price);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seller,
            buyer_id: None,
            buyer: None,
            buyer_name_for_invite: None,
            invite_token: None,
            item_name: item_name.trim().to_string(),
            item_description: item_description.trim().to_string(),
            price,
            escrow_fee: fee,
            total_amount: price + fee,
            status: TransactionStatus::AwaitingBuyerClaim,
            payment_proof: None,
            tracking_info: None,
            dispute_reason: None,
            resolution_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_seller(&self, user_id: Uuid) -> bool {
        self.seller.id == user_id
    }

    pub fn is_buyer(&self, user_id: Uuid) -> bool {
        self.buyer_id == Some(user_id)
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.is_seller(user_id) || self.is_buyer(user_id)
    }

    /// Bumps `updated_at`. Called on every successful mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Generates an invite token. Uniqueness is what matters here, not
/// cryptographic strength; 24 alphanumerics keep accidental collisions and
/// guessing both out of reach for an in-process store.
pub fn generate_invite_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}
