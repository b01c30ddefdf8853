use crate::domain::transaction::TransactionStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EscrowError>;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("email is already registered")]
    DuplicateEmail,
    #[error("user not found")]
    UserNotFound,
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("user is referenced by existing transactions as seller or buyer")]
    UserInUse,
    #[error("transaction invite is invalid, already claimed, or expired")]
    InvalidToken,
    #[error("an invite cannot be claimed by the seller who created it")]
    SelfClaim,
    #[error("seller and buyer must be different users")]
    SellerIsBuyer,
    #[error("'{action}' is not allowed for this user while the transaction is {status}")]
    InvalidTransition {
        action: &'static str,
        status: TransactionStatus,
    },
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("chat for this transaction is closed")]
    ChatClosed,
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
