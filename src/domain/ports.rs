use crate::domain::chat::ChatMessage;
use crate::domain::transaction::Transaction;
use crate::domain::user::User;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn store(&self, user: User) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<User>>;
    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn all(&self) -> Result<Vec<User>>;
    /// Returns `false` when no such user existed.
    async fn remove(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn store(&self, tx: Transaction) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn find_by_invite_token(&self, token: &str) -> Result<Option<Transaction>>;
    /// Transactions where the user is seller or buyer, in no particular order.
    async fn for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>>;
    /// Whether the user appears as seller or buyer anywhere. Referential
    /// integrity check for user deletion.
    async fn involves_user(&self, user_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append(&self, message: ChatMessage) -> Result<()>;
    async fn for_transaction(&self, transaction_id: Uuid) -> Result<Vec<ChatMessage>>;
}

// The services share each store, so the aliases hand out `Arc`s rather than
// exclusive boxes.
pub type UserStoreRef = Arc<dyn UserStore>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type ChatStoreRef = Arc<dyn ChatStore>;
