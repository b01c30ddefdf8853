use crate::domain::chat::ChatMessage;
use crate::domain::ports::{ChatStore, TransactionStore, UserStore};
use crate::domain::transaction::Transaction;
use crate::domain::user::User;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for users.
///
/// Uses `Arc<RwLock<HashMap<Uuid, User>>>` to allow shared concurrent access.
#[derive(Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn store(&self, user: User) -> Result<()> {
        let mut users = self.users.write().await;
        users.insert(user.id, user);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn all(&self) -> Result<Vec<User>> {
        let users = self.users.read().await;
        Ok(users.values().cloned().collect())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut users = self.users.write().await;
        Ok(users.remove(&id).is_some())
    }
}

/// A thread-safe in-memory store for transactions.
///
/// Atomicity of state transitions is not this store's job; `EscrowEngine`
/// serializes read-modify-write cycles per transaction id.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn store(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&id).cloned())
    }

    async fn find_by_invite_token(&self, token: &str) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|tx| tx.invite_token.as_deref() == Some(token))
            .cloned())
    }

    async fn for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn involves_user(&self, user_id: Uuid) -> Result<bool> {
        let transactions = self.transactions.read().await;
        Ok(transactions.values().any(|tx| tx.is_participant(user_id)))
    }
}

/// A thread-safe in-memory append-only store for chat messages.
#[derive(Default, Clone)]
pub struct InMemoryChatStore {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn append(&self, message: ChatMessage) -> Result<()> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        Ok(())
    }

    async fn for_transaction(&self, transaction_id: Uuid) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}
