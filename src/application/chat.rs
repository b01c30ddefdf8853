use crate::domain::chat::ChatMessage;
use crate::domain::ports::{ChatStoreRef, TransactionStoreRef, UserStoreRef};
use crate::domain::transaction::TransactionStatus;
use crate::error::{EscrowError, Result};
use tracing::debug;
use uuid::Uuid;

/// Append-only per-transaction chat.
///
/// The closed-chat guard is intentionally asymmetric: once a transaction is
/// COMPLETED or CANCELLED, only non-participants are blocked from posting.
/// Participants may keep the thread going, and anyone may post on an open
/// transaction.
pub struct ChatService {
    users: UserStoreRef,
    transactions: TransactionStoreRef,
    messages: ChatStoreRef,
}

impl ChatService {
    pub fn new(
        users: UserStoreRef,
        transactions: TransactionStoreRef,
        messages: ChatStoreRef,
    ) -> Self {
        Self {
            users,
            transactions,
            messages,
        }
    }

    pub async fn send(
        &self,
        transaction_id: Uuid,
        sender_id: Uuid,
        text: &str,
    ) -> Result<ChatMessage> {
        if text.trim().is_empty() {
            return Err(EscrowError::EmptyInput("message"));
        }
        let sender = self
            .users
            .get(sender_id)
            .await?
            .ok_or(EscrowError::UserNotFound)?;
        let tx = self
            .transactions
            .get(transaction_id)
            .await?
            .ok_or(EscrowError::TransactionNotFound)?;

        if matches!(
            tx.status,
            TransactionStatus::Completed | TransactionStatus::Cancelled
        ) && !tx.is_participant(sender_id)
        {
            return Err(EscrowError::ChatClosed);
        }

        let message = ChatMessage::new(transaction_id, sender_id, &sender.name, text);
        self.messages.append(message.clone()).await?;
        debug!(%transaction_id, sender = %sender_id, "chat message stored");
        Ok(message)
    }

    /// Messages for a transaction, oldest first.
    pub async fn list(&self, transaction_id: Uuid) -> Result<Vec<ChatMessage>> {
        let mut messages = self.messages.for_transaction(transaction_id).await?;
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(messages)
    }
}
