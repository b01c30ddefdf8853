use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single chat message tied to a transaction. Append-only; never mutated or
/// deleted once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub sender_id: Uuid,
    /// Sender display name captured at send time.
    pub sender_name: String,
    pub message_text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(transaction_id: Uuid, sender_id: Uuid, sender_name: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            sender_id,
            sender_name: sender_name.to_string(),
            message_text: text.trim().to_string(),
            timestamp: Utc::now(),
        }
    }
}
