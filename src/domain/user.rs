use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user. Immutable after registration except for the avatar and
/// credential; never deleted while referenced by any transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Unique, stored lowercase, compared case-insensitively.
    pub email: String,
    /// Argon2 PHC string. Never serialized into reports or API payloads.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: &str, email: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email: email.trim().to_lowercase(),
            password_hash,
            avatar: default_avatar(name),
            created_at: Utc::now(),
        }
    }
}

/// Default avatar reference derived from the display name.
pub fn default_avatar(name: &str) -> String {
    format!(
        "https://ui-avatars.com/api/?name={}&background=random&color=fff",
        name.trim().replace(' ', "+")
    )
}
