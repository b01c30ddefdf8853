use crate::domain::ports::{TransactionStoreRef, UserStoreRef};
use crate::domain::user::User;
use crate::error::{EscrowError, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::info;
use uuid::Uuid;

/// Registration, login, lookup, and deletion of users.
///
/// Credentials are stored as salted argon2 hashes; plaintext passwords never
/// reach the store.
pub struct IdentityService {
    users: UserStoreRef,
    transactions: TransactionStoreRef,
}

impl IdentityService {
    pub fn new(users: UserStoreRef, transactions: TransactionStoreRef) -> Self {
        Self { users, transactions }
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User> {
        if self.users.find_by_email(email).await?.is_some() {
            return Err(EscrowError::DuplicateEmail);
        }

        let user = User::new(name, email, hash_password(password)?);
        self.users.store(user.clone()).await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(EscrowError::UserNotFound)?;
        if !verify_password(&user.password_hash, password)? {
            return Err(EscrowError::InvalidCredential);
        }
        Ok(user)
    }

    /// Resolves a user for an external identity (e.g. a federated sign-in),
    /// creating one on first sight. The display name is derived from the
    /// email local part; a random local credential keeps the record uniform
    /// with password-registered users.
    pub async fn resolve_external(&self, email: &str) -> Result<User> {
        if let Some(user) = self.users.find_by_email(email).await? {
            return Ok(user);
        }

        let name = display_name_from_email(email);
        let credential: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let user = self.register(&name, email, &credential).await?;
        info!(user_id = %user.id, "user created from external identity");
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.users.get(id).await
    }

    /// All users except the given one. Populates buyer-selection lists.
    pub async fn list_others(&self, excluding: Uuid) -> Result<Vec<User>> {
        let mut users = self.users.all().await?;
        users.retain(|u| u.id != excluding);
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    /// Deletes a user unless any transaction references them as seller or
    /// buyer. Integrity is checked here at deletion time; nothing cascades.
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        if self.transactions.involves_user(id).await? {
            return Err(EscrowError::UserInUse);
        }
        if !self.users.remove(id).await? {
            return Err(EscrowError::UserNotFound);
        }
        info!(user_id = %id, "user deleted");
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EscrowError::PasswordHash(e.to_string()))
}

fn verify_password(hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| EscrowError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// "budi.martami@example.com" -> "Budi Martami"
fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    local
        .split(['.', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
