use crate::application::chat::ChatService;
use crate::application::escrow::EscrowEngine;
use crate::application::identity::IdentityService;
use crate::domain::money::Amount;
use crate::domain::transaction::Transaction;
use crate::error::{EscrowError, Result};
use crate::infrastructure::in_memory::{
    InMemoryChatStore, InMemoryTransactionStore, InMemoryUserStore,
};
use crate::interfaces::csv::script_reader::{ScriptAction, ScriptCommand};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Drives the escrow services from a scenario script.
///
/// The runner owns a fresh set of in-memory stores and maps the script's
/// emails and transaction labels onto generated ids. Pending payment
/// verifications are settled before each command so scripts read
/// deterministically: a `ship` right after a `pay` sees FUNDS_HELD.
pub struct ScenarioRunner {
    identity: IdentityService,
    engine: EscrowEngine,
    chat: ChatService,
    users_by_email: HashMap<String, Uuid>,
    labels: BTreeMap<String, Uuid>,
    invite_tokens: HashMap<String, String>,
}

impl ScenarioRunner {
    pub fn new(verification_delay: Duration) -> Self {
        let users = Arc::new(InMemoryUserStore::new());
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let messages = Arc::new(InMemoryChatStore::new());

        Self {
            identity: IdentityService::new(users.clone(), transactions.clone()),
            engine: EscrowEngine::with_verification_delay(
                users.clone(),
                transactions.clone(),
                verification_delay,
            ),
            chat: ChatService::new(users, transactions, messages),
            users_by_email: HashMap::new(),
            labels: BTreeMap::new(),
            invite_tokens: HashMap::new(),
        }
    }

    pub async fn run_command(&mut self, cmd: ScriptCommand) -> Result<()> {
        self.engine.settle_pending().await;

        match cmd.action {
            ScriptAction::Register => {
                let name = require(&cmd.item, "name")?;
                let password = require(&cmd.detail, "password")?;
                let user = self.identity.register(&name, &cmd.actor, &password).await?;
                self.users_by_email.insert(user.email.clone(), user.id);
            }
            ScriptAction::Create => {
                let seller = self.actor(&cmd)?;
                let buyer_email = require(&cmd.detail, "buyer email")?;
                let buyer = self.user(&buyer_email)?;
                let tx = self
                    .engine
                    .create_direct(
                        seller,
                        buyer,
                        &require(&cmd.item, "item")?,
                        "",
                        price(&cmd)?,
                    )
                    .await?;
                self.labels.insert(self.label(&cmd)?, tx.id);
            }
            ScriptAction::Invite => {
                let seller = self.actor(&cmd)?;
                let buyer_name = require(&cmd.detail, "buyer name")?;
                let tx = self
                    .engine
                    .create_invite(
                        seller,
                        &buyer_name,
                        &require(&cmd.item, "item")?,
                        "",
                        price(&cmd)?,
                    )
                    .await?;
                let label = self.label(&cmd)?;
                if let Some(token) = tx.invite_token.clone() {
                    self.invite_tokens.insert(label.clone(), token);
                }
                self.labels.insert(label, tx.id);
            }
            ScriptAction::Claim => {
                let actor = self.actor(&cmd)?;
                let token = self
                    .invite_tokens
                    .get(&self.label(&cmd)?)
                    .cloned()
                    .ok_or(EscrowError::InvalidToken)?;
                self.engine.claim_invite(&token, actor).await?;
            }
            ScriptAction::Accept => {
                let (id, actor) = self.target(&cmd)?;
                self.engine.accept(id, actor).await?;
            }
            ScriptAction::Pay => {
                let (id, actor) = self.target(&cmd)?;
                self.engine
                    .pay(id, actor, cmd.detail.as_deref().unwrap_or(""))
                    .await?;
            }
            ScriptAction::Ship => {
                let (id, actor) = self.target(&cmd)?;
                self.engine
                    .ship(id, actor, cmd.detail.as_deref().unwrap_or(""))
                    .await?;
            }
            ScriptAction::Confirm => {
                let (id, actor) = self.target(&cmd)?;
                self.engine.confirm_receipt(id, actor).await?;
            }
            ScriptAction::Cancel => {
                let (id, actor) = self.target(&cmd)?;
                self.engine.cancel(id, actor).await?;
            }
            ScriptAction::Dispute => {
                let (id, actor) = self.target(&cmd)?;
                self.engine
                    .dispute(id, actor, cmd.detail.as_deref().unwrap_or(""))
                    .await?;
            }
            ScriptAction::Chat => {
                let (id, actor) = self.target(&cmd)?;
                self.chat
                    .send(id, actor, cmd.detail.as_deref().unwrap_or(""))
                    .await?;
            }
        }
        Ok(())
    }

    /// Settles pending verifications and returns the final state of every
    /// labelled transaction, ordered by label.
    pub async fn finish(self) -> Result<Vec<(String, Transaction)>> {
        self.engine.settle_pending().await;

        let mut rows = Vec::with_capacity(self.labels.len());
        for (label, id) in self.labels {
            let tx = self
                .engine
                .get(id)
                .await?
                .ok_or(EscrowError::TransactionNotFound)?;
            rows.push((label, tx));
        }
        Ok(rows)
    }

    fn actor(&self, cmd: &ScriptCommand) -> Result<Uuid> {
        self.user(&cmd.actor)
    }

    fn user(&self, email: &str) -> Result<Uuid> {
        self.users_by_email
            .get(&email.trim().to_lowercase())
            .copied()
            .ok_or(EscrowError::UserNotFound)
    }

    fn label(&self, cmd: &ScriptCommand) -> Result<String> {
        match cmd.tx.as_deref() {
            Some(label) if !label.is_empty() => Ok(label.to_string()),
            _ => Err(EscrowError::EmptyInput("tx label")),
        }
    }

    fn target(&self, cmd: &ScriptCommand) -> Result<(Uuid, Uuid)> {
        let label = self.label(cmd)?;
        let id = self
            .labels
            .get(&label)
            .copied()
            .ok_or(EscrowError::TransactionNotFound)?;
        Ok((id, self.actor(cmd)?))
    }
}

fn require(field: &Option<String>, name: &'static str) -> Result<String> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(EscrowError::EmptyInput(name)),
    }
}

fn price(cmd: &ScriptCommand) -> Result<Amount> {
    let raw = cmd.price.ok_or(EscrowError::EmptyInput("price"))?;
    Amount::new(raw)
}
