use crate::error::{EscrowError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One step of an escrow scenario script.
#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ScriptAction {
    Register,
    Create,
    Invite,
    Claim,
    Accept,
    Pay,
    Ship,
    Confirm,
    Cancel,
    Dispute,
    Chat,
}

/// A row of the scenario CSV: `action, actor, tx, item, price, detail`.
///
/// `actor` is always a user email. `tx` is a script-local transaction label.
/// Column meaning varies per action:
/// - `register`: `item` carries the display name, `detail` the password.
/// - `create`: `detail` is the buyer's email; `invite`: the invited buyer's
///   display name.
/// - `pay` / `ship` / `dispute` / `chat`: `detail` is the proof reference,
///   tracking reference, reason, or message text respectively.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScriptCommand {
    pub action: ScriptAction,
    pub actor: String,
    pub tx: Option<String>,
    pub item: Option<String>,
    pub price: Option<Decimal>,
    pub detail: Option<String>,
}

/// Reads scenario commands from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// yielding commands lazily so large scripts stream.
pub struct ScriptReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScriptReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}
