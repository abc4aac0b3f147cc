//! Durable storage for game records and per-account bookkeeping.
//!
//! Writes are last-write-wins: a `put` replaces whatever was stored under
//! the same id without any version check.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sprig_formats::{document, DefinitionError, Game};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("game {id} serializes to {size} bytes, above the {limit} byte storage limit")]
    DocumentTooLarge { id: String, size: usize, limit: usize },
    #[error("`{0}` cannot be used as a storage key")]
    InvalidKey(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored document {what} is unreadable: {source}")]
    Corrupt {
        what: String,
        #[source]
        source: DefinitionError,
    },
    #[error("account record {what} is unreadable: {source}")]
    Account {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Per-account bookkeeping kept next to the game records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountState {
    pub name: String,
    /// Repository revision of the last import that completed cleanly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_revision: Option<String>,
    /// When the running import claimed this account, if one did.
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub import_started_at: Option<OffsetDateTime>,
}

impl AccountState {
    pub fn new(name: impl Into<String>) -> Self {
        AccountState {
            name: name.into(),
            ..AccountState::default()
        }
    }
}

pub trait GameStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Game>, StoreError>;

    fn put(&self, game: &Game) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    fn records(&self) -> Result<Vec<Game>, StoreError>;

    /// State of `name`; unknown accounts come back empty.
    fn account(&self, name: &str) -> Result<AccountState, StoreError>;

    fn put_account(&self, state: &AccountState) -> Result<(), StoreError>;

    fn accounts(&self) -> Result<Vec<AccountState>, StoreError>;

    fn account_records(&self, account: &str) -> Result<Vec<Game>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|game| game.account.as_deref() == Some(account))
            .collect())
    }
}

/// Encodes `game`, refusing documents above `limit` bytes.
pub(crate) fn encode_bounded(game: &Game, limit: usize) -> Result<Vec<u8>, StoreError> {
    let bytes = document::encode(game).map_err(|source| StoreError::Corrupt {
        what: game.id.clone(),
        source,
    })?;
    if bytes.len() > limit {
        return Err(StoreError::DocumentTooLarge {
            id: game.id.clone(),
            size: bytes.len(),
            limit,
        });
    }
    Ok(bytes)
}

/// Rejects ids that would escape a flat key space.
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
