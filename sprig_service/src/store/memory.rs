use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use sprig_formats::{document, Game};

use super::{encode_bounded, AccountState, GameStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    games: BTreeMap<String, Vec<u8>>,
    accounts: BTreeMap<String, AccountState>,
}

/// In-process store keeping each record in its serialized form.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_document_bytes: usize,
}

impl MemoryStore {
    pub fn new(max_document_bytes: usize) -> Self {
        MemoryStore {
            inner: Mutex::new(Inner::default()),
            max_document_bytes,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn decode(id: &str, bytes: &[u8]) -> Result<Game, StoreError> {
    document::decode(bytes).map_err(|source| StoreError::Corrupt {
        what: id.to_string(),
        source,
    })
}

impl GameStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Game>, StoreError> {
        let inner = self.lock()?;
        inner.games.get(id).map(|bytes| decode(id, bytes)).transpose()
    }

    fn put(&self, game: &Game) -> Result<(), StoreError> {
        let bytes = encode_bounded(game, self.max_document_bytes)?;
        self.lock()?.games.insert(game.id.clone(), bytes);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.games.remove(id).is_some())
    }

    fn records(&self) -> Result<Vec<Game>, StoreError> {
        let inner = self.lock()?;
        inner.games.iter().map(|(id, bytes)| decode(id, bytes)).collect()
    }

    fn account(&self, name: &str) -> Result<AccountState, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .get(name)
            .cloned()
            .unwrap_or_else(|| AccountState::new(name)))
    }

    fn put_account(&self, state: &AccountState) -> Result<(), StoreError> {
        self.lock()?.accounts.insert(state.name.clone(), state.clone());
        Ok(())
    }

    fn accounts(&self) -> Result<Vec<AccountState>, StoreError> {
        Ok(self.lock()?.accounts.values().cloned().collect())
    }
}
