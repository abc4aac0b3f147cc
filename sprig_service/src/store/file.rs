use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sprig_formats::{document, Game};

use super::{check_key, encode_bounded, AccountState, GameStore, StoreError};

const GAMES_DIR: &str = "games";
const ACCOUNTS_DIR: &str = "accounts";

/// One JSON document per game and per account under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_document_bytes: usize,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>, max_document_bytes: usize) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [GAMES_DIR, ACCOUNTS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(io_error(&path))?;
        }
        Ok(FileStore {
            root,
            max_document_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn game_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        check_key(id)?;
        Ok(self.root.join(GAMES_DIR).join(format!("{id}.json")))
    }

    fn account_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        check_key(name)?;
        Ok(self.root.join(ACCOUNTS_DIR).join(format!("{name}.json")))
    }

    /// Writes through a sibling temp file so readers never see half a document.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes).map_err(io_error(&staging))?;
        fs::rename(&staging, path).map_err(io_error(path))
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path)(err)),
        }
    }

    fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let path = entry.map_err(io_error(dir))?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn decode_game(path: &Path, bytes: &[u8]) -> Result<Game, StoreError> {
        document::decode(bytes).map_err(|source| StoreError::Corrupt {
            what: path.display().to_string(),
            source,
        })
    }

    fn decode_account(path: &Path, bytes: &[u8]) -> Result<AccountState, StoreError> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Account {
            what: path.display().to_string(),
            source,
        })
    }
}

impl GameStore for FileStore {
    fn get(&self, id: &str) -> Result<Option<Game>, StoreError> {
        let path = self.game_path(id)?;
        Self::read_optional(&path)?
            .map(|bytes| Self::decode_game(&path, &bytes))
            .transpose()
    }

    fn put(&self, game: &Game) -> Result<(), StoreError> {
        let path = self.game_path(&game.id)?;
        let bytes = encode_bounded(game, self.max_document_bytes)?;
        Self::write_atomic(&path, &bytes)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.game_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    fn records(&self) -> Result<Vec<Game>, StoreError> {
        let dir = self.root.join(GAMES_DIR);
        Self::json_files(&dir)?
            .into_iter()
            .map(|path| {
                let bytes = fs::read(&path).map_err(io_error(&path))?;
                Self::decode_game(&path, &bytes)
            })
            .collect()
    }

    fn account(&self, name: &str) -> Result<AccountState, StoreError> {
        let path = self.account_path(name)?;
        match Self::read_optional(&path)? {
            Some(bytes) => Self::decode_account(&path, &bytes),
            None => Ok(AccountState::new(name)),
        }
    }

    fn put_account(&self, state: &AccountState) -> Result<(), StoreError> {
        let path = self.account_path(&state.name)?;
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Account {
            what: state.name.clone(),
            source,
        })?;
        Self::write_atomic(&path, &bytes)
    }

    fn accounts(&self) -> Result<Vec<AccountState>, StoreError> {
        let dir = self.root.join(ACCOUNTS_DIR);
        Self::json_files(&dir)?
            .into_iter()
            .map(|path| {
                let bytes = fs::read(&path).map_err(io_error(&path))?;
                Self::decode_account(&path, &bytes)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::FileStore;
    use crate::store::{AccountState, GameStore, StoreError};
    use sprig_formats::Game;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn games_and_accounts_persist_across_handles() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::open(dir.path(), 1 << 20).expect("open");
        let mut game = Game::new("g1", "demo");
        game.account = Some("acct".into());
        store.put(&game).expect("put");
        let mut state = AccountState::new("acct");
        state.last_revision = Some("r1".into());
        state.import_started_at = Some(datetime!(2026-03-01 10:00 UTC));
        store.put_account(&state).expect("put account");

        let reopened = FileStore::open(dir.path(), 1 << 20).expect("reopen");
        assert_eq!(reopened.get("g1").expect("get").expect("present").name, "demo");
        assert_eq!(reopened.records().expect("records").len(), 1);
        assert_eq!(reopened.account("acct").expect("account"), state);
        assert_eq!(reopened.accounts().expect("accounts").len(), 1);
    }

    #[test]
    fn traversal_ids_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::open(dir.path(), 1 << 20).expect("open");
        let game = Game::new("../escape", "bad");
        assert!(matches!(store.put(&game), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn deleting_missing_records_is_not_an_error() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::open(dir.path(), 1 << 20).expect("open");
        assert!(!store.delete("absent").expect("delete"));
    }
}
