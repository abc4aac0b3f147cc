//! Mirrors game definitions from an external content repository into the
//! store, one account at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};
use sprig_formats::{document, Audit, Game, GameStatus, ImportStamp, SourceTag};
use thiserror::Error;
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::error::ServiceError;
use crate::store::GameStore;

/// Actor recorded on audit fields for imported records.
pub const IMPORT_ACTOR: &str = "import";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("content repository unavailable: {0}")]
    Unavailable(String),
    #[error("content repository has no entry {0}")]
    MissingEntry(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One listed definition and its item-level revision marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub path: String,
    pub revision: String,
}

pub trait ContentRepository: Send + Sync {
    fn latest_revision(&self) -> Result<String, RepositoryError>;

    fn list_entries(&self, prefix: &str) -> Result<Vec<EntryRef>, RepositoryError>;

    fn get_entry(&self, path: &str) -> Result<Vec<u8>, RepositoryError>;
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn combined_revision<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (path, revision) in entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(revision.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

/// Repository held in memory; mostly useful for wiring and tests.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    unavailable: Mutex<bool>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_entry(&self, path: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.into(), bytes);
        }
    }

    pub fn remove_entry(&self, path: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(path);
        }
    }

    /// Makes every call fail as if the backing service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.lock() {
            *flag = unavailable;
        }
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Vec<u8>>, RepositoryError> {
        let down = self.unavailable.lock().map(|flag| *flag).unwrap_or(true);
        if down {
            return Err(RepositoryError::Unavailable("memory repository offline".into()));
        }
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| RepositoryError::Unavailable("memory repository lock poisoned".into()))
    }
}

impl ContentRepository for MemoryRepository {
    fn latest_revision(&self) -> Result<String, RepositoryError> {
        let entries = self.snapshot()?;
        let revisions: Vec<(String, String)> = entries
            .iter()
            .map(|(path, bytes)| (path.clone(), digest_hex(bytes)))
            .collect();
        Ok(combined_revision(revisions.iter().map(|(p, r)| (p.as_str(), r.as_str()))))
    }

    fn list_entries(&self, prefix: &str) -> Result<Vec<EntryRef>, RepositoryError> {
        Ok(self
            .snapshot()?
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, bytes)| EntryRef {
                path: path.clone(),
                revision: digest_hex(bytes),
            })
            .collect())
    }

    fn get_entry(&self, path: &str) -> Result<Vec<u8>, RepositoryError> {
        self.snapshot()?
            .remove(path)
            .ok_or_else(|| RepositoryError::MissingEntry(path.to_string()))
    }
}

/// Repository backed by a directory tree; entry paths are `/`-separated
/// and relative to the root, revisions are SHA-256 digests of the content.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryRepository { root: root.into() }
    }

    fn scan(&self) -> Result<Vec<(String, PathBuf)>, RepositoryError> {
        if !self.root.is_dir() {
            return Err(RepositoryError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((key, entry.path().to_path_buf()));
        }
        Ok(files)
    }

    fn read(path: &Path) -> Result<Vec<u8>, RepositoryError> {
        fs::read(path).map_err(|source| RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ContentRepository for DirectoryRepository {
    fn latest_revision(&self) -> Result<String, RepositoryError> {
        let mut revisions = Vec::new();
        for (key, path) in self.scan()? {
            revisions.push((key, digest_hex(&Self::read(&path)?)));
        }
        Ok(combined_revision(revisions.iter().map(|(p, r)| (p.as_str(), r.as_str()))))
    }

    fn list_entries(&self, prefix: &str) -> Result<Vec<EntryRef>, RepositoryError> {
        let mut entries = Vec::new();
        for (key, path) in self.scan()? {
            if !key.starts_with(prefix) {
                continue;
            }
            entries.push(EntryRef {
                revision: digest_hex(&Self::read(&path)?),
                path: key,
            });
        }
        Ok(entries)
    }

    fn get_entry(&self, path: &str) -> Result<Vec<u8>, RepositoryError> {
        if path.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(RepositoryError::MissingEntry(path.to_string()));
        }
        let full = self.root.join(path);
        if !full.is_file() {
            return Err(RepositoryError::MissingEntry(path.to_string()));
        }
        Self::read(&full)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportItemError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub account: String,
    pub revision: String,
    pub skipped: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<ImportItemError>,
}

impl ImportReport {
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

pub struct ImportSynchronizer<'a> {
    store: &'a dyn GameStore,
    repository: &'a dyn ContentRepository,
    prefix: &'a str,
    max_games: usize,
}

enum EntryOutcome {
    Created,
    Updated,
    Refreshed,
}

impl<'a> ImportSynchronizer<'a> {
    pub fn new(
        store: &'a dyn GameStore,
        repository: &'a dyn ContentRepository,
        prefix: &'a str,
        max_games: usize,
    ) -> Self {
        ImportSynchronizer {
            store,
            repository,
            prefix,
            max_games,
        }
    }

    /// Brings `account` in line with the repository's latest revision.
    ///
    /// Per-entry failures are collected in the report; work already applied
    /// is kept. The account's revision stamp only advances when every entry
    /// went through, so failed entries are retried by the next sweep.
    pub fn sync(&self, account: &str, force: bool, now: OffsetDateTime) -> Result<ImportReport, ServiceError> {
        let mut state = self.store.account(account)?;
        let revision = self.repository.latest_revision()?;
        let mut report = ImportReport {
            account: account.to_string(),
            revision: revision.clone(),
            ..ImportReport::default()
        };
        if !force && state.last_revision.as_deref() == Some(revision.as_str()) {
            report.skipped = true;
            log::debug!("import for {account} skipped; revision {revision} already imported");
            return Ok(report);
        }

        let entries: Vec<EntryRef> = self
            .repository
            .list_entries(self.prefix)?
            .into_iter()
            .filter(|entry| entry.path.ends_with(".json"))
            .collect();

        // Only a record still in play takes upstream content. Inactive ones
        // are undo history; a path held only by those was taken over by a
        // local edit and is left alone.
        let mut imported: BTreeMap<String, Game> = BTreeMap::new();
        let mut history: BTreeSet<String> = BTreeSet::new();
        for record in self.store.account_records(account)? {
            let Some(path) = record.import.as_ref().map(|stamp| stamp.path.clone()) else {
                continue;
            };
            if record.status == GameStatus::Inactive {
                history.insert(path);
            } else {
                imported.insert(path, record);
            }
        }

        let mut listed = BTreeSet::new();
        for entry in &entries {
            listed.insert(entry.path.clone());
            let existing = imported.remove(&entry.path);
            if existing.is_none() && history.contains(&entry.path) {
                log::debug!("{} for {account} was edited locally; upstream changes not applied", entry.path);
                continue;
            }
            match self.import_entry(account, entry, &revision, existing, now) {
                Ok(EntryOutcome::Created) => report.created += 1,
                Ok(EntryOutcome::Updated) => report.updated += 1,
                Ok(EntryOutcome::Refreshed) => {}
                Err(err) => {
                    log::warn!("import of {} for {account} failed: {err}", entry.path);
                    report.errors.push(ImportItemError {
                        path: entry.path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let records = self.store.account_records(account)?;
        let undo_targets: BTreeSet<&str> = records
            .iter()
            .filter(|record| record.status != GameStatus::Inactive)
            .filter_map(|record| record.previous_id.as_deref())
            .collect();
        for record in &records {
            let Some(stamp) = record.import.as_ref() else {
                continue;
            };
            if stamp.repository_revision == revision || listed.contains(&stamp.path) {
                continue;
            }
            if undo_targets.contains(record.id.as_str()) {
                log::debug!("keeping {} ({}) as the undo target of a live version", record.id, stamp.path);
                continue;
            }
            if self.store.delete(&record.id)? {
                report.deleted += 1;
                log::info!("removed {} ({}) no longer present upstream", record.id, stamp.path);
            }
        }

        if report.errors.is_empty() {
            state.last_revision = Some(revision);
            self.store.put_account(&state)?;
        }
        log::info!(
            "import for {account}: {} created, {} updated, {} deleted, {} failed",
            report.created,
            report.updated,
            report.deleted,
            report.errors.len()
        );
        Ok(report)
    }

    fn import_entry(
        &self,
        account: &str,
        entry: &EntryRef,
        revision: &str,
        existing: Option<Game>,
        now: OffsetDateTime,
    ) -> Result<EntryOutcome, ServiceError> {
        let stamp = ImportStamp {
            path: entry.path.clone(),
            entry_revision: entry.revision.clone(),
            repository_revision: revision.to_string(),
        };

        if let Some(mut record) = existing {
            let unchanged = record
                .import
                .as_ref()
                .is_some_and(|held| held.entry_revision == entry.revision);
            if unchanged {
                if record.import.as_ref() != Some(&stamp) {
                    record.import = Some(stamp);
                    self.store.put(&record)?;
                }
                return Ok(EntryOutcome::Refreshed);
            }
            let incoming = self.fetch_definition(&entry.path)?;
            record.adopt_content(&incoming);
            record.import = Some(stamp);
            record.source = SourceTag::Imported;
            record.audit.touch(IMPORT_ACTOR, now);
            self.store.put(&record)?;
            return Ok(EntryOutcome::Updated);
        }

        let live = self
            .store
            .account_records(account)?
            .iter()
            .filter(|game| game.status != GameStatus::Inactive)
            .count();
        if live >= self.max_games {
            return Err(ServiceError::Capacity {
                account: account.to_string(),
                limit: self.max_games,
            });
        }

        let mut record = self.fetch_definition(&entry.path)?;
        record.id = Game::fresh_id();
        record.previous_id = None;
        record.account = Some(account.to_string());
        record.status = GameStatus::New;
        record.transition(GameStatus::Active)?;
        record.source = SourceTag::Imported;
        record.import = Some(stamp);
        record.prompts = Default::default();
        record.audit = Audit::created(IMPORT_ACTOR, now);
        record.relink();
        self.store.put(&record)?;
        Ok(EntryOutcome::Created)
    }

    fn fetch_definition(&self, path: &str) -> Result<Game, ServiceError> {
        let bytes = self.repository.get_entry(path)?;
        let game = document::decode(&bytes)?;
        document::validate_playable(&game)?;
        Ok(game)
    }
}

#[cfg(test)]
mod tests {
    use super::{ContentRepository, DirectoryRepository, MemoryRepository};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn directory_entries_use_forward_slashes_and_content_digests() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("games").join("arcade")).expect("mkdir");
        fs::write(dir.path().join("games").join("arcade").join("pong.json"), b"{}").expect("write");
        fs::write(dir.path().join("README"), b"hello").expect("write");
        let repo = DirectoryRepository::new(dir.path());

        let entries = repo.list_entries("games/").expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "games/arcade/pong.json");
        assert_eq!(entries[0].revision.len(), 64);
        assert_eq!(repo.get_entry("games/arcade/pong.json").expect("get"), b"{}".to_vec());
        assert!(repo.get_entry("../outside").is_err());

        let before = repo.latest_revision().expect("revision");
        fs::write(dir.path().join("README"), b"changed").expect("write");
        assert_ne!(repo.latest_revision().expect("revision"), before);
    }

    #[test]
    fn memory_repository_can_go_offline() {
        let repo = MemoryRepository::new();
        repo.put_entry("games/a.json", b"{}".to_vec());
        assert!(repo.latest_revision().is_ok());
        repo.set_unavailable(true);
        assert!(repo.latest_revision().is_err());
    }
}
