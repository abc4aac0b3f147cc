//! Version chain over game records.
//!
//! Every authorable change produces a new record linked to its predecessor
//! through `previous_id`. At most one record of a lineage is active, and a
//! lineage never holds more than two live records: the head and the single
//! version undo can return to.

use sprig_formats::{Game, GameStatus, SourceTag};
use time::OffsetDateTime;

use crate::error::ServiceError;
use crate::store::GameStore;

/// What kind of change a derived record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// A manual edit; the new record is active at once.
    Edit,
    /// A prompt; the new record stays `updating` until the collaborator answers.
    Prompt,
}

impl Derivation {
    fn status(self) -> GameStatus {
        match self {
            Derivation::Edit => GameStatus::Active,
            Derivation::Prompt => GameStatus::Updating,
        }
    }

    fn source(self) -> SourceTag {
        match self {
            Derivation::Edit => SourceTag::Authored,
            Derivation::Prompt => SourceTag::AiDerived,
        }
    }

    fn action(self) -> &'static str {
        match self {
            Derivation::Edit => "editing",
            Derivation::Prompt => "prompting",
        }
    }
}

pub struct VersionChain<'a> {
    store: &'a dyn GameStore,
}

impl<'a> VersionChain<'a> {
    pub fn new(store: &'a dyn GameStore) -> Self {
        VersionChain { store }
    }

    fn fetch(&self, id: &str) -> Result<Game, ServiceError> {
        self.store
            .get(id)?
            .ok_or_else(|| ServiceError::GameNotFound(id.to_string()))
    }

    /// Creates the successor of `prior_id`, shaped by `mutate`, and retires
    /// the prior record.
    pub fn derive<F>(
        &self,
        prior_id: &str,
        kind: Derivation,
        actor: &str,
        now: OffsetDateTime,
        mutate: F,
    ) -> Result<Game, ServiceError>
    where
        F: FnOnce(&mut Game) -> Result<(), ServiceError>,
    {
        let mut prior = self.fetch(prior_id)?;
        if prior.status != GameStatus::Active {
            return Err(ServiceError::NotActive {
                id: prior.id,
                status: prior.status,
                action: kind.action(),
            });
        }

        let mut next = prior.clone();
        next.id = Game::fresh_id();
        next.previous_id = Some(prior.id.clone());
        next.status = GameStatus::New;
        next.transition(kind.status())?;
        next.source = kind.source();
        next.import = None;
        next.audit.touch(actor, now);
        mutate(&mut next)?;
        next.check_keys()?;
        next.relink();

        let grandparent = prior.previous_id.take();
        prior.transition(GameStatus::Inactive)?;
        prior.audit.touch(actor, now);

        self.store.put(&next)?;
        if let Err(err) = self.store.put(&prior) {
            // The prior is still active in the store; take the successor back out.
            if let Err(cleanup) = self.store.delete(&next.id) {
                log::error!("could not remove {} after failing to retire {}: {cleanup}", next.id, prior.id);
            }
            return Err(err.into());
        }

        if let Some(old) = grandparent {
            if self.store.delete(&old)? {
                log::debug!("dropped version {old} two steps behind {}", next.id);
            }
        }
        self.drop_redo_branches(&prior.id, &next.id)?;

        log::info!("game {} superseded by {} ({})", prior.id, next.id, kind.action());
        Ok(next)
    }

    /// Deletes inactive records hanging off `parent` other than `keep`.
    fn drop_redo_branches(&self, parent: &str, keep: &str) -> Result<(), ServiceError> {
        for record in self.store.records()? {
            if record.id != keep
                && record.previous_id.as_deref() == Some(parent)
                && record.status == GameStatus::Inactive
            {
                self.store.delete(&record.id)?;
                log::debug!("dropped stale redo branch {}", record.id);
            }
        }
        Ok(())
    }

    /// Steps back from `id` to its predecessor, which becomes active again.
    pub fn undo(&self, id: &str, actor: &str, now: OffsetDateTime) -> Result<Game, ServiceError> {
        let mut current = self.fetch(id)?;
        if !matches!(current.status, GameStatus::Active | GameStatus::Error) {
            return Err(ServiceError::NotActive {
                id: current.id,
                status: current.status,
                action: "undo",
            });
        }
        let Some(prior_id) = current.previous_id.clone() else {
            return Err(ServiceError::ChainEnd {
                id: current.id,
                action: "undo",
            });
        };
        let mut prior = self.fetch(&prior_id)?;

        if let Some(further) = prior.previous_id.take() {
            if further != current.id {
                self.store.delete(&further)?;
            }
        }
        prior.transition(GameStatus::Active)?;
        prior.audit.touch(actor, now);
        self.store.put(&prior)?;

        current.transition(GameStatus::Inactive)?;
        current.audit.touch(actor, now);
        self.store.put(&current)?;

        log::info!("undo: game {} restored over {}", prior.id, current.id);
        Ok(prior)
    }

    /// Re-applies the newest undone successor of `id`.
    pub fn redo(&self, id: &str, actor: &str, now: OffsetDateTime) -> Result<Game, ServiceError> {
        let mut current = self.fetch(id)?;
        if current.status != GameStatus::Active {
            return Err(ServiceError::NotActive {
                id: current.id,
                status: current.status,
                action: "redo",
            });
        }
        let successor = self
            .store
            .records()?
            .into_iter()
            .filter(|record| {
                record.previous_id.as_deref() == Some(id) && record.status == GameStatus::Inactive
            })
            .max_by_key(|record| record.audit.updated_at);
        let Some(mut successor) = successor else {
            return Err(ServiceError::ChainEnd {
                id: current.id,
                action: "redo",
            });
        };

        successor.transition(GameStatus::Active)?;
        successor.audit.touch(actor, now);
        self.store.put(&successor)?;

        current.transition(GameStatus::Inactive)?;
        current.audit.touch(actor, now);
        self.store.put(&current)?;

        log::info!("redo: game {} reapplied over {}", successor.id, current.id);
        Ok(successor)
    }

    /// Number of stored records reachable from `id` through `previous_id`,
    /// `id` included.
    pub fn lineage_live_count(&self, id: &str) -> Result<usize, ServiceError> {
        let mut count = 0;
        let mut cursor = Some(id.to_string());
        while let Some(next) = cursor {
            let Some(record) = self.store.get(&next)? else {
                break;
            };
            count += 1;
            if count > 64 {
                break;
            }
            cursor = record.previous_id;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::{Derivation, VersionChain};
    use crate::error::ServiceError;
    use crate::store::{AccountState, GameStore, MemoryStore, StoreError};
    use sprig_formats::{Game, GameStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;
    use time::OffsetDateTime;

    /// Memory store whose `put` fails once `puts_allowed` writes went through.
    struct FailingPuts {
        inner: MemoryStore,
        puts_allowed: AtomicUsize,
    }

    impl GameStore for FailingPuts {
        fn get(&self, id: &str) -> Result<Option<Game>, StoreError> {
            self.inner.get(id)
        }

        fn put(&self, game: &Game) -> Result<(), StoreError> {
            let left = self.puts_allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StoreError::Poisoned);
            }
            self.puts_allowed.store(left - 1, Ordering::SeqCst);
            self.inner.put(game)
        }

        fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }

        fn records(&self) -> Result<Vec<Game>, StoreError> {
            self.inner.records()
        }

        fn account(&self, name: &str) -> Result<AccountState, StoreError> {
            self.inner.account(name)
        }

        fn put_account(&self, state: &AccountState) -> Result<(), StoreError> {
            self.inner.put_account(state)
        }

        fn accounts(&self) -> Result<Vec<AccountState>, StoreError> {
            self.inner.accounts()
        }
    }

    const T0: OffsetDateTime = datetime!(2026-01-01 00:00 UTC);

    fn seeded() -> (MemoryStore, String) {
        let store = MemoryStore::new(1 << 20);
        let mut game = Game::new("a", "first");
        game.status = GameStatus::Active;
        store.put(&game).expect("seed");
        (store, game.id)
    }

    fn rename(name: &'static str) -> impl FnOnce(&mut Game) -> Result<(), ServiceError> {
        move |game| {
            game.name = name.to_string();
            Ok(())
        }
    }

    #[test]
    fn derive_links_and_retires_the_prior() {
        let (store, a) = seeded();
        let chain = VersionChain::new(&store);
        let b = chain
            .derive(&a, Derivation::Edit, "ann", T0, rename("second"))
            .expect("derive");
        assert_eq!(b.previous_id.as_deref(), Some("a"));
        assert_eq!(b.status, GameStatus::Active);
        let a_now = store.get(&a).expect("get").expect("kept");
        assert_eq!(a_now.status, GameStatus::Inactive);
    }

    #[test]
    fn lineage_never_exceeds_two_live_records() {
        let (store, a) = seeded();
        let chain = VersionChain::new(&store);
        let mut head = a;
        for step in 0..6 {
            let name = if step % 2 == 0 { "even" } else { "odd" };
            head = chain
                .derive(&head, Derivation::Edit, "ann", T0, rename(name))
                .expect("derive")
                .id;
            assert!(chain.lineage_live_count(&head).expect("count") <= 2);
        }
        head = chain.undo(&head, "ann", T0).expect("undo").id;
        assert!(chain.lineage_live_count(&head).expect("count") <= 2);
        head = chain
            .derive(&head, Derivation::Edit, "ann", T0, rename("after undo"))
            .expect("derive")
            .id;
        assert!(chain.lineage_live_count(&head).expect("count") <= 2);
        let active = store
            .records()
            .expect("records")
            .into_iter()
            .filter(|g| g.status == GameStatus::Active)
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn nothing_to_undo_at_the_root() {
        let (store, a) = seeded();
        let chain = VersionChain::new(&store);
        assert!(matches!(
            chain.undo(&a, "ann", T0),
            Err(ServiceError::ChainEnd { action: "undo", .. })
        ));
        assert!(matches!(
            chain.redo(&a, "ann", T0),
            Err(ServiceError::ChainEnd { action: "redo", .. })
        ));
    }

    #[test]
    fn inactive_records_cannot_be_derived() {
        let (store, a) = seeded();
        let chain = VersionChain::new(&store);
        chain
            .derive(&a, Derivation::Edit, "ann", T0, rename("second"))
            .expect("derive");
        assert!(matches!(
            chain.derive(&a, Derivation::Edit, "ann", T0, rename("fork")),
            Err(ServiceError::NotActive { .. })
        ));
    }

    #[test]
    fn failed_retirement_leaves_the_prior_as_the_only_active_record() {
        let (inner, a) = seeded();
        let store = FailingPuts {
            inner,
            puts_allowed: AtomicUsize::new(1),
        };
        let chain = VersionChain::new(&store);
        assert!(matches!(
            chain.derive(&a, Derivation::Edit, "ann", T0, rename("second")),
            Err(ServiceError::Store(StoreError::Poisoned))
        ));

        let records = store.records().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, a);
        assert_eq!(records[0].status, GameStatus::Active);
        assert_eq!(records[0].name, "first");
    }
}
