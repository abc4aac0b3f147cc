use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sprig_formats::{document, Audit, Game, GameStatus, Image, Object, Script, SourceTag};
use time::OffsetDateTime;

use crate::chain::{Derivation, VersionChain};
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::import::{ContentRepository, ImportReport};
use crate::prompt::{PromptEngine, PromptOrchestrator, PromptTicket};
use crate::scheduler;
use crate::store::GameStore;

pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Updated,
    Created,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// 1-based page number.
    #[serde(default = "ListQuery::default_page")]
    pub page: usize,
    #[serde(default = "ListQuery::default_per_page")]
    pub per_page: usize,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub status: Option<GameStatus>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Case-insensitive substring of the name.
    #[serde(default)]
    pub name: Option<String>,
    /// Without a status filter, inactive versions are hidden unless set.
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub descending: bool,
}

impl ListQuery {
    const MAX_PER_PAGE: usize = 200;

    const fn default_page() -> usize {
        1
    }

    const fn default_per_page() -> usize {
        20
    }

    fn matches(&self, game: &Game) -> bool {
        if let Some(account) = &self.account {
            if game.account.as_ref() != Some(account) {
                return false;
            }
        }
        match self.status {
            Some(status) if game.status != status => return false,
            None if !self.include_inactive && game.status == GameStatus::Inactive => return false,
            _ => {}
        }
        if self.public.is_some_and(|public| public != game.public) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !game.tags.contains(tag) {
                return false;
            }
        }
        if let Some(needle) = &self.name {
            if !game.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            page: Self::default_page(),
            per_page: Self::default_per_page(),
            account: None,
            status: None,
            public: None,
            tag: None,
            name: None,
            include_inactive: false,
            sort: SortKey::default(),
            descending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

/// Field-level changes for [`GameService::update`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct GameEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub commit: Option<String>,
    pub icon: Option<Vec<u8>>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub debug: Option<bool>,
    pub pause: Option<bool>,
    pub public: Option<bool>,
    pub subject: Option<Object>,
    pub objects: Option<BTreeMap<String, Object>>,
    pub images: Option<BTreeMap<String, Image>>,
    pub scripts: Option<BTreeMap<String, Script>>,
}

impl GameEdit {
    fn apply(self, game: &mut Game) {
        if let Some(name) = self.name {
            game.name = name;
        }
        if let Some(description) = self.description {
            game.description = description;
        }
        if let Some(commit) = self.commit {
            game.commit = Some(commit);
        }
        if let Some(icon) = self.icon {
            game.icon = icon;
        }
        if let Some(width) = self.width {
            game.width = width;
        }
        if let Some(height) = self.height {
            game.height = height;
        }
        if let Some(debug) = self.debug {
            game.debug = debug;
        }
        if let Some(pause) = self.pause {
            game.pause = pause;
        }
        if let Some(public) = self.public {
            game.public = public;
        }
        if let Some(subject) = self.subject {
            game.subject = Some(subject);
        }
        if let Some(objects) = self.objects {
            game.objects = objects;
        }
        if let Some(images) = self.images {
            game.images = images;
        }
        if let Some(scripts) = self.scripts {
            game.scripts = scripts;
        }
    }
}

/// Entry point front-ends use for game records.
pub struct GameService {
    store: Arc<dyn GameStore>,
    prompts: PromptOrchestrator,
    repositories: BTreeMap<String, Arc<dyn ContentRepository>>,
    config: ServiceConfig,
    clock: Clock,
}

impl GameService {
    pub fn new(store: Arc<dyn GameStore>, engine: Arc<dyn PromptEngine>, config: ServiceConfig) -> Self {
        GameService {
            prompts: PromptOrchestrator::new(Arc::clone(&store), engine),
            store,
            repositories: BTreeMap::new(),
            config,
            clock: Arc::new(OffsetDateTime::now_utc),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_repository(mut self, account: impl Into<String>, repository: Arc<dyn ContentRepository>) -> Self {
        self.repositories.insert(account.into(), repository);
        self
    }

    pub fn store(&self) -> &dyn GameStore {
        self.store.as_ref()
    }

    fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    fn chain(&self) -> VersionChain<'_> {
        VersionChain::new(self.store.as_ref())
    }

    fn ensure_capacity(&self, account: &str) -> Result<(), ServiceError> {
        let live = self
            .store
            .account_records(account)?
            .iter()
            .filter(|game| game.status != GameStatus::Inactive)
            .count();
        if live >= self.config.max_games_per_account {
            return Err(ServiceError::Capacity {
                account: account.to_string(),
                limit: self.config.max_games_per_account,
            });
        }
        Ok(())
    }

    /// Stores a new authored game for `account`.
    pub fn create(&self, account: &str, actor: &str, mut game: Game) -> Result<Game, ServiceError> {
        if account.trim().is_empty() {
            return Err(ServiceError::Validation("account is required".into()));
        }
        document::validate_playable(&game)?;
        self.ensure_capacity(account)?;

        game.id = Game::fresh_id();
        game.previous_id = None;
        game.account = Some(account.to_string());
        game.status = GameStatus::New;
        game.transition(GameStatus::Active)?;
        game.source = SourceTag::Authored;
        game.import = None;
        game.audit = Audit::created(actor, self.now());
        game.relink();
        self.store.put(&game)?;
        log::info!("created game {} for {account}", game.id);
        Ok(game)
    }

    pub fn get(&self, id: &str) -> Result<Game, ServiceError> {
        self.store
            .get(id)?
            .ok_or_else(|| ServiceError::GameNotFound(id.to_string()))
    }

    pub fn list(&self, query: &ListQuery) -> Result<Page<Game>, ServiceError> {
        if query.page == 0 {
            return Err(ServiceError::Validation("page numbers start at 1".into()));
        }
        if query.per_page == 0 || query.per_page > ListQuery::MAX_PER_PAGE {
            return Err(ServiceError::Validation(format!(
                "per_page must be between 1 and {}",
                ListQuery::MAX_PER_PAGE
            )));
        }

        let mut games: Vec<Game> = self
            .store
            .records()?
            .into_iter()
            .filter(|game| query.matches(game))
            .collect();
        match query.sort {
            SortKey::Name => games.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))),
            SortKey::Created => games.sort_by_key(|game| (game.audit.created_at, game.id.clone())),
            SortKey::Updated => games.sort_by_key(|game| (game.audit.updated_at, game.id.clone())),
        }
        if query.descending {
            games.reverse();
        }

        let total = games.len();
        let items = games
            .into_iter()
            .skip((query.page - 1) * query.per_page)
            .take(query.per_page)
            .collect();
        Ok(Page {
            items,
            page: query.page,
            per_page: query.per_page,
            total,
        })
    }

    /// Applies `edit` as a new version chained after `id`.
    pub fn update(&self, id: &str, actor: &str, edit: GameEdit) -> Result<Game, ServiceError> {
        self.chain()
            .derive(id, Derivation::Edit, actor, self.now(), |next| {
                edit.apply(next);
                document::validate_playable(next)?;
                Ok(())
            })
    }

    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        if !self.store.delete(id)? {
            return Err(ServiceError::GameNotFound(id.to_string()));
        }
        log::info!("deleted game {id}");
        Ok(())
    }

    /// Clones `id` into an independent record with an empty lineage.
    pub fn copy(&self, id: &str, actor: &str) -> Result<Game, ServiceError> {
        let original = self.get(id)?;
        let account = original
            .account
            .clone()
            .ok_or_else(|| ServiceError::Validation(format!("game {id} has no account")))?;
        self.ensure_capacity(&account)?;

        let mut copy = original;
        copy.id = Game::fresh_id();
        copy.previous_id = None;
        copy.status = GameStatus::New;
        copy.transition(GameStatus::Active)?;
        copy.source = SourceTag::Authored;
        copy.import = None;
        copy.audit = Audit::created(actor, self.now());
        copy.relink();
        self.store.put(&copy)?;
        log::info!("copied game {id} to {}", copy.id);
        Ok(copy)
    }

    pub fn submit_prompt(&self, id: &str, actor: &str, prompt: &str) -> Result<PromptTicket, ServiceError> {
        self.prompts.submit(id, prompt, actor, self.now())
    }

    pub fn undo(&self, id: &str, actor: &str) -> Result<Game, ServiceError> {
        self.chain().undo(id, actor, self.now())
    }

    pub fn redo(&self, id: &str, actor: &str) -> Result<Game, ServiceError> {
        self.chain().redo(id, actor, self.now())
    }

    /// Tags are bookkeeping and change the record in place.
    pub fn add_tag(&self, id: &str, tag: &str) -> Result<Game, ServiceError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ServiceError::Validation("tags cannot be empty".into()));
        }
        let mut game = self.get(id)?;
        if game.tags.insert(tag.to_string()) {
            self.store.put(&game)?;
        }
        Ok(game)
    }

    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<Game, ServiceError> {
        let mut game = self.get(id)?;
        if game.tags.remove(tag.trim()) {
            self.store.put(&game)?;
        }
        Ok(game)
    }

    /// Every tag in use by the account's visible games.
    pub fn tags(&self, account: &str) -> Result<BTreeSet<String>, ServiceError> {
        Ok(self
            .store
            .account_records(account)?
            .into_iter()
            .filter(|game| game.status != GameStatus::Inactive)
            .flat_map(|game| game.tags)
            .collect())
    }

    /// Runs an import for `account` now, outside the sweep schedule.
    pub fn trigger_import(&self, account: &str, force: bool) -> Result<ImportReport, ServiceError> {
        let repository = self
            .repositories
            .get(account)
            .ok_or_else(|| ServiceError::NoRepository(account.to_string()))?;
        scheduler::run_import(
            self.store.as_ref(),
            repository.as_ref(),
            &self.config,
            account,
            force,
            self.now(),
        )
    }
}
