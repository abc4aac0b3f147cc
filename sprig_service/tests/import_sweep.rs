use std::collections::BTreeMap;
use std::sync::Arc;

use sprig_formats::{document, Game, GameStatus, Object, SourceTag};
use sprig_service::scheduler::claim_import;
use sprig_service::{
    ContentRepository, ErrorClass, GameEdit, GameService, GameStore, MemoryRepository, MemoryStore, PromptEngine,
    PromptError, PromptReply, PromptRequest, ServiceConfig, ServiceError, Sweeper,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

const NOW: OffsetDateTime = datetime!(2026-06-01 12:00 UTC);

struct Unused;

impl PromptEngine for Unused {
    fn complete(&self, _request: &PromptRequest) -> Result<PromptReply, PromptError> {
        Err(PromptError::Unavailable("prompts are not part of these tests".into()))
    }
}

fn definition(name: &str, width: f64) -> Vec<u8> {
    let mut game = Game::new(name, name);
    game.width = width;
    game.height = 40.0;
    game.subject = Some(Object::new("player"));
    game.insert_object(Object::new("goal"));
    document::encode(&game).expect("encode")
}

fn imported(store: &MemoryStore, account: &str) -> Vec<Game> {
    store
        .account_records(account)
        .expect("records")
        .into_iter()
        .filter(|game| game.import.is_some())
        .collect()
}

fn wired(max_games: usize) -> (Arc<MemoryStore>, Arc<MemoryRepository>, GameService) {
    let store = Arc::new(MemoryStore::new(1 << 20));
    let repository = Arc::new(MemoryRepository::new());
    let config = ServiceConfig {
        max_games_per_account: max_games,
        ..ServiceConfig::default()
    };
    let service = GameService::new(store.clone(), Arc::new(Unused), config)
        .with_clock(Arc::new(|| NOW))
        .with_repository("acct", repository.clone());
    (store, repository, service)
}

#[test]
fn imports_converge_and_repeat_runs_change_nothing() {
    let (store, repository, service) = wired(10);
    repository.put_entry("games/pong.json", definition("pong", 80.0));
    repository.put_entry("games/snake.json", definition("snake", 60.0));
    repository.put_entry("games/notes.txt", b"not a game".to_vec());
    repository.put_entry("assets/pong.json", definition("elsewhere", 10.0));

    let first = service.trigger_import("acct", false).expect("import");
    assert_eq!((first.created, first.updated, first.deleted), (2, 0, 0));
    assert!(first.errors.is_empty());
    let games = imported(&store, "acct");
    assert_eq!(games.len(), 2);
    assert!(games
        .iter()
        .all(|g| g.status == GameStatus::Active && g.source == SourceTag::Imported));

    let again = service.trigger_import("acct", false).expect("import");
    assert!(again.skipped);
    assert!(!again.changed());

    let forced = service.trigger_import("acct", true).expect("forced import");
    assert!(!forced.skipped);
    assert!(!forced.changed());
    assert_eq!(imported(&store, "acct"), games);
}

#[test]
fn upstream_changes_update_and_delete_records() {
    let (store, repository, service) = wired(10);
    repository.put_entry("games/pong.json", definition("pong", 80.0));
    repository.put_entry("games/snake.json", definition("snake", 60.0));
    service.trigger_import("acct", false).expect("import");
    let pong_id = imported(&store, "acct")
        .into_iter()
        .find(|g| g.name == "pong")
        .expect("pong")
        .id;

    repository.put_entry("games/pong.json", definition("pong", 120.0));
    repository.remove_entry("games/snake.json");
    let report = service.trigger_import("acct", false).expect("import");
    assert_eq!((report.created, report.updated, report.deleted), (0, 1, 1));

    let games = imported(&store, "acct");
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].id, pong_id);
    assert_eq!(games[0].width, 120.0);
}

fn rename(name: &str) -> GameEdit {
    GameEdit {
        name: Some(name.to_string()),
        ..GameEdit::default()
    }
}

#[test]
fn upstream_changes_leave_locally_edited_history_alone() {
    let (store, repository, service) = wired(10);
    repository.put_entry("games/pong.json", definition("pong", 80.0));
    service.trigger_import("acct", false).expect("import");
    let original = imported(&store, "acct").remove(0);
    let edited = service.update(&original.id, "ann", rename("my pong")).expect("edit");

    repository.put_entry("games/pong.json", definition("pong", 500.0));
    let report = service.trigger_import("acct", false).expect("import");
    assert_eq!((report.created, report.updated, report.deleted), (0, 0, 0));
    assert!(report.errors.is_empty());
    let kept = store.get(&original.id).expect("get").expect("still stored");
    assert_eq!(kept.width, 80.0);

    let restored = service.undo(&edited.id, "ann").expect("undo");
    assert_eq!(restored.id, original.id);
    assert_eq!(restored.width, 80.0);
    assert_eq!(restored.name, "pong");
}

#[test]
fn removing_an_edited_import_keeps_its_undo_target() {
    let (store, repository, service) = wired(10);
    repository.put_entry("games/pong.json", definition("pong", 80.0));
    service.trigger_import("acct", false).expect("import");
    let original = imported(&store, "acct").remove(0);
    let edited = service.update(&original.id, "ann", rename("my pong")).expect("edit");

    repository.remove_entry("games/pong.json");
    let report = service.trigger_import("acct", false).expect("import");
    assert_eq!(report.deleted, 0);
    assert!(report.errors.is_empty());
    let predecessor = edited.previous_id.clone().expect("linked");
    assert!(store.get(&predecessor).expect("get").is_some());

    let restored = service.undo(&edited.id, "ann").expect("undo");
    assert_eq!(restored.id, original.id);
    assert_eq!(restored.status, GameStatus::Active);
    assert_eq!(restored.name, "pong");
}

#[test]
fn broken_entries_are_reported_without_losing_the_rest() {
    let (store, repository, service) = wired(10);
    repository.put_entry("games/pong.json", definition("pong", 80.0));
    repository.put_entry("games/broken.json", b"{ not json".to_vec());

    let report = service.trigger_import("acct", false).expect("import");
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "games/broken.json");
    assert!(store.account("acct").expect("account").last_revision.is_none());

    // The revision was not recorded, so the next run retries the broken entry.
    let retry = service.trigger_import("acct", false).expect("import");
    assert!(!retry.skipped);
    assert_eq!(retry.errors.len(), 1);
    assert!(!retry.changed());

    repository.put_entry("games/broken.json", definition("fixed", 30.0));
    let fixed = service.trigger_import("acct", false).expect("import");
    assert_eq!(fixed.created, 1);
    assert!(fixed.errors.is_empty());
    assert_eq!(
        store.account("acct").expect("account").last_revision,
        Some(repository.latest_revision().expect("revision"))
    );
}

#[test]
fn import_respects_account_capacity() {
    let (store, repository, service) = wired(1);
    repository.put_entry("games/a.json", definition("a", 10.0));
    repository.put_entry("games/b.json", definition("b", 10.0));
    let report = service.trigger_import("acct", false).expect("import");
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].message.contains("already holds"));
    assert_eq!(imported(&store, "acct").len(), 1);
}

#[test]
fn a_held_marker_blocks_manual_imports() {
    let (store, repository, service) = wired(10);
    repository.put_entry("games/a.json", definition("a", 10.0));
    assert!(claim_import(store.as_ref(), "acct", NOW - Duration::seconds(30), Duration::minutes(5)).expect("claim"));
    let err = service.trigger_import("acct", false).expect_err("marker held");
    assert!(matches!(err, ServiceError::ImportInProgress(_)));
    assert_eq!(err.class(), ErrorClass::Capacity);
}

#[test]
fn repository_outages_are_retryable() {
    let (_store, repository, service) = wired(10);
    repository.set_unavailable(true);
    let err = service.trigger_import("acct", false).expect_err("offline");
    assert!(err.is_retryable_next_sweep());
}

#[test]
fn stalled_prompts_time_out() {
    let store = Arc::new(MemoryStore::new(1 << 20));
    let config = ServiceConfig {
        prompt_timeout_secs: 60,
        ..ServiceConfig::default()
    };
    for (id, age) in [("stale", 600), ("fresh", 10)] {
        let mut game = Game::new(id, id);
        game.status = GameStatus::Updating;
        game.audit.updated_at = Some(NOW - Duration::seconds(age));
        store.put(&game).expect("seed");
    }

    let sweeper = Sweeper::new(store.clone(), BTreeMap::new(), config);
    assert_eq!(sweeper.sweep_timeouts(NOW).expect("sweep"), 1);
    let stale = store.get("stale").expect("get").expect("present");
    assert_eq!(stale.status, GameStatus::Error);
    assert!(stale.prompts.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(store.get("fresh").expect("get").expect("present").status, GameStatus::Updating);
    assert_eq!(sweeper.sweep_timeouts(NOW).expect("sweep"), 0);
}

#[tokio::test]
async fn sweeps_import_every_account_and_isolate_failures() {
    let store = Arc::new(MemoryStore::new(1 << 20));
    let healthy = Arc::new(MemoryRepository::new());
    healthy.put_entry("games/one.json", definition("one", 20.0));
    let offline = Arc::new(MemoryRepository::new());
    offline.set_unavailable(true);

    let mut repositories: BTreeMap<String, Arc<dyn ContentRepository>> = BTreeMap::new();
    repositories.insert("healthy".into(), healthy);
    repositories.insert("offline".into(), offline);
    let sweeper = Sweeper::new(store.clone(), repositories, ServiceConfig::default());

    let summary = sweeper.sweep(NOW).await;
    assert_eq!(summary.imports.len(), 1);
    assert_eq!(summary.imports[0].account, "healthy");
    assert_eq!(summary.imports[0].created, 1);
    assert!(summary.failures.contains_key("offline"));
    assert_eq!(summary.timed_out, 0);

    // Markers are released after every run, failed or not.
    assert!(store.account("healthy").expect("account").import_started_at.is_none());
    assert!(store.account("offline").expect("account").import_started_at.is_none());

    let second = sweeper.sweep(NOW + Duration::minutes(1)).await;
    assert!(second.imports[0].skipped);
}
