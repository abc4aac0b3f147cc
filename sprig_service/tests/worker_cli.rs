use std::fs;
use std::process::Command;

use anyhow::{Context, Result};
use serde_json::Value;
use sprig_formats::{document, Game, Object};
use tempfile::tempdir;

fn definition(name: &str) -> Game {
    let mut game = Game::new(name, name);
    game.width = 64.0;
    game.height = 64.0;
    game.subject = Some(Object::new("hero"));
    game.insert_object(Object::new("door"));
    game
}

fn sweep_once(store: &std::path::Path, repo: &std::path::Path, force: bool) -> Result<Value> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_sprig_service"));
    command
        .arg("--store")
        .arg(store)
        .arg("--account")
        .arg(format!("acct={}", repo.display()))
        .arg("--once");
    if force {
        command.arg("--force");
    }
    let output = command.output().context("running sprig_service")?;
    assert!(output.status.success(), "worker exited with {}", output.status);
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn single_sweep_imports_a_directory_repository() -> Result<()> {
    let dir = tempdir().context("creating temporary directory for worker state")?;
    let store = dir.path().join("store");
    let repo = dir.path().join("repo");
    fs::create_dir_all(repo.join("games"))?;
    fs::write(repo.join("games").join("door.json"), document::encode(&definition("door"))?)?;
    fs::write(repo.join("games").join("maze.json"), document::encode(&definition("maze"))?)?;

    let first = sweep_once(&store, &repo, false)?;
    assert_eq!(first["imports"][0]["account"], "acct");
    assert_eq!(first["imports"][0]["created"], 2);
    assert_eq!(fs::read_dir(store.join("games"))?.count(), 2);

    let second = sweep_once(&store, &repo, false)?;
    assert_eq!(second["imports"][0]["skipped"], true);

    let forced = sweep_once(&store, &repo, true)?;
    assert_eq!(forced["imports"][0]["skipped"], false);
    assert_eq!(forced["imports"][0]["created"], 0);
    Ok(())
}

#[test]
fn force_without_once_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let output = Command::new(env!("CARGO_BIN_EXE_sprig_service"))
        .arg("--store")
        .arg(dir.path())
        .arg("--force")
        .output()
        .context("running sprig_service")?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--once"));
    Ok(())
}
