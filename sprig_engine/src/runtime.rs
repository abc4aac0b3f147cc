use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sprig_engine::{
    pressed_set, EngineConfig, FrameReport, LocalFile, Persistence, RemoteEndpoint, Session,
};
use sprig_formats::document;

use crate::cli::{GameSource, RunArgs};

#[derive(Debug, Serialize)]
struct ObjectSummary {
    x: f64,
    y: f64,
    hidden: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    game_id: String,
    frames: Vec<FrameReport>,
    paused: bool,
    debug: bool,
    objects: BTreeMap<String, ObjectSummary>,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let RunArgs {
        source,
        config,
        frames,
        input_plan,
        output,
        summary_json,
    } = args;

    let config = match config.as_ref() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let plan = match input_plan.as_ref() {
        Some(path) => read_input_plan(path)?,
        None => Vec::new(),
    };

    let (game, persistence) = match source {
        GameSource::Local { path, save_path } => {
            let bytes = fs::read(&path)
                .with_context(|| format!("reading game definition from {}", path.display()))?;
            let game = document::decode(&bytes)
                .with_context(|| format!("parsing game definition from {}", path.display()))?;
            (game, Box::new(LocalFile::new(save_path)) as Box<dyn Persistence>)
        }
        GameSource::Remote { id, settings } => {
            let endpoint = RemoteEndpoint::new(settings).context("building remote endpoint client")?;
            let game = endpoint
                .load(&id)
                .with_context(|| format!("fetching game {id} from {}", endpoint.describe()))?;
            (game, Box::new(endpoint) as Box<dyn Persistence>)
        }
    };

    let mut session = Session::new(game, persistence, config).context("starting game session")?;
    log::info!("running {} frames of game {}", frames, session.game().id);

    let mut reports = Vec::new();
    for index in 0..frames {
        let keys = plan.get(index as usize).map(Vec::as_slice).unwrap_or_default();
        let report = session
            .tick(&pressed_set(keys))
            .with_context(|| format!("running frame {}", index + 1))?;
        reports.push(report);
    }

    if let Some(path) = output.as_ref() {
        let bytes = document::encode(session.game()).context("serializing final game definition")?;
        write_file(path, &bytes)?;
        println!("Saved final definition to {}", path.display());
    }

    let game = session.game();
    let summary = RunSummary {
        game_id: game.id.clone(),
        frames: reports,
        paused: game.pause,
        debug: game.debug,
        objects: game
            .objects
            .iter()
            .map(|(id, object)| {
                (
                    id.clone(),
                    ObjectSummary {
                        x: object.position.x,
                        y: object.position.y,
                        hidden: object.hidden,
                    },
                )
            })
            .collect(),
    };

    if let Some(path) = summary_json.as_ref() {
        let json = serde_json::to_string_pretty(&summary).context("serializing run summary to JSON")?;
        write_file(path, json.as_bytes())?;
        println!("Saved run summary to {}", path.display());
    }

    let ran: usize = summary.frames.iter().map(|report| report.scripts_ran).sum();
    println!(
        "Game {}: {} frames, {} script calls, paused: {}",
        summary.game_id,
        summary.frames.len(),
        ran,
        summary.paused
    );
    Ok(())
}

fn read_input_plan(path: &Path) -> Result<Vec<Vec<String>>> {
    let bytes = fs::read(path).with_context(|| format!("reading input plan {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing input plan {}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}
