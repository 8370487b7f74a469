//! `hikiyama` - CLI for the float map and tracker.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use hikiyama::cli::{output, Cli, Command, ConfigCommand, MoveCommand, RotateCommand, TrackCommand};
use hikiyama::float::FloatState;
use hikiyama::map::{marker_svg, to_geojson};
use hikiyama::registry::{self, Entity};
use hikiyama::sensor::{NmeaSensor, NmeaSource};
use hikiyama::{
    init_logging, Config, DocumentStore, Error, MapView, Position, RotationEditor, SqliteStore,
    StartRequest, SyncEvent, Synchronizer, Tracker, TrackerNotice,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    match cli.command {
        Command::Floats => {
            print!("{}", output::registry_listing());
            Ok(())
        }
        Command::Config(cmd) => handle_config(cli.config, cmd),
        Command::Status(cmd) => {
            let (config, store) = setup(cli.config)?;
            handle_status(&config, store.as_ref(), cmd.json).await
        }
        Command::View => {
            let (config, store) = setup(cli.config)?;
            handle_view(&config, store).await
        }
        Command::Track(cmd) => {
            let (config, store) = setup(cli.config)?;
            handle_track(&config, store, cmd).await
        }
        Command::Move(cmd) => {
            let (config, store) = setup(cli.config)?;
            handle_move(&config, store.as_ref(), cmd).await
        }
        Command::Rotate(cmd) => {
            let (_, store) = setup(cli.config)?;
            handle_rotate(store.as_ref(), cmd).await
        }
        Command::Glyph(cmd) => {
            let (_, store) = setup(cli.config)?;
            handle_glyph(store.as_ref(), &cmd.id).await
        }
        Command::Export(cmd) => {
            let (config, store) = setup(cli.config)?;
            handle_export(&config, store.as_ref(), cmd.pretty).await
        }
    }
}

/// Load configuration and open the document store.
fn setup(config_path: Option<PathBuf>) -> anyhow::Result<(Config, Arc<dyn DocumentStore>)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    let store = SqliteStore::open(
        config.database_path(),
        config.store.collection.clone(),
        config.poll_interval(),
    )
    .context("failed to open the float database")?;
    Ok((config, Arc::new(store)))
}

fn entity(id: &str) -> Result<Entity, Error> {
    registry::lookup(id).ok_or_else(|| Error::UnknownFloat(id.to_string()))
}

async fn float_state(store: &dyn DocumentStore, id: &str) -> anyhow::Result<FloatState> {
    let entity = entity(id)?;
    let snapshot = store.get(entity.id).await?;
    Ok(FloatState::from_snapshot(entity, snapshot.as_ref()))
}

async fn handle_status(config: &Config, store: &dyn DocumentStore, json: bool) -> anyhow::Result<()> {
    let table = hikiyama::FloatTable::fetch(store).await?;
    if json {
        let states: Vec<&FloatState> = table.iter().collect();
        println!("{}", serde_json::to_string_pretty(&states)?);
    } else {
        print!("{}", output::status_table(&table, Utc::now(), config.stale_after()));
    }
    Ok(())
}

async fn handle_view(config: &Config, store: Arc<dyn DocumentStore>) -> anyhow::Result<()> {
    let mut sync = Synchronizer::new(store);
    sync.subscribe()?;
    info!("Watching float updates, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = sync.next_change() => match change {
                Some(SyncEvent::Updated(_)) => {
                    // Fold in whatever else already arrived before reprinting.
                    while let Some(more) = sync.try_next_change() {
                        if let SyncEvent::ListenerFailed { id, message } = more {
                            eprintln!("listener for {id} failed: {message}");
                        }
                    }
                    println!();
                    print!(
                        "{}",
                        output::status_table(sync.table(), Utc::now(), config.stale_after())
                    );
                }
                Some(SyncEvent::ListenerFailed { id, message }) => {
                    eprintln!("listener for {id} failed: {message}");
                }
                None => break,
            },
        }
    }

    sync.unsubscribe();
    Ok(())
}

async fn handle_track(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    cmd: TrackCommand,
) -> anyhow::Result<()> {
    let sensor = NmeaSensor::new(NmeaSource::from_arg(&cmd.source));
    let (mut tracker, mut notices) = Tracker::new(store, Arc::new(sensor), config.tracker.clone());

    tracker
        .start(&StartRequest {
            float_id: cmd.float,
            device: cmd.device,
            passcode: cmd.passcode,
        })
        .await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracker.stop();
            }
            notice = notices.recv() => match notice {
                Some(TrackerNotice::Started { float_id }) => {
                    let name = registry::name_of(float_id).unwrap_or(float_id);
                    println!("Publishing location for {float_id} ({name}). Press Ctrl-C to stop.");
                }
                Some(TrackerNotice::SensingFailed { message }) => {
                    bail!("location sensing failed: {message}");
                }
                Some(TrackerNotice::Stopped) | None => break,
            },
        }
    }

    println!("Stopped.");
    Ok(())
}

async fn handle_move(config: &Config, store: &dyn DocumentStore, cmd: MoveCommand) -> anyhow::Result<()> {
    let entity = entity(&cmd.id)?;
    let position = Position::new(cmd.lat, cmd.lng);
    if !position.is_valid() {
        warn!(float = entity.id, %position, "Position is outside the geographic range");
    }

    let mut view = MapView::new(&config.map);
    view.select(entity.id);
    view.set_edit_mode(true);
    if !view.drag_end(store, entity.id, position).await? {
        bail!("{} is not editable", entity.id);
    }

    println!("Moved {} ({}) to {position}", entity.id, entity.name);
    Ok(())
}

async fn handle_rotate(store: &dyn DocumentStore, cmd: RotateCommand) -> anyhow::Result<()> {
    let state = float_state(store, &cmd.id).await?;
    let mut editor = RotationEditor::for_state(&state)
        .ok_or_else(|| Error::UnknownFloat(cmd.id.clone()))?;

    if let Some(angle) = cmd.angle {
        editor.set(angle);
    }
    if let Some(steps) = cmd.step {
        editor.step(steps);
    }
    editor.save(store).await?;

    println!("Rotated {} ({}) to {}°", state.id, state.name, editor.angle());
    Ok(())
}

async fn handle_glyph(store: &dyn DocumentStore, id: &str) -> anyhow::Result<()> {
    let state = float_state(store, id).await?;
    println!("{}", marker_svg(&state.name, state.rotation()));
    Ok(())
}

async fn handle_export(config: &Config, store: &dyn DocumentStore, pretty: bool) -> anyhow::Result<()> {
    let table = hikiyama::FloatTable::fetch(store).await?;
    let markers = MapView::new(&config.map).markers(&table, Utc::now(), config.stale_after());
    let collection = to_geojson(&markers);

    if pretty {
        println!("{}", serde_json::to_string_pretty(&collection)?);
    } else {
        println!("{}", serde_json::to_string(&collection)?);
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Map]");
                println!("  Center:             {}", config.default_center());
                println!("  Default zoom:       {}", config.map.default_zoom);
                println!("  Focus zoom:         {}", config.map.focus_zoom);
                println!("  Street tiles:       {}", config.map.street_tiles);
                println!("  Satellite tiles:    {}", config.map.satellite_tiles);
                println!("  Stale after (s):    {}", config.map.stale_after_secs);
                println!();
                println!("[Tracker]");
                println!("  High accuracy:      {}", config.tracker.high_accuracy);
                println!("  Maximum age (ms):   {}", config.tracker.maximum_age_ms);
                println!("  Timeout (ms):       {}", config.tracker.timeout_ms);
                println!();
                println!("[Store]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Collection:         {}", config.store.collection);
                println!("  Poll interval (ms): {}", config.store.poll_interval_ms);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
