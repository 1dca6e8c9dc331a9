use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use cadenza_engine::output;
use cadenza_engine::{AudioEngine, EngineCommand, Orchestrator, VirtualOutput};
use cadenza_shared::EngineError;
use clap::Parser;
use crossbeam_channel::{Sender, bounded, unbounded};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod console;
mod session_io;

use console::ConsoleCommand;

#[derive(Parser, Debug)]
#[command(name = "cadenza", about = "Beat-synchronised loop player")]
struct Cli {
    /// JSON session describing the tempo, players and autoplay list
    #[arg(long)]
    session: PathBuf,
    /// Override the session tempo
    #[arg(long)]
    bpm: Option<f64>,
    /// Directory the player urls resolve against (defaults to the session's)
    #[arg(long)]
    assets_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let (mut session, loader) = session_io::open_session(&cli.session, cli.assets_dir.as_deref())?;
    if let Some(bpm) = cli.bpm {
        session.engine.bpm = bpm;
    }

    let orchestrator = Orchestrator::new(session.engine.clone(), output::share(VirtualOutput::realtime()))?
        .with_loader(Arc::new(loader));
    let (command_tx, command_rx) = unbounded();
    let engine = AudioEngine::new(
        orchestrator,
        command_rx,
        Duration::from_millis(session.engine.poll_interval_ms),
    )?;

    let players = session.players.clone();
    request(&command_tx, |response_tx| EngineCommand::AddPlayers { players, response_tx })??;
    let autoplay = session.autoplay.clone();
    request(&command_tx, |response_tx| EngineCommand::Start { autoplay, response_tx })??;
    info!("Ready. Type `help` for commands.");

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim() == "help" {
            println!("{}", console::HELP);
            continue;
        }
        match console::parse_line(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&command_tx, command) {
                    warn!("{e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{e}"),
        }
        if !engine.is_running() {
            break;
        }
    }

    let _ = command_tx.send(EngineCommand::Shutdown);
    engine.join();
    Ok(())
}

/// Send a command built around a fresh response channel and wait for the answer.
fn request<T>(command_tx: &Sender<EngineCommand>, build: impl FnOnce(Sender<T>) -> EngineCommand) -> Result<T, EngineError> {
    let (response_tx, response_rx) = bounded(1);
    command_tx
        .send(build(response_tx))
        .map_err(|_| EngineError::Disconnected)?;
    response_rx.recv().map_err(|_| EngineError::Disconnected)
}

fn execute(command_tx: &Sender<EngineCommand>, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Play { name, options } => {
            let playing = request(command_tx, |response_tx| EngineCommand::Play { name: name.clone(), options, response_tx })??;
            info!("{name}: playing={playing}");
        }
        ConsoleCommand::Stop { name, options } => {
            let playing = request(command_tx, |response_tx| EngineCommand::Stop { name: name.clone(), options, response_tx })??;
            info!("{name}: playing={playing}");
        }
        ConsoleCommand::Toggle { name, options } => {
            let playing = request(command_tx, |response_tx| EngineCommand::Toggle { name: name.clone(), options, response_tx })??;
            info!("{name}: playing={playing}");
        }
        ConsoleCommand::Schedule { name, beats, action, options } => {
            let at = request(command_tx, |response_tx| EngineCommand::Schedule {
                name: name.clone(),
                beats,
                action,
                options,
                response_tx,
            })??;
            info!("{action} {name} scheduled at {at:.3}");
        }
        ConsoleCommand::Wait { beats, options } => {
            let (response_tx, response_rx) = bounded(1);
            command_tx
                .send(EngineCommand::Wait { beats, options, response_tx })
                .map_err(|_| EngineError::Disconnected)?;
            // Answered on a later beat; don't hold up the console
            thread::spawn(move || match response_rx.recv() {
                Ok(Ok(time)) => info!("waited {beats} beat(s), next beat at {time:.3}"),
                Ok(Err(e)) => warn!("wait failed: {e}"),
                Err(_) => {}
            });
        }
        ConsoleCommand::Volume(value) => {
            command_tx
                .send(EngineCommand::SetVolume(value))
                .map_err(|_| EngineError::Disconnected)?;
        }
        ConsoleCommand::Suspend => request(command_tx, |response_tx| EngineCommand::Suspend { response_tx })??,
        ConsoleCommand::Resume => request(command_tx, |response_tx| EngineCommand::Resume { response_tx })??,
        ConsoleCommand::Start => {
            request(command_tx, |response_tx| EngineCommand::Start { autoplay: Vec::new(), response_tx })??
        }
        ConsoleCommand::FullStop => request(command_tx, |response_tx| EngineCommand::FullStop { response_tx })??,
        ConsoleCommand::Status => {
            let status = request(command_tx, |response_tx| EngineCommand::Status { response_tx })?;
            println!(
                "started={} paused={} bpm={} now={:.3} next_beat={} listeners={}",
                status.started,
                status.paused,
                status.bpm,
                status.now,
                status
                    .next_beat
                    .map(|t| format!("{t:.3}"))
                    .unwrap_or_else(|| "-".to_string()),
                status.listeners
            );
            for (name, state) in status.tracks {
                println!("  {name:<16} {state:?}");
            }
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
