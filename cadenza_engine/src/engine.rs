use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cadenza_shared::EngineError;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::commands::EngineCommand;
use crate::orchestrator::Orchestrator;

/// Runs an orchestrator on its own thread: commands are applied as they arrive and
/// the orchestrator is polled every `poll_interval`.
pub struct AudioEngine {
    is_running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    diagnostics: Receiver<EngineError>,
}

impl AudioEngine {
    pub fn new(
        orchestrator: Orchestrator,
        command_rx: Receiver<EngineCommand>,
        poll_interval: Duration,
    ) -> Result<Self, EngineError> {
        let is_running = Arc::new(AtomicBool::new(true));
        let diagnostics = orchestrator.diagnostics();
        let running = is_running.clone();
        let worker = thread::Builder::new()
            .name("cadenza-engine".to_string())
            .spawn(move || run(orchestrator, command_rx, running, poll_interval))
            .map_err(|e| EngineError::State(format!("could not spawn the engine thread: {e}")))?;
        info!("[AudioEngine] Running, polling every {:?}", poll_interval);
        Ok(Self {
            is_running,
            worker: Some(worker),
            diagnostics,
        })
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Listener failures raised on the engine thread
    pub fn diagnostics(&self) -> Receiver<EngineError> {
        self.diagnostics.clone()
    }

    /// Wait for the engine thread to exit after a `Shutdown` command or after every
    /// command sender was dropped.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(mut orchestrator: Orchestrator, command_rx: Receiver<EngineCommand>, running: Arc<AtomicBool>, poll_interval: Duration) {
    let mut next_poll = Instant::now() + poll_interval;
    while running.load(Ordering::Relaxed) {
        match command_rx.recv_deadline(next_poll) {
            Ok(cmd) => {
                if !apply(&mut orchestrator, cmd) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                orchestrator.poll();
                next_poll += poll_interval;
                // Don't try to make up for a stall one poll at a time
                let now = Instant::now();
                if next_poll < now {
                    next_poll = now + poll_interval;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    running.store(false, Ordering::Relaxed);
    if orchestrator.is_started() {
        let _ = orchestrator.full_stop();
    }
    info!("[AudioEngine] Stopped");
}

/// Apply one command. Returns false once the engine should shut down.
fn apply(orchestrator: &mut Orchestrator, cmd: EngineCommand) -> bool {
    match cmd {
        EngineCommand::Start { autoplay, response_tx } => {
            let _ = response_tx.send(orchestrator.start(&autoplay));
        }
        EngineCommand::FullStop { response_tx } => {
            let _ = response_tx.send(orchestrator.full_stop());
        }
        EngineCommand::Suspend { response_tx } => {
            let _ = response_tx.send(orchestrator.suspend());
        }
        EngineCommand::Resume { response_tx } => {
            let _ = response_tx.send(orchestrator.resume());
        }
        EngineCommand::SetVolume(value) => {
            orchestrator.set_volume(value);
        }
        EngineCommand::Shutdown => {
            debug!("[AudioEngine] Shutdown requested");
            return false;
        }
        EngineCommand::AddPlayers { players, response_tx } => {
            let error_tx = response_tx.clone();
            let on_done = Box::new(move |result| {
                let _ = response_tx.send(result);
            });
            if let Err(e) = orchestrator.add_players_with(players, on_done) {
                let _ = error_tx.send(Err(e));
            }
        }
        EngineCommand::SetAlignment { name, alignment, response_tx } => {
            let _ = response_tx.send(orchestrator.set_alignment(&name, alignment));
        }
        EngineCommand::Connect { name, sink, response_tx } => {
            let _ = response_tx.send(orchestrator.connect(&name, &sink));
        }
        EngineCommand::Disconnect { name, sink, response_tx } => {
            let _ = response_tx.send(orchestrator.disconnect(&name, sink.as_ref()));
        }
        EngineCommand::Play { name, options, response_tx } => {
            let _ = response_tx.send(orchestrator.play(&name, options));
        }
        EngineCommand::Stop { name, options, response_tx } => {
            let _ = response_tx.send(orchestrator.stop(&name, options));
        }
        EngineCommand::Toggle { name, options, response_tx } => {
            let _ = response_tx.send(orchestrator.toggle(&name, options));
        }
        EngineCommand::Schedule { name, beats, action, options, response_tx } => {
            let _ = response_tx.send(orchestrator.schedule(&name, beats, action, options));
        }
        EngineCommand::IsPlaying { name, response_tx } => {
            let _ = response_tx.send(orchestrator.is_playing(&name));
        }
        EngineCommand::Wait { beats, options, response_tx } => {
            let beat_tx = response_tx.clone();
            let registered = orchestrator.wait_with(beats, options, move |time| {
                let _ = beat_tx.send(Ok(time));
            });
            if let Err(e) = registered {
                let _ = response_tx.send(Err(e));
            }
        }
        EngineCommand::AddListener { callback, beats, options, response_tx } => {
            let _ = response_tx.send(orchestrator.add_listener_boxed(callback, beats, options));
        }
        EngineCommand::RemoveListener { id, response_tx } => {
            let _ = response_tx.send(orchestrator.remove_listener(id));
        }
        EngineCommand::Status { response_tx } => {
            let _ = response_tx.send(orchestrator.status());
        }
    }
    true
}
