use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cadenza_engine::{AudioBuffer, AudioEngine, EngineCommand, Orchestrator, OutputEvent, SharedOutput, VirtualOutput};
use cadenza_shared::{Action, EngineConfig, EngineError, PlayOptions, PlayerConfig, ScheduleOptions};
use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::Mutex;

// Plays two silent loops against a realtime virtual output and prints what was scheduled.
fn main() -> Result<(), anyhow::Error> {
    println!("[Headless] Starting demo at 240 bpm...");
    let output = Arc::new(Mutex::new(VirtualOutput::realtime().recording(true)));
    let shared: SharedOutput = output.clone();

    let mut orchestrator = Orchestrator::new(EngineConfig::with_bpm(240.0), shared)?;
    // One beat is 0.25s at 240 bpm
    orchestrator.insert_player(PlayerConfig::new("drums", "drums.wav", 4), AudioBuffer::silence("drums", 1.0, 44_100))?;
    orchestrator.insert_player(
        PlayerConfig::new("bass", "bass.wav", 2).relative(),
        AudioBuffer::silence("bass", 0.5, 44_100),
    )?;

    let (tx, rx) = unbounded();
    let engine = AudioEngine::new(orchestrator, rx, Duration::from_millis(10))?;

    let (response_tx, response_rx) = bounded(1);
    send(&tx, EngineCommand::Start { autoplay: vec!["drums".to_string()], response_tx })?;
    response_rx.recv()??;

    let (response_tx, response_rx) = bounded(1);
    send(&tx, EngineCommand::Schedule {
        name: "bass".to_string(),
        beats: 4,
        action: Action::Play,
        options: ScheduleOptions { absolute: true, ..Default::default() },
        response_tx,
    })?;
    println!("[Headless] bass scheduled for {:.3}", response_rx.recv()??);

    thread::sleep(Duration::from_secs(3));

    let (response_tx, response_rx) = bounded(1);
    send(&tx, EngineCommand::Stop {
        name: "drums".to_string(),
        options: PlayOptions { fade: 0.5, ..Default::default() },
        response_tx,
    })?;
    response_rx.recv()??;
    thread::sleep(Duration::from_secs(1));

    let (response_tx, response_rx) = bounded(1);
    send(&tx, EngineCommand::FullStop { response_tx })?;
    response_rx.recv()??;
    send(&tx, EngineCommand::Shutdown)?;
    engine.join();

    for event in output.lock().events() {
        if let OutputEvent::SegmentStarted { buffer, at, .. } = event {
            println!("[Headless] {buffer:<6} segment at {at:.3}");
        }
    }
    println!("[Headless] Done.");
    Ok(())
}

fn send(tx: &Sender<EngineCommand>, command: EngineCommand) -> Result<(), EngineError> {
    tx.send(command).map_err(|_| EngineError::Disconnected)
}
