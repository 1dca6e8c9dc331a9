use cadenza_shared::{
    Action, Alignment, EngineError, EventOptions, ListenerId, PlayOptions, PlayerConfig, ScheduleOptions, Sink,
};
use crossbeam_channel::Sender;

use crate::listeners::BeatCallback;
use crate::sound_loop::LoopState;

/// Snapshot answered to `EngineCommand::Status`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub started: bool,
    pub paused: bool,
    pub bpm: f64,
    pub now: f64,
    pub next_beat: Option<f64>,
    pub tracks: Vec<(String, LoopState)>,
    pub listeners: usize,
}

pub enum EngineCommand {
    // Lifecycle
    Start { autoplay: Vec<String>, response_tx: Sender<Result<(), EngineError>> },
    FullStop { response_tx: Sender<Result<(), EngineError>> },
    Suspend { response_tx: Sender<Result<(), EngineError>> },
    Resume { response_tx: Sender<Result<(), EngineError>> },
    SetVolume(f32),
    Shutdown,

    // Players
    // Answered once the players are registered, not when the load starts
    AddPlayers { players: Vec<PlayerConfig>, response_tx: Sender<Result<(), EngineError>> },
    SetAlignment { name: String, alignment: Alignment, response_tx: Sender<Result<(), EngineError>> },
    Connect { name: String, sink: Sink, response_tx: Sender<Result<(), EngineError>> },
    Disconnect { name: String, sink: Option<Sink>, response_tx: Sender<Result<(), EngineError>> },

    // Transport, answered with the new playing state
    Play { name: String, options: PlayOptions, response_tx: Sender<Result<bool, EngineError>> },
    Stop { name: String, options: PlayOptions, response_tx: Sender<Result<bool, EngineError>> },
    Toggle { name: String, options: PlayOptions, response_tx: Sender<Result<bool, EngineError>> },
    // Answered with the output time the action takes effect
    Schedule {
        name: String,
        beats: u32,
        action: Action,
        options: ScheduleOptions,
        response_tx: Sender<Result<f64, EngineError>>,
    },
    IsPlaying { name: String, response_tx: Sender<Result<bool, EngineError>> },

    // Beat events
    // Answered when the beat fires; an immediate error if the request is invalid
    Wait { beats: u32, options: EventOptions, response_tx: Sender<Result<f64, EngineError>> },
    AddListener {
        callback: BeatCallback,
        beats: u32,
        options: EventOptions,
        response_tx: Sender<Result<ListenerId, EngineError>>,
    },
    RemoveListener { id: ListenerId, response_tx: Sender<bool> },

    Status { response_tx: Sender<EngineStatus> },
}
