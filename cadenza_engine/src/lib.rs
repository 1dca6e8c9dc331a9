pub mod assets;
pub mod clock;
pub mod commands;
pub mod engine; // AudioEngine lives here
pub mod events;
pub mod listeners;
pub mod orchestrator;
pub mod output;
pub mod sound_loop;
pub mod virtual_output;

// Re-exports
pub use assets::{AssetLoader, AudioBuffer, AudioPool, WavLoader};
pub use clock::Clock;
pub use commands::{EngineCommand, EngineStatus};
pub use engine::AudioEngine;
pub use listeners::{BeatCallback, Listeners};
pub use orchestrator::{BeatWait, Orchestrator, PlayersLoading};
pub use output::{OutputBackend, SharedOutput};
pub use sound_loop::LoopState;
pub use virtual_output::{OutputEvent, VirtualOutput};

#[cfg(test)]
mod tests_scenarios;
